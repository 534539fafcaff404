use once_cell::sync::OnceCell;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, Statement,
};

static DB_CONN: OnceCell<DatabaseConnection> = OnceCell::new();

/// Таблицы в порядке создания
const TABLES: &[(&str, &str)] = &[
    (
        "sys_users",
        r#"
        CREATE TABLE sys_users (
            id TEXT PRIMARY KEY NOT NULL,
            username TEXT NOT NULL UNIQUE,
            email TEXT,
            password_hash TEXT NOT NULL,
            full_name TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            is_admin INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            last_login_at TEXT,
            created_by TEXT
        );
        "#,
    ),
    (
        "sys_refresh_tokens",
        r#"
        CREATE TABLE sys_refresh_tokens (
            id TEXT PRIMARY KEY NOT NULL,
            user_id TEXT NOT NULL,
            token_hash TEXT NOT NULL UNIQUE,
            expires_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            revoked_at TEXT
        );
        "#,
    ),
    (
        "sys_settings",
        r#"
        CREATE TABLE sys_settings (
            key TEXT PRIMARY KEY NOT NULL,
            value TEXT NOT NULL,
            description TEXT,
            created_at TEXT,
            updated_at TEXT
        );
        "#,
    ),
    (
        "a002_store",
        r#"
        CREATE TABLE a002_store (
            id TEXT PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT,
            updated_at TEXT
        );
        "#,
    ),
    (
        "a003_product",
        r#"
        CREATE TABLE a003_product (
            id TEXT PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            price REAL NOT NULL DEFAULT 0,
            store_id TEXT,
            image TEXT,
            created_at TEXT,
            updated_at TEXT
        );
        "#,
    ),
    (
        "a001_group",
        r#"
        CREATE TABLE a001_group (
            id TEXT PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            image TEXT,
            product_id TEXT NOT NULL,
            store_id TEXT NOT NULL,
            target_amount REAL NOT NULL DEFAULT 0,
            collected_amount REAL NOT NULL DEFAULT 0,
            creator_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            dead_line TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 0
        );
        "#,
    ),
    (
        "a001_group_contributor",
        r#"
        CREATE TABLE a001_group_contributor (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            group_id TEXT NOT NULL REFERENCES a001_group(id) ON DELETE CASCADE,
            client_id TEXT NOT NULL,
            paid_amount REAL NOT NULL DEFAULT 0,
            paid_at TEXT,
            transaction_status INTEGER NOT NULL DEFAULT 0,
            transaction_id TEXT NOT NULL DEFAULT '',
            UNIQUE (group_id, client_id)
        );
        "#,
    ),
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_a001_group_sweep ON a001_group (status, dead_line);",
    "CREATE INDEX IF NOT EXISTS idx_a001_group_creator ON a001_group (creator_id);",
    "CREATE INDEX IF NOT EXISTS idx_a001_group_contributor_client ON a001_group_contributor (client_id);",
    "CREATE INDEX IF NOT EXISTS idx_sys_refresh_tokens_user ON sys_refresh_tokens (user_id);",
];

pub async fn initialize_database(db_path: Option<&str>) -> anyhow::Result<DatabaseConnection> {
    let db_file = db_path.unwrap_or("target/db/app.db");
    if let Some(parent) = std::path::Path::new(db_file).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let absolute_path = if std::path::Path::new(db_file).is_absolute() {
        std::path::PathBuf::from(db_file)
    } else {
        std::env::current_dir()?.join(db_file)
    };
    // Normalize path separators and ensure proper URL form on Windows
    let normalized = absolute_path.to_string_lossy().replace('\\', "/");
    let needs_leading_slash = !normalized.starts_with('/') && normalized.contains(':');
    let prefix = if needs_leading_slash { "/" } else { "" };
    let db_url = format!("sqlite://{}{}?mode=rwc", prefix, normalized);

    let mut options = ConnectOptions::new(db_url);
    options.sqlx_logging(false);
    let conn = Database::connect(options).await?;

    apply_schema(&conn).await?;

    DB_CONN
        .set(conn.clone())
        .map_err(|_| anyhow::anyhow!("Failed to set DB_CONN"))?;
    Ok(conn)
}

/// Создать недостающие таблицы и индексы
pub async fn apply_schema(conn: &DatabaseConnection) -> anyhow::Result<()> {
    conn.execute(Statement::from_string(
        DatabaseBackend::Sqlite,
        "PRAGMA foreign_keys = ON;".to_string(),
    ))
    .await?;

    for (table, ddl) in TABLES {
        let exists = conn
            .query_all(Statement::from_sql_and_values(
                DatabaseBackend::Sqlite,
                "SELECT name FROM sqlite_master WHERE type='table' AND name = ?",
                [(*table).into()],
            ))
            .await?;

        if exists.is_empty() {
            tracing::info!("Creating {} table", table);
            conn.execute(Statement::from_string(
                DatabaseBackend::Sqlite,
                ddl.to_string(),
            ))
            .await?;
        }
    }

    for index in INDEXES {
        conn.execute(Statement::from_string(
            DatabaseBackend::Sqlite,
            index.to_string(),
        ))
        .await?;
    }

    Ok(())
}

/// In-memory база со схемой. Одно соединение, иначе каждое получит свою пустую БД.
#[cfg(test)]
pub async fn connect_in_memory() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:".to_string());
    options.max_connections(1).min_connections(1).sqlx_logging(false);
    let conn = Database::connect(options)
        .await
        .expect("in-memory sqlite");
    apply_schema(&conn).await.expect("schema");
    conn
}

/// Файловая база во временном каталоге с пулом из нескольких соединений.
/// Нужна там, где запросы должны реально идти параллельно.
#[cfg(test)]
pub struct TempDb {
    pub conn: DatabaseConnection,
    path: std::path::PathBuf,
}

#[cfg(test)]
impl TempDb {
    pub async fn connect(max_connections: u32) -> Self {
        let path = std::env::temp_dir().join(format!("groupbuy-{}.db", uuid::Uuid::new_v4()));
        let mut options = ConnectOptions::new(format!("sqlite://{}?mode=rwc", path.display()));
        options
            .max_connections(max_connections)
            .min_connections(max_connections)
            .sqlx_logging(false);
        let conn = Database::connect(options).await.expect("temp sqlite");
        apply_schema(&conn).await.expect("schema");
        Self { conn, path }
    }
}

#[cfg(test)]
impl Drop for TempDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let mut file = self.path.clone().into_os_string();
            file.push(suffix);
            let _ = std::fs::remove_file(file);
        }
    }
}

pub fn get_connection() -> &'static DatabaseConnection {
    DB_CONN
        .get()
        .expect("Database connection has not been initialized")
}
