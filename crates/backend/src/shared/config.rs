use anyhow::Context;
use chrono::{FixedOffset, Offset, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub invite: InviteConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub media: MediaConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "target/db/app.db".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

fn default_port() -> u16 {
    3000
}

/// Настройки пригласительных ссылок
#[derive(Debug, Deserialize, Clone)]
pub struct InviteConfig {
    /// Секрет подписи. Если не задан, генерируется и хранится в sys_settings
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "default_join_url")]
    pub join_url: String,
}

impl Default for InviteConfig {
    fn default() -> Self {
        Self {
            secret: None,
            join_url: default_join_url(),
        }
    }
}

fn default_join_url() -> String {
    "http://localhost:8080/groups/join".to_string()
}

/// Расписание фонового закрытия групп
#[derive(Debug, Deserialize, Clone)]
pub struct SweepConfig {
    /// Cron-выражение с секундами: `sec min hour day month weekday`
    #[serde(default = "default_sweep_cron")]
    pub cron: String,
    /// `UTC` или фиксированное смещение вида `+03:00`
    #[serde(default = "default_sweep_timezone")]
    pub timezone: String,
    #[serde(default = "default_true")]
    pub run_on_start: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            cron: default_sweep_cron(),
            timezone: default_sweep_timezone(),
            run_on_start: true,
        }
    }
}

fn default_sweep_cron() -> String {
    "0 0 0 * * *".to_string()
}

fn default_sweep_timezone() -> String {
    "UTC".to_string()
}

fn default_true() -> bool {
    true
}

impl SweepConfig {
    pub fn schedule(&self) -> anyhow::Result<cron::Schedule> {
        cron::Schedule::from_str(&self.cron)
            .map_err(|e| anyhow::anyhow!("Invalid sweep cron '{}': {}", self.cron, e))
    }

    pub fn offset(&self) -> anyhow::Result<FixedOffset> {
        parse_offset(&self.timezone)
    }
}

fn parse_offset(value: &str) -> anyhow::Result<FixedOffset> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("utc") || value == "Z" {
        return Ok(Utc.fix());
    }

    let (sign, rest) = match value.chars().next() {
        Some('+') => (1, &value[1..]),
        Some('-') => (-1, &value[1..]),
        _ => anyhow::bail!("Invalid timezone offset '{}'", value),
    };
    let (hours, minutes) = rest
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("Invalid timezone offset '{}'", value))?;
    let hours: i32 = hours.parse()?;
    let minutes: i32 = minutes.parse()?;
    if hours > 23 || minutes > 59 {
        anyhow::bail!("Invalid timezone offset '{}'", value);
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| anyhow::anyhow!("Invalid timezone offset '{}'", value))
}

#[derive(Debug, Deserialize, Clone)]
pub struct MediaConfig {
    #[serde(default = "default_media_dir")]
    pub dir: String,
    /// URL-префикс, под которым раздаются файлы
    #[serde(default = "default_media_prefix")]
    pub public_prefix: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            dir: default_media_dir(),
            public_prefix: default_media_prefix(),
        }
    }
}

fn default_media_dir() -> String {
    "target/media".to_string()
}

fn default_media_prefix() -> String {
    "/media".to_string()
}

impl Config {
    /// Переопределение настроек из окружения.
    /// Нераспознанное значение останавливает запуск, а не игнорируется.
    pub fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(v) = get("DATABASE_PATH") {
            self.database.path = v;
        }
        if let Some(v) = get("SERVER_PORT") {
            self.server.port = v
                .trim()
                .parse()
                .with_context(|| format!("Invalid SERVER_PORT '{}'", v))?;
        }
        if let Some(v) = get("INVITE_SECRET").filter(|v| !v.is_empty()) {
            self.invite.secret = Some(v);
        }
        if let Some(v) = get("INVITE_JOIN_URL") {
            self.invite.join_url = v;
        }
        if let Some(v) = get("GROUP_SWEEP_CRON") {
            self.sweep.cron = v;
        }
        if let Some(v) = get("GROUP_SWEEP_TZ") {
            self.sweep.timezone = v;
        }
        if let Some(v) = get("GROUP_SWEEP_RUN_ON_START") {
            self.sweep.run_on_start = v
                .trim()
                .parse()
                .with_context(|| {
                    format!("Invalid GROUP_SWEEP_RUN_ON_START '{}', expected true or false", v)
                })?;
        }
        if let Some(v) = get("MEDIA_DIR") {
            self.media.dir = v;
        }
        Ok(())
    }
}

/// Default configuration embedded in the binary
const DEFAULT_CONFIG: &str = r#"
[database]
path = "target/db/app.db"

[server]
port = 3000

[invite]
join_url = "http://localhost:8080/groups/join"

[sweep]
cron = "0 0 0 * * *"
timezone = "UTC"
run_on_start = true

[media]
dir = "target/media"
public_prefix = "/media"
"#;

/// Load configuration from config.toml file
///
/// Search order:
/// 1. Next to the executable (for production)
/// 2. Falls back to embedded default config
///
/// Environment variables are applied on top.
pub fn load_config() -> anyhow::Result<Config> {
    let mut config = read_config_file()?;
    config.apply_overrides(|key| std::env::var(key).ok())?;
    Ok(config)
}

fn read_config_file() -> anyhow::Result<Config> {
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            let config_path = exe_dir.join("config.toml");

            if config_path.exists() {
                tracing::info!("Loading config from: {}", config_path.display());
                let contents = std::fs::read_to_string(&config_path)?;
                let config: Config = toml::from_str(&contents)?;
                return Ok(config);
            } else {
                tracing::warn!("config.toml not found at: {}", config_path.display());
            }
        }
    }

    tracing::info!("Using default embedded configuration");
    let config: Config = toml::from_str(DEFAULT_CONFIG)?;
    Ok(config)
}

/// Resolves relative paths relative to the executable directory
pub fn resolve_path(path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        return p.to_path_buf();
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            return exe_dir.join(p);
        }
    }

    PathBuf::from(path)
}

/// Get the database file path from configuration
pub fn get_database_path(config: &Config) -> PathBuf {
    resolve_path(&config.database.path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_loads() {
        let config: Config = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.database.path, "target/db/app.db");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.sweep.cron, "0 0 0 * * *");
        assert!(config.sweep.run_on_start);
        assert!(config.invite.secret.is_none());
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config: Config = toml::from_str("[database]\npath = \"x.db\"\n").unwrap();
        assert_eq!(config.media.public_prefix, "/media");
        assert_eq!(config.sweep.timezone, "UTC");
    }

    #[test]
    fn env_overrides_win() {
        let mut config: Config = toml::from_str(DEFAULT_CONFIG).unwrap();
        let env: HashMap<&str, &str> = [
            ("SERVER_PORT", "8081"),
            ("INVITE_SECRET", "s3cret"),
            ("GROUP_SWEEP_CRON", "0 */5 * * * *"),
            ("GROUP_SWEEP_RUN_ON_START", "false"),
            ("GROUP_SWEEP_TZ", "+03:00"),
        ]
        .into_iter()
        .collect();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.server.port, 8081);
        assert_eq!(config.invite.secret.as_deref(), Some("s3cret"));
        assert!(!config.sweep.run_on_start);
        assert!(config.sweep.schedule().is_ok());
        assert_eq!(config.sweep.offset().unwrap().local_minus_utc(), 3 * 3600);
    }

    #[test]
    fn unparseable_overrides_are_rejected() {
        let mut config: Config = toml::from_str(DEFAULT_CONFIG).unwrap();
        let err = config
            .apply_overrides(|k| (k == "GROUP_SWEEP_RUN_ON_START").then(|| "yes".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("GROUP_SWEEP_RUN_ON_START"));
        assert!(config.sweep.run_on_start);

        let err = config
            .apply_overrides(|k| (k == "SERVER_PORT").then(|| "80a".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("SERVER_PORT"));
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn sweep_offset_parsing() {
        assert_eq!(parse_offset("UTC").unwrap().local_minus_utc(), 0);
        assert_eq!(parse_offset("-05:30").unwrap().local_minus_utc(), -(5 * 3600 + 30 * 60));
        assert!(parse_offset("Europe/Moscow").is_err());
        assert!(parse_offset("+25:00").is_err());
    }

    #[test]
    fn invalid_cron_is_reported() {
        let sweep = SweepConfig {
            cron: "every day".into(),
            ..Default::default()
        };
        assert!(sweep.schedule().is_err());
    }
}
