pub mod domain;
pub mod handlers;
pub mod routes;
pub mod shared;
pub mod system;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use axum::http::{header, Method};
    use axum::middleware;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::services::ServeDir;

    use crate::domain::a001_group::{invite::InviteService, service::GroupService};
    use crate::domain::a003_product::catalog::SqlProductCatalog;
    use crate::shared::clock::{Clock, SystemClock};
    use crate::shared::config;
    use crate::shared::context::{self, AppContext};
    use crate::shared::media::LocalMediaStore;

    system::tracing::initialize()?;

    let config = config::load_config()?;

    // Initialize database (schema is created on first start)
    let db_path = config::get_database_path(&config).to_string_lossy().to_string();
    let db = shared::data::db::initialize_database(Some(db_path.as_str()))
        .await
        .map_err(|e| anyhow::anyhow!("db init failed: {e}"))?;

    system::auth::jwt::init_access_secret(&db).await?;

    // Ensure admin user exists
    system::initialization::ensure_admin_user_exists(&db).await?;

    let invite_secret =
        system::auth::jwt::resolve_invite_secret(&db, config.invite.secret.as_deref()).await?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let media_dir = config::resolve_path(&config.media.dir);
    let media = Arc::new(LocalMediaStore::new(
        media_dir.clone(),
        config.media.public_prefix.clone(),
    ));

    let groups = GroupService::new(
        db.clone(),
        Arc::new(SqlProductCatalog::new(db.clone())),
        media,
        clock.clone(),
    );
    let invites = InviteService::new(
        db.clone(),
        clock.clone(),
        invite_secret,
        config.invite.join_url.clone(),
    );
    context::initialize(AppContext::new(groups, invites))?;

    // Deadline sweep: invalid cron or timezone stops the startup
    let worker = system::tasks::initialization::initialize_scheduled_tasks(
        db.clone(),
        clock,
        &config.sweep,
    )?;
    tokio::spawn(Arc::new(worker).run_loop());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::AUTHORIZATION]);

    let app = routes::configure_routes()
        .nest_service(&config.media.public_prefix, ServeDir::new(media_dir))
        .layer(middleware::from_fn(
            system::middleware::request_logger::request_logger,
        ))
        .layer(cors);

    let port = config.server.port;
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();

    tracing::info!("Attempting to bind server to http://{}", addr);
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => {
            tracing::info!("Server successfully bound to {}", addr);
            listener
        }
        Err(e) => {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                tracing::error!(
                    "Error: Port {} is already in use. Please ensure no other process is using this port.",
                    port
                );
            } else {
                tracing::error!("Failed to bind to port {}. Error: {}", port, e);
            }
            // Propagate the error to stop the application
            return Err(e.into());
        }
    };

    axum::serve(listener, app).await?;

    Ok(())
}
