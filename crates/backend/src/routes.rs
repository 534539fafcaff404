use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post, put},
    Router,
};

use crate::{handlers, system};

/// Максимальный размер загружаемого изображения группы
const IMAGE_BODY_LIMIT: usize = 10 * 1024 * 1024;

/// Конфигурация всех роутов приложения
pub fn configure_routes() -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        // ========================================
        // SYSTEM AUTH ROUTES (PUBLIC)
        // ========================================
        .route(
            "/api/system/auth/login",
            post(system::handlers::auth::login),
        )
        .route(
            "/api/system/auth/refresh",
            post(system::handlers::auth::refresh),
        )
        .route(
            "/api/system/auth/logout",
            post(system::handlers::auth::logout),
        )
        // System auth routes (protected)
        .route(
            "/api/system/auth/me",
            get(system::handlers::auth::current_user)
                .layer(middleware::from_fn(system::auth::middleware::require_auth)),
        )
        // System users management (admin only)
        .route(
            "/api/system/users",
            get(system::handlers::users::list)
                .post(system::handlers::users::create)
                .layer(middleware::from_fn(system::auth::middleware::require_admin)),
        )
        // ========================================
        // GROUPS (a001)
        // ========================================
        .merge(group_routes())
        .route(
            "/api/groups/:id/payments",
            post(handlers::a001_group::record_payment)
                .layer(middleware::from_fn(system::auth::middleware::require_admin)),
        )
}

/// Клиентские роуты групп, все за require_auth
fn group_routes() -> Router {
    Router::new()
        .route(
            "/api/groups",
            post(handlers::a001_group::create).get(handlers::a001_group::list),
        )
        .route(
            "/api/groups/image",
            put(handlers::a001_group::upload_image).layer(DefaultBodyLimit::max(IMAGE_BODY_LIMIT)),
        )
        .route(
            "/api/groups/image/remove",
            delete(handlers::a001_group::remove_image),
        )
        .route("/api/groups/join", post(handlers::a001_group::join))
        .route(
            "/api/groups/:id",
            get(handlers::a001_group::get_by_id)
                .put(handlers::a001_group::update)
                .delete(handlers::a001_group::delete),
        )
        .route("/api/groups/:id/invite", get(handlers::a001_group::invite))
        .route(
            "/api/groups/:id/contributors",
            post(handlers::a001_group::add_contributors),
        )
        .route(
            "/api/groups/:id/contributors/:client",
            delete(handlers::a001_group::remove_contributor),
        )
        .route_layer(middleware::from_fn(system::auth::middleware::require_auth))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn group_routes_require_a_bearer_token() {
        for (method, uri) in [
            ("GET", "/api/groups"),
            ("POST", "/api/groups/join"),
            ("GET", "/api/groups/00000000-0000-0000-0000-000000000000/invite"),
            ("DELETE", "/api/groups/image/remove?id=x"),
        ] {
            let response = configure_routes()
                .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{} {}", method, uri);

            let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(json["code"], 401);
            assert_eq!(json["message"], "auth.required");
        }
    }

    #[tokio::test]
    async fn health_is_public() {
        let response = configure_routes()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
