use axum::{body::Body, extract::Request, middleware::Next, response::Response};
use contracts::system::auth::TokenClaims;

use crate::shared::error::AppError;

fn bearer_claims(req: &Request<Body>) -> Result<TokenClaims, AppError> {
    let auth_header = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or(AppError::Unauthorized("auth.required"))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(AppError::Unauthorized("auth.required"))?;

    super::jwt::validate_token(token).map_err(|_| AppError::Unauthorized("auth.invalid_token"))
}

/// Middleware that requires valid JWT authentication
pub async fn require_auth(mut req: Request<Body>, next: Next) -> Result<Response, AppError> {
    let claims = bearer_claims(&req)?;
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Middleware that requires admin privileges
pub async fn require_admin(mut req: Request<Body>, next: Next) -> Result<Response, AppError> {
    let claims = bearer_claims(&req)?;
    if !claims.is_admin {
        return Err(AppError::Forbidden("auth.admin_required"));
    }
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
