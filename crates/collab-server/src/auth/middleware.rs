use axum::{
    extract::{Query, Request, State},
    middleware::Next,
    response::Response,
};
use collab_shared::Session;
use serde::Deserialize;

use crate::{error::AppError, routes::AppState};

use super::jwt::verify_access_token;

#[derive(Deserialize)]
struct TokenQuery {
    access_token: Option<String>,
}

/// Bearer token from the `Authorization` header, or from the `access_token`
/// query parameter for WebSocket handshakes where browsers cannot set headers.
fn bearer_token(request: &Request) -> Option<String> {
    if let Some(header) = request.headers().get("Authorization") {
        return header
            .to_str()
            .ok()?
            .strip_prefix("Bearer ")
            .map(str::to_string);
    }

    let Query(query) = Query::<TokenQuery>::try_from_uri(request.uri()).ok()?;
    query.access_token
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&request).ok_or(AppError::Unauthenticated)?;
    let claims = verify_access_token(&token, &state.config.jwt_secret)?;

    request.extensions_mut().insert(Session::new(claims.sub));

    Ok(next.run(request).await)
}
