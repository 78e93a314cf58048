//! HTTP token endpoints: refresh, logout, logout everywhere.

use std::sync::Arc;

use {
    agora_auth::TokenError,
    axum::{
        Json,
        extract::State,
        http::{HeaderMap, StatusCode, header::AUTHORIZATION},
        response::{IntoResponse, Response},
    },
    serde::Deserialize,
    tracing::warn,
};

use crate::state::GatewayState;

#[derive(Debug, Deserialize)]
pub struct RenewalRequest {
    pub renewal_token: String,
    pub user_id: String,
}

/// [`TokenError`] as an HTTP response. Every authentication failure maps to
/// the same 401 body.
#[derive(Debug)]
pub struct ApiError(pub TokenError);

impl From<TokenError> for ApiError {
    fn from(e: TokenError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            TokenError::AuthenticationFailed => (StatusCode::UNAUTHORIZED, "authentication_failed"),
            TokenError::StorageUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable")
            },
            TokenError::Signing(e) => {
                warn!(error = %e, "token signing failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            },
        };
        (status, Json(serde_json::json!({ "error": code }))).into_response()
    }
}

/// `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim())
        .filter(|t| !t.is_empty())
}

pub async fn refresh_handler(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<RenewalRequest>,
) -> Result<Response, ApiError> {
    let pair = state
        .issuer
        .refresh(&req.renewal_token, &req.user_id)
        .await?;
    Ok(Json(pair).into_response())
}

/// Always 204 on a well-formed request, whether or not anything was revoked.
pub async fn logout_handler(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<RenewalRequest>,
) -> Result<StatusCode, ApiError> {
    match state.issuer.logout(&req.renewal_token, &req.user_id).await {
        Ok(_) | Err(TokenError::AuthenticationFailed) => Ok(StatusCode::NO_CONTENT),
        Err(e) => Err(e.into()),
    }
}

pub async fn logout_all_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let token = bearer_token(&headers).ok_or(TokenError::AuthenticationFailed)?;
    let claims = state.issuer.verify_session(token)?;
    let revoked = state.issuer.logout_everywhere(&claims.sub).await?;
    Ok(Json(serde_json::json!({ "revoked": revoked })).into_response())
}

#[cfg(test)]
mod tests {
    use {super::*, agora_auth::renewal::StorageError, axum::http::HeaderValue};

    #[test]
    fn bearer_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer a.b.c"));
        assert_eq!(bearer_token(&headers), Some("a.b.c"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer  x.y.z "));
        assert_eq!(bearer_token(&headers), Some("x.y.z"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn errors_map_to_statuses() {
        assert_eq!(
            ApiError(TokenError::AuthenticationFailed)
                .into_response()
                .status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError(TokenError::StorageUnavailable(StorageError::PoolClosed))
                .into_response()
                .status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
