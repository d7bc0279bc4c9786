use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, StatusCode},
    Json,
};
use tracing::warn;
use uuid::Uuid;

use crate::auth::{claims::TokenKind, dto::MessageResponse, jwt::TokenCodec};

/// Caller identity taken from a verified `Authorization: Bearer` access token.
pub struct AuthUser(pub Uuid);

fn unauthorized(message: &str) -> (StatusCode, Json<MessageResponse>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(MessageResponse {
            message: message.to_string(),
        }),
    )
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    TokenCodec: FromRef<S>,
{
    type Rejection = (StatusCode, Json<MessageResponse>);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| unauthorized("Missing Authorization header"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .or_else(|| auth_header.strip_prefix("bearer "))
            .ok_or_else(|| unauthorized("Invalid Authorization header"))?;

        let codec = TokenCodec::from_ref(state);
        let claims = codec.verify(token).map_err(|e| {
            warn!(reason = %e, "access token rejected");
            unauthorized("Invalid or expired token")
        })?;

        if claims.kind != TokenKind::Access {
            return Err(unauthorized("Access token required"));
        }

        Ok(AuthUser(claims.sub))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::test_config;
    use axum::http::Request;

    async fn extract(codec: &TokenCodec, header: Option<&str>) -> Result<Uuid, StatusCode> {
        let mut req = Request::builder().uri("/api/users/me");
        if let Some(h) = header {
            req = req.header("authorization", h);
        }
        let (mut parts, _) = req.body(()).unwrap().into_parts();
        AuthUser::from_request_parts(&mut parts, codec)
            .await
            .map(|AuthUser(id)| id)
            .map_err(|(status, _)| status)
    }

    #[tokio::test]
    async fn accepts_access_token() {
        let codec = TokenCodec::new(&test_config("s"));
        let user_id = Uuid::new_v4();
        let token = codec.issue(user_id, TokenKind::Access).unwrap().token;
        let got = extract(&codec, Some(&format!("Bearer {token}"))).await;
        assert_eq!(got, Ok(user_id));
    }

    #[tokio::test]
    async fn rejects_missing_header_refresh_token_and_garbage() {
        let codec = TokenCodec::new(&test_config("s"));
        let refresh = codec.issue(Uuid::new_v4(), TokenKind::Refresh).unwrap().token;

        assert_eq!(extract(&codec, None).await, Err(StatusCode::UNAUTHORIZED));
        assert_eq!(
            extract(&codec, Some(&format!("Bearer {refresh}"))).await,
            Err(StatusCode::UNAUTHORIZED)
        );
        assert_eq!(
            extract(&codec, Some("Bearer nope")).await,
            Err(StatusCode::UNAUTHORIZED)
        );
        assert_eq!(
            extract(&codec, Some("Basic abc")).await,
            Err(StatusCode::UNAUTHORIZED)
        );
    }
}
