use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;

/// Stand-in for the out-of-scope auth middleware's collaborator contract:
/// a validated end-user identity string, already checked and placed on the
/// request by something upstream of this gateway (JWT verification, session
/// lookup, whatever the real deployment uses). This extractor only reads
/// that value back out; it performs no authentication of its own.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or((StatusCode::UNAUTHORIZED, "missing authenticated user context"))
    }
}
