use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use tracing::warn;

use crate::auth::jwt::JwtKeys;
use crate::auth::repo_types::{Role, User};
use crate::error::AuthError;
use crate::state::AppState;

/// Pulls `Bearer <token>` out of the Authorization header. Missing
/// header and wrong scheme collapse into the same outcome.
fn bearer_token(parts: &Parts) -> Result<&str, AuthError> {
    let header = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::Unauthenticated)?;

    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .ok_or(AuthError::Unauthenticated)
}

/// Authenticated caller. Verifies the session token, then re-fetches
/// the live record so authorization always sees the current role, not
/// the role embedded at issuance.
pub struct AuthUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;

        let keys = JwtKeys::from_ref(state);
        let claims = keys.verify(token).map_err(|_| {
            warn!("invalid or expired session token");
            AuthError::Unauthenticated
        })?;

        let user = User::find_by_id(&state.db, claims.sub)
            .await?
            .ok_or_else(|| {
                warn!(user_id = %claims.sub, "token subject no longer exists");
                AuthError::Unauthenticated
            })?;

        Ok(AuthUser(user))
    }
}

/// Authenticated caller whose live role is `admin`. Rejection here is
/// Forbidden, a different failure class from Unauthenticated.
pub struct AdminUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        if user.role != Role::Admin {
            warn!(user_id = %user.id, role = ?user.role, "admin route refused");
            return Err(AuthError::Forbidden);
        }
        Ok(AdminUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_with_auth(value: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/");
        if let Some(v) = value {
            builder = builder.header(axum::http::header::AUTHORIZATION, v);
        }
        let (parts, _) = builder.body(()).expect("request builds").into_parts();
        parts
    }

    #[test]
    fn bearer_token_accepts_both_scheme_spellings() {
        let parts = parts_with_auth(Some("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&parts).expect("token"), "abc.def.ghi");

        let parts = parts_with_auth(Some("bearer abc.def.ghi"));
        assert_eq!(bearer_token(&parts).expect("token"), "abc.def.ghi");
    }

    #[test]
    fn bearer_token_rejects_missing_header() {
        let parts = parts_with_auth(None);
        assert!(matches!(
            bearer_token(&parts),
            Err(AuthError::Unauthenticated)
        ));
    }

    #[test]
    fn bearer_token_rejects_other_schemes() {
        let parts = parts_with_auth(Some("Basic dXNlcjpwdw=="));
        assert!(matches!(
            bearer_token(&parts),
            Err(AuthError::Unauthenticated)
        ));
    }
}
