use axum::{
    extract::{FromRef, Query, State},
    http::StatusCode,
    response::Redirect,
    routing::{get, post},
    Json, Router,
};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{
            LoginRequest, LoginResponse, MessageResponse, PublicUser, SignupRequest,
            VerifyEmailQuery,
        },
        jwt::JwtKeys,
        password::{hash_password, verify_password, DUMMY_HASH},
        repo::NewUser,
        repo_types::User,
        extractors::AuthUser,
        verification::issue_verification_token,
    },
    error::{AuthError, FieldError},
    outbox::PendingEmail,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/verify-email", get(verify_email))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Lower-cased, trimmed form used for storage lookups and uniqueness.
/// Accounts differing only by case collapse to one.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_signup(payload: &SignupRequest, email: &str) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if payload.display_name.trim().len() < 2 {
        errors.push(FieldError {
            field: "display_name",
            message: "Display name must be at least 2 characters".into(),
        });
    }
    if !is_valid_email(email) {
        errors.push(FieldError {
            field: "email",
            message: "Please provide a valid email".into(),
        });
    }
    if payload.password.len() < 8 {
        errors.push(FieldError {
            field: "password",
            message: "Password must be at least 8 characters".into(),
        });
    }
    errors
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), AuthError> {
    let email = normalize_email(&payload.email);

    let errors = validate_signup(&payload, &email);
    if !errors.is_empty() {
        warn!(count = errors.len(), "signup validation failed");
        return Err(AuthError::Validation(errors));
    }

    let lookup = state.cipher.lookup_key(&email);

    // Fast-path check; the unique index on email_lookup still decides
    // the race between two concurrent signups.
    if User::find_by_lookup(&state.db, &lookup).await?.is_some() {
        warn!("signup for an already-registered email");
        return Err(AuthError::Conflict);
    }

    let password_hash = hash_password(&payload.password)?;
    let display_name = payload.display_name.trim();

    let (token, expiry) = issue_verification_token(state.config.verification_ttl_minutes);
    let verification_link = format!(
        "{}/api/v1/auth/verify-email?token={}",
        state.config.public_base_url, token
    );

    let new_user = NewUser {
        display_name: state.cipher.seal(display_name),
        email: state.cipher.seal(&email),
        email_lookup: lookup,
        password_hash,
        verification_token: token,
        verification_token_expiry: expiry,
    };
    let pending = PendingEmail {
        recipient: state.cipher.seal(&email),
        display_name: state.cipher.seal(display_name),
        verification_link,
    };

    let user = User::create_with_outbox(&state.db, new_user, pending).await?;

    info!(user_id = %user.id, "user registered, verification pending");
    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            message: "User registered. Please verify your email.".into(),
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AuthError> {
    let email = normalize_email(&payload.email);
    if !is_valid_email(&email) {
        return Err(AuthError::Validation(vec![FieldError {
            field: "email",
            message: "Please provide a valid email".into(),
        }]));
    }

    let lookup = state.cipher.lookup_key(&email);

    // Unknown email and wrong password take the same exit, and both
    // pay for one argon2 verification before it.
    let user = match User::find_by_lookup(&state.db, &lookup).await? {
        Some(u) => u,
        None => {
            let _ = verify_password(&payload.password, DUMMY_HASH);
            warn!("login with unknown email");
            return Err(AuthError::InvalidCredentials);
        }
    };

    if !verify_password(&payload.password, &user.password_hash) {
        warn!(user_id = %user.id, "login with invalid password");
        return Err(AuthError::InvalidCredentials);
    }

    if !user.is_verified {
        warn!(user_id = %user.id, "login before email verification");
        return Err(AuthError::NotVerified);
    }

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign(user.id, user.role)?;
    let public = user.public(state.cipher.as_ref())?;

    info!(user_id = %public.id, "user logged in");
    Ok(Json(LoginResponse {
        token,
        user: public,
    }))
}

#[instrument(skip(state, query))]
pub async fn verify_email(
    State(state): State<AppState>,
    Query(query): Query<VerifyEmailQuery>,
) -> Result<Redirect, AuthError> {
    match User::consume_verification(&state.db, &query.token).await? {
        Some(user) => {
            info!(user_id = %user.id, "email verified");
            Ok(Redirect::to(&state.config.frontend_login_url))
        }
        None => {
            warn!("verification with unknown, spent or expired token");
            Err(AuthError::InvalidOrExpired)
        }
    }
}

#[instrument(skip(state, user))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<PublicUser>, AuthError> {
    Ok(Json(user.public(state.cipher.as_ref())?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signup_payload(display_name: &str, email: &str, password: &str) -> SignupRequest {
        SignupRequest {
            display_name: display_name.into(),
            email: email.into(),
            password: password.into(),
        }
    }

    #[test]
    fn normalize_email_lowercases_and_trims() {
        assert_eq!(normalize_email("  Alice@Example.Com "), "alice@example.com");
        assert_eq!(
            normalize_email("alice@example.com"),
            normalize_email("ALICE@EXAMPLE.COM")
        );
    }

    #[test]
    fn valid_signup_passes_validation() {
        let payload = signup_payload("Alice", "alice@example.com", "secret-password");
        assert!(validate_signup(&payload, "alice@example.com").is_empty());
    }

    #[test]
    fn short_password_is_a_field_error() {
        let payload = signup_payload("Alice", "alice@example.com", "short");
        let errors = validate_signup(&payload, "alice@example.com");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "password");
    }

    #[test]
    fn bad_email_shape_is_a_field_error() {
        for bad in ["plainaddress", "no@tld", "a b@example.com", "@example.com"] {
            let payload = signup_payload("Alice", bad, "secret-password");
            let errors = validate_signup(&payload, bad);
            assert!(
                errors.iter().any(|e| e.field == "email"),
                "{bad} should fail email validation"
            );
        }
    }

    #[test]
    fn every_bad_field_is_reported() {
        let payload = signup_payload("A", "nope", "short");
        let errors = validate_signup(&payload, "nope");
        assert_eq!(errors.len(), 3);
    }
}
