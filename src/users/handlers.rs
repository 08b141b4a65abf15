use axum::{
    extract::{Path, State},
    routing::{get, put},
    Json, Router,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        dto::{MessageResponse, PublicUser, UpdateRoleRequest},
        extractors::AdminUser,
        repo_types::{Role, User},
    },
    error::{AuthError, FieldError},
    state::AppState,
};

/// Admin-only user management. Every route authenticates first and
/// then requires the live role to be admin.
pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/:id", get(get_user).delete(delete_user))
        .route("/users/:id/role", put(update_user_role))
}

#[instrument(skip(state, _admin))]
pub async fn list_users(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<Vec<PublicUser>>, AuthError> {
    let users = User::list(&state.db).await?;
    let mut out = Vec::with_capacity(users.len());
    for user in &users {
        out.push(user.public(state.cipher.as_ref())?);
    }
    Ok(Json(out))
}

#[instrument(skip(state, _admin))]
pub async fn get_user(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> Result<Json<PublicUser>, AuthError> {
    let user = User::find_by_id(&state.db, id)
        .await?
        .ok_or(AuthError::NotFound)?;
    Ok(Json(user.public(state.cipher.as_ref())?))
}

#[instrument(skip(state, admin, payload))]
pub async fn update_user_role(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateRoleRequest>,
) -> Result<Json<PublicUser>, AuthError> {
    let role = Role::parse(&payload.role).ok_or_else(|| {
        warn!(requested = %payload.role, "unknown role in role update");
        AuthError::Validation(vec![FieldError {
            field: "role",
            message: "Role must be either \"user\" or \"admin\"".into(),
        }])
    })?;

    let user = User::update_role(&state.db, id, role)
        .await?
        .ok_or(AuthError::NotFound)?;

    info!(admin_id = %admin.id, user_id = %user.id, role = role.as_str(), "role updated");
    Ok(Json(user.public(state.cipher.as_ref())?))
}

#[instrument(skip(state, admin))]
pub async fn delete_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>, AuthError> {
    if !User::delete(&state.db, id).await? {
        return Err(AuthError::NotFound);
    }
    info!(admin_id = %admin.id, user_id = %id, "user deleted");
    Ok(Json(MessageResponse {
        message: "User removed".into(),
    }))
}
