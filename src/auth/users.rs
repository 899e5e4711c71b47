//! Administrative user management, gated to admin/manager roles.

use axum::{
    extract::{Path, Query, State},
    routing::{get, patch},
    Json, Router,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        dto::{
            ListUsersQuery, MessageResponse, Pagination, UpdateRoleRequest, UpdateUserRequest,
            UserDataResponse, UserListResponse, UserResponse,
        },
        extractors::{assign_role, parse_role, require_role, AuthUser},
        handlers::{is_unique_violation, is_valid_email, normalize_email},
        repo_types::{PublicUser, Role},
    },
    error::ApiError,
    state::AppState,
};

const ADMIN_OR_MANAGER: &[Role] = &[Role::Admin, Role::Manager];

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/users", get(list_users))
        .route(
            "/auth/users/:id",
            get(get_user).patch(update_user).delete(delete_user),
        )
        .route("/auth/users/:id/role", patch(update_user_role))
}

const DEFAULT_LIMIT: i64 = 20;
const MAX_LIMIT: i64 = 100;

/// Map the client sort key onto a whitelisted ORDER BY clause. Anything
/// else falls back to newest-first.
fn order_by(sort: Option<&str>) -> &'static str {
    match sort {
        Some("createdAt") => "created_at ASC",
        Some("-createdAt") => "created_at DESC",
        Some("name") => "name ASC",
        Some("-name") => "name DESC",
        Some("email") => "email ASC",
        Some("-email") => "email DESC",
        _ => "created_at DESC",
    }
}

#[instrument(skip(state, auth))]
pub async fn list_users(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<ListUsersQuery>,
) -> Result<Json<UserListResponse>, ApiError> {
    let AuthUser(actor) = auth;
    require_role(&actor, ADMIN_OR_MANAGER)?;

    let role = match query.role.as_deref() {
        Some(value) => Some(parse_role(value)?),
        None => None,
    };
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = (page - 1) * limit;
    let search = query.search.as_deref().filter(|s| !s.is_empty());
    let order = order_by(query.sort.as_deref());

    let data = PublicUser::list(&state.db, role, search, order, limit, offset).await?;
    let total = PublicUser::count(&state.db, role, search).await?;

    Ok(Json(UserListResponse {
        success: true,
        data,
        pagination: Pagination::new(total, page, limit),
    }))
}

#[instrument(skip(state, auth))]
pub async fn get_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<UserDataResponse>, ApiError> {
    let AuthUser(actor) = auth;
    require_role(&actor, ADMIN_OR_MANAGER)?;

    let user = PublicUser::find_by_id(&state.db, id)
        .await?
        .ok_or(ApiError::NotFound("User not found"))?;

    Ok(Json(UserDataResponse {
        success: true,
        data: user,
    }))
}

#[instrument(skip(state, auth, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<Json<UserDataResponse>, ApiError> {
    let AuthUser(actor) = auth;
    require_role(&actor, ADMIN_OR_MANAGER)?;

    // The generic update shares the one guarded setter with the role
    // endpoint, so the elevation rule cannot diverge.
    let role = match payload.role.as_deref() {
        Some(value) => Some(assign_role(actor.role, parse_role(value)?)?),
        None => None,
    };
    let email = match payload.email.as_deref() {
        Some(value) => {
            let normalized = normalize_email(value);
            if !is_valid_email(&normalized) {
                return Err(ApiError::Validation("Invalid email".into()));
            }
            Some(normalized)
        }
        None => None,
    };

    // An email change can collide with another live account; that is a
    // client error, not a server fault.
    let user = match PublicUser::update(
        &state.db,
        id,
        payload.name.as_deref(),
        email.as_deref(),
        role,
        payload.is_active,
    )
    .await
    {
        Ok(u) => u,
        Err(e) if is_unique_violation(&e) => return Err(ApiError::DuplicateEmail),
        Err(e) => return Err(e.into()),
    }
    .ok_or(ApiError::NotFound("User not found"))?;

    info!(user_id = %id, actor = %actor.id, "user updated");
    Ok(Json(UserDataResponse {
        success: true,
        data: user,
    }))
}

#[instrument(skip(state, auth, payload))]
pub async fn update_user_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateRoleRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let AuthUser(actor) = auth;
    require_role(&actor, ADMIN_OR_MANAGER)?;

    let role = assign_role(actor.role, parse_role(&payload.role)?)?;

    let user = PublicUser::update(&state.db, id, None, None, Some(role), None)
        .await?
        .ok_or(ApiError::NotFound("User not found"))?;

    info!(user_id = %id, actor = %actor.id, role = role.as_str(), "role updated");
    Ok(Json(UserResponse {
        success: true,
        user,
    }))
}

#[instrument(skip(state, auth))]
pub async fn delete_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>, ApiError> {
    let AuthUser(actor) = auth;
    require_role(&actor, &[Role::Admin])?;

    let deleted = PublicUser::soft_delete(&state.db, id).await?;
    if !deleted {
        warn!(user_id = %id, "delete on missing or already deleted user");
        return Err(ApiError::NotFound("User not found"));
    }

    info!(user_id = %id, actor = %actor.id, "user soft deleted");
    Ok(Json(MessageResponse {
        success: true,
        message: "User deleted successfully",
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_keys_are_whitelisted() {
        assert_eq!(order_by(Some("createdAt")), "created_at ASC");
        assert_eq!(order_by(Some("-createdAt")), "created_at DESC");
        assert_eq!(order_by(Some("name")), "name ASC");
        assert_eq!(order_by(Some("-email")), "email DESC");
        // Arbitrary input must not reach the ORDER BY clause.
        assert_eq!(order_by(Some("; DROP TABLE users")), "created_at DESC");
        assert_eq!(order_by(None), "created_at DESC");
    }
}
