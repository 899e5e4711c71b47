use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use tracing::warn;

use crate::auth::jwt::JwtKeys;
use crate::auth::repo_types::{PublicUser, Role};
use crate::error::ApiError;
use crate::state::AppState;

/// Resolved request identity.
///
/// Verifies the bearer token and re-reads the user row on every request,
/// so deactivation, deletion and role changes bite immediately. Nothing
/// is cached between requests.
pub struct AuthUser(pub PublicUser);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized("Not authorized, no token"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .or_else(|| auth_header.strip_prefix("bearer "))
            .ok_or(ApiError::Unauthorized("Not authorized, no token"))?;

        let keys = JwtKeys::from_ref(state);
        let claims = keys.verify(token).map_err(|_| {
            warn!("invalid or expired access token");
            ApiError::Unauthorized("Not authorized, invalid token")
        })?;

        let user = PublicUser::find_active(&state.db, claims.sub)
            .await?
            .ok_or_else(|| {
                warn!(user_id = %claims.sub, "token subject not found or inactive");
                ApiError::Unauthorized("User not found or inactive")
            })?;

        Ok(AuthUser(user))
    }
}

/// Second gate after identity resolution. Kept separate from [`AuthUser`]
/// so identity and authorization failures stay distinguishable in logs.
pub fn require_role(user: &PublicUser, allowed: &[Role]) -> Result<(), ApiError> {
    if allowed.contains(&user.role) {
        Ok(())
    } else {
        warn!(user_id = %user.id, role = user.role.as_str(), "role not allowed");
        Err(ApiError::Forbidden(format!(
            "Role {} is not authorized to access this route",
            user.role.as_str()
        )))
    }
}

/// The single guarded role setter: both PATCH paths funnel through here,
/// so the elevation rule cannot drift between them.
pub fn assign_role(actor: Role, requested: Role) -> Result<Role, ApiError> {
    if actor == Role::Manager && requested == Role::Admin {
        return Err(ApiError::Forbidden(
            "Managers cannot assign admin role".into(),
        ));
    }
    Ok(requested)
}

/// Parse a role string from a request body, rejecting unknown values.
pub fn parse_role(value: &str) -> Result<Role, ApiError> {
    Role::parse(value).ok_or_else(|| ApiError::Validation("Invalid role".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn user_with_role(role: Role) -> PublicUser {
        PublicUser {
            id: Uuid::new_v4(),
            name: "Gate".into(),
            email: "gate@example.com".into(),
            role,
            is_active: true,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn require_role_admits_listed_roles_only() {
        let manager = user_with_role(Role::Manager);
        assert!(require_role(&manager, &[Role::Admin, Role::Manager]).is_ok());
        let err = require_role(&manager, &[Role::Admin]).unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
        assert!(err.to_string().contains("manager"));
    }

    #[test]
    fn manager_cannot_grant_admin() {
        let err = assign_role(Role::Manager, Role::Admin).unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
        assert_eq!(err.to_string(), "Managers cannot assign admin role");
    }

    #[test]
    fn all_other_assignments_pass_the_guard() {
        for actor in [Role::Admin, Role::Manager] {
            for requested in [Role::User, Role::Manager, Role::Admin] {
                if actor == Role::Manager && requested == Role::Admin {
                    continue;
                }
                assert_eq!(assign_role(actor, requested).unwrap(), requested);
            }
        }
    }

    #[test]
    fn parse_role_rejects_unknown_values() {
        assert_eq!(parse_role("admin").unwrap(), Role::Admin);
        let err = parse_role("root").unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
        assert_eq!(err.to_string(), "Invalid role");
    }
}
