use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Account roles, lowest to highest privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum Role {
    User,
    Manager,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Manager => "manager",
            Self::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "manager" => Some(Self::Manager),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// Full user record in the database.
///
/// Both hash columns are excluded from serialization; outward-facing
/// responses go through [`PublicUser`] instead.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub is_active: bool,
    pub is_deleted: bool,
    #[serde(skip)]
    pub deleted_at: Option<OffsetDateTime>,
    #[serde(skip_serializing)]
    pub refresh_token_hash: Option<String>,
    #[serde(skip)]
    pub refresh_token_expires_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Projection of a user that is safe to return to clients.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PublicUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<User> for PublicUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            role: user.role,
            is_active: user.is_active,
            created_at: user.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> User {
        User {
            id: Uuid::new_v4(),
            name: "Demo".into(),
            email: "demo@example.com".into(),
            password_hash: "$argon2id$v=19$secret".into(),
            role: Role::User,
            is_active: true,
            is_deleted: false,
            deleted_at: None,
            refresh_token_hash: Some("deadbeef".into()),
            refresh_token_expires_at: None,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn user_serialization_never_exposes_hashes() {
        let json = serde_json::to_string(&sample_user()).unwrap();
        assert!(!json.contains("password_hash"));
        assert!(!json.contains("refresh_token_hash"));
        assert!(!json.contains("argon2id"));
        assert!(!json.contains("deadbeef"));
    }

    #[test]
    fn public_projection_keeps_profile_fields_only() {
        let user = sample_user();
        let public = PublicUser::from(user.clone());
        assert_eq!(public.id, user.id);
        assert_eq!(public.email, "demo@example.com");
        let json = serde_json::to_value(&public).unwrap();
        assert_eq!(json["role"], "user");
        assert!(json.get("password_hash").is_none());
        assert!(json.get("refresh_token_hash").is_none());
    }

    #[test]
    fn role_round_trips_through_strings() {
        for role in [Role::User, Role::Manager, Role::Admin] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("superuser"), None);
    }
}
