use serde::{Deserialize, Serialize};

use crate::auth::repo_types::PublicUser;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Body for login, register and refresh. The refresh token itself travels
/// only in the cookie, never here.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub success: bool,
    pub token: String,
    pub user: PublicUser,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub success: bool,
    pub user: PublicUser,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    pub role: Option<String>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub sort: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
    #[serde(rename = "isActive")]
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub role: String,
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub pages: i64,
}

impl Pagination {
    pub fn new(total: i64, page: i64, limit: i64) -> Self {
        let pages = if limit > 0 {
            (total + limit - 1) / limit
        } else {
            0
        };
        Self {
            total,
            page,
            limit,
            pages,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UserListResponse {
    pub success: bool,
    pub data: Vec<PublicUser>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
pub struct UserDataResponse {
    pub success: bool,
    pub data: PublicUser,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_rounds_pages_up() {
        let p = Pagination::new(41, 1, 20);
        assert_eq!(p.pages, 3);
        let p = Pagination::new(40, 2, 20);
        assert_eq!(p.pages, 2);
        let p = Pagination::new(0, 1, 20);
        assert_eq!(p.pages, 0);
    }

    #[test]
    fn login_request_tolerates_missing_fields() {
        // The handler turns empty fields into a 400; deserialization itself
        // must not reject the body.
        let req: LoginRequest = serde_json::from_str("{}").unwrap();
        assert!(req.email.is_empty());
        assert!(req.password.is_empty());
    }

    #[test]
    fn auth_response_body_never_carries_a_refresh_token() {
        let user = PublicUser {
            id: uuid::Uuid::new_v4(),
            name: "Demo".into(),
            email: "demo@example.com".into(),
            role: crate::auth::repo_types::Role::User,
            is_active: true,
            created_at: time::OffsetDateTime::now_utc(),
        };
        let body = AuthResponse {
            success: true,
            token: "header.payload.sig".into(),
            user,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["success"], true);
        assert!(json.get("refresh_token").is_none());
        assert!(json.get("refreshToken").is_none());
        assert_eq!(json["user"]["role"], "user");
    }
}
