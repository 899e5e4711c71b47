use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{PublicUser, Role, User};

const USER_COLUMNS: &str = "id, name, email, password_hash, role, is_active, is_deleted, \
     deleted_at, refresh_token_hash, refresh_token_expires_at, created_at, updated_at";

const PUBLIC_COLUMNS: &str = "id, name, email, role, is_active, created_at";

impl User {
    /// Find a live user by (already normalized) email.
    pub async fn find_by_email(db: &PgPool, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 AND NOT is_deleted"
        ))
        .bind(email)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND NOT is_deleted"
        ))
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Create a new user; role always starts as `user`.
    pub async fn create(
        db: &PgPool,
        name: &str,
        email: &str,
        password_hash: &str,
    ) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (name, email, password_hash) VALUES ($1, $2, $3) \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(name)
        .bind(email)
        .bind(password_hash)
        .fetch_one(db)
        .await?;
        Ok(user)
    }

    /// Overwrite the stored refresh credential (login, register).
    pub async fn store_refresh(
        db: &PgPool,
        id: Uuid,
        token_hash: &str,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE users SET refresh_token_hash = $2, refresh_token_expires_at = $3, \
             updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(token_hash)
        .bind(expires_at)
        .execute(db)
        .await?;
        Ok(())
    }

    /// Rotate the refresh credential in a single compare-and-swap.
    ///
    /// The old hash is part of the predicate, so when two refresh calls
    /// race only one row update can match; the loser sees `None` and must
    /// be answered with the generic invalid-refresh-token failure.
    pub async fn rotate_refresh(
        db: &PgPool,
        old_hash: &str,
        new_hash: &str,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET refresh_token_hash = $2, refresh_token_expires_at = $3, \
             updated_at = now() \
             WHERE refresh_token_hash = $1 \
               AND refresh_token_expires_at > now() \
               AND is_active AND NOT is_deleted \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(old_hash)
        .bind(new_hash)
        .bind(expires_at)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Drop the stored refresh credential. Idempotent.
    pub async fn clear_refresh(db: &PgPool, id: Uuid) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE users SET refresh_token_hash = NULL, refresh_token_expires_at = NULL, \
             updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .execute(db)
        .await?;
        Ok(())
    }
}

impl PublicUser {
    /// Identity lookup for the request gate: live, active accounts only.
    pub async fn find_active(db: &PgPool, id: Uuid) -> anyhow::Result<Option<PublicUser>> {
        let user = sqlx::query_as::<_, PublicUser>(&format!(
            "SELECT {PUBLIC_COLUMNS} FROM users \
             WHERE id = $1 AND is_active AND NOT is_deleted"
        ))
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<PublicUser>> {
        let user = sqlx::query_as::<_, PublicUser>(&format!(
            "SELECT {PUBLIC_COLUMNS} FROM users WHERE id = $1 AND NOT is_deleted"
        ))
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn list(
        db: &PgPool,
        role: Option<Role>,
        search: Option<&str>,
        order_by: &str,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<PublicUser>> {
        let pattern = search.map(|s| format!("%{s}%"));
        let users = sqlx::query_as::<_, PublicUser>(&format!(
            "SELECT {PUBLIC_COLUMNS} FROM users \
             WHERE NOT is_deleted \
               AND ($1::text IS NULL OR role = $1) \
               AND ($2::text IS NULL OR name ILIKE $2 OR email ILIKE $2) \
             ORDER BY {order_by} LIMIT $3 OFFSET $4"
        ))
        .bind(role.map(|r| r.as_str()))
        .bind(pattern)
        .bind(limit)
        .bind(offset)
        .fetch_all(db)
        .await?;
        Ok(users)
    }

    pub async fn count(
        db: &PgPool,
        role: Option<Role>,
        search: Option<&str>,
    ) -> anyhow::Result<i64> {
        let pattern = search.map(|s| format!("%{s}%"));
        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM users \
             WHERE NOT is_deleted \
               AND ($1::text IS NULL OR role = $1) \
               AND ($2::text IS NULL OR name ILIKE $2 OR email ILIKE $2)",
        )
        .bind(role.map(|r| r.as_str()))
        .bind(pattern)
        .fetch_one(db)
        .await?;
        Ok(total)
    }

    /// Apply an administrative update. `None` fields keep their value.
    pub async fn update(
        db: &PgPool,
        id: Uuid,
        name: Option<&str>,
        email: Option<&str>,
        role: Option<Role>,
        is_active: Option<bool>,
    ) -> anyhow::Result<Option<PublicUser>> {
        let user = sqlx::query_as::<_, PublicUser>(&format!(
            "UPDATE users SET \
               name = COALESCE($2, name), \
               email = COALESCE($3, email), \
               role = COALESCE($4, role), \
               is_active = COALESCE($5, is_active), \
               updated_at = now() \
             WHERE id = $1 AND NOT is_deleted \
             RETURNING {PUBLIC_COLUMNS}"
        ))
        .bind(id)
        .bind(name)
        .bind(email)
        .bind(role.map(|r| r.as_str()))
        .bind(is_active)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Soft delete: keep the row, kill the account and its session.
    pub async fn soft_delete(db: &PgPool, id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE users SET is_deleted = TRUE, deleted_at = now(), is_active = FALSE, \
             refresh_token_hash = NULL, refresh_token_expires_at = NULL, updated_at = now() \
             WHERE id = $1 AND NOT is_deleted",
        )
        .bind(id)
        .execute(db)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::handlers::is_unique_violation;
    use time::Duration;

    async fn seed_user(db: &PgPool, email: &str) -> User {
        User::create(db, "Session", email, "$argon2id$v=19$test")
            .await
            .expect("create user")
    }

    fn in_30_days() -> OffsetDateTime {
        OffsetDateTime::now_utc() + Duration::days(30)
    }

    #[sqlx::test]
    async fn rotation_invalidates_the_previous_hash(db: PgPool) {
        let user = seed_user(&db, "rotate@example.com").await;
        User::store_refresh(&db, user.id, "hash-one", in_30_days())
            .await
            .expect("store refresh");

        let rotated = User::rotate_refresh(&db, "hash-one", "hash-two", in_30_days())
            .await
            .expect("rotate");
        assert_eq!(rotated.map(|u| u.id), Some(user.id));

        // Presenting the consumed hash again must match no row: the token
        // is single-use and the second caller loses the race by design.
        let replay = User::rotate_refresh(&db, "hash-one", "hash-three", in_30_days())
            .await
            .expect("rotate");
        assert!(replay.is_none());

        // The rotated-in hash is the one live credential.
        let next = User::rotate_refresh(&db, "hash-two", "hash-three", in_30_days())
            .await
            .expect("rotate");
        assert_eq!(next.map(|u| u.id), Some(user.id));
    }

    #[sqlx::test]
    async fn cleared_session_cannot_rotate(db: PgPool) {
        let user = seed_user(&db, "logout@example.com").await;
        User::store_refresh(&db, user.id, "live-hash", in_30_days())
            .await
            .expect("store refresh");

        // Logout clears the credential; the old cookie is dead afterwards.
        User::clear_refresh(&db, user.id).await.expect("clear");
        let rotated = User::rotate_refresh(&db, "live-hash", "next-hash", in_30_days())
            .await
            .expect("rotate");
        assert!(rotated.is_none());
    }

    #[sqlx::test]
    async fn expired_token_cannot_rotate(db: PgPool) {
        let user = seed_user(&db, "expired@example.com").await;
        let past = OffsetDateTime::now_utc() - Duration::hours(1);
        User::store_refresh(&db, user.id, "stale-hash", past)
            .await
            .expect("store refresh");

        let rotated = User::rotate_refresh(&db, "stale-hash", "next-hash", in_30_days())
            .await
            .expect("rotate");
        assert!(rotated.is_none());
    }

    #[sqlx::test]
    async fn soft_deleted_user_is_excluded_everywhere(db: PgPool) {
        let user = seed_user(&db, "deleted@example.com").await;
        User::store_refresh(&db, user.id, "doomed-hash", in_30_days())
            .await
            .expect("store refresh");

        assert!(PublicUser::soft_delete(&db, user.id).await.expect("delete"));

        // Login path: the credential lookup no longer finds the account.
        let found = User::find_by_email(&db, "deleted@example.com")
            .await
            .expect("lookup");
        assert!(found.is_none());

        // Listing: the row is gone from the admin surface.
        let listed = PublicUser::list(&db, None, None, "created_at DESC", 50, 0)
            .await
            .expect("list");
        assert!(listed.iter().all(|u| u.id != user.id));

        // Refresh path: the cleared hash cannot rotate either.
        let rotated = User::rotate_refresh(&db, "doomed-hash", "next-hash", in_30_days())
            .await
            .expect("rotate");
        assert!(rotated.is_none());

        // Repeat delete reports nothing left to delete.
        assert!(!PublicUser::soft_delete(&db, user.id).await.expect("delete"));
    }

    #[sqlx::test]
    async fn duplicate_live_email_is_a_unique_violation(db: PgPool) {
        seed_user(&db, "taken@example.com").await;
        let other = seed_user(&db, "other@example.com").await;

        let err = PublicUser::update(&db, other.id, None, Some("taken@example.com"), None, None)
            .await
            .expect_err("duplicate email should fail");
        assert!(is_unique_violation(&err));
    }
}

