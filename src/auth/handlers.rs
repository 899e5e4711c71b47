use axum::{
    extract::{FromRef, State},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{AuthResponse, LoginRequest, MessageResponse, RegisterRequest, UserResponse},
        extractors::AuthUser,
        jwt::JwtKeys,
        password::{dummy_verify, hash_password, verify_password},
        refresh::{
            clear_refresh_cookie, extract_refresh_cookie, hash_refresh_token, mint_refresh_token,
            refresh_cookie,
        },
        repo_types::{PublicUser, User},
    },
    error::ApiError,
    state::AppState,
};

pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(get_me))
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn is_unique_violation(err: &anyhow::Error) -> bool {
    match err.downcast_ref::<sqlx::Error>() {
        Some(sqlx::Error::Database(db_err)) => {
            db_err.code().is_some_and(|code| code.as_ref() == "23505")
        }
        _ => false,
    }
}

/// Argon2 is deliberately expensive; keep it off the async workers.
async fn hash_password_blocking(plain: String) -> Result<String, ApiError> {
    tokio::task::spawn_blocking(move || hash_password(&plain))
        .await
        .map_err(|e| ApiError::Internal(e.into()))?
        .map_err(ApiError::from)
}

async fn verify_password_blocking(plain: String, hash: String) -> Result<bool, ApiError> {
    tokio::task::spawn_blocking(move || verify_password(&plain, &hash))
        .await
        .map_err(|e| ApiError::Internal(e.into()))?
        .map_err(ApiError::from)
}

/// The burned comparison on the unknown-email path is as expensive as a
/// real one, so it gets the same offload.
async fn dummy_verify_blocking(plain: String) {
    let _ = tokio::task::spawn_blocking(move || dummy_verify(&plain)).await;
}

fn set_cookie_headers(raw: &str, ttl_days: i64, secure: bool) -> Result<HeaderMap, ApiError> {
    let mut headers = HeaderMap::new();
    let cookie =
        refresh_cookie(raw, ttl_days, secure).map_err(|e| ApiError::Internal(e.into()))?;
    headers.insert(SET_COOKIE, cookie);
    Ok(headers)
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(mut payload): Json<RegisterRequest>,
) -> Result<(StatusCode, HeaderMap, Json<AuthResponse>), ApiError> {
    payload.email = normalize_email(&payload.email);
    payload.name = payload.name.trim().to_string();

    if payload.name.is_empty() {
        return Err(ApiError::Validation("Name is required".into()));
    }
    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err(ApiError::Validation("Invalid email".into()));
    }
    if payload.password.len() < 8 {
        return Err(ApiError::Validation("Password too short".into()));
    }

    // Case-insensitive clash check; the partial unique index backs this up
    // against concurrent registrations.
    if User::find_by_email(&state.db, &payload.email).await?.is_some() {
        warn!(email = %payload.email, "email already registered");
        return Err(ApiError::DuplicateEmail);
    }

    let hash = hash_password_blocking(payload.password).await?;

    // Role is never accepted here; every registration starts as `user`.
    let user = match User::create(&state.db, &payload.name, &payload.email, &hash).await {
        Ok(u) => u,
        Err(e) if is_unique_violation(&e) => return Err(ApiError::DuplicateEmail),
        Err(e) => return Err(e.into()),
    };

    // Registration auto-authenticates: mint the full pair right away.
    let minted = mint_refresh_token(state.config.refresh_token_days)?;
    User::store_refresh(&state.db, user.id, &minted.hash, minted.expires_at).await?;

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign_access(user.id)?;
    let headers = set_cookie_headers(
        &minted.raw,
        state.config.refresh_token_days,
        state.config.production,
    )?;

    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok((
        StatusCode::CREATED,
        headers,
        Json(AuthResponse {
            success: true,
            token,
            user: PublicUser::from(user),
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(mut payload): Json<LoginRequest>,
) -> Result<(HeaderMap, Json<AuthResponse>), ApiError> {
    payload.email = normalize_email(&payload.email);

    if payload.email.is_empty() || payload.password.is_empty() {
        return Err(ApiError::Validation(
            "Please provide email and password".into(),
        ));
    }

    let user = match User::find_by_email(&state.db, &payload.email).await? {
        Some(u) => u,
        None => {
            // Burn an argon2 comparison so this path costs the same as a
            // real mismatch, then answer with the shared generic message.
            warn!(email = %payload.email, "login unknown email");
            dummy_verify_blocking(payload.password).await;
            return Err(ApiError::InvalidCredentials);
        }
    };

    if !user.is_active || user.is_deleted {
        warn!(user_id = %user.id, "login on inactive account");
        return Err(ApiError::AccountInactive);
    }

    let ok = verify_password_blocking(payload.password, user.password_hash.clone()).await?;
    if !ok {
        warn!(user_id = %user.id, "login invalid password");
        return Err(ApiError::InvalidCredentials);
    }

    // Rotate: the previous refresh token dies with this overwrite.
    let minted = mint_refresh_token(state.config.refresh_token_days)?;
    User::store_refresh(&state.db, user.id, &minted.hash, minted.expires_at).await?;

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign_access(user.id)?;
    let headers = set_cookie_headers(
        &minted.raw,
        state.config.refresh_token_days,
        state.config.production,
    )?;

    info!(user_id = %user.id, email = %user.email, "user logged in");
    Ok((
        headers,
        Json(AuthResponse {
            success: true,
            token,
            user: PublicUser::from(user),
        }),
    ))
}

#[instrument(skip(state, request_headers))]
pub async fn refresh(
    State(state): State<AppState>,
    request_headers: HeaderMap,
) -> Result<(HeaderMap, Json<AuthResponse>), ApiError> {
    let raw = extract_refresh_cookie(&request_headers).ok_or(ApiError::MissingToken)?;
    let presented_hash = hash_refresh_token(&raw);

    // Single conditional update: wrong, expired, revoked and already-rotated
    // tokens all fall out as "no row matched". Two racing refreshes can only
    // have one winner.
    let minted = mint_refresh_token(state.config.refresh_token_days)?;
    let user = User::rotate_refresh(&state.db, &presented_hash, &minted.hash, minted.expires_at)
        .await?
        .ok_or_else(|| {
            warn!("refresh token did not match any live session");
            ApiError::InvalidRefreshToken
        })?;

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign_access(user.id)?;
    let headers = set_cookie_headers(
        &minted.raw,
        state.config.refresh_token_days,
        state.config.production,
    )?;

    info!(user_id = %user.id, "refresh token rotated");
    Ok((
        headers,
        Json(AuthResponse {
            success: true,
            token,
            user: PublicUser::from(user),
        }),
    ))
}

#[instrument(skip(state, auth))]
pub async fn logout(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<(HeaderMap, Json<MessageResponse>), ApiError> {
    let AuthUser(user) = auth;
    // Idempotent: clearing an absent session is still a success.
    User::clear_refresh(&state.db, user.id).await?;

    let mut headers = HeaderMap::new();
    let cookie =
        clear_refresh_cookie(state.config.production).map_err(|e| ApiError::Internal(e.into()))?;
    headers.insert(SET_COOKIE, cookie);

    info!(user_id = %user.id, "user logged out");
    Ok((
        headers,
        Json(MessageResponse {
            success: true,
            message: "Logged out successfully",
        }),
    ))
}

#[instrument(skip(auth))]
pub async fn get_me(auth: AuthUser) -> Json<UserResponse> {
    let AuthUser(user) = auth;
    Json(UserResponse {
        success: true,
        user,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email("  Demo@Example.COM "), "demo@example.com");
    }

    #[test]
    fn registering_with_case_variant_email_hits_the_same_key() {
        // Duplicate detection runs on the normalized form, so a case-variant
        // email collides with the original.
        assert_eq!(
            normalize_email("demo@example.com"),
            normalize_email("DEMO@EXAMPLE.com")
        );
    }

    #[test]
    fn email_validation_accepts_basic_shapes() {
        assert!(is_valid_email("a@example.com"));
        assert!(is_valid_email("name.surname@example.co"));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("two@@example.com "));
        assert!(!is_valid_email(""));
    }

    #[tokio::test]
    async fn unknown_email_burn_runs_on_the_blocking_pool() {
        // The burn has to finish on a current-thread runtime, which means
        // the argon2 work happened on the blocking pool, not this worker.
        tokio::time::timeout(
            std::time::Duration::from_secs(30),
            dummy_verify_blocking("password123".into()),
        )
        .await
        .expect("burned comparison should finish");
    }

    #[test]
    fn unknown_email_and_bad_password_share_one_message() {
        // User enumeration must not be possible through the response.
        let unknown = ApiError::InvalidCredentials;
        let mismatch = ApiError::InvalidCredentials;
        assert_eq!(unknown.to_string(), mismatch.to_string());
        assert_eq!(unknown.status(), mismatch.status());
    }
}
