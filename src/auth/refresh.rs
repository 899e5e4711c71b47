//! Opaque refresh tokens and the cookie that carries them.
//!
//! The raw value leaves the server only inside an `HttpOnly` cookie; the
//! database stores a SHA-256 digest used for equality lookup at rotation.

use anyhow::Context;
use axum::http::{header::InvalidHeaderValue, HeaderMap, HeaderValue};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};

pub const REFRESH_COOKIE_NAME: &str = "refreshToken";
/// Cookie is scoped to the auth prefix so it is never sent with task or
/// websocket traffic.
pub const REFRESH_COOKIE_PATH: &str = "/api/auth";

pub struct RefreshToken {
    /// Hex-encoded random value handed to the client. Never stored.
    pub raw: String,
    /// SHA-256 hex digest of `raw`, the only form that touches the database.
    pub hash: String,
    pub expires_at: OffsetDateTime,
}

pub fn mint_refresh_token(ttl_days: i64) -> anyhow::Result<RefreshToken> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate refresh token")?;
    let raw = hex::encode(bytes);
    let hash = hash_refresh_token(&raw);
    let expires_at = OffsetDateTime::now_utc() + Duration::days(ttl_days);
    Ok(RefreshToken {
        raw,
        hash,
        expires_at,
    })
}

/// Deterministic digest used symmetrically at mint and at lookup.
pub fn hash_refresh_token(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// Frame the refresh cookie for a `Set-Cookie` header.
pub fn refresh_cookie(
    raw: &str,
    ttl_days: i64,
    secure: bool,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let max_age = ttl_days * 24 * 60 * 60;
    let mut cookie = format!(
        "{REFRESH_COOKIE_NAME}={raw}; Path={REFRESH_COOKIE_PATH}; HttpOnly; SameSite=Lax; Max-Age={max_age}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub fn clear_refresh_cookie(secure: bool) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!(
        "{REFRESH_COOKIE_NAME}=; Path={REFRESH_COOKIE_PATH}; HttpOnly; SameSite=Lax; Max-Age=0"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Pull the raw refresh token out of the `Cookie` request header.
pub fn extract_refresh_cookie(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(axum::http::header::COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let mut parts = pair.trim().splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == REFRESH_COOKIE_NAME && !val.is_empty() {
            return Some(val.to_string());
        }
    }
    None
}
