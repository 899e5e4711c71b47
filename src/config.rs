use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub access_ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub refresh_token_days: i64,
    pub frontend_url: String,
    pub production: bool,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "taskflow".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "taskflow-clients".into()),
            access_ttl_minutes: std::env::var("JWT_EXPIRE_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(15),
        };
        let refresh_token_days = std::env::var("REFRESH_TOKEN_DAYS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(30);
        let frontend_url =
            std::env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:5173".into());
        let production = std::env::var("APP_ENV")
            .map(|v| v == "production")
            .unwrap_or(false);
        Ok(Self {
            database_url,
            jwt,
            refresh_token_days,
            frontend_url,
            production,
        })
    }
}
