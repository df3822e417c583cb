use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
}

impl AppConfig {
    /// Every JWT setting is mandatory: a missing or unparsable value must
    /// abort startup rather than surface per-request.
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            issuer: std::env::var("JWT_ISSUER").context("JWT_ISSUER must be set")?,
            audience: std::env::var("JWT_AUDIENCE").context("JWT_AUDIENCE must be set")?,
            ttl_minutes: std::env::var("JWT_TTL_MINUTES")
                .context("JWT_TTL_MINUTES must be set")?
                .parse::<i64>()
                .context("JWT_TTL_MINUTES must be an integer")?,
        };
        Ok(Self { database_url, jwt })
    }
}
