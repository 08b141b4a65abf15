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
    /// Lifetime of email-verification tokens.
    pub verification_ttl_minutes: i64,
    /// 64 hex chars (32 bytes). When set, PII fields are stored
    /// AES-256-CBC encrypted; when absent they stay plaintext.
    pub encryption_key: Option<String>,
    /// Base URL embedded in verification links sent to users.
    pub public_base_url: String,
    /// Where a successfully verified user is redirected.
    pub frontend_login_url: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "inkroot".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "inkroot-users".into()),
            ttl_minutes: std::env::var("JWT_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(60),
        };
        Ok(Self {
            database_url,
            jwt,
            verification_ttl_minutes: std::env::var("VERIFICATION_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(60),
            encryption_key: std::env::var("ENCRYPTION_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            public_base_url: std::env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".into()),
            frontend_login_url: std::env::var("FRONTEND_LOGIN_URL")
                .unwrap_or_else(|_| "http://localhost:5173/login".into()),
        })
    }
}
