use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use url::Url;

use crate::db::DEFAULT_MAX_POOL_SIZE;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_pool_size: u32,
    pub server_host: String,
    pub server_port: u16,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub refresh_token_audience: String,
    pub access_token_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
    pub refresh_cookie_secure: bool,
    pub refresh_cookie_domain: Option<String>,
    pub frontend_url: String,
    pub cors_allowed_origin: Option<String>,
    pub smtp: Option<SmtpConfig>,
    pub mail_drop_dir: PathBuf,
    pub pandoc_path: String,
    pub wkhtmltopdf_path: String,
    pub converter_timeout_seconds: u64,
    pub export_dir: PathBuf,
}

#[derive(Clone, Debug)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let database_max_pool_size = env::var("DATABASE_MAX_POOL_SIZE")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_MAX_POOL_SIZE);
        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let server_port = env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .context("PORT must be a valid u16")?;
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        let jwt_issuer = env::var("JWT_ISSUER").unwrap_or_else(|_| "docbuilder".to_string());
        let jwt_audience =
            env::var("JWT_AUDIENCE").unwrap_or_else(|_| "docbuilder-clients".to_string());
        let refresh_token_audience = env::var("REFRESH_TOKEN_AUDIENCE")
            .unwrap_or_else(|_| "docbuilder-refresh".to_string());
        let access_token_expiry_minutes = env::var("ACCESS_TOKEN_EXPIRY_MINUTES")
            .unwrap_or_else(|_| "15".to_string())
            .parse()
            .context("ACCESS_TOKEN_EXPIRY_MINUTES must be an integer")?;
        let refresh_token_expiry_days = env::var("REFRESH_TOKEN_EXPIRY_DAYS")
            .unwrap_or_else(|_| "7".to_string())
            .parse()
            .context("REFRESH_TOKEN_EXPIRY_DAYS must be an integer")?;
        let refresh_cookie_secure = env::var("REFRESH_COOKIE_SECURE")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let refresh_cookie_domain = env::var("REFRESH_COOKIE_DOMAIN").ok();
        let frontend_url =
            env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
        let cors_allowed_origin = env::var("CORS_ALLOWED_ORIGIN").ok();

        let smtp = match env::var("SMTP_HOST").ok().filter(|host| !host.is_empty()) {
            Some(host) => {
                let port = env::var("SMTP_PORT")
                    .unwrap_or_else(|_| "587".to_string())
                    .parse()
                    .context("SMTP_PORT must be a valid u16")?;
                let username = env::var("SMTP_USER").unwrap_or_default();
                let password = env::var("SMTP_PASS").unwrap_or_default();
                let from = env::var("SMTP_FROM").unwrap_or_else(|_| username.clone());
                Some(SmtpConfig {
                    host,
                    port,
                    username,
                    password,
                    from,
                })
            }
            None => None,
        };
        let mail_drop_dir = env::var("MAIL_DROP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("mail-drop"));

        let pandoc_path = env::var("PANDOC_PATH").unwrap_or_else(|_| "pandoc".to_string());
        let wkhtmltopdf_path =
            env::var("WKHTMLTOPDF_PATH").unwrap_or_else(|_| "wkhtmltopdf".to_string());
        let converter_timeout_seconds = env::var("CONVERTER_TIMEOUT_SECONDS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .context("CONVERTER_TIMEOUT_SECONDS must be an integer")?;
        let export_dir = env::var("EXPORT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("exports"));

        Ok(Self {
            database_url,
            database_max_pool_size,
            server_host,
            server_port,
            jwt_secret,
            jwt_issuer,
            jwt_audience,
            refresh_token_audience,
            access_token_expiry_minutes,
            refresh_token_expiry_days,
            refresh_cookie_secure,
            refresh_cookie_domain,
            frontend_url,
            cors_allowed_origin,
            smtp,
            mail_drop_dir,
            pandoc_path,
            wkhtmltopdf_path,
            converter_timeout_seconds,
            export_dir,
        })
    }

    pub fn redacted_database_url(&self) -> String {
        redact_database_url(&self.database_url)
    }

    /// Origins allowed by CORS; the frontend is always allowed when no list is set.
    pub fn cors_origins(&self) -> Vec<String> {
        let raw = self
            .cors_allowed_origin
            .as_deref()
            .unwrap_or(self.frontend_url.as_str());
        raw.split(',')
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .collect()
    }
}

fn redact_database_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) => {
            let _ = parsed.set_password(Some("*****"));
            parsed.to_string()
        }
        Err(_) => "***".to_string(),
    }
}
