use std::net::SocketAddr;

use anyhow::Context;

const DEV_SECRET_KEY: &str = "reviewd-insecure-development-key";

#[derive(Clone, Debug)]
pub struct Config {
    pub addr: SocketAddr,
    pub database_url: String,
    pub secret_key: String,
    pub access_token_ttl_hours: i64,
    pub confirmation_code_ttl_hours: i64,
    pub page_size: u64,
    pub smtp: Option<SmtpConfig>,
    pub mail_from: String,
    pub mail_rps: u32,
    pub admin: Option<AdminBootstrap>,
}

#[derive(Clone, Debug)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

#[derive(Clone, Debug)]
pub struct AdminBootstrap {
    pub username: String,
    pub email: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port: u16 =
            std::env::var("PORT").unwrap_or_else(|_| "3000".to_string()).parse().context("PORT")?;

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://reviewd.db?mode=rwc".to_string());

        let secret_key = std::env::var("SECRET_KEY").unwrap_or_default();
        let secret_key = if secret_key.trim().is_empty() {
            tracing::warn!("SECRET_KEY not set, signing tokens with the development key");
            DEV_SECRET_KEY.to_string()
        } else {
            secret_key
        };

        let access_token_ttl_hours: i64 = parse_or("ACCESS_TOKEN_TTL_HOURS", 24)?;
        let confirmation_code_ttl_hours: i64 = parse_or("CONFIRMATION_CODE_TTL_HOURS", 72)?;
        let page_size: u64 = parse_or("PAGE_SIZE", 10)?;
        let mail_rps: u32 = parse_or("MAIL_RPS", 5)?;

        let smtp = match std::env::var("SMTP_HOST") {
            Ok(host) if !host.trim().is_empty() => Some(SmtpConfig {
                host,
                port: parse_or("SMTP_PORT", 587)?,
                username: std::env::var("SMTP_USERNAME").unwrap_or_default(),
                password: std::env::var("SMTP_PASSWORD").unwrap_or_default(),
            }),
            _ => None,
        };
        let mail_from =
            std::env::var("MAIL_FROM").unwrap_or_else(|_| "webmaster@localhost".to_string());

        let admin = match (std::env::var("ADMIN_USERNAME"), std::env::var("ADMIN_EMAIL")) {
            (Ok(username), Ok(email)) => Some(AdminBootstrap { username, email }),
            _ => None,
        };

        Ok(Self {
            addr: format!("{host}:{port}").parse().context("HOST/PORT")?,
            database_url,
            secret_key,
            access_token_ttl_hours,
            confirmation_code_ttl_hours,
            page_size: page_size.max(1),
            smtp,
            mail_from,
            mail_rps,
            admin,
        })
    }

    /// Settings for an in-process instance backed by an in-memory database.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            addr: "127.0.0.1:0".parse().expect("static address"),
            database_url: "sqlite::memory:".to_string(),
            secret_key: "test-secret".to_string(),
            access_token_ttl_hours: 1,
            confirmation_code_ttl_hours: 1,
            page_size: 10,
            smtp: None,
            mail_from: "webmaster@localhost".to_string(),
            mail_rps: 100,
            admin: None,
        }
    }
}

fn parse_or<T>(var: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(var) {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().parse().context(var.to_string()),
        _ => Ok(default),
    }
}
