mod accounts;
mod catalog;
mod config;
mod db;
mod entities;
mod error;
mod extract;
mod mailer;
mod models;
mod policy;
mod reviews;
mod routes;
mod tokens;
mod validators;


use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::{
    config::Config,
    mailer::{LogMailer, Mailer, Outbox, SmtpMailer},
    tokens::TokenSigner,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: DatabaseConnection,
    pub signer: TokenSigner,
    pub outbox: Outbox,
}

impl AppState {
    pub fn new(config: Arc<Config>, db: DatabaseConnection, mailer: Arc<dyn Mailer>) -> Self {
        let signer = TokenSigner::new(
            &config.secret_key,
            config.access_token_ttl_hours,
            config.confirmation_code_ttl_hours,
        );
        let outbox = Outbox::new(mailer, config.mail_rps);
        Self { config, db, signer, outbox }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,reviewd=debug,sqlx=warn".to_string()),
        )
        .init();

    let config = Arc::new(Config::from_env()?);

    let db = db::connect_and_migrate(&config.database_url).await?;
    if let Some(admin) = &config.admin {
        accounts::ensure_admin(&db, admin).await?;
    }

    let mailer: Arc<dyn Mailer> = match &config.smtp {
        Some(smtp) => {
            tracing::info!(host = %smtp.host, port = smtp.port, "delivering mail over smtp");
            Arc::new(SmtpMailer::new(smtp, &config.mail_from)?)
        },
        None => {
            tracing::info!("SMTP_HOST not set, confirmation mails go to the log");
            Arc::new(LogMailer)
        },
    };

    let state = Arc::new(AppState::new(config.clone(), db, mailer));
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    tracing::info!(addr = %config.addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
