mod config;
mod db;
mod error;
mod llm;
mod rate_limit;
mod routes;
mod services;
mod state;

use std::sync::Arc;

use crate::llm::LlmChat;
use crate::services::mailer::{LogMailer, Mailer, ResendMailer};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = config::AppConfig::from_env().expect("invalid configuration");

    let pool = db::init_pool(&config.database_url, config.db_max_connections)
        .await
        .expect("database init failed");

    let mailer: Arc<dyn Mailer> = match &config.mail {
        Some(mail) => {
            tracing::info!(from = %mail.from, "mail delivery via Resend");
            Arc::new(ResendMailer::new(mail))
        }
        None => {
            tracing::warn!("RESEND_API_KEY/RESEND_FROM not set; login codes will not be delivered");
            Arc::new(LogMailer)
        }
    };

    // Non-fatal: narratives answer E_AI_UNAVAILABLE without a client.
    let llm: Option<Arc<dyn LlmChat>> = match llm::LlmClient::from_env() {
        Ok(client) => {
            tracing::info!(model = client.model(), "LLM client initialized");
            Some(Arc::new(client))
        }
        Err(e) => {
            tracing::warn!(error = %e, "LLM client not configured; narratives disabled");
            None
        }
    };

    let settings = state::Settings {
        session_ttl_hours: config.session_ttl_hours,
        cookie_secure: config.cookie_secure,
        default_currency: config.default_currency.clone(),
        expose_login_codes: config.expose_login_codes,
    };
    if settings.expose_login_codes {
        tracing::warn!("DEV_EXPOSE_LOGIN_CODES is on; login codes are returned in responses");
    }
    let state = state::AppState::new(pool.clone(), settings, mailer, llm);

    let _automation = services::automation::spawn_automation_worker(pool, config.automation_tick);

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .expect("failed to bind");

    tracing::info!(port = config.port, "fleetledger listening");
    axum::serve(listener, app).await.expect("server failed");
}
