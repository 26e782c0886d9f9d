//! Outbound mail for login codes.
//!
//! `ResendMailer` delivers through Resend when configured. `LogMailer` is
//! the fallback for local setups: it logs that a code was issued (never the
//! code itself) so operators can see delivery would have happened.

use resend_rs::Resend;
use resend_rs::types::CreateEmailBaseOptions;

use crate::config::MailConfig;

const LOGIN_CODE_TEMPLATE: &str = include_str!("../../templates/login_code.html");
const LOGIN_CODE_SUBJECT: &str = "Your FleetLedger sign-in code";

#[derive(Debug, thiserror::Error)]
#[error("email delivery failed: {0}")]
pub struct MailError(pub String);

#[async_trait::async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver a login code to `to_email`.
    ///
    /// # Errors
    ///
    /// Returns [`MailError`] when the provider rejects the message.
    async fn send_login_code(&self, to_email: &str, code: &str) -> Result<(), MailError>;
}

pub struct ResendMailer {
    client: Resend,
    from: String,
}

impl ResendMailer {
    #[must_use]
    pub fn new(config: &MailConfig) -> Self {
        Self { client: Resend::new(&config.resend_api_key), from: config.from.clone() }
    }
}

#[async_trait::async_trait]
impl Mailer for ResendMailer {
    async fn send_login_code(&self, to_email: &str, code: &str) -> Result<(), MailError> {
        let html = render_login_code_template(to_email, code);
        let email = CreateEmailBaseOptions::new(&self.from, [to_email], LOGIN_CODE_SUBJECT).with_html(&html);
        self.client
            .emails
            .send(email)
            .await
            .map_err(|e| MailError(e.to_string()))?;
        Ok(())
    }
}

pub struct LogMailer;

#[async_trait::async_trait]
impl Mailer for LogMailer {
    async fn send_login_code(&self, to_email: &str, _code: &str) -> Result<(), MailError> {
        tracing::warn!(email = %to_email, "mail not configured; login code issued but not delivered");
        Ok(())
    }
}

#[must_use]
pub fn render_login_code_template(email: &str, code: &str) -> String {
    LOGIN_CODE_TEMPLATE
        .replace("{{EMAIL}}", email)
        .replace("{{CODE}}", code)
}

#[cfg(test)]
#[path = "mailer_test.rs"]
mod tests;
