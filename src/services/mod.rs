//! Domain services used by the HTTP routes and the automation worker.
//!
//! ARCHITECTURE
//! ============
//! Service modules own business logic and persistence so route handlers stay
//! focused on request decoding, extractors, and status mapping. Every
//! tenant-scoped operation takes a `TenantCtx` and checks its permission
//! before touching the database.

pub mod analytics;
pub mod audit;
pub mod automation;
pub mod budget;
pub mod contract;
pub mod customer;
pub mod email_auth;
pub mod ledger;
pub mod mailer;
pub mod mfa;
pub mod numbering;
pub mod session;
pub mod tenant;
pub mod vehicle;
