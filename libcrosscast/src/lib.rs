//! Crosscast - scheduled publishing to Twitter and LinkedIn
//!
//! This library holds the whole publishing pipeline: encrypted credential
//! storage, OAuth connection and token refresh, the delayed delivery queue,
//! the publish dispatcher and its state machine, and the platform REST
//! clients. The `cast-*` binaries are thin shells around it.

pub mod analytics;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod oauth;
pub mod platforms;
pub mod queue;
pub mod runtime;
pub mod scheduling;
pub mod tokens;
pub mod types;
pub mod vault;

// Re-export commonly used types
pub use config::{Config, Secrets};
pub use db::Database;
pub use dispatcher::{DeliveryOutcome, PublishDispatcher, ScheduleReceipt, ScheduleRequest};
pub use error::{CrosscastError, Result};
pub use runtime::Runtime;
pub use tokens::{SweepReport, TokenManager};
pub use types::{
    ConnectedAccount, Content, ContentType, ContentUnit, PublicationStatus, ScheduledPublication,
    SocialPlatform,
};
pub use vault::CredentialVault;
