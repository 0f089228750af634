//! Turning inbound messages into trigger fires.

use thiserror::Error;

pub mod endpoint;
pub mod payload;
pub mod pipeline;

pub use endpoint::{trigger_url, FireError, HttpTriggerEndpoint, TriggerEndpoint};
pub use payload::{decode_body, fire_body};
pub use pipeline::DeliveryPipeline;

/// Terminal outcome of a delivery. The message is rejected and the receiver removed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("trigger {trigger} has no fires left")]
    BudgetExhausted { trigger: String },
    #[error("trigger {trigger} was refused with status {status}; disabling it")]
    Disabled { trigger: String, status: u16 },
    #[error("unable to reach server to fire trigger {trigger} after {attempts} attempts: {reason}")]
    Exhausted {
        trigger: String,
        attempts: u32,
        reason: String,
    },
}

impl DeliveryError {
    /// HTTP status that ended the delivery, if the endpoint answered.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            DeliveryError::Disabled { status, .. } => Some(*status),
            _ => None,
        }
    }
}
