//! Optional structured-extraction assistant.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::Role;

/// A ride proposal extracted from free text. Every field is optional and is
/// validated like regular user input before it is used.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RideProposal {
    pub role: Option<Role>,
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub schedule: Option<String>,
}

impl RideProposal {
    pub fn is_empty(&self) -> bool {
        self.role.is_none()
            && self.origin.is_none()
            && self.destination.is_none()
            && self.schedule.is_none()
    }
}

#[derive(Error, Debug, Clone)]
pub enum AssistantError {
    #[error("assistant unavailable: {0}")]
    Unavailable(String),

    #[error("malformed assistant response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait ExtractionAssistant: Send + Sync {
    async fn propose(
        &self,
        user_id: &str,
        text: &str,
    ) -> Result<Option<RideProposal>, AssistantError>;
}
