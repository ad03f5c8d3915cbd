//! Imported batches: the unit tasks are activated by.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::uuid_id;

uuid_id!(
    /// Newtype for batch IDs.
    BatchId
);

/// One import of batch descriptors into a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub name: String,
    pub campaign: String,
    /// At least one entry was imported successfully.
    pub valid: bool,
    /// An operator released the batch for activation.
    pub ready: bool,
    pub created_at: DateTime<Utc>,
}

impl Batch {
    pub fn can_activate(&self) -> bool {
        self.valid && self.ready
    }
}
