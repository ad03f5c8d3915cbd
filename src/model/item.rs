//! Items: the unit of annotation content.

use serde::{Deserialize, Serialize};

use super::{TaskId, uuid_id};

uuid_id!(
    /// Newtype for item IDs.
    ItemId
);

/// What an item is for. Control items are indistinguishable to annotators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemType {
    /// A system translation under evaluation.
    #[serde(rename = "TGT")]
    Target,
    /// The human reference presented as a candidate.
    #[serde(rename = "REF")]
    Reference,
    /// A deliberately degraded reference.
    #[serde(rename = "BAD")]
    BadReference,
    /// A repeat of a target from the paired block.
    #[serde(rename = "CHK")]
    RedundantCheck,
}

impl ItemType {
    pub fn is_control(self) -> bool {
        !matches!(self, ItemType::Target)
    }

    pub fn code(self) -> &'static str {
        match self {
            ItemType::Target => "TGT",
            ItemType::Reference => "REF",
            ItemType::BadReference => "BAD",
            ItemType::RedundantCheck => "CHK",
        }
    }
}

impl std::fmt::Display for ItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl std::str::FromStr for ItemType {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TGT" => Ok(ItemType::Target),
            "REF" => Ok(ItemType::Reference),
            "BAD" => Ok(ItemType::BadReference),
            "CHK" => Ok(ItemType::RedundantCheck),
            _ => Err(crate::error::Error::Other(format!("unknown item type: {s}"))),
        }
    }
}

/// One persisted item of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub task_id: TaskId,
    /// Stored order within the task, 0..100.
    pub position: u32,
    pub block_index: u32,
    pub item_index: u32,
    /// Segment ID in the source collection.
    pub segment_id: u32,
    pub item_type: ItemType,
    pub source_id: String,
    pub source_text: String,
    /// System names joined with `+`, or `REF`/`BAD` for reference controls.
    pub target_id: String,
    pub target_text: String,
}
