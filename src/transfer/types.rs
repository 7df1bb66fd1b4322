use crate::catalog::StoreInfo;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One side of a transfer: a role within a job and the party playing it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Party {
    pub role: String,
    pub party_id: String,
}

impl Party {
    pub fn new(role: impl Into<String>, party_id: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            party_id: party_id.into(),
        }
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.role, self.party_id)
    }
}

/// Which side of the transfer a request speaks for.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferType {
    Send,
    Recv,
    /// Missing or unrecognized direction; rejected by status checks.
    #[default]
    #[serde(other)]
    Unspecified,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    #[default]
    Unknown,
    Complete,
    Error,
}

impl TransferStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransferStatus::Complete | TransferStatus::Error)
    }
}

/// Deterministic identity of a transfer, computed independently by both parties.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TransferId(pub String);

impl TransferId {
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Describes one logical transfer. Treated as a value: status changes produce a
/// new meta through [`TransferMeta::with_status`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferMeta {
    pub job_id: String,
    pub tag: String,
    pub src: Party,
    pub dst: Party,
    #[serde(rename = "type", default)]
    pub transfer_type: TransferType,
    #[serde(default)]
    pub status: TransferStatus,
    /// Source table on the sending side, destination table on the receiving side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<StoreInfo>,
}

impl TransferMeta {
    /// Direction and status are not part of the identity.
    pub fn transfer_id(&self) -> TransferId {
        TransferId(format!(
            "{}:{}:{}:{}",
            self.job_id, self.tag, self.src, self.dst
        ))
    }

    pub fn with_status(&self, status: TransferStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }

    /// Table this side reads from (send) or writes into (recv). Defaults to
    /// `namespace = job_id`, `table = tag`.
    pub fn store(&self) -> StoreInfo {
        self.data
            .clone()
            .unwrap_or_else(|| StoreInfo::new(&self.job_id, &self.tag))
    }
}
