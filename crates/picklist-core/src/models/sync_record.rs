//! Offline sync record model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::models::PullSession;

/// Durable sync lifecycle of one stored session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Mirrored locally, not yet submitted
    Pending,
    /// A submission attempt is in flight
    Syncing,
    /// The remote completion write succeeded
    Synced,
    /// The last submission attempt failed; eligible for retry
    Failed,
}

impl SyncStatus {
    /// Database column representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "syncing" => Ok(Self::Syncing),
            "synced" => Ok(Self::Synced),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown sync status: {other}")),
        }
    }
}

/// One session snapshot held in the durable local store
///
/// Created when a session starts, rewritten on every local mutation, and
/// deleted only after the remote completion write is confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRecord {
    /// The mirrored session
    pub session: PullSession,
    /// Where this record sits in the sync lifecycle
    pub sync_status: SyncStatus,
    /// When submission was last attempted (Unix ms)
    pub last_attempt: Option<i64>,
    /// Error message from the last failed attempt
    pub error: Option<String>,
}

impl SyncRecord {
    /// A fresh pending record mirroring the given session
    #[must_use]
    pub const fn pending(session: PullSession) -> Self {
        Self {
            session,
            sync_status: SyncStatus::Pending,
            last_attempt: None,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_status_roundtrip() {
        for status in [
            SyncStatus::Pending,
            SyncStatus::Syncing,
            SyncStatus::Synced,
            SyncStatus::Failed,
        ] {
            let parsed: SyncStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("bogus".parse::<SyncStatus>().is_err());
    }
}
