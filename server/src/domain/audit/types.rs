//! Audit record types

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::settings::SettingValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Update,
    Reset,
    Reinitialize,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Update => "update",
            Self::Reset => "reset",
            Self::Reinitialize => "reinitialize",
        };
        f.write_str(s)
    }
}

/// Who made a change. Records whether a credential was presented, never the credential.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    pub address: Option<String>,
    pub user_agent: Option<String>,
    pub credential_present: bool,
}

impl Actor {
    /// Changes made by the process itself (CLI, startup)
    pub fn system() -> Self {
        Self {
            address: Some("local".to_string()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueChange {
    pub old: SettingValue,
    pub new: SettingValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub actor: Actor,
    pub changes: BTreeMap<String, ValueChange>,
}

/// One page of entries, newest first
#[derive(Debug, Clone, Serialize)]
pub struct AuditPage {
    pub page: usize,
    pub page_size: usize,
    /// Entries in the active log file
    pub total: usize,
    pub entries: Vec<AuditEntry>,
}
