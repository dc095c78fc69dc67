//! Secret masking, write resolution and audit redaction

use std::sync::Arc;

use super::schema::{Configuration, Schema, Sensitivity, SettingValue};
use crate::core::constants::{MASK_SENTINEL, REDACTION_MARKER};

/// Applies the schema's secret markers to reads, writes and audit records
#[derive(Debug, Clone)]
pub struct SecretCodec {
    schema: Arc<Schema>,
}

impl SecretCodec {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Replace every non-empty secret with the mask sentinel.
    /// An empty secret stays empty so callers can tell "unset" from "set".
    pub fn mask(&self, config: &Configuration) -> Configuration {
        config
            .iter()
            .map(|(key, value)| {
                let shown = match self.sensitivity(key) {
                    Sensitivity::Secret if !value.is_empty_text() => {
                        SettingValue::text(MASK_SENTINEL)
                    }
                    Sensitivity::Secret | Sensitivity::Plain => value.clone(),
                };
                (key.clone(), shown)
            })
            .collect()
    }

    /// Decide the value to persist for `key`.
    ///
    /// Plain fields take the incoming value. Secret fields keep `current`
    /// when the incoming value is absent, empty or the mask sentinel, so a
    /// client that echoes back a masked read never clobbers the secret.
    pub fn resolve_write(
        &self,
        key: &str,
        incoming: Option<&SettingValue>,
        current: &SettingValue,
    ) -> SettingValue {
        match (self.sensitivity(key), incoming) {
            (_, None) => current.clone(),
            (Sensitivity::Plain, Some(value)) => value.clone(),
            (Sensitivity::Secret, Some(SettingValue::Text(s)))
                if s.is_empty() || s == MASK_SENTINEL =>
            {
                current.clone()
            }
            (Sensitivity::Secret, Some(value)) => value.clone(),
        }
    }

    /// Value recorded in the audit log for `key`
    pub fn redact(&self, key: &str, value: &SettingValue) -> SettingValue {
        match self.sensitivity(key) {
            Sensitivity::Secret => SettingValue::text(REDACTION_MARKER),
            Sensitivity::Plain => value.clone(),
        }
    }

    fn sensitivity(&self, key: &str) -> Sensitivity {
        self.schema
            .field(key)
            .map(|f| f.sensitivity)
            .unwrap_or(Sensitivity::Plain)
    }
}
