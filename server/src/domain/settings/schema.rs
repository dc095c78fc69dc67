//! Settings schema: the fixed key set, value kinds and secret markers

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single setting value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    List(Vec<String>),
}

impl SettingValue {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn is_empty_text(&self) -> bool {
        matches!(self, Self::Text(s) if s.is_empty())
    }
}

/// Full configuration, keyed by setting name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration(BTreeMap<String, SettingValue>);

impl Configuration {
    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: SettingValue) {
        self.0.insert(key.into(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SettingValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, SettingValue)> for Configuration {
    fn from_iter<I: IntoIterator<Item = (String, SettingValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Float,
    Boolean,
    List,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::List => "list",
        }
    }

    /// Convert a JSON value to this kind. Integers are accepted for floats;
    /// nothing else is coerced.
    pub fn parse(&self, value: &Value) -> Option<SettingValue> {
        match (self, value) {
            (Self::Text, Value::String(s)) => Some(SettingValue::Text(s.clone())),
            (Self::Boolean, Value::Bool(b)) => Some(SettingValue::Boolean(*b)),
            (Self::Integer, Value::Number(n)) => n.as_i64().map(SettingValue::Integer),
            (Self::Float, Value::Number(n)) => n.as_f64().map(SettingValue::Float),
            (Self::List, Value::Array(items)) => items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .map(SettingValue::List),
            _ => None,
        }
    }
}

/// Whether a field's value may ever leave the process in plaintext
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sensitivity {
    Plain,
    Secret,
}

#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub key: &'static str,
    pub kind: FieldKind,
    pub sensitivity: Sensitivity,
    pub default: SettingValue,
}

impl FieldSpec {
    fn plain(key: &'static str, kind: FieldKind, default: SettingValue) -> Self {
        Self {
            key,
            kind,
            sensitivity: Sensitivity::Plain,
            default,
        }
    }

    fn secret(key: &'static str) -> Self {
        Self {
            key,
            kind: FieldKind::Text,
            sensitivity: Sensitivity::Secret,
            default: SettingValue::text(""),
        }
    }

    pub fn is_secret(&self) -> bool {
        self.sensitivity == Sensitivity::Secret
    }
}

/// The set of known settings, fixed at startup
#[derive(Debug, Clone)]
pub struct Schema {
    fields: Vec<FieldSpec>,
}

impl Schema {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    /// Settings of the trading bot
    pub fn trading() -> Self {
        use FieldKind::*;

        Self::new(vec![
            FieldSpec::plain("exchange", Text, SettingValue::text("binance")),
            FieldSpec::secret("api_key"),
            FieldSpec::secret("api_secret"),
            FieldSpec::plain(
                "symbols",
                List,
                SettingValue::List(vec!["BTC/USDT".to_string()]),
            ),
            FieldSpec::plain("timeframe", Text, SettingValue::text("1h")),
            FieldSpec::plain("strategy", Text, SettingValue::text("ema_crossover")),
            FieldSpec::plain("trade_amount", Float, SettingValue::Float(100.0)),
            FieldSpec::plain("max_open_trades", Integer, SettingValue::Integer(3)),
            FieldSpec::plain("stop_loss_pct", Float, SettingValue::Float(2.0)),
            FieldSpec::plain("take_profit_pct", Float, SettingValue::Float(4.0)),
            FieldSpec::plain("dry_run", Boolean, SettingValue::Boolean(true)),
            FieldSpec::plain(
                "notifications_enabled",
                Boolean,
                SettingValue::Boolean(false),
            ),
            FieldSpec::secret("telegram_bot_token"),
            FieldSpec::plain("telegram_chat_id", Text, SettingValue::text("")),
        ])
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, key: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.key == key)
    }

    pub fn is_secret(&self, key: &str) -> bool {
        self.field(key).is_some_and(FieldSpec::is_secret)
    }

    pub fn defaults(&self) -> Configuration {
        self.fields
            .iter()
            .map(|f| (f.key.to_string(), f.default.clone()))
            .collect()
    }

    /// Bring a stored document in line with the schema.
    ///
    /// Unknown keys are dropped, missing keys take their default and values of
    /// the wrong kind are replaced by the default. Values are never logged.
    pub fn reconcile(&self, stored: &serde_json::Map<String, Value>) -> Configuration {
        for key in stored.keys().filter(|k| self.field(k).is_none()) {
            tracing::warn!(key = %key, "Dropping unknown stored setting");
        }

        self.fields
            .iter()
            .map(|field| {
                let value = match stored.get(field.key) {
                    None => field.default.clone(),
                    Some(raw) => field.kind.parse(raw).unwrap_or_else(|| {
                        tracing::warn!(
                            key = field.key,
                            expected = field.kind.as_str(),
                            "Stored setting has the wrong type, using default"
                        );
                        field.default.clone()
                    }),
                };
                (field.key.to_string(), value)
            })
            .collect()
    }
}
