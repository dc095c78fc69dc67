//! Domain logic
//!
//! - `settings` - Settings schema, secret handling and the settings store
//! - `audit` - Append-only change log

pub mod audit;
pub mod settings;
