//! Versioned bucket keys
//!
//! All keys carry a version prefix so a change to the stored bucket layout
//! can abandon old state instead of misreading it.

use crate::core::constants::RATE_LIMIT_KEY_VERSION;

use super::Scope;

pub struct BucketKey;

impl BucketKey {
    /// Key for one client's bucket in one scope, e.g. `v1:rl:settings:10.0.0.7`
    pub fn bucket(scope: Scope, identity: &str) -> String {
        format!(
            "{}:rl:{}:{}",
            RATE_LIMIT_KEY_VERSION,
            scope.as_str(),
            identity
        )
    }
}
