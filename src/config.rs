//! Connection options.

use serde::{Deserialize, Serialize};

use crate::types::TransactionMode;

/// Options applied when a [`Database`](crate::Database) is opened.
///
/// Every field has a default, so a partial document deserializes:
///
/// ```
/// let config: stepsqlite::DatabaseConfig =
///     serde_json::from_str(r#"{ "results_as_hash": true }"#).unwrap();
/// assert!(config.results_as_hash);
/// assert!(!config.strict);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Materialize rows as name/value pairs instead of value lists.
    pub results_as_hash: bool,
    /// Refuse to close while statements are still open.
    pub strict: bool,
    /// Open without write access.
    pub readonly: bool,
    /// Mode used by `begin` and `transaction`.
    pub default_transaction_mode: TransactionMode,
}

impl DatabaseConfig {
    pub fn results_as_hash(mut self, enabled: bool) -> Self {
        self.results_as_hash = enabled;
        self
    }

    pub fn strict(mut self, enabled: bool) -> Self {
        self.strict = enabled;
        self
    }

    pub fn readonly(mut self, enabled: bool) -> Self {
        self.readonly = enabled;
        self
    }

    pub fn default_transaction_mode(mut self, mode: TransactionMode) -> Self {
        self.default_transaction_mode = mode;
        self
    }
}
