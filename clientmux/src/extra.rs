//! Correlation token generators

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Produces the `@extra` token attached to each outgoing request
///
/// Tokens must be unique among the requests a single client has in flight.
pub type ExtraGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Random time-ordered tokens (UUID v7)
pub fn uuid_generator() -> ExtraGenerator {
    Arc::new(|| Uuid::now_v7().to_string())
}

/// Monotonic tokens of the form `{prefix}{n}`, starting at 1
pub fn sequential_generator(prefix: impl Into<String>) -> ExtraGenerator {
    let prefix = prefix.into();
    let counter = AtomicU64::new(0);
    Arc::new(move || {
        let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{prefix}{n}")
    })
}

/// Generator strategy selectable from configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ExtraStrategy {
    #[default]
    Uuid,
    Sequential { prefix: String },
}

impl ExtraStrategy {
    pub fn generator(&self) -> ExtraGenerator {
        match self {
            ExtraStrategy::Uuid => uuid_generator(),
            ExtraStrategy::Sequential { prefix } => sequential_generator(prefix.clone()),
        }
    }
}
