//! Commands the host application sends to the edge worker.

use serde::{Deserialize, Serialize};

/// A host-to-worker message, tagged by `type`.
///
/// ```
/// use eatech_core::HostCommand;
///
/// let cmd: HostCommand = serde_json::from_str(r#"{"type":"CACHE_URLS","urls":["/menu"]}"#).unwrap();
/// assert_eq!(cmd, HostCommand::CacheUrls { urls: vec!["/menu".into()] });
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostCommand {
    /// Activate a waiting version immediately.
    SkipWaiting,
    /// Delete every versioned cache owned by the edge.
    ClearCache,
    /// Warm the caches with the given URLs.
    CacheUrls {
        #[serde(alias = "payload")]
        urls: Vec<String>,
    },
}
