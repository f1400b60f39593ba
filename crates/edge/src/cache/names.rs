//! Versioned cache names and their eviction policies.

use std::time::Duration;

use eatech_core::request::CacheKind;

/// Prefix shared by every cache the edge owns.
pub const CACHE_PREFIX: &str = "eatech-";

/// Entry and age bounds for one named cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub max_entries: u64,
    pub max_age: Option<Duration>,
}

impl CachePolicy {
    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    /// Policy for a cache kind.
    #[must_use]
    pub const fn for_kind(kind: CacheKind) -> Self {
        match kind {
            CacheKind::Static => Self {
                max_entries: 200,
                max_age: None,
            },
            CacheKind::Dynamic => Self {
                max_entries: 50,
                max_age: Some(Self::DAY),
            },
            CacheKind::Images => Self {
                max_entries: 100,
                max_age: Some(Duration::from_secs(30 * 24 * 60 * 60)),
            },
            CacheKind::Api => Self {
                max_entries: 50,
                max_age: Some(Duration::from_secs(5 * 60)),
            },
        }
    }

    /// Policy for names outside the versioned scheme.
    #[must_use]
    pub const fn fallback() -> Self {
        Self::for_kind(CacheKind::Dynamic)
    }
}

/// A parsed `eatech-{kind}-{version}` cache name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheName {
    pub kind: CacheKind,
    pub version: String,
}

impl CacheName {
    /// Parse a cache name. Returns `None` for names the edge does not own.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let rest = name.strip_prefix(CACHE_PREFIX)?;
        let (kind, version) = rest.split_once('-')?;
        if version.is_empty() {
            return None;
        }
        Some(Self {
            kind: CacheKind::from_name_segment(kind)?,
            version: version.to_string(),
        })
    }
}

/// The four cache names that belong to one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheNames {
    version: String,
}

impl CacheNames {
    #[must_use]
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn name(&self, kind: CacheKind) -> String {
        format!("{CACHE_PREFIX}{}-{}", kind.as_str(), self.version)
    }

    /// All four names, in `CacheKind::ALL` order.
    #[must_use]
    pub fn all(&self) -> Vec<String> {
        CacheKind::ALL.into_iter().map(|kind| self.name(kind)).collect()
    }

    /// Whether `name` is owned by the edge.
    #[must_use]
    pub fn is_owned(name: &str) -> bool {
        name.starts_with(CACHE_PREFIX)
    }

    /// Whether `name` is owned by the edge but tagged with another version.
    #[must_use]
    pub fn is_stale(&self, name: &str) -> bool {
        Self::is_owned(name)
            && CacheName::parse(name).is_none_or(|parsed| parsed.version != self.version)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_names_carry_prefix_and_version() {
        let names = CacheNames::new("v2");
        assert_eq!(names.name(CacheKind::Static), "eatech-static-v2");
        assert_eq!(names.name(CacheKind::Api), "eatech-api-v2");
        assert_eq!(names.all().len(), 4);
    }

    #[test]
    fn test_parse_round_trip() {
        let parsed = CacheName::parse("eatech-images-v1.4.0-rc1").unwrap();
        assert_eq!(parsed.kind, CacheKind::Images);
        assert_eq!(parsed.version, "v1.4.0-rc1");

        assert!(CacheName::parse("other-static-v1").is_none());
        assert!(CacheName::parse("eatech-fonts-v1").is_none());
        assert!(CacheName::parse("eatech-static-").is_none());
    }

    #[test]
    fn test_stale_detection() {
        let names = CacheNames::new("v2");
        assert!(names.is_stale("eatech-static-v1"));
        assert!(names.is_stale("eatech-legacy"));
        assert!(!names.is_stale("eatech-static-v2"));
        assert!(!names.is_stale("workbox-precache"));
    }

    #[test]
    fn test_policies() {
        assert_eq!(CachePolicy::for_kind(CacheKind::Static).max_age, None);
        assert_eq!(CachePolicy::for_kind(CacheKind::Static).max_entries, 200);
        assert_eq!(
            CachePolicy::for_kind(CacheKind::Api).max_age,
            Some(Duration::from_secs(300))
        );
        assert_eq!(CachePolicy::for_kind(CacheKind::Images).max_entries, 100);
    }
}
