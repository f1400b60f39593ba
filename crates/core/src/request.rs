//! Request metadata and the resource classification rules.
//!
//! The edge decides how to answer a `GET` purely from what it can see on the
//! request: the URL and the fetch metadata the browser attaches
//! (`Sec-Fetch-Dest`, `Sec-Fetch-Mode`, `Accept`). Classification is first
//! match wins, in the order of [`ResourceClass`]'s variants.

use serde::{Deserialize, Serialize};

/// What the browser intends to do with the response (`Sec-Fetch-Dest`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RequestDestination {
    Document,
    Script,
    Style,
    Font,
    Image,
    Manifest,
    #[default]
    Empty,
}

impl RequestDestination {
    /// Parse a `Sec-Fetch-Dest` header value. Unknown values map to `Empty`.
    #[must_use]
    pub fn from_header(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "document" | "iframe" | "frame" => Self::Document,
            "script" | "worker" | "sharedworker" | "serviceworker" => Self::Script,
            "style" => Self::Style,
            "font" => Self::Font,
            "image" => Self::Image,
            "manifest" => Self::Manifest,
            _ => Self::Empty,
        }
    }
}

/// Request mode (`Sec-Fetch-Mode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    Navigate,
    #[default]
    Cors,
    NoCors,
    SameOrigin,
}

impl RequestMode {
    /// Parse a `Sec-Fetch-Mode` header value. Unknown values map to `Cors`.
    #[must_use]
    pub fn from_header(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "navigate" => Self::Navigate,
            "no-cors" => Self::NoCors,
            "same-origin" => Self::SameOrigin,
            _ => Self::Cors,
        }
    }
}

/// The parts of a request that classification looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo<'a> {
    pub host: &'a str,
    pub path: &'a str,
    pub destination: RequestDestination,
    pub mode: RequestMode,
    /// The `Accept` header asks for HTML.
    pub accepts_html: bool,
}

/// How a request is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheStrategy {
    /// Always go to the network, never read or write a cache.
    NetworkOnly,
    /// Serve from cache; on a miss fetch, store, and return.
    CacheFirst,
    /// Serve from cache and refresh it in the background.
    StaleWhileRevalidate,
    /// Race the network against a timeout; fall back to cache.
    NetworkFirst,
}

/// The named caches each version owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    Static,
    Dynamic,
    Images,
    Api,
}

impl CacheKind {
    pub const ALL: [Self; 4] = [Self::Static, Self::Dynamic, Self::Images, Self::Api];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Dynamic => "dynamic",
            Self::Images => "images",
            Self::Api => "api",
        }
    }

    /// Parse the kind segment of a cache name.
    #[must_use]
    pub fn from_name_segment(segment: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == segment)
    }
}

/// Resource classes, listed in classification priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceClass {
    Payment,
    Static,
    Image,
    Api,
    Navigation,
    Other,
}

const PAYMENT_PATHS: &[&str] = &[
    "/api/payment",
    "/api/payments",
    "/api/checkout",
    "/api/stripe",
    "/api/twint",
    "/stripe/",
    "/twint/",
];
const PAYMENT_HOSTS: &[&str] = &["stripe.com", "twint.ch"];

const STATIC_PREFIXES: &[&str] = &["/_next/static/", "/static/", "/assets/"];
const STATIC_EXTENSIONS: &[&str] = &[
    "js", "mjs", "css", "woff", "woff2", "ttf", "otf", "eot", "map",
];
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "avif", "svg", "ico"];
const API_MARKERS: &[&str] = &["/menu", "/products", "/tenant"];

impl ResourceClass {
    /// Classify a request. First match wins.
    #[must_use]
    pub fn classify(request: &RequestInfo<'_>) -> Self {
        let path = request.path.to_ascii_lowercase();
        let host = request.host.to_ascii_lowercase();
        let extension = path
            .rsplit('/')
            .next()
            .and_then(|segment| segment.rsplit_once('.'))
            .map(|(_, ext)| ext);

        if PAYMENT_PATHS.iter().any(|p| path.contains(p))
            || PAYMENT_HOSTS
                .iter()
                .any(|h| host == *h || host.ends_with(&format!(".{h}")))
        {
            return Self::Payment;
        }

        if matches!(
            request.destination,
            RequestDestination::Script
                | RequestDestination::Style
                | RequestDestination::Font
                | RequestDestination::Manifest
        ) || STATIC_PREFIXES.iter().any(|p| path.starts_with(p))
            || extension.is_some_and(|ext| STATIC_EXTENSIONS.contains(&ext))
        {
            return Self::Static;
        }

        if request.destination == RequestDestination::Image
            || extension.is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext))
        {
            return Self::Image;
        }

        if path.starts_with("/api/") || API_MARKERS.iter().any(|m| path.contains(m)) {
            return Self::Api;
        }

        if request.mode == RequestMode::Navigate
            || request.destination == RequestDestination::Document
            || request.accepts_html
        {
            return Self::Navigation;
        }

        Self::Other
    }

    /// The strategy this class is answered with.
    #[must_use]
    pub const fn strategy(self) -> CacheStrategy {
        match self {
            Self::Payment => CacheStrategy::NetworkOnly,
            Self::Static | Self::Other => CacheStrategy::CacheFirst,
            Self::Image => CacheStrategy::StaleWhileRevalidate,
            Self::Api | Self::Navigation => CacheStrategy::NetworkFirst,
        }
    }

    /// The cache this class reads and writes, if any.
    #[must_use]
    pub const fn cache_kind(self) -> Option<CacheKind> {
        match self {
            Self::Payment => None,
            Self::Static => Some(CacheKind::Static),
            Self::Image => Some(CacheKind::Images),
            Self::Api => Some(CacheKind::Api),
            Self::Navigation | Self::Other => Some(CacheKind::Dynamic),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(path: &str) -> RequestInfo<'_> {
        RequestInfo {
            host: "app.eatech.ch",
            path,
            destination: RequestDestination::Empty,
            mode: RequestMode::Cors,
            accepts_html: false,
        }
    }

    #[test]
    fn test_payment_wins_over_api() {
        assert_eq!(
            ResourceClass::classify(&info("/api/payments/intent")),
            ResourceClass::Payment
        );
        assert_eq!(
            ResourceClass::classify(&info("/api/checkout/session")),
            ResourceClass::Payment
        );
    }

    #[test]
    fn test_payment_host() {
        let request = RequestInfo {
            host: "js.stripe.com",
            destination: RequestDestination::Script,
            ..info("/v3/")
        };
        assert_eq!(ResourceClass::classify(&request), ResourceClass::Payment);
    }

    #[test]
    fn test_static_assets() {
        assert_eq!(
            ResourceClass::classify(&info("/_next/static/chunks/main-abc.js")),
            ResourceClass::Static
        );
        assert_eq!(
            ResourceClass::classify(&info("/fonts/inter.woff2")),
            ResourceClass::Static
        );
        let styled = RequestInfo {
            destination: RequestDestination::Style,
            ..info("/theme")
        };
        assert_eq!(ResourceClass::classify(&styled), ResourceClass::Static);
    }

    #[test]
    fn test_images() {
        assert_eq!(
            ResourceClass::classify(&info("/uploads/burger.WEBP")),
            ResourceClass::Image
        );
        let image = RequestInfo {
            destination: RequestDestination::Image,
            ..info("/cdn/product/12")
        };
        assert_eq!(ResourceClass::classify(&image), ResourceClass::Image);
    }

    #[test]
    fn test_api() {
        assert_eq!(ResourceClass::classify(&info("/api/menu")), ResourceClass::Api);
        assert_eq!(
            ResourceClass::classify(&info("/tenants/zuri/menu")),
            ResourceClass::Api
        );
    }

    #[test]
    fn test_navigation_and_other() {
        let nav = RequestInfo {
            mode: RequestMode::Navigate,
            ..info("/checkout-complete")
        };
        assert_eq!(ResourceClass::classify(&nav), ResourceClass::Navigation);

        let html = RequestInfo {
            accepts_html: true,
            ..info("/about")
        };
        assert_eq!(ResourceClass::classify(&html), ResourceClass::Navigation);

        assert_eq!(ResourceClass::classify(&info("/robots.txt")), ResourceClass::Other);
    }

    #[test]
    fn test_strategy_table() {
        assert_eq!(ResourceClass::Payment.strategy(), CacheStrategy::NetworkOnly);
        assert_eq!(ResourceClass::Payment.cache_kind(), None);
        assert_eq!(ResourceClass::Static.strategy(), CacheStrategy::CacheFirst);
        assert_eq!(
            ResourceClass::Image.strategy(),
            CacheStrategy::StaleWhileRevalidate
        );
        assert_eq!(ResourceClass::Api.strategy(), CacheStrategy::NetworkFirst);
        assert_eq!(
            ResourceClass::Navigation.cache_kind(),
            Some(CacheKind::Dynamic)
        );
        assert_eq!(ResourceClass::Other.strategy(), CacheStrategy::CacheFirst);
    }

    #[test]
    fn test_fetch_metadata_parsing() {
        assert_eq!(
            RequestDestination::from_header("IMAGE"),
            RequestDestination::Image
        );
        assert_eq!(
            RequestDestination::from_header("audio"),
            RequestDestination::Empty
        );
        assert_eq!(RequestMode::from_header("navigate"), RequestMode::Navigate);
    }
}
