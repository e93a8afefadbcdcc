//! Platform identity and canonicalization.
//!
//! Server identifiers arrive as free-form strings from transports and
//! configuration; everything downstream works with the `Platform` enum.

use serde::{Deserialize, Serialize};

/// One external advertising/analytics provider integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// GA4 web/app analytics
    GoogleAnalytics,
    /// Google Ads campaigns
    GoogleAds,
    /// Facebook / Meta Ads
    FacebookAds,
}

/// Kind of digital asset a connection is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Ga4Property,
    GoogleAdsAccount,
    FacebookAdAccount,
}

impl Platform {
    /// All supported platforms, in canonical order.
    pub const ALL: [Platform; 3] = [
        Platform::GoogleAnalytics,
        Platform::GoogleAds,
        Platform::FacebookAds,
    ];

    /// Canonical snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::GoogleAnalytics => "google_analytics",
            Platform::GoogleAds => "google_ads",
            Platform::FacebookAds => "facebook_ads",
        }
    }

    /// Canonicalize a configured platform name, accepting known aliases.
    pub fn parse(name: &str) -> Option<Platform> {
        let normalized = name.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "google_analytics" | "ga4" | "ga" | "analytics" => Some(Platform::GoogleAnalytics),
            "google_ads" | "ads" | "adwords" => Some(Platform::GoogleAds),
            "facebook" | "facebook_ads" | "meta" | "meta_ads" => Some(Platform::FacebookAds),
            _ => None,
        }
    }

    /// Resolve a transport/server identifier to a platform.
    ///
    /// Case-insensitive keyword match. `None` means the identifier cannot be
    /// attributed to any known platform; callers must treat that as
    /// indeterminate rather than guessing.
    pub fn resolve(server_identifier: &str) -> Option<Platform> {
        let id = server_identifier.to_ascii_lowercase().replace('-', "_");
        if id.contains("google_analytics") || id.contains("ga4") {
            Some(Platform::GoogleAnalytics)
        } else if id.contains("google_ads") || id.contains("adwords") {
            Some(Platform::GoogleAds)
        } else if id.contains("facebook") || id.contains("meta") {
            Some(Platform::FacebookAds)
        } else {
            None
        }
    }

    /// The digital-asset kind this platform's connections are scoped to.
    pub fn asset_type(&self) -> AssetType {
        match self {
            Platform::GoogleAnalytics => AssetType::Ga4Property,
            Platform::GoogleAds => AssetType::GoogleAdsAccount,
            Platform::FacebookAds => AssetType::FacebookAdAccount,
        }
    }

    /// Provider that issues OAuth grants for this platform.
    ///
    /// Google Analytics and Google Ads share the Google OAuth endpoint but
    /// are tracked as independent platform entries.
    pub fn oauth_provider(&self) -> &'static str {
        match self {
            Platform::GoogleAnalytics | Platform::GoogleAds => "google",
            Platform::FacebookAds => "facebook",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::parse(s).ok_or_else(|| format!("unknown platform: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canonical_names() {
        assert_eq!(
            Platform::parse("google_analytics"),
            Some(Platform::GoogleAnalytics)
        );
        assert_eq!(Platform::parse("google_ads"), Some(Platform::GoogleAds));
        assert_eq!(Platform::parse("facebook_ads"), Some(Platform::FacebookAds));
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!(Platform::parse("GA4"), Some(Platform::GoogleAnalytics));
        assert_eq!(Platform::parse("meta-ads"), Some(Platform::FacebookAds));
        assert_eq!(Platform::parse("  facebook "), Some(Platform::FacebookAds));
        assert_eq!(Platform::parse("adwords"), Some(Platform::GoogleAds));
    }

    #[test]
    fn test_parse_unknown() {
        assert_eq!(Platform::parse("tiktok"), None);
        assert_eq!(Platform::parse(""), None);
    }

    #[test]
    fn test_resolve_server_identifiers() {
        assert_eq!(
            Platform::resolve("google_analytics_http"),
            Some(Platform::GoogleAnalytics)
        );
        assert_eq!(
            Platform::resolve("google-ads-mcp"),
            Some(Platform::GoogleAds)
        );
        assert_eq!(
            Platform::resolve("meta_ads_server_0"),
            Some(Platform::FacebookAds)
        );
        assert_eq!(Platform::resolve("GA4-oauth-server"), Some(Platform::GoogleAnalytics));
    }

    #[test]
    fn test_resolve_indeterminate() {
        assert_eq!(Platform::resolve("server_0"), None);
        assert_eq!(Platform::resolve("linkedin_ads"), None);
    }

    #[test]
    fn test_analytics_keyword_does_not_shadow_ads() {
        // "google_ads" must not match the analytics branch
        assert_eq!(Platform::resolve("google_ads_oauth"), Some(Platform::GoogleAds));
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&Platform::GoogleAnalytics).unwrap();
        assert_eq!(json, "\"google_analytics\"");
        let back: Platform = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Platform::GoogleAnalytics);
    }

    #[test]
    fn test_oauth_provider_sharing() {
        assert_eq!(Platform::GoogleAnalytics.oauth_provider(), "google");
        assert_eq!(Platform::GoogleAds.oauth_provider(), "google");
        assert_eq!(Platform::FacebookAds.oauth_provider(), "facebook");
    }
}
