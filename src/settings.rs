/* src/settings.rs */

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::cache::{CdnRangeCache, SyncOutcome};

/// Resolution policy settings.
///
/// Missing fields in a deserialized record fall back to [`Settings::default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Only honor forwarding headers when the peer is inside the trust set.
    pub require_trusted_proxy: bool,
    /// Add the CDN's published ranges to the trust set.
    pub include_cdn_ranges: bool,
    /// Operator supplied ranges, one CIDR or bare address per line.
    pub custom_trusted_ranges: String,
    /// Allow privileged callers to see the diagnostic report.
    pub show_debug: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            require_trusted_proxy: true,
            include_cdn_ranges: false,
            custom_trusted_ranges: String::new(),
            show_debug: false,
        }
    }
}

impl Settings {
    /// Trimmed, non-blank lines of `custom_trusted_ranges`.
    pub fn custom_range_lines(&self) -> impl Iterator<Item = &str> {
        self.custom_trusted_ranges
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
    }
}

/// Source of the current settings snapshot.
pub trait SettingsProvider: Send + Sync {
    fn settings(&self) -> Settings;
}

impl SettingsProvider for Settings {
    fn settings(&self) -> Settings {
        self.clone()
    }
}

/// Settings that can be replaced at runtime.
///
/// Readers always see a whole snapshot; an update swaps the record atomically.
#[derive(Debug, Default)]
pub struct SharedSettings {
    current: ArcSwap<Settings>,
}

impl SharedSettings {
    pub fn new(settings: Settings) -> Self {
        Self {
            current: ArcSwap::from_pointee(settings),
        }
    }

    /// Store new settings.
    ///
    /// Turning `include_cdn_ranges` on warms the CDN cache straight away and returns the
    /// outcome of that sync.
    pub fn update(&self, settings: Settings, cdn: &CdnRangeCache) -> Option<SyncOutcome> {
        let old = self.current.swap(Arc::new(settings.clone()));

        if settings.include_cdn_ranges && !old.include_cdn_ranges {
            tracing::info!("CDN ranges enabled, warming cache");
            return Some(cdn.force_refresh(&settings));
        }

        None
    }

    /// Drop stored settings back to defaults.
    pub fn reset(&self) {
        self.current.store(Arc::new(Settings::default()));
    }
}

impl SettingsProvider for SharedSettings {
    fn settings(&self) -> Settings {
        Settings::clone(&self.current.load())
    }
}
