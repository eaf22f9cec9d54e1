//! Locale registry
//!
//! The orchestrator receives its locale source at construction. Sites without
//! localization get a single `default` locale.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::config::LocaleConfig;

/// Name of the only locale of an unlocalized site
pub const DEFAULT_LOCALE: &str = "default";

/// Source of the locales a sync run iterates over
pub trait LocaleRegistry: Send + Sync {
    /// Locales whose public records should be synchronized
    fn eligible_locales(&self) -> BTreeSet<String>;
}

/// Registry for sites without localization
#[derive(Debug, Clone, Default)]
pub struct DefaultLocale;

impl LocaleRegistry for DefaultLocale {
    fn eligible_locales(&self) -> BTreeSet<String> {
        BTreeSet::from([DEFAULT_LOCALE.to_string()])
    }
}

/// Registry backed by the configured locale map
///
/// Draft locales (`*-draft`) and private locales are excluded.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredLocales {
    locales: BTreeMap<String, LocaleConfig>,
}

impl ConfiguredLocales {
    /// Create a registry from the configured locales
    pub fn new(locales: BTreeMap<String, LocaleConfig>) -> Self {
        Self { locales }
    }
}

impl LocaleRegistry for ConfiguredLocales {
    fn eligible_locales(&self) -> BTreeSet<String> {
        self.locales
            .iter()
            .filter(|(name, locale)| !name.ends_with("-draft") && !locale.private)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Build the registry matching the configuration
pub fn from_config(locales: Option<&BTreeMap<String, LocaleConfig>>) -> Arc<dyn LocaleRegistry> {
    match locales {
        Some(locales) => Arc::new(ConfiguredLocales::new(locales.clone())),
        None => Arc::new(DefaultLocale),
    }
}
