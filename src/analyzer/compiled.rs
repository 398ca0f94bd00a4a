// ABOUTME: Pre-compiled CSS selector cache for O(1) selector lookup.
// ABOUTME: Eliminates repeated parsing of CSS selectors in hot paths.

//! Selector caching for efficient repeated DOM queries.
//!
//! CSS selector parsing is expensive relative to the actual DOM matching.
//! This module provides a thread-safe cache that compiles selectors once
//! and reuses them for all subsequent queries.

use std::collections::HashMap;
use std::sync::RwLock;

use once_cell::sync::Lazy;
use scraper::Selector;

/// Thread-safe cache of compiled CSS selectors.
///
/// Uses a RwLock for read-heavy workloads: most accesses are cache hits,
/// with occasional cache misses requiring writes. Invalid selectors are
/// cached as `None` so a bad rule costs one parse, not one per element.
static SELECTOR_CACHE: Lazy<RwLock<HashMap<String, Option<Selector>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Gets or compiles a CSS selector, caching the result.
///
/// Returns `Some(Selector)` if the selector is valid, `None` if invalid.
pub fn get_or_compile(css: &str) -> Option<Selector> {
    {
        let cache = SELECTOR_CACHE.read().unwrap();
        if let Some(cached) = cache.get(css) {
            return cached.clone();
        }
    }

    let compiled = Selector::parse(css).ok();
    let mut cache = SELECTOR_CACHE.write().unwrap();
    // Double-check after acquiring write lock (another thread may have inserted)
    if let Some(cached) = cache.get(css) {
        return cached.clone();
    }
    cache.insert(css.to_string(), compiled.clone());
    compiled
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_selector_is_cached() {
        let sel = get_or_compile("div.container");
        assert!(sel.is_some());

        let sel2 = get_or_compile("div.container");
        assert!(sel2.is_some());
    }

    #[test]
    fn test_invalid_selector_returns_none() {
        let sel = get_or_compile("[[[invalid");
        assert!(sel.is_none());

        // Invalid selectors are also cached (as None)
        let sel2 = get_or_compile("[[[invalid");
        assert!(sel2.is_none());
    }
}
