//! Environment configuration read once at startup.

use serde::Serialize;
use thiserror::Error;

use crate::util::{ENV_MORECORE, ENV_MORECORE_HEAPBASE, ENV_MORECORE_SHRINK};

/// Errors in the morecore configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The heap base is not a hexadecimal number.
    #[error("Can't parse {key}: {0}", key = ENV_MORECORE_HEAPBASE)]
    InvalidHeapBase(String),
}

/// Morecore settings.
///
/// Only the presence of [`ENV_MORECORE`] and [`ENV_MORECORE_SHRINK`] matters,
/// not their value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MorecoreConfig {
    /// Heap growth on hugepages was requested.
    pub enabled: bool,
    /// Raw heap base, parsed by [`heapbase`](MorecoreConfig::heapbase).
    pub heapbase: Option<String>,
    /// Release backing when the heap shrinks.
    pub shrink: bool,
}

impl MorecoreConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, which maps a key to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        MorecoreConfig {
            enabled: lookup(ENV_MORECORE).is_some(),
            heapbase: lookup(ENV_MORECORE_HEAPBASE),
            shrink: lookup(ENV_MORECORE_SHRINK).is_some(),
        }
    }

    /// Returns the explicit heap base, if one is configured.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidHeapBase`] unless the whole value parses
    /// as a hexadecimal number.
    pub fn heapbase(&self) -> Result<Option<usize>, ConfigError> {
        self.heapbase.as_deref().map(parse_heapbase).transpose()
    }
}

/// Parses a hexadecimal address with an optional `0x` prefix.
///
/// Surrounding whitespace before the number is ignored, trailing garbage is
/// not. An empty value means "let the kernel choose" and yields zero.
pub fn parse_heapbase(s: &str) -> Result<usize, ConfigError> {
    let trimmed = s.trim_start();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Ok(0);
    }
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ConfigError::InvalidHeapBase(s.to_owned()));
    }
    usize::from_str_radix(digits, 16).map_err(|_| ConfigError::InvalidHeapBase(s.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> MorecoreConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        MorecoreConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn test_parse_heapbase() {
        // correct.
        assert_eq!(parse_heapbase("0x40000000"), Ok(0x4000_0000));
        assert_eq!(parse_heapbase("40000000"), Ok(0x4000_0000));
        assert_eq!(parse_heapbase("0XdeadBEEF"), Ok(0xdead_beef));
        assert_eq!(parse_heapbase("  1000"), Ok(0x1000));
        assert_eq!(parse_heapbase(""), Ok(0));

        // wrong.
        assert!(parse_heapbase("not-hex").is_err());
        assert!(parse_heapbase("0x").is_err());
        assert!(parse_heapbase("1000 ").is_err());
        assert!(parse_heapbase("+1000").is_err());
        assert!(parse_heapbase("10000000000000000").is_err());
    }

    #[test]
    fn presence_enables() {
        assert!(!config(&[]).enabled);
        let c = config(&[("HUGETLB_MORECORE", "")]);
        assert!(c.enabled);
        assert!(!c.shrink);
        assert_eq!(c.heapbase(), Ok(None));
        let c = config(&[("HUGETLB_MORECORE", "yes"), ("HUGETLB_MORECORE_SHRINK", "1")]);
        assert!(c.shrink);
    }

    #[test]
    fn heapbase_from_env() {
        let c = config(&[("HUGETLB_MORECORE_HEAPBASE", "0x10000000")]);
        assert_eq!(c.heapbase(), Ok(Some(0x1000_0000)));
        let c = config(&[("HUGETLB_MORECORE_HEAPBASE", "not-hex")]);
        assert_eq!(
            c.heapbase(),
            Err(ConfigError::InvalidHeapBase("not-hex".into()))
        );
    }
}
