use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How the cache follows a successful save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheStrategy {
    /// Refresh cache entries with the freshly written values.
    #[default]
    WriteThrough,
    /// Evict cache entries for the touched keys.
    WriteInvalidate,
}

impl FromStr for CacheStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "write-through" | "write_through" | "writethrough" => Ok(Self::WriteThrough),
            "write-invalidate" | "write_invalidate" | "writeinvalidate" => Ok(Self::WriteInvalidate),
            other => Err(format!("Unknown cache strategy '{}'", other)),
        }
    }
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WriteThrough => write!(f, "write-through"),
            Self::WriteInvalidate => write!(f, "write-invalidate"),
        }
    }
}

/// Which provider backs the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheProviderKind {
    #[default]
    Memory,
    Noop,
}

/// Cache configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Master switch; a disabled cache is a transparent passthrough
    pub enabled: bool,

    pub strategy: CacheStrategy,

    /// Refresh entries from a spawned task instead of inline
    pub write_through_async: bool,

    /// TTL of `entity:<id>` entries
    pub entity_ttl: Option<Duration>,

    /// TTL of `component:<entity>:<type>` entries
    pub component_ttl: Option<Duration>,

    /// Capacity of the in-memory provider
    pub max_entries: usize,

    pub provider: CacheProviderKind,
}

impl CacheConfig {
    pub const ENV_ENABLED: &'static str = "COMPONENTDB_CACHE_ENABLED";
    pub const ENV_STRATEGY: &'static str = "COMPONENTDB_CACHE_STRATEGY";
    pub const ENV_ENTITY_TTL_MS: &'static str = "COMPONENTDB_CACHE_ENTITY_TTL_MS";
    pub const ENV_COMPONENT_TTL_MS: &'static str = "COMPONENTDB_CACHE_COMPONENT_TTL_MS";
    pub const ENV_MAX_ENTRIES: &'static str = "COMPONENTDB_CACHE_MAX_ENTRIES";

    pub fn new() -> Self {
        Self {
            enabled: true,
            strategy: CacheStrategy::WriteThrough,
            write_through_async: false,
            entity_ttl: Some(Duration::from_secs(300)),
            component_ttl: Some(Duration::from_secs(300)),
            max_entries: 10_000,
            provider: CacheProviderKind::Memory,
        }
    }

    /// Configuration with caching switched off.
    pub fn disabled() -> Self {
        Self::new().enabled(false)
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn strategy(mut self, strategy: CacheStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn write_through_async(mut self, enabled: bool) -> Self {
        self.write_through_async = enabled;
        self
    }

    pub fn entity_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.entity_ttl = ttl;
        self
    }

    pub fn component_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.component_ttl = ttl;
        self
    }

    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    pub fn provider(mut self, provider: CacheProviderKind) -> Self {
        self.provider = provider;
        self
    }

    /// Read overrides from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through `lookup`; unset or unparsable values keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new();

        if let Some(enabled) = lookup(Self::ENV_ENABLED).and_then(|v| parse_bool(&v)) {
            config.enabled = enabled;
        }
        if let Some(strategy) = lookup(Self::ENV_STRATEGY).and_then(|v| v.parse().ok()) {
            config.strategy = strategy;
        }
        if let Some(ms) = lookup(Self::ENV_ENTITY_TTL_MS).and_then(|v| v.trim().parse::<u64>().ok()) {
            config.entity_ttl = ttl_from_ms(ms);
        }
        if let Some(ms) = lookup(Self::ENV_COMPONENT_TTL_MS).and_then(|v| v.trim().parse::<u64>().ok()) {
            config.component_ttl = ttl_from_ms(ms);
        }
        if let Some(max) = lookup(Self::ENV_MAX_ENTRIES)
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|max| *max > 0)
        {
            config.max_entries = max;
        }

        config
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_entries == 0 {
            return Err("max_entries must be > 0".to_string());
        }

        if self.entity_ttl == Some(Duration::ZERO) || self.component_ttl == Some(Duration::ZERO) {
            return Err("TTL must be > 0 (use None for no expiry)".to_string());
        }

        if self.write_through_async && self.strategy != CacheStrategy::WriteThrough {
            return Err("write_through_async requires the write-through strategy".to_string());
        }

        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// 0 means "never expire"
fn ttl_from_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.strategy, CacheStrategy::WriteThrough);
        assert_eq!(config.provider, CacheProviderKind::Memory);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = CacheConfig::new()
            .strategy(CacheStrategy::WriteInvalidate)
            .entity_ttl(None)
            .component_ttl(Some(Duration::from_millis(50)))
            .max_entries(16);

        assert_eq!(config.strategy, CacheStrategy::WriteInvalidate);
        assert_eq!(config.entity_ttl, None);
        assert_eq!(config.component_ttl, Some(Duration::from_millis(50)));
        assert_eq!(config.max_entries, 16);
    }

    #[test]
    fn test_from_lookup() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("COMPONENTDB_CACHE_ENABLED", "false"),
            ("COMPONENTDB_CACHE_STRATEGY", "write-invalidate"),
            ("COMPONENTDB_CACHE_ENTITY_TTL_MS", "1500"),
            ("COMPONENTDB_CACHE_COMPONENT_TTL_MS", "0"),
            ("COMPONENTDB_CACHE_MAX_ENTRIES", "not-a-number"),
        ]);
        let config = CacheConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));

        assert!(!config.enabled);
        assert_eq!(config.strategy, CacheStrategy::WriteInvalidate);
        assert_eq!(config.entity_ttl, Some(Duration::from_millis(1500)));
        assert_eq!(config.component_ttl, None);
        assert_eq!(config.max_entries, CacheConfig::new().max_entries);
    }

    #[test]
    fn test_validate() {
        assert!(CacheConfig::new().max_entries(0).validate().is_err());
        assert!(
            CacheConfig::new()
                .entity_ttl(Some(Duration::ZERO))
                .validate()
                .is_err()
        );
        assert!(
            CacheConfig::new()
                .strategy(CacheStrategy::WriteInvalidate)
                .write_through_async(true)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("Write-Through".parse::<CacheStrategy>(), Ok(CacheStrategy::WriteThrough));
        assert!("lazy".parse::<CacheStrategy>().is_err());
        assert_eq!(CacheStrategy::WriteInvalidate.to_string(), "write-invalidate");
    }
}
