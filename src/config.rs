//! Store configuration.
//!
//! All settings live on the store instance. There is no process-wide state,
//! so independent stores (one per thread, one per file) never see each
//! other's settings.

/// Default number of cached region results.
pub const DEFAULT_CACHE_SIZE: usize = 128;

/// What a query does with a line the parser rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParsePolicy {
    /// Skip the line and count it (annotation files are rarely clean).
    #[default]
    Skip,
    /// Abort the query with the parse error.
    Fail,
}

/// Configuration for an [`IndexedAnnotationStore`](crate::store::IndexedAnnotationStore).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Maximum number of cached query results (0 disables caching)
    pub cache_size: usize,
    /// Handling of unparseable lines
    pub parse_policy: ParsePolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self {
            cache_size: DEFAULT_CACHE_SIZE,
            parse_policy: ParsePolicy::Skip,
        }
    }

    /// Set the cache capacity.
    pub fn with_cache_size(mut self, size: usize) -> Self {
        self.cache_size = size;
        self
    }

    /// Set the parse error policy.
    pub fn with_parse_policy(mut self, policy: ParsePolicy) -> Self {
        self.parse_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.cache_size, 128);
        assert_eq!(config.parse_policy, ParsePolicy::Skip);
    }

    #[test]
    fn test_builder() {
        let config = StoreConfig::new()
            .with_cache_size(4)
            .with_parse_policy(ParsePolicy::Fail);
        assert_eq!(config.cache_size, 4);
        assert_eq!(config.parse_policy, ParsePolicy::Fail);
    }
}
