//! Chunking strategy router.

use std::sync::Arc;

use crate::chunkers::{Chunker, HybridChunker, SemanticChunker, SlidingWindowChunker};
use crate::error::ConfigurationError;
use crate::types::{JobConfig, Strategy};

/// Router that builds the chunker selected by the job configuration.
///
/// The strategy is chosen once per run; every worker shares the same
/// chunker through the router.
pub struct ChunkingRouter {
    /// The active chunker
    chunker: Arc<dyn Chunker>,
}

impl ChunkingRouter {
    /// Create a router for the configured strategy.
    pub fn new(config: &JobConfig) -> Result<Self, ConfigurationError> {
        let chunker: Arc<dyn Chunker> = match config.strategy {
            Strategy::SlidingWindow => Arc::new(SlidingWindowChunker::from_config(config)?),
            Strategy::Semantic => Arc::new(SemanticChunker::from_config(config)?),
            Strategy::Hybrid => Arc::new(HybridChunker::from_config(config)?),
        };
        Ok(Self { chunker })
    }

    /// Get the active chunker.
    pub fn chunker(&self) -> Arc<dyn Chunker> {
        Arc::clone(&self.chunker)
    }

    pub fn strategy(&self) -> Strategy {
        self.chunker.strategy()
    }

    /// List all available strategies.
    pub fn list_strategies() -> Vec<(&'static str, &'static str)> {
        Strategy::ALL
            .iter()
            .map(|s| {
                let description = match s {
                    Strategy::SlidingWindow => "Fixed-size character windows with overlap",
                    Strategy::Semantic => "Whole paragraphs accumulated up to the size limit",
                    Strategy::Hybrid => "Sentences accumulated up to a token budget",
                };
                (s.as_str(), description)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sliding_window_routing() {
        let config = JobConfig::default().with_strategy(Strategy::SlidingWindow);
        let router = ChunkingRouter::new(&config).unwrap();
        assert_eq!(router.chunker().name(), "sliding_window");
    }

    #[test]
    fn test_semantic_routing() {
        let config = JobConfig::default().with_strategy(Strategy::Semantic);
        let router = ChunkingRouter::new(&config).unwrap();
        assert_eq!(router.strategy(), Strategy::Semantic);
    }

    #[test]
    fn test_hybrid_routing_counts_tokens() {
        let config = JobConfig::default().with_strategy(Strategy::Hybrid);
        let router = ChunkingRouter::new(&config).unwrap();
        let chunker = router.chunker();
        assert_eq!(chunker.name(), "hybrid");
        assert!(chunker.count_tokens("ai sensi dell'art. 2043 c.c.").is_some());
    }

    #[test]
    fn test_invalid_do_not_split_rejected() {
        let mut config = JobConfig::default();
        config.do_not_split.push("(unclosed".to_string());
        assert!(matches!(
            ChunkingRouter::new(&config),
            Err(ConfigurationError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_list_strategies() {
        let names: Vec<_> = ChunkingRouter::list_strategies().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["sliding_window", "semantic", "hybrid"]);
    }
}
