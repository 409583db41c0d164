//! Campaign options

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Order in which a replacement source walks the payload product.
///
/// Opaque to the engine; only the replacement source interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TraversalStrategy {
    /// The rightmost payload location varies fastest
    DepthFirst,
    /// The leftmost payload location varies fastest
    BreadthFirst,
}

impl TraversalStrategy {
    pub fn all() -> &'static [TraversalStrategy] {
        &[TraversalStrategy::DepthFirst, TraversalStrategy::BreadthFirst]
    }

    pub fn name(&self) -> &'static str {
        match self {
            TraversalStrategy::DepthFirst => "Depth First",
            TraversalStrategy::BreadthFirst => "Breadth First",
        }
    }
}

/// Immutable options snapshot for one campaign
#[derive(Debug, Clone)]
pub struct FuzzerOptions {
    /// Number of worker threads in the campaign's pool
    pub thread_count: usize,

    /// Delay between message sends; `Duration::ZERO` disables pacing
    pub send_message_delay: Duration,

    /// Transport-level retries per send, applied by the message-send layer
    pub retries_on_io_error: u32,

    /// Maximum task failures tolerated before the campaign stops itself;
    /// `None` means unlimited
    pub max_errors_allowed: Option<u64>,

    /// Payload traversal strategy handed to the replacement source
    pub strategy: TraversalStrategy,
}

impl Default for FuzzerOptions {
    fn default() -> Self {
        Self {
            thread_count: 10,
            send_message_delay: Duration::ZERO,
            retries_on_io_error: 3,
            max_errors_allowed: Some(1000),
            strategy: TraversalStrategy::DepthFirst,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_names() {
        assert_eq!(TraversalStrategy::DepthFirst.name(), "Depth First");
        assert_eq!(TraversalStrategy::BreadthFirst.name(), "Breadth First");
        assert_eq!(TraversalStrategy::all().len(), 2);
    }

    #[test]
    fn test_default_options() {
        let options = FuzzerOptions::default();
        assert_eq!(options.thread_count, 10);
        assert_eq!(options.send_message_delay, Duration::ZERO);
        assert_eq!(options.max_errors_allowed, Some(1000));
    }
}
