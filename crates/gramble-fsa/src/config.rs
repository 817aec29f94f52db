// Traversal configuration.
//
// Every bound here is a silent truncation limit, never an error: a traversal
// that hits one simply stops producing results.

use serde::{Deserialize, Serialize};

/// Default number of times one symbol may be entered along a path.
pub const DEFAULT_MAX_RECURSION: usize = 4;

/// Default cap on traversal rounds (characters emitted across all tapes).
pub const DEFAULT_MAX_CHARS: usize = 100;

/// Default number of random walks `sample` attempts.
pub const DEFAULT_MAX_TRIES: usize = 1000;

/// Options shared by `generate`, `parse` and `sample`.
///
/// Missing fields take their defaults when deserialized, so a grammar file
/// can override only what it needs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenOptions {
    /// Stop after this many records. `None` is unbounded.
    pub max_results: Option<usize>,
    pub max_recursion: usize,
    pub max_chars: usize,
    pub max_tries: usize,
    /// Seed for random sampling; a fresh one is drawn when absent.
    pub seed: Option<u64>,
}

impl Default for GenOptions {
    fn default() -> Self {
        Self {
            max_results: None,
            max_recursion: DEFAULT_MAX_RECURSION,
            max_chars: DEFAULT_MAX_CHARS,
            max_tries: DEFAULT_MAX_TRIES,
            seed: None,
        }
    }
}

impl GenOptions {
    pub fn with_max_results(mut self, n: usize) -> Self {
        self.max_results = Some(n);
        self
    }

    pub fn with_max_recursion(mut self, n: usize) -> Self {
        self.max_recursion = n;
        self
    }

    pub fn with_max_chars(mut self, n: usize) -> Self {
        self.max_chars = n;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}
