// Bounded recursion counters.

use std::collections::BTreeMap;
use std::rc::Rc;

/// Immutable multiset of symbol names with a fixed ceiling.
///
/// Each descent into an embedded symbol produces a new stack with that
/// symbol's count incremented. The stack only bounds recursion; it carries
/// no call data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CounterStack {
    max: usize,
    counts: Rc<BTreeMap<String, usize>>,
}

impl CounterStack {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            counts: Rc::new(BTreeMap::new()),
        }
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// A new stack with `key` counted once more.
    pub fn add(&self, key: &str) -> CounterStack {
        let mut counts = (*self.counts).clone();
        *counts.entry(key.to_string()).or_insert(0) += 1;
        CounterStack {
            max: self.max,
            counts: Rc::new(counts),
        }
    }

    pub fn get(&self, key: &str) -> usize {
        self.counts.get(key).copied().unwrap_or(0)
    }

    /// True once `key` has been entered `max` times.
    pub fn exceeds_max(&self, key: &str) -> bool {
        self.get(key) >= self.max
    }

    /// Canonical text form, stable across equal stacks.
    pub fn id(&self) -> String {
        let counts: Vec<String> = self
            .counts
            .iter()
            .map(|(k, v)| format!("{k}:{v}"))
            .collect();
        format!("{}[{}]", self.max, counts.join(","))
    }
}
