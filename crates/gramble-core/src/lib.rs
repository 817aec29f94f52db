//! Shared building blocks of the Gramble automaton engine.
//!
//! A Gramble grammar writes to several independent, named output channels
//! ("tapes"). This crate holds everything the automaton algebra in
//! `gramble-fsa` needs below the level of states:
//!
//! - [`token`] -- character classes as bit-vectors scoped to one tape
//! - [`tape`] -- tape vocabularies, the "any tape" collection and renamed views
//! - [`output`] -- persistent per-tape output trie shared across search branches
//! - [`counter`] -- bounded, immutable per-symbol recursion counters

use std::collections::BTreeMap;

pub mod counter;
pub mod output;
pub mod tape;
pub mod token;

pub use counter::CounterStack;
pub use output::{MultiTapeOutput, SingleTapeOutput};
pub use tape::{ANY_TAPE, RenamedTape, StringTape, Tape, TapeCollection};
pub use token::Token;

/// One generated or parsed result: tape name to the string written on it.
///
/// A `BTreeMap` keeps tapes sorted so records print and compare stably.
pub type Record = BTreeMap<String, String>;

/// Error type for grammar construction and traversal setup.
///
/// Resource bounds (recursion depth, character caps, sample budgets) are not
/// errors: they silently truncate results.
#[derive(Debug, thiserror::Error)]
pub enum GrambleError {
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),
    #[error("symbol '{0}' is already defined")]
    Redefinition(String),
    #[error("negation is only supported on a single tape, found tapes: {}", .0.join(", "))]
    UnsupportedNegation(Vec<String>),
    #[error("invalid repetition bounds: min {min} exceeds max {max}")]
    InvalidRepetition { min: usize, max: usize },
    #[error("invalid grammar description: {0}")]
    InvalidGrammar(String),
}

/// Build a [`Record`] from `(tape, text)` pairs.
///
/// Mostly a convenience for tests and callers that spell out expected output.
pub fn record<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Record {
    pairs
        .into_iter()
        .map(|(tape, text)| (tape.to_string(), text.to_string()))
        .collect()
}
