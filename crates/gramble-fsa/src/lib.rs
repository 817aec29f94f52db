//! Lazy multi-tape automaton engine for Gramble grammars.
//!
//! A grammar is a tree of combinators ([`State`]) describing an implicit,
//! usually infinite, automaton over several named tapes. Nothing is ever
//! built eagerly: traversals ask a state what it can consume next and
//! receive fresh successor states in return.
//!
//! # Architecture
//!
//! - [`state`] -- the combinator algebra, queries and determinization
//! - [`compiled`] -- eager transition tables standing in for lazy states
//! - [`namespace`] -- nested symbol tables and dotted-name resolution
//! - [`context`] -- per-traversal vocabulary, symbol tapes and random choices
//! - [`generate`] -- breadth-first generation and random walks
//! - [`grammar`] -- the [`Grammar`] handle: generate, parse, sample, test, compile
//! - [`config`] -- traversal bounds ([`GenOptions`])

pub mod compiled;
pub mod config;
pub mod context;
pub mod generate;
pub mod grammar;
pub mod namespace;
pub mod state;

pub use compiled::CompiledState;
pub use config::GenOptions;
pub use context::Context;
pub use generate::Generator;
pub use grammar::Grammar;
pub use namespace::Namespace;
pub use state::{State, TapeSet, Transition, Transitions, UNBOUNDED};

pub use gramble_core::{GrambleError, Record, record};
