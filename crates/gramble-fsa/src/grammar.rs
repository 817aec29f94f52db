// Top-level handle over a namespace of symbols.

use std::cell::RefCell;
use std::rc::Rc;

use gramble_core::{CounterStack, GrambleError, Record};
use hashbrown::HashMap;
use log::debug;

use crate::compiled;
use crate::config::GenOptions;
use crate::context::Context;
use crate::generate::{Generator, random_walk};
use crate::namespace::Namespace;
use crate::state::State;

/// A set of named grammars and the entry points for traversing them.
///
/// Each traversal builds its own [`Context`], so the vocabulary always
/// reflects the symbols defined at the time of the call. Compiled roots are
/// cached until the namespace changes.
#[derive(Default)]
pub struct Grammar {
    namespace: Rc<Namespace>,
    compiled: RefCell<HashMap<String, State>>,
}

impl Grammar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_namespace(namespace: Namespace) -> Self {
        Self {
            namespace: Rc::new(namespace),
            compiled: RefCell::new(HashMap::new()),
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Mutable access to the symbol table. Drops every cached compilation.
    pub fn namespace_mut(&mut self) -> &mut Namespace {
        self.compiled.get_mut().clear();
        Rc::make_mut(&mut self.namespace)
    }

    /// Define a top-level symbol.
    pub fn define(&mut self, name: &str, state: State) -> Result<(), GrambleError> {
        self.namespace_mut().add_symbol(name, state)
    }

    /// Qualified names of every symbol, sorted.
    pub fn symbols(&self) -> Vec<String> {
        self.namespace
            .qualified_symbols()
            .into_iter()
            .map(|(name, _)| name)
            .collect()
    }

    pub fn get(&self, symbol: &str) -> Option<State> {
        self.namespace.resolve(&[], symbol).map(|(_, state)| state)
    }

    /// An embed of `symbol`, so recursion through the start symbol is
    /// counted like any other.
    pub fn root(&self, symbol: &str) -> Result<State, GrambleError> {
        if self.namespace.resolve(&[], symbol).is_none() {
            return Err(GrambleError::UnknownSymbol(symbol.to_string()));
        }
        Ok(State::embed(symbol, &[]))
    }

    fn context(&self, roots: &[&State], seed: Option<u64>) -> Result<Context, GrambleError> {
        Context::new(Rc::clone(&self.namespace), roots, seed)
    }

    /// Every record `symbol` generates, breadth-first.
    pub fn generate(&self, symbol: &str, opts: &GenOptions) -> Result<Generator, GrambleError> {
        let root = self.root(symbol)?;
        self.generate_state(&root, opts)
    }

    /// Generate from an arbitrary state, resolving embeds in this grammar.
    pub fn generate_state(&self, state: &State, opts: &GenOptions) -> Result<Generator, GrambleError> {
        let ctx = self.context(&[state], opts.seed)?;
        Ok(Generator::new(ctx, state.clone(), opts))
    }

    /// Records of `symbol` that agree with `inputs` on every tape it names.
    pub fn parse(
        &self,
        symbol: &str,
        inputs: &Record,
        opts: &GenOptions,
    ) -> Result<Generator, GrambleError> {
        let root = State::semijoin(self.root(symbol)?, State::record(inputs));
        self.generate_state(&root, opts)
    }

    /// Up to `n` random records of `symbol`, optionally restricted like
    /// [`parse`](Self::parse). Gives up after `opts.max_tries` walks.
    pub fn sample(
        &self,
        symbol: &str,
        n: usize,
        restriction: Option<&Record>,
        opts: &GenOptions,
    ) -> Result<Vec<Record>, GrambleError> {
        let mut root = self.root(symbol)?;
        if let Some(restriction) = restriction {
            root = State::semijoin(root, State::record(restriction));
        }
        let ctx = self.context(&[&root], opts.seed)?;
        let stack = CounterStack::new(opts.max_recursion);

        let mut samples = Vec::with_capacity(n);
        let mut tries = 0;
        while samples.len() < n && tries < opts.max_tries {
            tries += 1;
            if let Some(record) = random_walk(&ctx, &root, &stack, opts.max_chars) {
                samples.push(record);
            }
        }
        debug!("sample: {} of {n} records after {tries} walks", samples.len());
        Ok(samples)
    }

    /// True if `symbol` has at least one run consistent with `test`.
    pub fn run_unit_test(&self, symbol: &str, test: &State) -> Result<bool, GrambleError> {
        let root = State::semijoin(self.root(symbol)?, test.clone());
        let opts = GenOptions::default().with_max_results(1);
        Ok(self.generate_state(&root, &opts)?.next().is_some())
    }

    /// `symbol` expanded into transition tables `level` steps deep.
    ///
    /// The result is a drop-in replacement for [`root`](Self::root) when
    /// traversed with the same `max_recursion`.
    pub fn compile(
        &self,
        symbol: &str,
        level: usize,
        max_recursion: usize,
    ) -> Result<State, GrambleError> {
        let root = self.root(symbol)?;
        let ctx = self.context(&[&root], None)?;
        let stack = CounterStack::new(max_recursion);
        let key = format!(
            "{symbol}|{}|{level}|{}",
            stack.id(),
            ctx.tapes().signature()
        );
        if let Some(hit) = self.compiled.borrow().get(&key) {
            return Ok(hit.clone());
        }
        let state = compiled::compile(&root, &ctx, &stack, level);
        debug!("compile: {key}");
        self.compiled.borrow_mut().insert(key, state.clone());
        Ok(state)
    }
}
