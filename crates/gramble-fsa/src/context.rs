// Per-traversal context.
//
// Everything a query needs besides the state itself: the namespace embeds
// resolve through, the frozen tape vocabulary, the relevant tapes of every
// symbol, and the random choices made during one sampling pass.

use std::cell::RefCell;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::rc::Rc;

use gramble_core::{GrambleError, Tape, TapeCollection};
use hashbrown::{HashMap, HashSet};
use log::{debug, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::namespace::Namespace;
use crate::state::{State, TapeSet};

pub struct Context {
    namespace: Rc<Namespace>,
    tapes: Rc<TapeCollection>,
    symbol_tapes: HashMap<String, Rc<TapeSet>>,
    epoch: u64,
    picks: RefCell<HashMap<usize, (State, usize)>>,
    rng: RefCell<StdRng>,
    warned: RefCell<HashSet<String>>,
}

impl Context {
    /// Build a context for traversing `roots` against `namespace`.
    ///
    /// Collects the vocabulary of every symbol and root, then computes the
    /// relevant tapes of each symbol as a fixpoint (symbols may refer to
    /// themselves). Fails if any negation spans more than one tape.
    pub fn new(
        namespace: Rc<Namespace>,
        roots: &[&State],
        seed: Option<u64>,
    ) -> Result<Self, GrambleError> {
        let symbols = namespace.qualified_symbols();

        let mut tapes = TapeCollection::new();
        let mut visited = HashSet::new();
        for (key, state) in &symbols {
            if visited.insert(format!("{key}|")) {
                state.collect_vocab(&mut tapes, &namespace, &mut Vec::new(), &mut visited);
            }
        }
        for root in roots {
            root.collect_vocab(&mut tapes, &namespace, &mut Vec::new(), &mut visited);
        }

        let mut symbol_tapes: HashMap<String, Rc<TapeSet>> = symbols
            .iter()
            .map(|(key, _)| (key.clone(), Rc::new(TapeSet::new())))
            .collect();
        let mut rounds = 0;
        loop {
            rounds += 1;
            let mut changed = false;
            for (key, state) in &symbols {
                let found = state.tapes_with(&namespace, &symbol_tapes, None)?;
                if symbol_tapes.get(key).is_none_or(|known| **known != *found) {
                    symbol_tapes.insert(key.clone(), found);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        debug!(
            "context: {} symbols, {} tapes ({}), relevant tapes settled after {} rounds",
            symbols.len(),
            tapes.len(),
            tapes.signature(),
            rounds
        );

        let mut hasher = DefaultHasher::new();
        for (key, _) in &symbols {
            key.hash(&mut hasher);
            symbol_tapes.get(key).hash(&mut hasher);
        }
        let epoch = hasher.finish();

        let seed = seed.unwrap_or_else(|| rand::rng().random());
        let ctx = Context {
            namespace,
            tapes: Rc::new(tapes),
            symbol_tapes,
            epoch,
            picks: RefCell::new(HashMap::new()),
            rng: RefCell::new(StdRng::seed_from_u64(seed)),
            warned: RefCell::new(HashSet::new()),
        };
        for root in roots {
            root.relevant_tapes(&ctx)?;
        }
        Ok(ctx)
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn tapes(&self) -> &Rc<TapeCollection> {
        &self.tapes
    }

    /// The "any tape" the driver queries with.
    pub fn any_tape(&self) -> Tape {
        Tape::Collection(Rc::clone(&self.tapes))
    }

    pub(crate) fn symbol_tapes(&self) -> &HashMap<String, Rc<TapeSet>> {
        &self.symbol_tapes
    }

    /// Fingerprint of the symbol table as seen by this context. Relevant-tape
    /// caches on shared nodes are only reused by contexts with the same epoch.
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Resolve an embedded symbol, warning once per name that cannot be found.
    pub(crate) fn resolve(&self, scope: &[String], symbol: &str) -> Option<(String, State)> {
        let found = self.namespace.resolve(scope, symbol);
        if found.is_none() && self.warned.borrow_mut().insert(symbol.to_string()) {
            warn!("unresolved symbol '{symbol}' treated as the empty grammar");
        }
        found
    }

    /// Random child choice of a union for the current pass.
    ///
    /// The state is kept alive alongside its choice so the pointer used as
    /// key cannot be reused by another node while the pass lasts.
    pub(crate) fn pick(&self, state: &State, n: usize) -> Option<usize> {
        if n == 0 {
            return None;
        }
        let key = state.ptr_key();
        if let Some((_, i)) = self.picks.borrow().get(&key) {
            return Some(*i);
        }
        let i = self.random_index(n);
        self.picks.borrow_mut().insert(key, (state.clone(), i));
        Some(i)
    }

    /// Forget every union choice; the next pass chooses afresh.
    pub(crate) fn reset_picks(&self) {
        self.picks.borrow_mut().clear();
    }

    pub(crate) fn random_index(&self, n: usize) -> usize {
        self.rng.borrow_mut().random_range(0..n)
    }

    pub(crate) fn with_rng<R>(&self, f: impl FnOnce(&mut StdRng) -> R) -> R {
        f(&mut self.rng.borrow_mut())
    }
}
