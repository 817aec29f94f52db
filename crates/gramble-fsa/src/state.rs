// The automaton algebra.
//
// A `State` is a small program describing a point in an implicit, usually
// infinite automaton. Querying it enumerates the ways it can consume a
// character on a tape; every transition produces a fresh successor and
// nothing is ever mutated, except the write-once relevant-tape cache.
//
// Query results carry a `matched` flag. On a concrete tape, `matched = false`
// means "this state never consumes that tape; ask someone else", and the
// successor is equivalent to the state itself. On the "any tape" collection
// it marks a step that consumed a character on a hidden (projected away)
// tape: the state advanced but nothing visible was written.

use std::cell::OnceCell;
use std::collections::BTreeSet;
use std::fmt;
use std::iter;
use std::rc::Rc;

use gramble_core::{CounterStack, GrambleError, Record, Tape, TapeCollection, Token};
use hashbrown::{HashMap, HashSet};
use log::trace;

use crate::compiled::CompiledState;
use crate::context::Context;
use crate::namespace::Namespace;

/// Set of tape names a state can ever touch.
pub type TapeSet = BTreeSet<String>;

/// Repetition upper bound meaning "no bound".
pub const UNBOUNDED: usize = usize::MAX;

/// One way a state can respond to a query.
#[derive(Clone, Debug)]
pub struct Transition {
    pub tape: Tape,
    pub token: Token,
    pub matched: bool,
    pub next: State,
}

/// Lazy stream of transitions; successors are built as items are pulled.
pub type Transitions<'a> = Box<dyn Iterator<Item = Transition> + 'a>;

/// Handle to an immutable automaton node. Cloning is a reference count bump.
#[derive(Clone)]
pub struct State(Rc<Node>);

struct Node {
    kind: StateKind,
    /// Relevant tapes, tagged with the epoch of the context that computed them.
    tapes: OnceCell<(u64, Rc<TapeSet>)>,
}

pub(crate) enum StateKind {
    Literal {
        tape: String,
        text: Rc<[char]>,
        index: usize,
    },
    AnyChar {
        tape: String,
    },
    Trivial,
    Concat {
        c1: State,
        c2: State,
        c1_done: bool,
    },
    Union(Rc<[State]>),
    Semijoin(State, State),
    Join {
        c1: State,
        c2: State,
        /// Whether `c2` leads. Settled by the first query.
        c2_leads: Option<bool>,
        /// The follower has moved on its own tapes since the last shared
        /// move, so the leader may not move on its own tapes until the next.
        follower_ahead: bool,
    },
    Negation(State),
    Repetition {
        initial: State,
        /// The repetition in progress; `None` between repetitions.
        current: Option<State>,
        min: usize,
        max: usize,
        /// Completed repetitions.
        index: usize,
    },
    Embed {
        symbol: Rc<str>,
        scope: Rc<[String]>,
        /// Set once the symbol has been entered: its qualified name and the
        /// successor inside it.
        inner: Option<(Rc<str>, State)>,
    },
    Projection {
        child: State,
        keep: Rc<TapeSet>,
    },
    Drop {
        child: State,
        tape: String,
    },
    Rename {
        child: State,
        from: Rc<str>,
        to: Rc<str>,
    },
    Compiled(Rc<CompiledState>),
}

/// Parameters of one query, bundled so they can be handed down cheaply.
#[derive(Clone)]
struct Query<'a> {
    tape: Tape,
    target: Token,
    ctx: &'a Context,
    random: bool,
    stack: CounterStack,
}

impl<'a> Query<'a> {
    fn on(&self, tape: Tape, target: Token) -> Query<'a> {
        Query {
            tape,
            target,
            ctx: self.ctx,
            random: self.random,
            stack: self.stack.clone(),
        }
    }

    fn nested(&self, stack: CounterStack) -> Query<'a> {
        Query {
            tape: self.tape.clone(),
            target: self.target.clone(),
            ctx: self.ctx,
            random: self.random,
            stack,
        }
    }

    fn determinized(mut self) -> Query<'a> {
        self.random = false;
        self
    }

    fn is_concrete(&self) -> bool {
        !self.tape.is_collection()
    }
}

// ---------------------------------------------------------------------------
// Constructors
// ---------------------------------------------------------------------------

impl State {
    fn new(kind: StateKind) -> State {
        State(Rc::new(Node {
            kind,
            tapes: OnceCell::new(),
        }))
    }

    pub(crate) fn kind(&self) -> &StateKind {
        &self.0.kind
    }

    pub(crate) fn ptr_key(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    /// `text` on `tape`, one character at a time.
    pub fn lit(tape: &str, text: &str) -> State {
        State::new(StateKind::Literal {
            tape: tape.to_string(),
            text: text.chars().collect(),
            index: 0,
        })
    }

    /// Any single character on `tape`.
    pub fn any_char(tape: &str) -> State {
        State::new(StateKind::AnyChar {
            tape: tape.to_string(),
        })
    }

    /// The empty grammar: accepts at once and consumes nothing.
    pub fn empty() -> State {
        State::new(StateKind::Trivial)
    }

    /// Concatenation of any number of states. No children is [`State::empty`].
    pub fn seq(children: impl IntoIterator<Item = State>) -> State {
        let children: Vec<State> = children.into_iter().collect();
        children
            .into_iter()
            .rev()
            .reduce(|rest, c| State::concat(c, rest, false))
            .unwrap_or_else(State::empty)
    }

    fn concat(c1: State, c2: State, c1_done: bool) -> State {
        State::new(StateKind::Concat { c1, c2, c1_done })
    }

    /// Alternation. Nested unions are flattened; no children matches nothing.
    pub fn uni(children: impl IntoIterator<Item = State>) -> State {
        let mut flat = Vec::new();
        for c in children {
            if let StateKind::Union(inner) = c.kind() {
                flat.extend(inner.iter().cloned());
                continue;
            }
            flat.push(c);
        }
        if let [only] = flat.as_slice() {
            return only.clone();
        }
        State::new(StateKind::Union(flat.into()))
    }

    /// Natural join: both sides must agree on every tape they share.
    pub fn join(c1: State, c2: State) -> State {
        State::new(StateKind::Join {
            c1,
            c2,
            c2_leads: None,
            follower_ahead: false,
        })
    }

    /// Runs of `c1` that are consistent with `c2`.
    pub fn semijoin(c1: State, c2: State) -> State {
        State::new(StateKind::Semijoin(c1, c2))
    }

    /// Complement of a single-tape grammar.
    pub fn not(child: State) -> State {
        State::new(StateKind::Negation(child))
    }

    /// Between `min` and `max` repetitions of `child`; `None` is unbounded.
    pub fn rep(child: State, min: usize, max: Option<usize>) -> Result<State, GrambleError> {
        let max = max.unwrap_or(UNBOUNDED);
        if min > max {
            return Err(GrambleError::InvalidRepetition { min, max });
        }
        Ok(State::repeat(child, min, max))
    }

    fn repeat(initial: State, min: usize, max: usize) -> State {
        State::new(StateKind::Repetition {
            initial,
            current: None,
            min,
            max,
            index: 0,
        })
    }

    pub fn star(child: State) -> State {
        State::repeat(child, 0, UNBOUNDED)
    }

    pub fn plus(child: State) -> State {
        State::repeat(child, 1, UNBOUNDED)
    }

    /// Zero or one `child`.
    pub fn maybe(child: State) -> State {
        State::repeat(child, 0, 1)
    }

    /// Reference to `symbol`, resolved from the namespace at `scope` when
    /// first queried.
    pub fn embed(symbol: &str, scope: &[String]) -> State {
        State::new(StateKind::Embed {
            symbol: symbol.into(),
            scope: scope.into(),
            inner: None,
        })
    }

    /// Expose only `tapes` of `child`.
    pub fn proj<I, S>(child: State, tapes: I) -> State
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        State::new(StateKind::Projection {
            child,
            keep: Rc::new(tapes.into_iter().map(Into::into).collect()),
        })
    }

    /// Hide `tape` of `child`.
    pub fn drop(child: State, tape: &str) -> State {
        State::new(StateKind::Drop {
            child,
            tape: tape.to_string(),
        })
    }

    /// `child` sees the caller's tape `to` under the name `from`, and the
    /// other way round.
    pub fn rename(child: State, from: &str, to: &str) -> State {
        State::new(StateKind::Rename {
            child,
            from: from.into(),
            to: to.into(),
        })
    }

    /// One literal per tape of `record`, concatenated.
    pub fn record(record: &Record) -> State {
        State::seq(record.iter().map(|(tape, text)| State::lit(tape, text)))
    }

    /// `prefix` followed by anything on `tape`. Join it with a grammar to
    /// keep the runs whose `tape` starts with `prefix`.
    pub fn starts_with(tape: &str, prefix: State) -> State {
        State::seq([prefix, State::star(State::any_char(tape))])
    }

    /// Anything on `tape` followed by `suffix`.
    pub fn ends_with(tape: &str, suffix: State) -> State {
        State::seq([State::star(State::any_char(tape)), suffix])
    }

    /// `infix` anywhere on `tape`.
    pub fn contains(tape: &str, infix: State) -> State {
        State::seq([
            State::star(State::any_char(tape)),
            infix,
            State::star(State::any_char(tape)),
        ])
    }

    pub(crate) fn compiled(compiled: CompiledState) -> State {
        State::new(StateKind::Compiled(Rc::new(compiled)))
    }

    pub fn is_compiled(&self) -> bool {
        matches!(self.kind(), StateKind::Compiled(_))
    }

    fn entered(symbol: &Rc<str>, scope: &Rc<[String]>, key: &Rc<str>, next: State) -> State {
        State::new(StateKind::Embed {
            symbol: Rc::clone(symbol),
            scope: Rc::clone(scope),
            inner: Some((Rc::clone(key), next)),
        })
    }

    /// Same wrapper around a new child. Only meaningful for the wrappers
    /// that report their child's results under their own identity.
    fn rewrap(&self, child: State) -> State {
        match self.kind() {
            StateKind::Projection { keep, .. } => State::new(StateKind::Projection {
                child,
                keep: Rc::clone(keep),
            }),
            StateKind::Drop { tape, .. } => State::new(StateKind::Drop {
                child,
                tape: tape.clone(),
            }),
            StateKind::Rename { from, to, .. } => State::new(StateKind::Rename {
                child,
                from: Rc::clone(from),
                to: Rc::clone(to),
            }),
            _ => child,
        }
    }

    fn hides(&self, tape: &str) -> bool {
        match self.kind() {
            StateKind::Projection { keep, .. } => !keep.contains(tape),
            StateKind::Drop { tape: dropped, .. } => dropped == tape,
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Acceptance
// ---------------------------------------------------------------------------

enum Embedded {
    Missing,
    Blocked,
    Entered {
        key: Rc<str>,
        child: State,
        stack: CounterStack,
    },
}

fn enter_embed(
    symbol: &str,
    scope: &[String],
    inner: &Option<(Rc<str>, State)>,
    ctx: &Context,
    stack: &CounterStack,
) -> Embedded {
    if let Some((key, child)) = inner {
        return Embedded::Entered {
            key: Rc::clone(key),
            child: child.clone(),
            stack: stack.add(key),
        };
    }
    match ctx.resolve(scope, symbol) {
        None => Embedded::Missing,
        Some((key, _)) if stack.exceeds_max(&key) => {
            trace!("recursion bound reached for {key}");
            Embedded::Blocked
        }
        Some((key, child)) => Embedded::Entered {
            stack: stack.add(&key),
            key: key.into(),
            child,
        },
    }
}

/// Whether `count` completed repetitions (plus any number of empty ones)
/// satisfy the bounds.
fn repetitions_accept(initial: &State, min: usize, max: usize, count: usize, q: &Query<'_>) -> bool {
    (count >= min && count <= max) || (count < max && initial.accepts(q))
}

impl State {
    /// True if a run ending here is complete.
    pub fn accepting(&self, ctx: &Context, random: bool, stack: &CounterStack) -> bool {
        match self.kind() {
            StateKind::Literal { text, index, .. } => *index >= text.len(),
            StateKind::AnyChar { .. } => false,
            StateKind::Trivial => true,
            StateKind::Concat { c1, c2, .. } | StateKind::Join { c1, c2, .. } => {
                c1.accepting(ctx, random, stack) && c2.accepting(ctx, random, stack)
            }
            StateKind::Semijoin(c1, c2) => {
                c1.accepting(ctx, random, stack) && c2.accepting(ctx, false, stack)
            }
            StateKind::Union(children) => {
                if random {
                    ctx.pick(self, children.len())
                        .is_some_and(|i| children[i].accepting(ctx, random, stack))
                } else {
                    children.iter().any(|c| c.accepting(ctx, random, stack))
                }
            }
            StateKind::Negation(child) => !child.accepting(ctx, false, stack),
            StateKind::Repetition {
                initial,
                current,
                min,
                max,
                index,
            } => {
                let q = Query {
                    tape: ctx.any_tape(),
                    target: Token::Any,
                    ctx,
                    random,
                    stack: stack.clone(),
                };
                match current {
                    None => repetitions_accept(initial, *min, *max, *index, &q),
                    Some(c) => {
                        c.accepting(ctx, random, stack)
                            && repetitions_accept(initial, *min, *max, *index + 1, &q)
                    }
                }
            }
            StateKind::Embed {
                symbol,
                scope,
                inner,
            } => match enter_embed(symbol, scope, inner, ctx, stack) {
                Embedded::Missing => true,
                Embedded::Blocked => false,
                Embedded::Entered { child, stack, .. } => child.accepting(ctx, random, &stack),
            },
            StateKind::Projection { child, .. }
            | StateKind::Drop { child, .. }
            | StateKind::Rename { child, .. } => child.accepting(ctx, random, stack),
            StateKind::Compiled(c) => c.accepting(),
        }
    }

    fn accepts(&self, q: &Query<'_>) -> bool {
        self.accepting(q.ctx, q.random, &q.stack)
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

fn none<'a>() -> Transitions<'a> {
    Box::new(iter::empty())
}

fn one<'a>(t: Transition) -> Transitions<'a> {
    Box::new(iter::once(t))
}

/// Defer building a stream until its first item is requested.
fn lazy<'a>(f: impl FnOnce() -> Transitions<'a> + 'a) -> Transitions<'a> {
    Box::new(iter::once_with(f).flatten())
}

impl State {
    /// Every way this state can consume part of `target` on `tape`.
    ///
    /// Results may overlap; see [`d_query`](Self::d_query) for the
    /// determinized form.
    pub fn nd_query<'a>(
        &self,
        tape: &Tape,
        target: &Token,
        ctx: &'a Context,
        random: bool,
        stack: &CounterStack,
    ) -> Transitions<'a> {
        self.query(&Query {
            tape: tape.clone(),
            target: target.clone(),
            ctx,
            random,
            stack: stack.clone(),
        })
    }

    /// [`nd_query`](Self::nd_query) with same-tape results made disjoint.
    ///
    /// Whenever two consuming results on one tape overlap, they are split
    /// into their intersection, leading to the union of both successors, and
    /// the leftovers of each side, leading to that side's own successor.
    pub fn d_query(
        &self,
        tape: &Tape,
        target: &Token,
        ctx: &Context,
        random: bool,
        stack: &CounterStack,
    ) -> Vec<Transition> {
        determinize(self.nd_query(tape, target, ctx, random, stack))
    }

    fn dquery(&self, q: &Query<'_>) -> Vec<Transition> {
        determinize(self.query(q))
    }

    fn query<'a>(&self, q: &Query<'a>) -> Transitions<'a> {
        match self.kind() {
            StateKind::Literal { tape, text, index } => self.literal_query(tape, text, *index, q),
            StateKind::AnyChar { tape } => self.any_char_query(tape, q),
            StateKind::Trivial => self.decline(q),
            StateKind::Concat { c1, c2, c1_done } => concat_query(c1, c2, *c1_done, q),
            StateKind::Union(children) => self.union_query(children, q),
            StateKind::Semijoin(c1, c2) => semijoin_query(c1, c2, q),
            StateKind::Join {
                c1,
                c2,
                c2_leads,
                follower_ahead,
            } => join_query(c1, c2, *c2_leads, *follower_ahead, q),
            StateKind::Negation(child) => self.negation_query(child, q),
            StateKind::Repetition {
                initial,
                current,
                min,
                max,
                index,
            } => self.repetition_query(initial, current.as_ref(), *min, *max, *index, q),
            StateKind::Embed {
                symbol,
                scope,
                inner,
            } => self.embed_query(symbol, scope, inner, q),
            StateKind::Projection { child, .. } | StateKind::Drop { child, .. } => {
                self.hiding_query(child, q)
            }
            StateKind::Rename { child, from, to } => self.rename_query(child, from, to, q),
            StateKind::Compiled(c) => Box::new(c.query(self, &q.tape, &q.target).into_iter()),
        }
    }

    /// Nothing to offer on this tape. On a concrete tape that is reported as
    /// a non-consuming result; on the collection it is simply no result.
    fn decline<'a>(&self, q: &Query<'a>) -> Transitions<'a> {
        if !q.is_concrete() {
            return none();
        }
        one(Transition {
            tape: q.tape.clone(),
            token: q.target.clone(),
            matched: false,
            next: self.clone(),
        })
    }

    fn literal_query<'a>(
        &self,
        name: &str,
        text: &Rc<[char]>,
        index: usize,
        q: &Query<'a>,
    ) -> Transitions<'a> {
        let Some(tape) = q.tape.match_tape(name) else {
            return self.decline(q);
        };
        if index >= text.len() {
            return none();
        }
        let Some(st) = tape.string_tape() else {
            return none();
        };
        let Some(bits) = st.to_bits(text[index]) else {
            return none();
        };
        let token = st.matching(&bits, &q.target);
        if token.is_empty() {
            return none();
        }
        let next = State::new(StateKind::Literal {
            tape: name.to_string(),
            text: Rc::clone(text),
            index: index + 1,
        });
        one(Transition {
            tape,
            token,
            matched: true,
            next,
        })
    }

    fn any_char_query<'a>(&self, name: &str, q: &Query<'a>) -> Transitions<'a> {
        let Some(tape) = q.tape.match_tape(name) else {
            return self.decline(q);
        };
        let Some(st) = tape.string_tape() else {
            return none();
        };
        let token = st.matching(&st.any(), &q.target);
        if token.is_empty() {
            return none();
        }
        one(Transition {
            tape,
            token,
            matched: true,
            next: State::empty(),
        })
    }

    fn union_query<'a>(&self, children: &Rc<[State]>, q: &Query<'a>) -> Transitions<'a> {
        if q.random {
            return match q.ctx.pick(self, children.len()) {
                Some(i) => children[i].query(q),
                None => none(),
            };
        }
        let children = Rc::clone(children);
        let q = q.clone();
        Box::new((0..children.len()).flat_map(move |i| children[i].query(&q)))
    }

    fn negation_query<'a>(&self, child: &State, q: &Query<'a>) -> Transitions<'a> {
        let tapes = child.tapes(q.ctx);
        let Some(name) = tapes.iter().next() else {
            return self.decline(q);
        };
        let Some(tape) = q.tape.match_tape(name) else {
            return self.decline(q);
        };
        let Some(st) = tape.string_tape() else {
            return none();
        };

        let mut remaining = st.matching(&q.target, &Token::Any);
        let mut out = Vec::new();
        for t in child.dquery(&q.on(tape.clone(), q.target.clone()).determinized()) {
            if !t.matched {
                continue;
            }
            remaining = st.difference(&remaining, &t.token);
            out.push(Transition {
                next: State::not(t.next),
                ..t
            });
        }
        // Characters the child cannot take lead out of its language for good.
        if !remaining.is_empty() {
            out.push(Transition {
                tape: tape.clone(),
                token: remaining,
                matched: true,
                next: State::star(State::any_char(name)),
            });
        }
        Box::new(out.into_iter())
    }

    fn repetition_query<'a>(
        &self,
        initial: &State,
        current: Option<&State>,
        min: usize,
        max: usize,
        index: usize,
        q: &Query<'a>,
    ) -> Transitions<'a> {
        if q.is_concrete() && !self.tapes(q.ctx).contains(q.tape.name()) {
            return self.decline(q);
        }
        let Some(current) = current else {
            if index >= max {
                return none();
            }
            return repetition_step(initial, initial, min, max, index, q);
        };
        let continued = repetition_step(initial, current, min, max, index, q);
        let (initial, current, q) = (initial.clone(), current.clone(), q.clone());
        let restarted = lazy(move || {
            if index + 1 < max && current.accepts(&q) {
                repetition_step(&initial, &initial, min, max, index + 1, &q)
            } else {
                none()
            }
        });
        Box::new(continued.chain(restarted))
    }

    fn embed_query<'a>(
        &self,
        symbol: &Rc<str>,
        scope: &Rc<[String]>,
        inner: &Option<(Rc<str>, State)>,
        q: &Query<'a>,
    ) -> Transitions<'a> {
        match enter_embed(symbol, scope, inner, q.ctx, &q.stack) {
            Embedded::Missing => self.decline(q),
            Embedded::Blocked => none(),
            Embedded::Entered { key, child, stack } => {
                let (symbol, scope) = (Rc::clone(symbol), Rc::clone(scope));
                Box::new(child.query(&q.nested(stack)).map(move |t| Transition {
                    next: State::entered(&symbol, &scope, &key, t.next),
                    ..t
                }))
            }
        }
    }

    /// Projection and drop: results on hidden tapes still advance the child
    /// but are reported upward as non-consuming.
    fn hiding_query<'a>(&self, child: &State, q: &Query<'a>) -> Transitions<'a> {
        if q.is_concrete() && self.hides(q.tape.name()) {
            return self.decline(q);
        }
        let this = self.clone();
        let (queried, target) = (q.tape.clone(), q.target.clone());
        Box::new(child.dquery(q).into_iter().map(move |t| {
            let next = this.rewrap(t.next);
            if t.matched && this.hides(t.tape.name()) {
                Transition {
                    tape: queried.clone(),
                    token: target.clone(),
                    matched: false,
                    next,
                }
            } else {
                Transition { next, ..t }
            }
        }))
    }

    fn rename_query<'a>(&self, child: &State, from: &str, to: &str, q: &Query<'a>) -> Transitions<'a> {
        let view = q.tape.renamed(from, to);
        let this = self.clone();
        Box::new(child.query(&q.on(view, q.target.clone())).map(move |t| Transition {
            tape: t.tape.unwrap_renamed(),
            next: this.rewrap(t.next),
            ..t
        }))
    }
}

fn concat_query<'a>(c1: &State, c2: &State, c1_done: bool, q: &Query<'a>) -> Transitions<'a> {
    // c1 has nothing more to say about this tape: only c2 can move.
    if c1_done || (q.is_concrete() && !c1.tapes(q.ctx).contains(q.tape.name())) {
        let c1 = c1.clone();
        return Box::new(c2.query(q).map(move |t| Transition {
            next: State::concat(c1.clone(), t.next, c1_done),
            ..t
        }));
    }

    let first: Vec<Transition> = c1.query(q).collect();
    // A declining c1 already lets c2 move without freezing c1.
    let declined = first.iter().any(|t| !t.matched && !t.tape.is_collection());

    let (c2_head, q_head) = (c2.clone(), q.clone());
    let head = first.into_iter().flat_map(move |t| -> Transitions<'a> {
        if t.matched || t.tape.is_collection() {
            return one(Transition {
                next: State::concat(t.next, c2_head.clone(), false),
                ..t
            });
        }
        let c1_next = t.next;
        Box::new(
            c2_head
                .query(&q_head.on(t.tape, t.token))
                .map(move |t2| Transition {
                    next: State::concat(c1_next.clone(), t2.next, false),
                    ..t2
                }),
        )
    });

    let (c1, c2, q) = (c1.clone(), c2.clone(), q.clone());
    let tail = lazy(move || {
        if declined || !c1.accepts(&q) {
            return none();
        }
        Box::new(c2.query(&q).map(move |t| Transition {
            next: State::concat(c1.clone(), t.next, true),
            ..t
        }))
    });

    Box::new(head.chain(tail))
}

fn semijoin_query<'a>(c1: &State, c2: &State, q: &Query<'a>) -> Transitions<'a> {
    let c2 = c2.clone();
    let c2_tapes = c2.tapes(q.ctx);
    let check = q.clone().determinized();
    Box::new(c1.query(q).flat_map(move |t| -> Transitions<'a> {
        if !t.matched || !c2_tapes.contains(t.tape.name()) {
            return one(Transition {
                next: State::semijoin(t.next, c2.clone()),
                ..t
            });
        }
        let c1_next = t.next;
        let found = c2.dquery(&check.on(t.tape, t.token));
        Box::new(
            found
                .into_iter()
                .filter(|t2| t2.matched)
                .map(move |t2| Transition {
                    next: State::semijoin(c1_next.clone(), t2.next),
                    ..t2
                }),
        )
    }))
}

/// One operand leads: its moves on tapes the follower shares are matched by
/// the follower, its other moves pass through. On the "any tape" query the
/// follower also moves alone on tapes the leader never touches. The operand
/// whose tapes include all of the other's leads, so in the common case the
/// follower has no tapes of its own.
///
/// Solo moves of the two sides commute. Between two shared moves the
/// leader's solo moves come first, which keeps one path per interleaving.
fn join_query<'a>(
    c1: &State,
    c2: &State,
    c2_leads: Option<bool>,
    follower_ahead: bool,
    q: &Query<'a>,
) -> Transitions<'a> {
    let c2_leads = c2_leads.unwrap_or_else(|| {
        let (c1_tapes, c2_tapes) = (c1.tapes(q.ctx), c2.tapes(q.ctx));
        c1_tapes.len() < c2_tapes.len() && c1_tapes.is_subset(&c2_tapes)
    });
    let (lead, follow) = if c2_leads { (c2, c1) } else { (c1, c2) };
    let lead_tapes = lead.tapes(q.ctx);
    let follow_tapes = follow.tapes(q.ctx);
    let join = |lead: State, follow: State, follower_ahead: bool| {
        let (c1, c2) = if c2_leads { (follow, lead) } else { (lead, follow) };
        State::new(StateKind::Join {
            c1,
            c2,
            c2_leads: Some(c2_leads),
            follower_ahead,
        })
    };

    let mut out = Vec::new();
    for t in lead.dquery(q) {
        let concrete = !t.tape.is_collection();
        if t.matched && follow_tapes.contains(t.tape.name()) {
            for t2 in follow.dquery(&q.on(t.tape.clone(), t.token.clone())) {
                if t2.matched {
                    out.push(Transition {
                        next: join(t.next.clone(), t2.next, false),
                        ..t2
                    });
                }
            }
        } else if !t.matched && concrete && !lead_tapes.contains(t.tape.name()) {
            for t2 in follow.dquery(&q.on(t.tape.clone(), t.token.clone())) {
                out.push(Transition {
                    next: join(t.next.clone(), t2.next, follower_ahead),
                    ..t2
                });
            }
        } else if concrete || !follower_ahead {
            out.push(Transition {
                next: join(t.next, follow.clone(), follower_ahead),
                ..t
            });
        }
    }

    if !q.is_concrete() {
        for t2 in follow.dquery(q) {
            if t2.matched && lead_tapes.contains(t2.tape.name()) {
                continue;
            }
            out.push(Transition {
                next: join(lead.clone(), t2.next, true),
                ..t2
            });
        }
    }
    Box::new(out.into_iter())
}

fn repetition_step<'a>(
    initial: &State,
    child: &State,
    min: usize,
    max: usize,
    index: usize,
    q: &Query<'a>,
) -> Transitions<'a> {
    let initial = initial.clone();
    Box::new(
        child
            .query(q)
            .filter(|t| t.matched || t.tape.is_collection())
            .map(move |t| Transition {
                next: State::new(StateKind::Repetition {
                    initial: initial.clone(),
                    current: Some(t.next),
                    min,
                    max,
                    index,
                }),
                ..t
            }),
    )
}

/// Split overlapping same-tape results into disjoint ones.
fn determinize(results: impl Iterator<Item = Transition>) -> Vec<Transition> {
    let mut passed = Vec::new();
    let mut merged: Vec<Transition> = Vec::new();

    for t in results {
        if !t.matched || t.tape.string_tape().is_none() {
            passed.push(t);
            continue;
        }
        let mut incoming = Some(t);
        let mut next_merged = Vec::with_capacity(merged.len() + 1);
        for old in merged {
            let Some(new) = incoming.take() else {
                next_merged.push(old);
                continue;
            };
            let split = new
                .tape
                .string_tape()
                .filter(|_| old.tape.name() == new.tape.name())
                .map(|st| {
                    (
                        st.matching(&old.token, &new.token),
                        st.difference(&old.token, &new.token),
                        st.difference(&new.token, &old.token),
                    )
                })
                .filter(|(both, _, _)| !both.is_empty());
            let Some((both, old_rest, new_rest)) = split else {
                next_merged.push(old);
                incoming = Some(new);
                continue;
            };
            next_merged.push(Transition {
                tape: new.tape.clone(),
                token: both,
                matched: true,
                next: State::uni([old.next.clone(), new.next.clone()]),
            });
            if !old_rest.is_empty() {
                next_merged.push(Transition {
                    token: old_rest,
                    ..old
                });
            }
            if !new_rest.is_empty() {
                incoming = Some(Transition {
                    token: new_rest,
                    ..new
                });
            }
        }
        next_merged.extend(incoming);
        merged = next_merged;
    }

    passed.extend(merged);
    passed
}

// ---------------------------------------------------------------------------
// Static analysis
// ---------------------------------------------------------------------------

fn swap_name(name: &str, from: &str, to: &str) -> String {
    if name == from {
        to.to_string()
    } else if name == to {
        from.to_string()
    } else {
        name.to_string()
    }
}

/// Name of a tape as seen outside every enclosing rename.
fn outer_name(name: &str, renames: &[(Rc<str>, Rc<str>)]) -> String {
    renames
        .iter()
        .rev()
        .fold(name.to_string(), |n, (from, to)| swap_name(&n, from, to))
}

impl State {
    /// Tapes this state can ever touch.
    ///
    /// Memoized on the node for the first context that asks; contexts over
    /// a different set of symbols recompute. Fails if a negation inside
    /// covers more than one tape.
    pub fn relevant_tapes(&self, ctx: &Context) -> Result<Rc<TapeSet>, GrambleError> {
        self.tapes_with(ctx.namespace(), ctx.symbol_tapes(), Some(ctx.epoch()))
    }

    /// Infallible form used during traversal; contexts validate their roots
    /// up front, so errors cannot surface here.
    pub(crate) fn tapes(&self, ctx: &Context) -> Rc<TapeSet> {
        self.relevant_tapes(ctx).unwrap_or_default()
    }

    pub(crate) fn tapes_with(
        &self,
        ns: &Namespace,
        symbols: &HashMap<String, Rc<TapeSet>>,
        epoch: Option<u64>,
    ) -> Result<Rc<TapeSet>, GrambleError> {
        let cached = self.0.tapes.get().filter(|(at, _)| Some(*at) == epoch);
        if let Some((_, tapes)) = cached {
            return Ok(Rc::clone(tapes));
        }
        let of = |s: &State| s.tapes_with(ns, symbols, epoch);
        let set: TapeSet = match self.kind() {
            StateKind::Literal { tape, .. } | StateKind::AnyChar { tape } => {
                TapeSet::from([tape.clone()])
            }
            StateKind::Trivial => TapeSet::new(),
            StateKind::Concat { c1, c2, .. }
            | StateKind::Semijoin(c1, c2)
            | StateKind::Join { c1, c2, .. } => of(c1)?.union(&*of(c2)?).cloned().collect(),
            StateKind::Union(children) => {
                let mut set = TapeSet::new();
                for c in children.iter() {
                    set.extend(of(c)?.iter().cloned());
                }
                set
            }
            StateKind::Negation(child) => {
                let tapes = of(child)?;
                if tapes.len() > 1 {
                    return Err(GrambleError::UnsupportedNegation(
                        tapes.iter().cloned().collect(),
                    ));
                }
                (*tapes).clone()
            }
            StateKind::Repetition {
                initial, current, ..
            } => {
                let mut set = (*of(initial)?).clone();
                if let Some(c) = current {
                    set.extend(of(c)?.iter().cloned());
                }
                set
            }
            StateKind::Embed {
                symbol,
                scope,
                inner,
            } => match inner {
                Some((_, child)) => (*of(child)?).clone(),
                None => ns
                    .resolve(scope, symbol)
                    .and_then(|(key, _)| symbols.get(&key))
                    .map(|tapes| (**tapes).clone())
                    .unwrap_or_default(),
            },
            StateKind::Projection { child, keep } => {
                of(child)?.intersection(keep).cloned().collect()
            }
            StateKind::Drop { child, tape } => {
                of(child)?.iter().filter(|t| *t != tape).cloned().collect()
            }
            StateKind::Rename { child, from, to } => {
                of(child)?.iter().map(|t| swap_name(t, from, to)).collect()
            }
            StateKind::Compiled(c) => (**c.tapes()).clone(),
        };
        let set = Rc::new(set);
        if let Some(epoch) = epoch {
            let _ = self.0.tapes.set((epoch, Rc::clone(&set)));
        }
        Ok(set)
    }

    /// Register every character this state can write on the tape it will
    /// be written to, following renames and embedded symbols.
    ///
    /// `visited` holds `symbol|renames` keys so each symbol is walked once
    /// per rename context.
    pub fn collect_vocab(
        &self,
        tapes: &mut TapeCollection,
        ns: &Namespace,
        renames: &mut Vec<(Rc<str>, Rc<str>)>,
        visited: &mut HashSet<String>,
    ) {
        match self.kind() {
            StateKind::Literal { tape, text, .. } => {
                let text: String = text.iter().collect();
                tapes.tokenize(&outer_name(tape, renames), &text);
            }
            StateKind::AnyChar { tape } => tapes.add_tape(&outer_name(tape, renames)),
            StateKind::Trivial => {}
            StateKind::Concat { c1, c2, .. }
            | StateKind::Semijoin(c1, c2)
            | StateKind::Join { c1, c2, .. } => {
                c1.collect_vocab(tapes, ns, renames, visited);
                c2.collect_vocab(tapes, ns, renames, visited);
            }
            StateKind::Union(children) => {
                for c in children.iter() {
                    c.collect_vocab(tapes, ns, renames, visited);
                }
            }
            StateKind::Negation(child)
            | StateKind::Projection { child, .. }
            | StateKind::Drop { child, .. } => child.collect_vocab(tapes, ns, renames, visited),
            StateKind::Repetition {
                initial, current, ..
            } => {
                initial.collect_vocab(tapes, ns, renames, visited);
                if let Some(c) = current {
                    c.collect_vocab(tapes, ns, renames, visited);
                }
            }
            StateKind::Embed {
                symbol,
                scope,
                inner,
            } => match inner {
                Some((_, child)) => child.collect_vocab(tapes, ns, renames, visited),
                None => {
                    let Some((key, child)) = ns.resolve(scope, symbol) else {
                        return;
                    };
                    let context: Vec<String> =
                        renames.iter().map(|(f, t)| format!("{f}>{t}")).collect();
                    if visited.insert(format!("{key}|{}", context.join(","))) {
                        child.collect_vocab(tapes, ns, renames, visited);
                    }
                }
            },
            StateKind::Rename { child, from, to } => {
                renames.push((Rc::clone(from), Rc::clone(to)));
                child.collect_vocab(tapes, ns, renames, visited);
                renames.pop();
            }
            StateKind::Compiled(c) => c.register_vocab(tapes, |name| outer_name(name, renames)),
        }
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            StateKind::Literal { tape, text, index } => {
                let text: String = text.iter().collect();
                write!(f, "Lit({tape}:{text:?}@{index})")
            }
            StateKind::AnyChar { tape } => write!(f, "Any({tape})"),
            StateKind::Trivial => f.write_str("Empty"),
            StateKind::Concat { c1, c2, c1_done } => {
                let done = if *c1_done { "!" } else { "" };
                write!(f, "Seq({c1:?}{done}, {c2:?})")
            }
            StateKind::Union(children) => {
                f.write_str("Uni(")?;
                for (i, c) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{c:?}")?;
                }
                f.write_str(")")
            }
            StateKind::Semijoin(c1, c2) => write!(f, "Semijoin({c1:?}, {c2:?})"),
            StateKind::Join {
                c1,
                c2,
                follower_ahead,
                ..
            } => {
                let ahead = if *follower_ahead { "!" } else { "" };
                write!(f, "Join({c1:?}, {c2:?}{ahead})")
            }
            StateKind::Negation(child) => write!(f, "Not({child:?})"),
            StateKind::Repetition {
                initial,
                current,
                min,
                max,
                index,
            } => {
                write!(f, "Rep({initial:?}, {min}..")?;
                if *max != UNBOUNDED {
                    write!(f, "{max}")?;
                }
                write!(f, ", #{index}")?;
                if let Some(c) = current {
                    write!(f, ", in {c:?}")?;
                }
                f.write_str(")")
            }
            StateKind::Embed { symbol, inner, .. } => match inner {
                Some((key, child)) => write!(f, "Emb({key}: {child:?})"),
                None => write!(f, "Emb({symbol})"),
            },
            StateKind::Projection { child, keep } => write!(f, "Proj({child:?}, {keep:?})"),
            StateKind::Drop { child, tape } => write!(f, "Drop({child:?}, {tape})"),
            StateKind::Rename { child, from, to } => write!(f, "Rename({child:?}, {from}<->{to})"),
            StateKind::Compiled(_) => f.write_str("Compiled"),
        }
    }
}
