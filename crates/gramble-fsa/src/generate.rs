// Traversal drivers.
//
// `Generator` walks a state breadth-first, one character per round, and
// yields a record for every accepting state it reaches. `random_walk`
// follows a single random path instead; `Grammar::sample` calls it
// repeatedly.

use std::collections::VecDeque;

use gramble_core::{CounterStack, MultiTapeOutput, Record, Token};
use log::{debug, trace};

use crate::config::GenOptions;
use crate::context::Context;
use crate::state::State;

/// Lazy, breadth-first enumeration of the records a state accepts.
///
/// Records come out roughly shortest first. Identical records reached along
/// different paths are only merged when the paths share a prefix of
/// character classes, so a grammar with genuinely different derivations of
/// one string may yield it more than once. A join whose sides each own
/// tapes the other lacks can likewise reach one record through two
/// interleavings.
pub struct Generator {
    ctx: Context,
    stack: CounterStack,
    current: VecDeque<(MultiTapeOutput, State)>,
    upcoming: VecDeque<(MultiTapeOutput, State)>,
    ready: VecDeque<Record>,
    round: usize,
    max_chars: usize,
    remaining: Option<usize>,
}

impl Generator {
    pub(crate) fn new(ctx: Context, root: State, opts: &GenOptions) -> Self {
        let mut current = VecDeque::new();
        current.push_back((MultiTapeOutput::new(), root));
        Self {
            ctx,
            stack: CounterStack::new(opts.max_recursion),
            current,
            upcoming: VecDeque::new(),
            ready: VecDeque::new(),
            round: 0,
            max_chars: opts.max_chars,
            remaining: opts.max_results,
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Pop one state and expand it. Returns false once the search is over.
    fn step(&mut self) -> bool {
        if self.current.is_empty() {
            if self.upcoming.is_empty() {
                return false;
            }
            self.round += 1;
            std::mem::swap(&mut self.current, &mut self.upcoming);
            debug!("generate: round {} with {} states", self.round, self.current.len());
        }
        let Some((output, state)) = self.current.pop_front() else {
            return false;
        };
        trace!("generate: visiting {state:?}");

        if state.accepting(&self.ctx, false, &self.stack) {
            self.ready
                .extend(output.to_records(self.ctx.tapes()));
        }
        if self.round >= self.max_chars {
            return true;
        }
        let any = self.ctx.any_tape();
        for t in state.d_query(&any, &Token::Any, &self.ctx, false, &self.stack) {
            let output = if t.matched {
                output.add(t.tape.name(), t.token)
            } else {
                output.clone()
            };
            self.upcoming.push_back((output, t.next));
        }
        true
    }
}

impl Iterator for Generator {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        if self.remaining == Some(0) {
            return None;
        }
        loop {
            if let Some(record) = self.ready.pop_front() {
                if let Some(n) = self.remaining.as_mut() {
                    *n -= 1;
                }
                return Some(record);
            }
            if !self.step() {
                return None;
            }
        }
    }
}

/// Follow one random path from `root` and return the record it ends in.
///
/// At each step the walk chooses uniformly among the outgoing transitions,
/// plus stopping if the state accepts. Unions commit to one child for the
/// whole walk. Returns `None` when the walk gets stuck in a state that
/// neither accepts nor moves.
pub(crate) fn random_walk(
    ctx: &Context,
    root: &State,
    stack: &CounterStack,
    max_chars: usize,
) -> Option<Record> {
    ctx.reset_picks();
    let any = ctx.any_tape();
    let mut output = MultiTapeOutput::new();
    let mut state = root.clone();
    let mut steps = 0;
    loop {
        let accepting = state.accepting(ctx, true, stack);
        let mut options = if steps < max_chars {
            state.d_query(&any, &Token::Any, ctx, true, stack)
        } else {
            Vec::new()
        };
        let choices = options.len() + usize::from(accepting);
        if choices == 0 {
            trace!("sample: walk stuck after {steps} steps");
            return None;
        }
        let i = ctx.random_index(choices);
        if i == options.len() {
            return Some(ctx.with_rng(|rng| output.random_record(ctx.tapes(), rng)));
        }
        let t = options.swap_remove(i);
        if t.matched {
            output = output.add(t.tape.name(), t.token);
        }
        state = t.next;
        steps += 1;
    }
}
