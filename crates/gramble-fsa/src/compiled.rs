// Eager expansion of lazy states into transition tables.
//
// A compiled state stores, for the "any tape" query and for every concrete
// tape, the determinized transitions of the state it replaces. Answering a
// query is then a table lookup plus one intersection with the target.
//
// Entries hold characters, not bits. Bit positions belong to the vocabulary
// of one context, and a compiled state may be traversed under a later one
// whose tapes registered their characters in another order.

use std::rc::Rc;

use gramble_core::{CounterStack, StringTape, Tape, TapeCollection, Token};
use hashbrown::HashMap;
use log::trace;

use crate::context::Context;
use crate::state::{State, TapeSet, Transition};

pub struct CompiledState {
    accepting: bool,
    tapes: Rc<TapeSet>,
    vocab: Rc<TapeCollection>,
    any: Vec<Entry>,
    by_tape: HashMap<String, Vec<Entry>>,
}

struct Entry {
    tape: String,
    /// Characters consumed; empty for non-consuming entries.
    chars: Rc<[char]>,
    matched: bool,
    next: State,
}

impl Entry {
    /// This entry's characters as a token of `st`, narrowed to `target`.
    fn token_on(&self, st: &StringTape, target: &Token) -> Token {
        st.matching(&st.token_for(&self.chars), target)
    }
}

/// Expand `state` into tables `level` transitions deep.
///
/// States below that depth stay lazy. Level 0 and already compiled states
/// are returned unchanged.
pub fn compile(state: &State, ctx: &Context, stack: &CounterStack, level: usize) -> State {
    if level == 0 || state.is_compiled() {
        return state.clone();
    }
    let freeze = |results: Vec<Transition>| -> Vec<Entry> {
        results
            .into_iter()
            .map(|t| Entry {
                tape: t.tape.name().to_string(),
                chars: match t.tape.string_tape() {
                    Some(st) if t.matched => st.from_bits(&t.token).into(),
                    _ => Rc::from([]),
                },
                matched: t.matched,
                next: compile(&t.next, ctx, stack, level - 1),
            })
            .collect()
    };

    let tapes = state.tapes(ctx);
    let any = freeze(state.d_query(&ctx.any_tape(), &Token::Any, ctx, false, stack));
    let mut by_tape = HashMap::new();
    for name in tapes.iter() {
        let Some(tape) = ctx.tapes().match_tape(name) else {
            continue;
        };
        let entries = freeze(state.d_query(&tape, &Token::Any, ctx, false, stack));
        by_tape.insert(name.clone(), entries);
    }
    trace!(
        "compiled {state:?}: {} collection entries over {} tapes",
        any.len(),
        by_tape.len()
    );

    State::compiled(CompiledState {
        accepting: state.accepting(ctx, false, stack),
        tapes,
        vocab: Rc::clone(ctx.tapes()),
        any,
        by_tape,
    })
}

impl CompiledState {
    pub fn accepting(&self) -> bool {
        self.accepting
    }

    pub fn tapes(&self) -> &Rc<TapeSet> {
        &self.tapes
    }

    /// Table lookup standing in for a lazy query. `this` is the state
    /// wrapping these tables, returned for tapes the tables never touch.
    pub(crate) fn query(&self, this: &State, tape: &Tape, target: &Token) -> Vec<Transition> {
        let declined = || Transition {
            tape: tape.clone(),
            token: target.clone(),
            matched: false,
            next: this.clone(),
        };

        if tape.is_collection() {
            return self
                .any
                .iter()
                .filter_map(|e| {
                    if !e.matched {
                        return Some(Transition {
                            next: e.next.clone(),
                            ..declined()
                        });
                    }
                    let member = tape.match_tape(&e.tape)?;
                    let token = e.token_on(member.string_tape()?, target);
                    if token.is_empty() {
                        return None;
                    }
                    Some(Transition {
                        tape: member,
                        token,
                        matched: true,
                        next: e.next.clone(),
                    })
                })
                .collect();
        }

        let Some(entries) = self.by_tape.get(tape.name()) else {
            if self.tapes.contains(tape.name()) {
                return Vec::new();
            }
            return vec![declined()];
        };
        let Some(st) = tape.string_tape() else {
            return Vec::new();
        };
        entries
            .iter()
            .filter_map(|e| {
                if !e.matched {
                    return Some(Transition {
                        next: e.next.clone(),
                        ..declined()
                    });
                }
                let token = e.token_on(st, target);
                (!token.is_empty()).then(|| Transition {
                    tape: tape.clone(),
                    token,
                    matched: true,
                    next: e.next.clone(),
                })
            })
            .collect()
    }

    /// Re-register the compile-time vocabulary, with tape names mapped by
    /// `outer`.
    pub(crate) fn register_vocab(&self, tapes: &mut TapeCollection, outer: impl Fn(&str) -> String) {
        for name in self.vocab.tape_names() {
            let Some(tape) = self.vocab.get(name) else {
                continue;
            };
            let text: String = tape.from_bits(&tape.any()).into_iter().collect();
            tapes.tokenize(&outer(name), &text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::Namespace;

    fn setup(state: &State) -> Context {
        Context::new(Rc::new(Namespace::new()), &[state], Some(0)).unwrap()
    }

    #[test]
    fn level_zero_is_identity() {
        let s = State::lit("t", "a");
        let ctx = setup(&s);
        let c = compile(&s, &ctx, &CounterStack::new(4), 0);
        assert!(!c.is_compiled());
    }

    #[test]
    fn tables_answer_like_the_lazy_state() {
        let s = State::uni([State::lit("t", "ab"), State::lit("t", "ac")]);
        let ctx = setup(&s);
        let stack = CounterStack::new(4);
        let c = compile(&s, &ctx, &stack, 2);
        assert!(c.is_compiled());
        assert!(!c.accepting(&ctx, false, &stack));

        let first = c.d_query(&ctx.any_tape(), &Token::Any, &ctx, false, &stack);
        assert_eq!(first.len(), 1);
        assert!(first[0].next.is_compiled());

        let second = first[0]
            .next
            .d_query(&ctx.any_tape(), &Token::Any, &ctx, false, &stack);
        let tape = ctx.tapes().get("t").unwrap();
        let mut chars: Vec<char> = second
            .iter()
            .flat_map(|t| tape.from_bits(&t.token))
            .collect();
        chars.sort();
        assert_eq!(chars, vec!['b', 'c']);
        // Third level is lazy again.
        assert!(second.iter().all(|t| !t.next.is_compiled()));
    }

    #[test]
    fn concrete_lookup_filters_by_target() {
        let s = State::uni([State::lit("t", "a"), State::lit("t", "b")]);
        let ctx = setup(&s);
        let stack = CounterStack::new(4);
        let c = compile(&s, &ctx, &stack, 1);
        let t = ctx.tapes().match_tape("t").unwrap();
        let only_b = ctx.tapes().get("t").unwrap().to_bits('b').unwrap();
        let out = c.d_query(&t, &only_b, &ctx, false, &stack);
        assert_eq!(out.len(), 1);
        assert!(out[0].next.accepting(&ctx, false, &stack));
    }

    #[test]
    fn foreign_tapes_are_declined() {
        let s = State::lit("t", "a");
        let other = State::lit("u", "x");
        let ctx = Context::new(Rc::new(Namespace::new()), &[&s, &other], Some(0)).unwrap();
        let stack = CounterStack::new(4);
        let c = compile(&s, &ctx, &stack, 1);
        let u = ctx.tapes().match_tape("u").unwrap();
        let out = c.d_query(&u, &Token::Any, &ctx, false, &stack);
        assert_eq!(out.len(), 1);
        assert!(!out[0].matched);
    }
}
