// Persistent output trie.
//
// Every live search branch owns a `MultiTapeOutput`, but branches that share
// a history share the nodes of that history: adding a token allocates one
// node that points back at the previous head of its tape.

use std::rc::Rc;

use hashbrown::HashMap;
use rand::Rng;

use crate::Record;
use crate::tape::TapeCollection;
use crate::token::Token;

/// One token on one tape plus a link to everything written before it.
#[derive(Debug)]
pub struct SingleTapeOutput {
    token: Token,
    prev: Option<Rc<SingleTapeOutput>>,
}

impl SingleTapeOutput {
    /// Extend `prev` (or start a new tape history) with `token`.
    pub fn push(prev: Option<Rc<SingleTapeOutput>>, token: Token) -> Rc<SingleTapeOutput> {
        Rc::new(SingleTapeOutput { token, prev })
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    /// Tokens from first to last.
    pub fn tokens(&self) -> Vec<&Token> {
        let mut tokens = Vec::new();
        let mut node = Some(self);
        while let Some(n) = node {
            tokens.push(&n.token);
            node = n.prev.as_deref();
        }
        tokens.reverse();
        tokens
    }

    pub fn len(&self) -> usize {
        let mut len = 0;
        let mut node = Some(self);
        while let Some(n) = node {
            len += 1;
            node = n.prev.as_deref();
        }
        len
    }

    /// Always false: a node holds at least one token.
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Snapshot of every tape's current history.
#[derive(Clone, Debug, Default)]
pub struct MultiTapeOutput {
    heads: HashMap<String, Rc<SingleTapeOutput>>,
}

impl MultiTapeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.heads.is_empty()
    }

    /// A new snapshot with `token` appended to `tape`. `self` is unchanged.
    pub fn add(&self, tape: &str, token: Token) -> MultiTapeOutput {
        let mut heads = self.heads.clone();
        let prev = heads.remove(tape);
        heads.insert(tape.to_string(), SingleTapeOutput::push(prev, token));
        MultiTapeOutput { heads }
    }

    pub fn get(&self, tape: &str) -> Option<&Rc<SingleTapeOutput>> {
        self.heads.get(tape)
    }

    /// Every record this output stands for.
    ///
    /// A token may cover several characters (a wildcard, a negated class);
    /// each combination of characters across all positions and tapes is one
    /// record.
    pub fn to_records(&self, tapes: &TapeCollection) -> Vec<Record> {
        let mut records = vec![Record::new()];
        for (name, strings) in self.strings_per_tape(tapes) {
            let mut next = Vec::with_capacity(records.len() * strings.len());
            for record in &records {
                for s in &strings {
                    let mut r = record.clone();
                    r.insert(name.clone(), s.clone());
                    next.push(r);
                }
            }
            records = next;
        }
        records
    }

    /// One record chosen by picking a random character for every token.
    pub fn random_record<R: Rng + ?Sized>(&self, tapes: &TapeCollection, rng: &mut R) -> Record {
        let mut record = Record::new();
        for (name, head) in self.sorted_heads() {
            let Some(tape) = tapes.get(name) else {
                continue;
            };
            let mut text = String::new();
            for token in head.tokens() {
                let chars = tape.from_bits(token);
                if !chars.is_empty() {
                    text.push(chars[rng.random_range(0..chars.len())]);
                }
            }
            record.insert(name.to_string(), text);
        }
        record
    }

    fn sorted_heads(&self) -> Vec<(&str, &Rc<SingleTapeOutput>)> {
        let mut heads: Vec<_> = self.heads.iter().map(|(k, v)| (k.as_str(), v)).collect();
        heads.sort_by(|a, b| a.0.cmp(b.0));
        heads
    }

    fn strings_per_tape(&self, tapes: &TapeCollection) -> Vec<(String, Vec<String>)> {
        let mut out = Vec::new();
        for (name, head) in self.sorted_heads() {
            let Some(tape) = tapes.get(name) else {
                continue;
            };
            let mut strings = vec![String::new()];
            for token in head.tokens() {
                let chars = tape.from_bits(token);
                let mut next = Vec::with_capacity(strings.len() * chars.len());
                for s in &strings {
                    for &c in &chars {
                        let mut s = s.clone();
                        s.push(c);
                        next.push(s);
                    }
                }
                strings = next;
            }
            out.push((name.to_string(), strings));
        }
        out
    }
}
