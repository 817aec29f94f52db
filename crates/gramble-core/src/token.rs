// Character classes as bit-vectors.
//
// A token is only meaningful relative to the tape that produced it: bit `i`
// stands for the `i`-th character that tape has registered. Vocabularies only
// ever grow, so a token built before the vocabulary grew is simply narrower;
// all operations here treat missing high bits as unset.

use vob::Vob;

/// A character class on one tape.
///
/// `Any` is the universal class. It is resolved to concrete bits by the tape
/// that interprets it (see [`StringTape::matching`](crate::StringTape::matching)),
/// which lets a query ask "any character" before it knows which tape answers.
#[derive(Clone, Debug)]
pub enum Token {
    Any,
    Chars(Vob),
}

impl Token {
    /// The empty class: matches nothing.
    pub fn empty() -> Self {
        Token::Chars(Vob::new())
    }

    /// A class holding exactly one bit.
    pub fn single(index: usize) -> Self {
        let mut bits = Vob::from_elem(false, index + 1);
        bits.set(index, true);
        Token::Chars(bits)
    }

    /// A class holding the given bits.
    pub fn from_indices(indices: impl IntoIterator<Item = usize>) -> Self {
        let indices: Vec<usize> = indices.into_iter().collect();
        let width = indices.iter().max().map_or(0, |&m| m + 1);
        let mut bits = Vob::from_elem(false, width);
        for i in indices {
            bits.set(i, true);
        }
        Token::Chars(bits)
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Token::Any)
    }

    /// True if the class matches no character at all.
    pub fn is_empty(&self) -> bool {
        match self {
            Token::Any => false,
            Token::Chars(bits) => bits.iter_set_bits(..).next().is_none(),
        }
    }

    /// Number of bit positions this token spans (0 for `Any`).
    pub fn width(&self) -> usize {
        match self {
            Token::Any => 0,
            Token::Chars(bits) => bits.len(),
        }
    }

    /// Indices of the set bits. `Any` has no concrete bits and yields none.
    pub fn indices(&self) -> Vec<usize> {
        match self {
            Token::Any => Vec::new(),
            Token::Chars(bits) => bits.iter_set_bits(..).collect(),
        }
    }

    /// Intersection. `Any` is the identity.
    pub fn and(&self, other: &Token) -> Token {
        match (self, other) {
            (Token::Any, t) | (t, Token::Any) => t.clone(),
            (Token::Chars(a), Token::Chars(b)) => Token::Chars(intersect(a, b)),
        }
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Token::Any, Token::Any) => true,
            (Token::Chars(a), Token::Chars(b)) => {
                a.iter_set_bits(..).eq(b.iter_set_bits(..))
            }
            _ => false,
        }
    }
}

impl Eq for Token {}

/// AND of two bit-vectors of possibly different widths.
pub(crate) fn intersect(a: &Vob, b: &Vob) -> Vob {
    let width = a.len().min(b.len());
    let mut out = Vob::from_elem(false, width);
    for i in a.iter_set_bits(..width) {
        if b.get(i) == Some(true) {
            out.set(i, true);
        }
    }
    out
}

/// AND-NOT (`a` minus `b`) of two bit-vectors of possibly different widths.
pub(crate) fn subtract(a: &Vob, b: &Vob) -> Vob {
    let mut out = Vob::from_elem(false, a.len());
    for i in a.iter_set_bits(..) {
        if b.get(i) != Some(true) {
            out.set(i, true);
        }
    }
    out
}
