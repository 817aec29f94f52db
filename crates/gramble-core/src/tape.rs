// Tapes: named output channels with their own character vocabularies.
//
// A `StringTape` owns the bijection between characters it has seen and bit
// positions. A `TapeCollection` stands for "any tape" and dispatches by name.
// A `RenamedTape` makes a sub-grammar see one tape under another's name.

use std::borrow::Cow;
use std::rc::Rc;

use hashbrown::HashMap;
use vob::Vob;

use crate::token::{self, Token};

/// Name reported by the "any tape" collection. Never a real tape name.
pub const ANY_TAPE: &str = "__ANY_TAPE__";

// ---------------------------------------------------------------------------
// StringTape
// ---------------------------------------------------------------------------

/// A single tape and its vocabulary.
///
/// Characters get bit indices in registration order. Indices are never
/// reused or reassigned, so vocabulary growth is monotonic and tokens built
/// earlier stay valid.
#[derive(Clone, Debug, Default)]
pub struct StringTape {
    name: String,
    char_to_index: HashMap<char, usize>,
    index_to_char: Vec<char>,
}

impl StringTape {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            char_to_index: HashMap::new(),
            index_to_char: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of registered characters.
    pub fn size(&self) -> usize {
        self.index_to_char.len()
    }

    /// Register a character (if unseen) and return its bit index.
    pub fn register(&mut self, c: char) -> usize {
        if let Some(&i) = self.char_to_index.get(&c) {
            return i;
        }
        let i = self.index_to_char.len();
        self.index_to_char.push(c);
        self.char_to_index.insert(c, i);
        i
    }

    /// Split `text` into one single-character token per character,
    /// registering any character not seen before.
    pub fn tokenize(&mut self, text: &str) -> Vec<Token> {
        text.chars().map(|c| Token::single(self.register(c))).collect()
    }

    /// Token for an already registered character.
    pub fn to_bits(&self, c: char) -> Option<Token> {
        self.char_to_index.get(&c).map(|&i| Token::single(i))
    }

    /// Token for a set of characters. Unregistered characters are left out.
    pub fn token_for(&self, chars: &[char]) -> Token {
        Token::from_indices(chars.iter().filter_map(|c| self.char_to_index.get(c).copied()))
    }

    /// Every character this tape knows.
    pub fn any(&self) -> Token {
        Token::Chars(Vob::from_elem(true, self.size()))
    }

    /// Intersection of two tokens interpreted on this tape.
    pub fn matching(&self, a: &Token, b: &Token) -> Token {
        let a = self.resolve(a);
        let b = self.resolve(b);
        Token::Chars(token::intersect(&a, &b))
    }

    /// Characters in `a` but not in `b`.
    pub fn difference(&self, a: &Token, b: &Token) -> Token {
        let a = self.resolve(a);
        let b = self.resolve(b);
        Token::Chars(token::subtract(&a, &b))
    }

    /// The characters a token stands for, in bit order.
    pub fn from_bits(&self, token: &Token) -> Vec<char> {
        match token {
            Token::Any => self.index_to_char.clone(),
            Token::Chars(bits) => {
                self.check(bits);
                bits.iter_set_bits(..).map(|i| self.index_to_char[i]).collect()
            }
        }
    }

    fn resolve<'t>(&self, token: &'t Token) -> Cow<'t, Vob> {
        match token {
            Token::Any => Cow::Owned(Vob::from_elem(true, self.size())),
            Token::Chars(bits) => {
                self.check(bits);
                Cow::Borrowed(bits)
            }
        }
    }

    /// A token wider than this vocabulary was produced by another tape.
    fn check(&self, bits: &Vob) {
        if bits.len() > self.size() {
            panic!(
                "token of width {} interpreted against tape '{}' with {} characters",
                bits.len(),
                self.name,
                self.size()
            );
        }
    }
}

// ---------------------------------------------------------------------------
// TapeCollection
// ---------------------------------------------------------------------------

/// The "any tape" aggregate: every known tape, addressed by name.
///
/// Has no vocabulary of its own. Member tapes are reference counted and
/// copied on write, so a collection can be snapshotted cheaply while a
/// traversal holds on to an older version.
#[derive(Clone, Debug, Default)]
pub struct TapeCollection {
    tapes: Vec<Rc<StringTape>>,
    index: HashMap<String, usize>,
}

impl TapeCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tapes.is_empty()
    }

    /// Make sure a tape exists, creating an empty one if needed.
    pub fn add_tape(&mut self, name: &str) {
        self.tape_mut(name);
    }

    /// Tokenize `text` on the named tape, creating the tape if needed.
    pub fn tokenize(&mut self, tape: &str, text: &str) -> Vec<Token> {
        self.tape_mut(tape).tokenize(text)
    }

    pub fn get(&self, name: &str) -> Option<&Rc<StringTape>> {
        self.index.get(name).map(|&i| &self.tapes[i])
    }

    /// Tape names in registration order.
    pub fn tape_names(&self) -> impl Iterator<Item = &str> {
        self.tapes.iter().map(|t| t.name())
    }

    pub fn match_tape(&self, name: &str) -> Option<Tape> {
        self.get(name).map(|t| Tape::String(Rc::clone(t)))
    }

    /// Textual summary of the vocabulary (tape names and sizes).
    ///
    /// Two collections with the same signature interpret tokens identically,
    /// which is what compiled-state caching keys on.
    pub fn signature(&self) -> String {
        self.tapes
            .iter()
            .map(|t| format!("{}:{}", t.name(), t.size()))
            .collect::<Vec<_>>()
            .join(",")
    }

    fn tape_mut(&mut self, name: &str) -> &mut StringTape {
        let i = match self.index.get(name) {
            Some(&i) => i,
            None => {
                self.tapes.push(Rc::new(StringTape::new(name)));
                self.index.insert(name.to_string(), self.tapes.len() - 1);
                self.tapes.len() - 1
            }
        };
        Rc::make_mut(&mut self.tapes[i])
    }
}

// ---------------------------------------------------------------------------
// RenamedTape
// ---------------------------------------------------------------------------

/// A zero-copy view that swaps two tape names.
///
/// Inside the view, the child's tape `to` is called `from` and vice versa.
/// Every tape handed out by [`Tape::match_tape`] on a view is itself wrapped,
/// so a sub-grammar keeps seeing its own names no matter how deep results
/// are passed around.
#[derive(Debug)]
pub struct RenamedTape {
    child: Tape,
    from: String,
    to: String,
    name: String,
}

impl RenamedTape {
    pub fn new(child: Tape, from: impl Into<String>, to: impl Into<String>) -> Self {
        let from = from.into();
        let to = to.into();
        let name = swap_name(child.name(), &from, &to).to_string();
        Self {
            child,
            from,
            to,
            name,
        }
    }

    pub fn child(&self) -> &Tape {
        &self.child
    }
}

fn swap_name<'a>(name: &'a str, from: &'a str, to: &'a str) -> &'a str {
    if name == from {
        to
    } else if name == to {
        from
    } else {
        name
    }
}

// ---------------------------------------------------------------------------
// Tape
// ---------------------------------------------------------------------------

/// Any of the three tape kinds. Cheap to clone.
#[derive(Clone, Debug)]
pub enum Tape {
    String(Rc<StringTape>),
    Collection(Rc<TapeCollection>),
    Renamed(Rc<RenamedTape>),
}

impl Tape {
    /// Name of this tape as seen by whoever holds it.
    pub fn name(&self) -> &str {
        match self {
            Tape::String(t) => t.name(),
            Tape::Collection(_) => ANY_TAPE,
            Tape::Renamed(r) => &r.name,
        }
    }

    /// True for the "any tape" collection, possibly seen through renames.
    pub fn is_collection(&self) -> bool {
        match self {
            Tape::String(_) => false,
            Tape::Collection(_) => true,
            Tape::Renamed(r) => r.child.is_collection(),
        }
    }

    /// The tape called `name` from this tape's point of view, if any.
    ///
    /// A string tape only matches its own name; a collection matches any of
    /// its members; a renamed view translates the name first.
    pub fn match_tape(&self, name: &str) -> Option<Tape> {
        match self {
            Tape::String(t) => (t.name() == name).then(|| self.clone()),
            Tape::Collection(c) => c.match_tape(name),
            Tape::Renamed(r) => r
                .child
                .match_tape(swap_name(name, &r.from, &r.to))
                .map(|t| Tape::Renamed(Rc::new(RenamedTape::new(t, &r.from, &r.to)))),
        }
    }

    /// The concrete vocabulary behind this tape, looking through renames.
    pub fn string_tape(&self) -> Option<&StringTape> {
        match self {
            Tape::String(t) => Some(t.as_ref()),
            Tape::Collection(_) => None,
            Tape::Renamed(r) => r.child.string_tape(),
        }
    }

    /// Wrap this tape so that `from` and `to` swap names.
    pub fn renamed(&self, from: &str, to: &str) -> Tape {
        Tape::Renamed(Rc::new(RenamedTape::new(self.clone(), from, to)))
    }

    /// Undo one level of [`renamed`](Self::renamed); other tapes are returned as is.
    pub fn unwrap_renamed(&self) -> Tape {
        match self {
            Tape::Renamed(r) => r.child.clone(),
            _ => self.clone(),
        }
    }
}
