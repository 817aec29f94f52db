// gramble-cli: grammar file loading and shared utilities for CLI tools.
//
// Grammars are described in JSON. Each symbol maps to an expression tree
// whose node names mirror the combinator constructors:
//
//   {
//     "symbols": {
//       "word": { "seq": [ { "embed": "stem" }, { "maybe": { "lit": { "tape": "text", "text": "s" } } } ] },
//       "stem": { "uni": [ { "lit": { "tape": "text", "text": "cat" } }, "empty" ] }
//     },
//     "namespaces": { "Verbs": { "symbols": { ... }, "default": "all" } },
//     "default": "word",
//     "options": { "max_recursion": 3 },
//     "tests": [ { "symbol": "word", "record": { "text": "cats" } } ]
//   }

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process;

use gramble_fsa::{GenOptions, GrambleError, Grammar, Namespace, Record, State};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Environment variable consulted when no `--grammar` flag is given.
pub const GRAMMAR_ENV: &str = "GRAMBLE_GRAMMAR";

/// One node of a grammar expression.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Lit {
        tape: String,
        text: String,
    },
    Any {
        tape: String,
    },
    Empty,
    Seq(Vec<Expr>),
    Uni(Vec<Expr>),
    Join(Box<Expr>, Box<Expr>),
    Semijoin(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Rep {
        child: Box<Expr>,
        #[serde(default)]
        min: usize,
        #[serde(default)]
        max: Option<usize>,
    },
    Star(Box<Expr>),
    Plus(Box<Expr>),
    Maybe(Box<Expr>),
    Embed(String),
    Proj {
        child: Box<Expr>,
        tapes: Vec<String>,
    },
    Drop {
        child: Box<Expr>,
        tape: String,
    },
    Rename {
        child: Box<Expr>,
        from: String,
        to: String,
    },
    StartsWith {
        tape: String,
        child: Box<Expr>,
    },
    EndsWith {
        tape: String,
        child: Box<Expr>,
    },
    Contains {
        tape: String,
        child: Box<Expr>,
    },
}

impl Expr {
    /// Build the state for this expression. Embeds resolve from `scope`.
    pub fn to_state(&self, scope: &[String]) -> Result<State, GrambleError> {
        let child = |e: &Expr| e.to_state(scope);
        let all = |es: &[Expr]| es.iter().map(|e| e.to_state(scope)).collect::<Result<Vec<_>, _>>();
        Ok(match self {
            Expr::Lit { tape, text } => State::lit(tape, text),
            Expr::Any { tape } => State::any_char(tape),
            Expr::Empty => State::empty(),
            Expr::Seq(es) => State::seq(all(es.as_slice())?),
            Expr::Uni(es) => State::uni(all(es.as_slice())?),
            Expr::Join(a, b) => State::join(child(a)?, child(b)?),
            Expr::Semijoin(a, b) => State::semijoin(child(a)?, child(b)?),
            Expr::Not(e) => State::not(child(e)?),
            Expr::Rep { child: e, min, max } => State::rep(child(e)?, *min, *max)?,
            Expr::Star(e) => State::star(child(e)?),
            Expr::Plus(e) => State::plus(child(e)?),
            Expr::Maybe(e) => State::maybe(child(e)?),
            Expr::Embed(name) => State::embed(name, scope),
            Expr::Proj { child: e, tapes } => State::proj(child(e)?, tapes.iter().cloned()),
            Expr::Drop { child: e, tape } => State::drop(child(e)?, tape),
            Expr::Rename { child: e, from, to } => State::rename(child(e)?, from, to),
            Expr::StartsWith { tape, child: e } => State::starts_with(tape, child(e)?),
            Expr::EndsWith { tape, child: e } => State::ends_with(tape, child(e)?),
            Expr::Contains { tape, child: e } => State::contains(tape, child(e)?),
        })
    }

    /// Sheet names referred to by dotted embeds anywhere below this node.
    fn referenced_sheets(&self, out: &mut Vec<String>) {
        match self {
            Expr::Lit { .. } | Expr::Any { .. } | Expr::Empty => {}
            Expr::Embed(name) => {
                if let Some((sheet, _)) = name.split_once('.') {
                    out.push(sheet.to_string());
                }
            }
            Expr::Seq(es) | Expr::Uni(es) => {
                for e in es {
                    e.referenced_sheets(out);
                }
            }
            Expr::Join(a, b) | Expr::Semijoin(a, b) => {
                a.referenced_sheets(out);
                b.referenced_sheets(out);
            }
            Expr::Not(e) | Expr::Star(e) | Expr::Plus(e) | Expr::Maybe(e) => {
                e.referenced_sheets(out)
            }
            Expr::Rep { child, .. }
            | Expr::Proj { child, .. }
            | Expr::Drop { child, .. }
            | Expr::Rename { child, .. }
            | Expr::StartsWith { child, .. }
            | Expr::EndsWith { child, .. }
            | Expr::Contains { child, .. } => child.referenced_sheets(out),
        }
    }
}

/// A unit test attached to a grammar file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnitTest {
    pub symbol: String,
    pub record: Record,
    /// Expect the record to be rejected instead.
    #[serde(default)]
    pub negative: bool,
}

/// Top-level grammar description, or one nested sheet of it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GrammarFile {
    pub symbols: BTreeMap<String, Expr>,
    pub namespaces: BTreeMap<String, GrammarFile>,
    pub default: Option<String>,
    pub options: GenOptions,
    pub tests: Vec<UnitTest>,
}

impl GrammarFile {
    /// Build the namespace tree. Sheets referenced but never defined are
    /// reported with a warning.
    pub fn to_namespace(&self) -> Result<Namespace, GrambleError> {
        let mut ns = self.build(&mut Vec::new())?;
        let mut sheets = Vec::new();
        self.collect_sheets(&mut sheets);
        for sheet in &sheets {
            ns.register(sheet);
        }
        for missing in ns.unresolved_references() {
            warn!("grammar refers to sheet '{missing}' which is not defined");
        }
        Ok(ns)
    }

    fn build(&self, path: &mut Vec<String>) -> Result<Namespace, GrambleError> {
        let mut ns = Namespace::new();
        for (name, expr) in &self.symbols {
            if name.contains('.') {
                return Err(GrambleError::InvalidGrammar(format!(
                    "symbol name '{name}' may not contain '.'"
                )));
            }
            ns.add_symbol(name, expr.to_state(path)?)?;
        }
        for (name, sheet) in &self.namespaces {
            path.push(name.clone());
            let child = sheet.build(path)?;
            path.pop();
            ns.add_child(name, child);
        }
        if let Some(default) = &self.default {
            if !self.symbols.contains_key(default) {
                return Err(GrambleError::InvalidGrammar(format!(
                    "default symbol '{default}' is not defined"
                )));
            }
            ns.set_default_symbol(default);
        }
        Ok(ns)
    }

    fn collect_sheets(&self, out: &mut Vec<String>) {
        for expr in self.symbols.values() {
            expr.referenced_sheets(out);
        }
        for sheet in self.namespaces.values() {
            sheet.collect_sheets(out);
        }
    }
}

/// A grammar file turned into something the tools can run.
pub struct Loaded {
    pub grammar: Grammar,
    pub options: GenOptions,
    pub default_symbol: Option<String>,
    pub tests: Vec<UnitTest>,
}

/// Parse a JSON grammar description.
pub fn parse_grammar(json: &str) -> Result<Loaded, String> {
    let file: GrammarFile =
        serde_json::from_str(json).map_err(|e| format!("invalid grammar file: {e}"))?;
    let namespace = file.to_namespace().map_err(|e| e.to_string())?;
    debug!(
        "loaded grammar: {} symbols, {} tests",
        namespace.qualified_symbols().len(),
        file.tests.len()
    );
    Ok(Loaded {
        grammar: Grammar::from_namespace(namespace),
        options: file.options,
        default_symbol: file.default,
        tests: file.tests,
    })
}

/// Read and parse the grammar file.
///
/// Search order:
/// 1. `path` argument (if provided)
/// 2. `GRAMBLE_GRAMMAR` environment variable
pub fn load_grammar(path: Option<&str>) -> Result<Loaded, String> {
    let path = match path {
        Some(p) => PathBuf::from(p),
        None => std::env::var(GRAMMAR_ENV).map(PathBuf::from).map_err(|_| {
            format!("no grammar file given (use --grammar PATH or set {GRAMMAR_ENV})")
        })?,
    };
    let json = std::fs::read_to_string(&path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_grammar(&json)
}

/// Flags shared by every tool.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommonArgs {
    pub grammar: Option<String>,
    pub symbol: Option<String>,
    pub count: Option<usize>,
    pub max_recursion: Option<usize>,
    pub max_chars: Option<usize>,
    pub seed: Option<u64>,
}

impl CommonArgs {
    /// Command-line values override the grammar file's options.
    pub fn apply(&self, mut opts: GenOptions) -> GenOptions {
        if let Some(n) = self.max_recursion {
            opts.max_recursion = n;
        }
        if let Some(n) = self.max_chars {
            opts.max_chars = n;
        }
        if let Some(seed) = self.seed {
            opts.seed = Some(seed);
        }
        opts
    }

    /// The `--symbol` flag, or the grammar's default symbol.
    pub fn symbol(&self, loaded: &Loaded) -> Result<String, String> {
        self.symbol
            .clone()
            .or_else(|| loaded.default_symbol.clone())
            .ok_or_else(|| "no symbol given and the grammar has no default".to_string())
    }
}

/// Parse the shared flags out of the command line.
///
/// Accepts `--flag=VALUE` and `--flag VALUE` forms. Returns the flags and
/// the remaining arguments.
pub fn parse_args(args: &[String]) -> Result<(CommonArgs, Vec<String>), String> {
    let mut common = CommonArgs::default();
    let mut remaining = Vec::new();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag, Some(value.to_string())),
            _ => (arg.as_str(), None),
        };
        let known = matches!(
            flag,
            "-g" | "--grammar" | "-s" | "--symbol" | "-n" | "--max-recursion" | "--max-chars" | "--seed"
        );
        if !known {
            remaining.push(arg.clone());
            continue;
        }
        let value = match inline {
            Some(v) => v,
            None => iter
                .next()
                .cloned()
                .ok_or_else(|| format!("{flag} requires a value"))?,
        };
        match flag {
            "-g" | "--grammar" => common.grammar = Some(value),
            "-s" | "--symbol" => common.symbol = Some(value),
            "-n" => common.count = Some(parse_number(flag, &value)?),
            "--max-recursion" => common.max_recursion = Some(parse_number(flag, &value)?),
            "--max-chars" => common.max_chars = Some(parse_number(flag, &value)?),
            _ => common.seed = Some(parse_number(flag, &value)?),
        }
    }

    Ok((common, remaining))
}

fn parse_number<T: std::str::FromStr>(flag: &str, value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("{flag} expects a number, got '{value}'"))
}

/// Parse `tape=text` assignments into a record.
pub fn parse_assignments(args: &[String]) -> Result<Record, String> {
    let mut record = Record::new();
    for arg in args {
        let (tape, text) = arg
            .split_once('=')
            .ok_or_else(|| format!("expected TAPE=TEXT, got '{arg}'"))?;
        record.insert(tape.to_string(), text.to_string());
    }
    Ok(record)
}

/// One record as a single line of JSON.
pub fn format_record(record: &Record) -> String {
    serde_json::to_string(record).unwrap_or_default()
}

/// Print an error message and exit with code 1.
pub fn fatal(msg: &str) -> ! {
    eprintln!("error: {msg}");
    process::exit(1);
}

/// Check if `--help` or `-h` is in the args.
pub fn wants_help(args: &[String]) -> bool {
    args.iter().any(|a| a == "--help" || a == "-h")
}
