// Nested symbol tables.
//
// Namespaces form a tree addressed by paths of sheet names. There are no
// parent pointers: the parent of a namespace is the prefix of its path, so
// lookups that fall back to enclosing scopes walk the path from the root.

use std::collections::BTreeSet;

use gramble_core::GrambleError;
use hashbrown::HashMap;

use crate::state::State;

/// Symbol table for one sheet plus the sheets nested in it.
#[derive(Clone, Debug, Default)]
pub struct Namespace {
    symbols: HashMap<String, State>,
    children: HashMap<String, Namespace>,
    default_symbol: Option<String>,
    pending: BTreeSet<String>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define `name` in this namespace.
    pub fn add_symbol(&mut self, name: &str, state: State) -> Result<(), GrambleError> {
        if self.symbols.contains_key(name) {
            return Err(GrambleError::Redefinition(name.to_string()));
        }
        self.symbols.insert(name.to_string(), state);
        Ok(())
    }

    pub fn symbol(&self, name: &str) -> Option<&State> {
        self.symbols.get(name)
    }

    /// Attach a nested namespace, replacing any previous one of that name.
    pub fn add_child(&mut self, name: &str, child: Namespace) {
        self.pending.remove(name);
        self.children.insert(name.to_string(), child);
    }

    pub fn child(&self, name: &str) -> Option<&Namespace> {
        self.children.get(name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Namespace> {
        self.children.get_mut(name)
    }

    /// The namespace at `path` below this one.
    pub fn at(&self, path: &[String]) -> Option<&Namespace> {
        let mut ns = self;
        for segment in path {
            ns = ns.children.get(segment)?;
        }
        Some(ns)
    }

    /// Symbol an unqualified reference to this namespace stands for.
    pub fn set_default_symbol(&mut self, name: &str) {
        self.default_symbol = Some(name.to_string());
    }

    pub fn default_symbol(&self) -> Option<&str> {
        self.default_symbol.as_deref()
    }

    /// Note that something refers to sheet `name`, which may not be loaded yet.
    pub fn register(&mut self, name: &str) {
        if !self.children.contains_key(name) {
            self.pending.insert(name.to_string());
        }
    }

    /// Registered sheet names that never got a namespace, sorted.
    pub fn unresolved_references(&self) -> Vec<String> {
        self.pending
            .iter()
            .filter(|name| !self.children.contains_key(name.as_str()))
            .cloned()
            .collect()
    }

    /// Resolve `name` as seen from the namespace at `scope`.
    ///
    /// Tries the namespace at `scope` first and then each enclosing one up to
    /// the root. Returns the fully qualified symbol name with its state; the
    /// qualified name is what recursion counters are keyed on.
    pub fn resolve(&self, scope: &[String], name: &str) -> Option<(String, State)> {
        (0..=scope.len()).rev().find_map(|depth| {
            let base = &scope[..depth];
            self.at(base)?.resolve_local(base, name)
        })
    }

    fn resolve_local(&self, base: &[String], name: &str) -> Option<(String, State)> {
        if let Some((first, rest)) = name.split_once('.') {
            let child = self.children.get(first)?;
            let mut path = base.to_vec();
            path.push(first.to_string());
            return child.resolve_local(&path, rest);
        }
        if let Some(state) = self.symbols.get(name) {
            return Some((qualify(base, name), state.clone()));
        }
        let child = self.children.get(name)?;
        let default = child.default_symbol.as_deref()?;
        let state = child.symbols.get(default)?;
        let mut path = base.to_vec();
        path.push(name.to_string());
        Some((qualify(&path, default), state.clone()))
    }

    /// Every symbol in this tree with its qualified name, sorted by name.
    pub fn qualified_symbols(&self) -> Vec<(String, State)> {
        let mut out = Vec::new();
        self.collect_symbols(&mut Vec::new(), &mut out);
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    fn collect_symbols(&self, path: &mut Vec<String>, out: &mut Vec<(String, State)>) {
        for (name, state) in &self.symbols {
            out.push((qualify(path, name), state.clone()));
        }
        for (name, child) in &self.children {
            path.push(name.clone());
            child.collect_symbols(path, out);
            path.pop();
        }
    }
}

fn qualify(path: &[String], name: &str) -> String {
    if path.is_empty() {
        return name.to_string();
    }
    format!("{}.{}", path.join("."), name)
}
