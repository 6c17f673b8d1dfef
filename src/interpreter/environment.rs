//! Chained lexical scopes stored in an arena.
//!
//! Scopes are addressed by generation-checked [`ScopeId`]s, so a stale id from
//! a released scope resolves to nothing instead of aliasing a newer scope.
//! Creating a child scope hands out an owned [`ScopeHandle`]; releasing it
//! consumes the handle, which makes double release unrepresentable.

use std::collections::BTreeMap;

use crate::error::{EvalError, EvalResult};

use super::value::Value;

/// Copyable address of a live (or formerly live) scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId {
    index: usize,
    generation: u32,
}

/// Ownership token for a child scope. Not `Clone`: whoever holds it must
/// eventually pass it to [`Environment::release`].
#[derive(Debug, PartialEq, Eq)]
pub struct ScopeHandle {
    id: ScopeId,
}

impl ScopeHandle {
    /// Address of the owned scope.
    pub fn id(&self) -> ScopeId {
        self.id
    }
}

/// How a scope participates in frame-bounded lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// Plain block scope; frame-bounded lookups continue through it.
    Block,
    /// Call-like scope (iteration body, input handler, root); frame-bounded
    /// lookups stop after it.
    Frame,
}

/// One step of a path below a binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathStep {
    /// Map member.
    Key(String),
    /// List position.
    Index(usize),
}

/// Location of a value: a binding plus a path into its contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Place {
    scope: ScopeId,
    name: String,
    path: Vec<PathStep>,
}

impl Place {
    /// Extend this place by one path step.
    pub fn child(&self, step: PathStep) -> Place {
        let mut path = self.path.clone();
        path.push(step);
        Place {
            scope: self.scope,
            name: self.name.clone(),
            path,
        }
    }

    /// Binding name at the root of this place.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable rendering used in diagnostics.
    pub fn describe(&self) -> String {
        let mut text = self.name.clone();
        for step in &self.path {
            match step {
                PathStep::Key(key) => {
                    text.push('.');
                    text.push_str(key);
                }
                PathStep::Index(idx) => text.push_str(&format!("[{}]", idx)),
            }
        }
        text
    }
}

/// Contents of a binding.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    /// Owned value.
    Value(Value),
    /// Reference to a value owned by another binding (typically a list element).
    Element(Place),
}

/// A bound name: its slot plus a mutability flag.
#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    slot: Slot,
    mutable: bool,
}

impl Symbol {
    /// Mutable binding holding `value`.
    pub fn mutable(value: Value) -> Self {
        Self {
            slot: Slot::Value(value),
            mutable: true,
        }
    }

    /// Immutable binding holding `value`.
    pub fn constant(value: Value) -> Self {
        Self {
            slot: Slot::Value(value),
            mutable: false,
        }
    }

    /// Binding that refers to the value at `place`.
    pub fn element(place: Place) -> Self {
        Self {
            slot: Slot::Element(place),
            mutable: true,
        }
    }

    /// Whether the binding accepts writes.
    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    /// Borrow the slot.
    pub fn slot(&self) -> &Slot {
        &self.slot
    }
}

#[derive(Debug)]
struct Scope {
    parent: Option<ScopeId>,
    kind: ScopeKind,
    bindings: BTreeMap<String, Symbol>,
    return_value: Option<Value>,
}

#[derive(Debug)]
struct Entry {
    generation: u32,
    scope: Option<Scope>,
}

// Bounds reference chasing; element references are canonical on creation so
// real chains are one hop deep.
const MAX_REFERENCE_DEPTH: usize = 32;

/// Arena of scopes rooted at a single frame scope.
#[derive(Debug)]
pub struct Environment {
    entries: Vec<Entry>,
    free: Vec<usize>,
    root: ScopeId,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    /// Create an environment holding only an empty root scope.
    pub fn new() -> Self {
        let root_scope = Scope {
            parent: None,
            kind: ScopeKind::Frame,
            bindings: BTreeMap::new(),
            return_value: None,
        };
        Self {
            entries: vec![Entry {
                generation: 0,
                scope: Some(root_scope),
            }],
            free: Vec::new(),
            root: ScopeId {
                index: 0,
                generation: 0,
            },
        }
    }

    /// The root scope, which lives as long as the environment.
    pub fn root(&self) -> ScopeId {
        self.root
    }

    /// Number of live scopes, root included.
    pub fn live_scopes(&self) -> usize {
        self.entries.iter().filter(|entry| entry.scope.is_some()).count()
    }

    fn scope(&self, id: ScopeId) -> Option<&Scope> {
        let entry = self.entries.get(id.index)?;
        if entry.generation != id.generation {
            return None;
        }
        entry.scope.as_ref()
    }

    fn scope_mut(&mut self, id: ScopeId) -> Option<&mut Scope> {
        let entry = self.entries.get_mut(id.index)?;
        if entry.generation != id.generation {
            return None;
        }
        entry.scope.as_mut()
    }

    /// Create a scope whose parent is `parent`.
    pub fn create_child(&mut self, parent: ScopeId, kind: ScopeKind) -> ScopeHandle {
        let scope = Scope {
            parent: Some(parent),
            kind,
            bindings: BTreeMap::new(),
            return_value: None,
        };
        let id = match self.free.pop() {
            Some(index) => {
                let entry = &mut self.entries[index];
                entry.scope = Some(scope);
                ScopeId {
                    index,
                    generation: entry.generation,
                }
            }
            None => {
                self.entries.push(Entry {
                    generation: 0,
                    scope: Some(scope),
                });
                ScopeId {
                    index: self.entries.len() - 1,
                    generation: 0,
                }
            }
        };
        ScopeHandle { id }
    }

    /// Destroy a scope created by [`Environment::create_child`].
    pub fn release(&mut self, handle: ScopeHandle) {
        let id = handle.id;
        if let Some(entry) = self.entries.get_mut(id.index) {
            if entry.generation == id.generation && entry.scope.take().is_some() {
                entry.generation = entry.generation.wrapping_add(1);
                self.free.push(id.index);
            }
        }
    }

    /// Insert or overwrite `name` in `scope` only.
    pub fn allocate(&mut self, scope: ScopeId, name: impl Into<String>, symbol: Symbol) {
        if let Some(target) = self.scope_mut(scope) {
            target.bindings.insert(name.into(), symbol);
        }
    }

    /// Whether `name` is bound directly in `scope`.
    pub fn contains(&self, scope: ScopeId, name: &str) -> bool {
        self.scope(scope)
            .is_some_and(|target| target.bindings.contains_key(name))
    }

    /// Remove `name` from `scope` if bound there.
    pub fn remove_binding(&mut self, scope: ScopeId, name: &str) -> Option<Symbol> {
        self.scope_mut(scope)?.bindings.remove(name)
    }

    /// Find `name` searching from `scope` through every enclosing scope to the root.
    pub fn find(&self, scope: ScopeId, name: &str) -> Option<(ScopeId, &Symbol)> {
        self.search(scope, name, false)
    }

    /// Find `name` searching from `scope` outwards, stopping after the nearest
    /// enclosing [`ScopeKind::Frame`] scope.
    pub fn find_in_frame(&self, scope: ScopeId, name: &str) -> Option<(ScopeId, &Symbol)> {
        self.search(scope, name, true)
    }

    fn search(&self, scope: ScopeId, name: &str, frame_only: bool) -> Option<(ScopeId, &Symbol)> {
        let mut cursor = Some(scope);
        while let Some(id) = cursor {
            let current = self.scope(id)?;
            if let Some(symbol) = current.bindings.get(name) {
                return Some((id, symbol));
            }
            if frame_only && current.kind == ScopeKind::Frame {
                return None;
            }
            cursor = current.parent;
        }
        None
    }

    /// Store a value in the return slot of `scope`.
    pub fn set_return(&mut self, scope: ScopeId, value: Value) {
        if let Some(target) = self.scope_mut(scope) {
            target.return_value = Some(value);
        }
    }

    /// Remove and return the value in the return slot of `scope` itself.
    pub fn take_return(&mut self, scope: ScopeId) -> Option<Value> {
        self.scope_mut(scope)?.return_value.take()
    }

    /// Nearest populated return slot from `scope` up to its frame boundary.
    pub fn return_value_in_frame(&self, scope: ScopeId) -> Option<&Value> {
        self.search_return(scope, true)
    }

    /// Nearest populated return slot from `scope` up to the root.
    pub fn return_value(&self, scope: ScopeId) -> Option<&Value> {
        self.search_return(scope, false)
    }

    fn search_return(&self, scope: ScopeId, frame_only: bool) -> Option<&Value> {
        let mut cursor = Some(scope);
        while let Some(id) = cursor {
            let current = self.scope(id)?;
            if let Some(value) = &current.return_value {
                return Some(value);
            }
            if frame_only && current.kind == ScopeKind::Frame {
                return None;
            }
            cursor = current.parent;
        }
        None
    }

    /// Place of the value `name` resolves to from `scope`, following element
    /// references.
    pub fn locate(&self, scope: ScopeId, name: &str) -> Option<Place> {
        let (owner, symbol) = self.find(scope, name)?;
        match &symbol.slot {
            Slot::Value(_) => Some(Place {
                scope: owner,
                name: name.to_string(),
                path: Vec::new(),
            }),
            Slot::Element(place) => self.canonical(place.clone()),
        }
    }

    /// Value visible as `name` from `scope`.
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<&Value> {
        let place = self.locate(scope, name)?;
        self.read(&place)
    }

    // Rewrite a place until its root binding owns a value.
    fn canonical(&self, mut place: Place) -> Option<Place> {
        for _ in 0..MAX_REFERENCE_DEPTH {
            let symbol = self.scope(place.scope)?.bindings.get(&place.name)?;
            match &symbol.slot {
                Slot::Value(_) => return Some(place),
                Slot::Element(inner) => {
                    let mut path = inner.path.clone();
                    path.extend(place.path);
                    place = Place {
                        scope: inner.scope,
                        name: inner.name.clone(),
                        path,
                    };
                }
            }
        }
        None
    }

    /// Borrow the value at `place`.
    pub fn read(&self, place: &Place) -> Option<&Value> {
        let place = self.canonical(place.clone())?;
        let symbol = self.scope(place.scope)?.bindings.get(&place.name)?;
        let Slot::Value(root) = &symbol.slot else {
            return None;
        };
        let mut value = root;
        for step in &place.path {
            value = match step {
                PathStep::Key(key) => value.get(key)?,
                PathStep::Index(idx) => value.at(*idx)?,
            };
        }
        Some(value)
    }

    /// Mutably borrow the value at `place`, refusing immutable bindings.
    pub fn read_mut(&mut self, place: &Place) -> EvalResult<&mut Value> {
        let canonical = self
            .canonical(place.clone())
            .ok_or_else(|| EvalError::Unresolved(place.describe()))?;
        let root = self.root_value_mut(&canonical)?;
        walk_mut(root, &canonical.path).ok_or_else(|| EvalError::Unresolved(place.describe()))
    }

    /// Store `value` at `place`. A missing final map key is inserted.
    pub fn write(&mut self, place: &Place, value: Value) -> EvalResult<()> {
        let canonical = self
            .canonical(place.clone())
            .ok_or_else(|| EvalError::Unresolved(place.describe()))?;
        let root = self.root_value_mut(&canonical)?;
        let Some((last, parents)) = canonical.path.split_last() else {
            *root = value;
            return Ok(());
        };
        let parent =
            walk_mut(root, parents).ok_or_else(|| EvalError::Unresolved(place.describe()))?;
        match (last, parent) {
            (PathStep::Key(key), Value::Map(map)) => {
                map.insert(key.clone(), value);
                Ok(())
            }
            (PathStep::Index(idx), Value::List(items)) if *idx < items.len() => {
                items[*idx] = value;
                Ok(())
            }
            (_, other) => Err(EvalError::TypeMismatch(format!(
                "cannot assign into {} at '{}'",
                other.kind(),
                place.describe()
            ))),
        }
    }

    /// Move the value at `place` out, leaving `Nil` behind.
    pub fn take(&mut self, place: &Place) -> EvalResult<Value> {
        Ok(std::mem::take(self.read_mut(place)?))
    }

    fn root_value_mut(&mut self, place: &Place) -> EvalResult<&mut Value> {
        let symbol = self
            .scope_mut(place.scope)
            .and_then(|scope| scope.bindings.get_mut(&place.name))
            .ok_or_else(|| EvalError::Unresolved(place.name.clone()))?;
        if !symbol.mutable {
            return Err(EvalError::ImmutableBinding(place.name.clone()));
        }
        match &mut symbol.slot {
            Slot::Value(value) => Ok(value),
            Slot::Element(_) => Err(EvalError::Unresolved(place.describe())),
        }
    }
}

fn walk_mut<'v>(mut value: &'v mut Value, path: &[PathStep]) -> Option<&'v mut Value> {
    for step in path {
        value = match step {
            PathStep::Key(key) => value.get_mut(key)?,
            PathStep::Index(idx) => value.at_mut(*idx)?,
        };
    }
    Some(value)
}
