//! Lexical scopes for ordinary identifiers and struct/union tags.
//!
//! Each `{`, parameter list and `for` header opens a frame. Lookups walk from
//! the innermost frame outwards, so inner declarations shadow outer ones.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

use crate::ast::ObjId;
use crate::ty::TypeRef;

/// What an ordinary identifier resolves to.
#[derive(Debug, Clone)]
pub enum VarScope {
  Var(ObjId),
  Typedef(TypeRef),
}

/// One frame. Ordinary bindings are kept in declaration order; `index` maps a
/// name to its latest entry.
#[derive(Debug, Default)]
struct Scope {
  vars: Vec<(String, VarScope)>,
  index: FxHashMap<String, usize>,
  tags: FxHashMap<String, TypeRef>,
}

impl Scope {
  fn get(&self, name: &str) -> Option<&VarScope> {
    self.index.get(name).map(|&i| &self.vars[i].1)
  }

  fn insert(&mut self, name: &str, binding: VarScope) {
    self.index.insert(name.to_string(), self.vars.len());
    self.vars.push((name.to_string(), binding));
  }
}

/// Returned when a name is declared twice in the same block, or defined twice
/// at file scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redefinition;

#[derive(Debug)]
pub struct ScopeStack {
  frames: Vec<Scope>,
  /// File-scope names that already have a definition (function body or
  /// variable storage). Later prototypes do not clear an entry.
  defined: FxHashSet<String>,
}

impl Default for ScopeStack {
  fn default() -> Self {
    Self::new()
  }
}

impl ScopeStack {
  /// A stack holding only the file scope.
  pub fn new() -> Self {
    Self {
      frames: vec![Scope::default()],
      defined: FxHashSet::default(),
    }
  }

  pub fn enter(&mut self) {
    self.frames.push(Scope::default());
  }

  pub fn leave(&mut self) {
    debug_assert!(self.frames.len() > 1, "file scope must never be popped");
    if let Some(frame) = self.frames.pop() {
      trace!(
        names = ?frame.vars.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>(),
        "left scope"
      );
    }
  }

  pub fn depth(&self) -> usize {
    self.frames.len()
  }

  fn is_file_scope(&self) -> bool {
    self.frames.len() == 1
  }

  fn innermost(&mut self) -> &mut Scope {
    let last = self.frames.len() - 1;
    &mut self.frames[last]
  }

  /// Names bound in the innermost frame, in declaration order.
  pub fn innermost_names(&self) -> impl Iterator<Item = &str> {
    self
      .frames
      .last()
      .into_iter()
      .flat_map(|frame| frame.vars.iter().map(|(name, _)| name.as_str()))
  }

  /// Bind an ordinary identifier in the innermost frame. File scope accepts
  /// re-declarations (prototypes followed by definitions); block scopes do not.
  fn bind(&mut self, name: &str, binding: VarScope) -> Result<(), Redefinition> {
    let file_scope = self.is_file_scope();
    let frame = self.innermost();
    if !file_scope && frame.index.contains_key(name) {
      return Err(Redefinition);
    }
    frame.insert(name, binding);
    Ok(())
  }

  pub fn bind_variable(&mut self, name: &str, obj: ObjId) -> Result<(), Redefinition> {
    self.bind(name, VarScope::Var(obj))
  }

  pub fn bind_typedef(&mut self, name: &str, ty: TypeRef) -> Result<(), Redefinition> {
    self.bind(name, VarScope::Typedef(ty))
  }

  /// Record that a file-scope name now has a definition.
  pub fn define(&mut self, name: &str) -> Result<(), Redefinition> {
    if self.defined.insert(name.to_string()) {
      Ok(())
    } else {
      Err(Redefinition)
    }
  }

  pub fn bind_tag(&mut self, name: &str, ty: TypeRef) {
    self.innermost().tags.insert(name.to_string(), ty);
  }

  pub fn lookup(&self, name: &str) -> Option<&VarScope> {
    self.frames.iter().rev().find_map(|frame| frame.get(name))
  }

  pub fn lookup_variable(&self, name: &str) -> Option<ObjId> {
    match self.lookup(name)? {
      VarScope::Var(obj) => Some(*obj),
      VarScope::Typedef(_) => None,
    }
  }

  pub fn lookup_typedef(&self, name: &str) -> Option<&TypeRef> {
    match self.lookup(name)? {
      VarScope::Typedef(ty) => Some(ty),
      VarScope::Var(_) => None,
    }
  }

  pub fn lookup_tag(&self, name: &str) -> Option<&TypeRef> {
    self.frames.iter().rev().find_map(|frame| frame.tags.get(name))
  }
}
