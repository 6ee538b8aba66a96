//! Crate root: wires together the compilation pipeline.
//!
//! - `tokenizer` turns source text into a flat token vector.
//! - `parser` builds the node/object arenas, resolving scopes as it goes.
//! - `typing` annotates expression nodes with their result types.
//! - `codegen` lays out stack frames and lowers the program to x86-64 AT&T
//!   assembly.
//! - `error` holds the diagnostic type shared by every stage.

pub mod ast;
pub mod codegen;
pub mod error;
pub mod parser;
pub mod scope;
pub mod tokenizer;
pub mod ty;

mod typing;

use tracing::debug;

pub use error::{CompileError, CompileResult};

/// A named chunk of source text. The name only appears in diagnostics.
#[derive(Debug, Clone)]
pub struct SourceFile {
  pub name: String,
  pub contents: String,
}

impl SourceFile {
  pub fn new(name: impl Into<String>, contents: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      contents: contents.into(),
    }
  }
}

/// Compile a whole translation unit into AT&T assembly.
pub fn compile(src: &SourceFile) -> CompileResult<String> {
  let tokens = tokenizer::tokenize(src)?;
  debug!(file = %src.name, tokens = tokens.len(), "tokenized");

  let mut program = parser::parse(tokens, src)?;
  debug!(
    nodes = program.nodes.len(),
    objects = program.objs.len(),
    "parsed"
  );

  codegen::generate(&mut program, src)
}
