//! Shared error utilities used across the compilation pipeline.
//!
//! Located diagnostics echo the offending source line, prefixed with the file
//! name and line number, and point at the offending byte with a caret.

use std::io;
use std::path::PathBuf;

use snafu::Snafu;

use crate::SourceFile;

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CompileError {
  #[snafu(display("{file}:{line}: {line_text}\n{marker} {message}"))]
  WithLocation {
    file: String,
    line: usize,
    line_text: String,
    marker: String,
    message: String,
  },

  #[snafu(display("internal error: {message}"))]
  Internal { message: String },

  #[snafu(display("cannot read {}: {source}", path.display()))]
  ReadSource { path: PathBuf, source: io::Error },

  #[snafu(display("cannot write {}: {source}", path.display()))]
  WriteOutput { path: PathBuf, source: io::Error },
}

impl CompileError {
  /// Construct an error anchored at a specific byte offset in the source.
  pub fn at(src: &SourceFile, loc: usize, message: impl Into<String>) -> Self {
    let text = src.contents.as_str();
    let loc = floor_char_boundary(text, loc.min(text.len()));

    let start = text[..loc].rfind('\n').map_or(0, |i| i + 1);
    let end = text[loc..].find('\n').map_or(text.len(), |i| loc + i);
    let line = text[..start].matches('\n').count() + 1;

    let prefix = format!("{}:{line}: ", src.name);
    let column = text[start..loc].chars().count();
    let marker = format!("{}^", " ".repeat(prefix.chars().count() + column));

    Self::WithLocation {
      file: src.name.clone(),
      line,
      line_text: text[start..end].to_string(),
      marker,
      message: message.into(),
    }
  }

  pub fn internal(message: impl Into<String>) -> Self {
    Self::Internal {
      message: message.into(),
    }
  }

  /// The bare diagnostic message, without location decoration.
  pub fn message(&self) -> String {
    match self {
      Self::WithLocation { message, .. } | Self::Internal { message } => message.clone(),
      other => other.to_string(),
    }
  }
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
  while idx > 0 && !text.is_char_boundary(idx) {
    idx -= 1;
  }
  idx
}
