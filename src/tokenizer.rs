//! Lexical analysis: turns the raw source buffer into a vector of tokens.
//!
//! The tokenizer knows nothing about semantics beyond recognising
//! punctuators, keywords, identifiers and literals. Multi-character
//! punctuators are matched before single-character ones to avoid ambiguity.

use crate::SourceFile;
use crate::error::{CompileError, CompileResult};

/// Kinds of tokens recognised by the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
  Punctuator,
  Ident,
  Keyword,
  Num,
  Str,
  Eof,
}

/// Thin wrapper for lexical information needed by later stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
  pub kind: TokenKind,
  /// Numeric value of number and character literals.
  pub value: Option<i64>,
  /// Decoded bytes of a string literal, including the trailing NUL.
  pub str_value: Option<Vec<u8>>,
  pub loc: usize,
  pub len: usize,
}

impl Token {
  /// Convenience constructor to keep the `tokenize` loop readable.
  pub fn new(kind: TokenKind, loc: usize, len: usize) -> Self {
    Self {
      kind,
      value: None,
      str_value: None,
      loc,
      len,
    }
  }

  fn number(loc: usize, len: usize, value: i64) -> Self {
    Self {
      value: Some(value),
      ..Self::new(TokenKind::Num, loc, len)
    }
  }
}

pub const KEYWORDS: &[&str] = &[
  "return", "for", "else", "if", "sizeof", "int", "char", "long", "short", "void", "struct", "union",
  "while", "typedef",
];

const PUNCTUATORS: &[&str] = &["<=", ">=", "==", "!=", "->", "&&", "||"];

const SINGLE_PUNCTUATORS: &[u8] = b"+-*/%&|^!~<>=;,.(){}[]";

fn is_ident_start(c: u8) -> bool {
  c.is_ascii_alphabetic() || c == b'_'
}

fn is_ident_continue(c: u8) -> bool {
  c.is_ascii_alphanumeric() || c == b'_'
}

/// Lex the input into a flat vector of tokens terminated by an `Eof` marker.
pub fn tokenize(src: &SourceFile) -> CompileResult<Vec<Token>> {
  let input = src.contents.as_str();
  let bytes = input.as_bytes();
  let mut tokens = Vec::new();
  let mut i = 0;

  while i < bytes.len() {
    let c = bytes[i];

    if c.is_ascii_whitespace() {
      i += 1;
      continue;
    }

    if input[i..].starts_with("//") {
      i = input[i..].find('\n').map_or(bytes.len(), |n| i + n + 1);
      continue;
    }

    if input[i..].starts_with("/*") {
      let Some(end) = input[i + 2..].find("*/") else {
        return Err(CompileError::at(src, i, "unclosed block comment"));
      };
      i += 2 + end + 2;
      continue;
    }

    if c.is_ascii_digit() {
      let start = i;
      while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
      }
      let text = &input[start..i];
      let value = text
        .parse::<i64>()
        .map_err(|err| CompileError::at(src, start, format!("invalid number: {err}")))?;
      tokens.push(Token::number(start, i - start, value));
      continue;
    }

    if is_ident_start(c) {
      let start = i;
      while i < bytes.len() && is_ident_continue(bytes[i]) {
        i += 1;
      }
      let kind = if KEYWORDS.contains(&&input[start..i]) {
        TokenKind::Keyword
      } else {
        TokenKind::Ident
      };
      tokens.push(Token::new(kind, start, i - start));
      continue;
    }

    if c == b'"' {
      let token = read_string_literal(src, i)?;
      i += token.len;
      tokens.push(token);
      continue;
    }

    if c == b'\'' {
      let token = read_char_literal(src, i)?;
      i += token.len;
      tokens.push(token);
      continue;
    }

    if let Some(op) = PUNCTUATORS
      .iter()
      .find(|op| input[i..].starts_with(*op))
    {
      tokens.push(Token::new(TokenKind::Punctuator, i, op.len()));
      i += op.len();
      continue;
    }

    if SINGLE_PUNCTUATORS.contains(&c) {
      tokens.push(Token::new(TokenKind::Punctuator, i, 1));
      i += 1;
      continue;
    }

    let invalid_char = input[i..].chars().next().unwrap_or('\0');
    return Err(CompileError::at(
      src,
      i,
      format!("invalid token: '{invalid_char}'"),
    ));
  }

  tokens.push(Token::new(TokenKind::Eof, input.len(), 0));
  Ok(tokens)
}

/// Decode one escape sequence starting just after the backslash at `pos`.
/// Returns the decoded byte and the number of bytes consumed.
fn read_escape(bytes: &[u8], pos: usize) -> (u8, usize) {
  let c = bytes[pos];

  if (b'0'..=b'7').contains(&c) {
    let mut value: u32 = 0;
    let mut n = 0;
    while n < 3 && pos + n < bytes.len() && (b'0'..=b'7').contains(&bytes[pos + n]) {
      value = value * 8 + u32::from(bytes[pos + n] - b'0');
      n += 1;
    }
    return (value as u8, n);
  }

  if c == b'x' && pos + 1 < bytes.len() && bytes[pos + 1].is_ascii_hexdigit() {
    let mut value: u32 = 0;
    let mut n = 1;
    while pos + n < bytes.len() && bytes[pos + n].is_ascii_hexdigit() {
      let digit = char::from(bytes[pos + n]).to_digit(16).unwrap_or(0);
      value = value.wrapping_mul(16).wrapping_add(digit);
      n += 1;
    }
    return (value as u8, n);
  }

  let decoded = match c {
    b'a' => 0x07,
    b'b' => 0x08,
    b't' => b'\t',
    b'n' => b'\n',
    b'v' => 0x0b,
    b'f' => 0x0c,
    b'r' => b'\r',
    // GNU extension: ASCII escape.
    b'e' => 0x1b,
    other => other,
  };
  (decoded, 1)
}

fn read_string_literal(src: &SourceFile, start: usize) -> CompileResult<Token> {
  let bytes = src.contents.as_bytes();
  let mut decoded = Vec::new();
  let mut i = start + 1;

  loop {
    match bytes.get(i) {
      None | Some(b'\n') => {
        return Err(CompileError::at(src, start, "unclosed string literal"));
      }
      Some(b'"') => break,
      Some(b'\\') if i + 1 < bytes.len() => {
        let (byte, used) = read_escape(bytes, i + 1);
        decoded.push(byte);
        i += 1 + used;
      }
      Some(&byte) => {
        decoded.push(byte);
        i += 1;
      }
    }
  }

  decoded.push(0);
  Ok(Token {
    str_value: Some(decoded),
    ..Token::new(TokenKind::Str, start, i + 1 - start)
  })
}

fn read_char_literal(src: &SourceFile, start: usize) -> CompileResult<Token> {
  let bytes = src.contents.as_bytes();
  let mut i = start + 1;

  let value = match bytes.get(i) {
    None | Some(b'\n') | Some(b'\'') => {
      return Err(CompileError::at(src, start, "unclosed char literal"));
    }
    Some(b'\\') if i + 1 < bytes.len() => {
      let (byte, used) = read_escape(bytes, i + 1);
      i += 1 + used;
      byte
    }
    Some(&byte) => {
      i += 1;
      byte
    }
  };

  if bytes.get(i) != Some(&b'\'') {
    return Err(CompileError::at(src, start, "unclosed char literal"));
  }

  // `char` is signed on this target.
  Ok(Token::number(start, i + 1 - start, i64::from(value as i8)))
}

/// Return the slice from the source that produced this token.
pub fn token_text<'a>(token: &Token, source: &'a str) -> &'a str {
  let end = token.loc + token.len;
  &source[token.loc..end]
}

/// Human-friendly description used in diagnostics.
pub fn describe_token(token: Option<&Token>, source: &str) -> String {
  match token {
    Some(t) => match t.kind {
      TokenKind::Eof => "EOF".to_string(),
      _ => token_text(t, source).to_string(),
    },
    None => "EOF".to_string(),
  }
}
