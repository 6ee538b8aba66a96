use fivecc::{SourceFile, compile};
use pretty_assertions::assert_eq;

fn render(input: &str) -> String {
  compile(&SourceFile::new("t.c", input))
    .unwrap_err()
    .to_string()
}

fn message(input: &str) -> String {
  compile(&SourceFile::new("t.c", input))
    .unwrap_err()
    .message()
}

#[test]
fn caret_points_at_the_offending_token() {
  let expected = format!(
    "t.c:1: int main() {{ return x; }}\n{}^ undeclared variable 'x'",
    " ".repeat(27)
  );
  assert_eq!(render("int main() { return x; }"), expected);
}

#[test]
fn diagnostics_report_the_right_line() {
  let expected = format!(
    "t.c:2:   return 1 +;\n{}^ expected an expression, but got \";\"",
    " ".repeat(19)
  );
  assert_eq!(render("int main() {\n  return 1 +;\n}\n"), expected);
}

#[test]
fn lexical_errors() {
  assert_eq!(message("int main() { return 1 @ 2; }"), "invalid token: '@'");
  assert_eq!(message("char *s = \"oops;"), "unclosed string literal");
}

#[test]
fn missing_punctuation() {
  assert_eq!(
    message("int main() { return 1 }"),
    "expected \";\", but got \"}\""
  );
  assert_eq!(
    message("int main() { if 1) return 0; }"),
    "expected \"(\", but got \"1\""
  );
}

#[test]
fn scope_errors() {
  assert_eq!(
    message("int main() { { int y; } return y; }"),
    "undeclared variable 'y'"
  );
  assert_eq!(
    message("int main() { int a; int a; return 0; }"),
    "redefinition of 'a'"
  );
  assert_eq!(
    message("int main() { struct T *p; return 0; }"),
    "undefined struct"
  );
}

#[test]
fn type_errors() {
  assert_eq!(
    message("int main() { int *p; int *q; return p + q; }"),
    "invalid operands"
  );
  assert_eq!(
    message("int main() { int x; return *x; }"),
    "invalid pointer dereference"
  );
  assert_eq!(
    message("int main() { int a[2]; a = 0; return 0; }"),
    "not an lvalue"
  );
  assert_eq!(
    message("int main() { int x; return x.y; }"),
    "not a struct nor a union"
  );
  assert_eq!(
    message("int main() { struct { int a; } s; return s.b; }"),
    "no such member"
  );
}

#[test]
fn call_limits() {
  assert_eq!(
    message("int main() { return f(1, 2, 3, 4, 5, 6, 7); }"),
    "too many arguments"
  );
  assert_eq!(
    message("int f(int a, int b, int c, int d, int e, int g, int h) { return 0; }"),
    "too many parameters"
  );
}

#[test]
fn statement_expression_must_yield_a_value() {
  assert_eq!(
    message("int main() { return ({ int x; }); }"),
    "statement expression returning void is not supported"
  );
}

#[test]
fn file_scope_names_are_defined_once() {
  assert_eq!(message("int x; int x; int main() { return 0; }"), "redefinition of 'x'");
  assert_eq!(
    message("int f() { return 1; } int f(); int f() { return 2; }"),
    "redefinition of 'f'"
  );
  assert_eq!(message("int g; int g() { return 0; }"), "redefinition of 'g'");
  assert!(compile(&SourceFile::new("t.c", "int f(); int f(); int f() { return 0; }")).is_ok());
}

#[test]
fn oversized_types_are_reported() {
  assert_eq!(
    message("int main() { int a[4611686018427387904]; return 0; }"),
    "array too large"
  );
  assert_eq!(
    message("int main() { struct { char a[9223372036854775807]; int b; } s; return 0; }"),
    "struct too large"
  );
  assert_eq!(
    message("int main() { char a[3000000000]; return 0; }"),
    "stack frame too large"
  );
}

#[test]
fn only_functions_can_be_called() {
  assert_eq!(message("int main() { int x; return x(); }"), "not a function");
  assert_eq!(message("int g; int main() { return g(1); }"), "not a function");
}
