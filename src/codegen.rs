//! Code generation: lower the typed program into AT&T x86-64 assembly.
//!
//! The emitter is a simple stack machine. Every expression leaves its value in
//! `%rax`; binary operators park their right operand on the stack while the
//! left one is computed. `depth` counts outstanding pushes and must be back
//! where it started once a statement has been emitted. Locals live in the
//! stack frame and are addressed relative to `%rbp`.

use tracing::{debug, trace};

use crate::SourceFile;
use crate::ast::{BinaryOp, Function, NodeId, NodeKind, ObjId, ObjKind, Program};
use crate::error::{CompileError, CompileResult};
use crate::parser::MAX_ARGS;
use crate::ty::{Type, TypeKind, TypeRef, align_to};

const ARGREG8: [&str; MAX_ARGS] = ["%dil", "%sil", "%dl", "%cl", "%r8b", "%r9b"];
const ARGREG16: [&str; MAX_ARGS] = ["%di", "%si", "%dx", "%cx", "%r8w", "%r9w"];
const ARGREG32: [&str; MAX_ARGS] = ["%edi", "%esi", "%edx", "%ecx", "%r8d", "%r9d"];
const ARGREG64: [&str; MAX_ARGS] = ["%rdi", "%rsi", "%rdx", "%rcx", "%r8", "%r9"];

/// Frame layout, then emission of data and text sections.
pub fn generate(program: &mut Program, src: &SourceFile) -> CompileResult<String> {
  assign_lvar_offsets(program, src)?;

  let mut codegen = CodeGen::new(program, src);
  codegen.emit_data();
  codegen.emit_text()?;
  Ok(codegen.asm)
}

/// Give every local a negative `%rbp` offset and size each frame.
///
/// Offsets are encoded as 32-bit displacements, so a frame beyond `i32::MAX`
/// bytes is rejected.
pub fn assign_lvar_offsets(program: &mut Program, src: &SourceFile) -> CompileResult<()> {
  let functions: Vec<ObjId> = program.functions().map(|(id, _)| id).collect();

  for id in functions {
    let (locals, body) = match program.obj(id).as_function() {
      Some(func) => (func.locals.clone(), func.body),
      None => continue,
    };
    let too_large = |program: &Program| match body {
      Some(body) => CompileError::at(src, program.node(body).loc, "stack frame too large"),
      None => CompileError::internal("stack frame too large"),
    };

    let mut offset: i64 = 0;
    for local in locals {
      let ty = program.obj(local).ty.clone();
      offset = match offset.checked_add(ty.size).and_then(|end| align_to(end, ty.align)) {
        Some(end) if end <= i64::from(i32::MAX) => end,
        _ => return Err(too_large(program)),
      };
      program.obj_mut(local).kind = ObjKind::Local { offset: -offset };
    }

    let stack_size = align_to(offset, 16)
      .filter(|&size| size <= i64::from(i32::MAX))
      .ok_or_else(|| too_large(program))?;
    if let ObjKind::Function(func) = &mut program.obj_mut(id).kind {
      func.stack_size = stack_size;
    }
  }
  Ok(())
}

struct CodeGen<'a> {
  program: &'a Program,
  src: &'a SourceFile,
  asm: String,
  /// Values currently pushed on the machine stack.
  depth: usize,
  /// Label counter shared by every construct in the translation unit.
  labels: usize,
  current_fn: Option<ObjId>,
}

impl<'a> CodeGen<'a> {
  fn new(program: &'a Program, src: &'a SourceFile) -> Self {
    Self {
      program,
      src,
      asm: String::new(),
      depth: 0,
      labels: 0,
      current_fn: None,
    }
  }

  fn emit(&mut self, line: impl AsRef<str>) {
    self.asm.push_str("  ");
    self.asm.push_str(line.as_ref());
    self.asm.push('\n');
  }

  fn label(&mut self, name: impl AsRef<str>) {
    self.asm.push_str(name.as_ref());
    self.asm.push_str(":\n");
  }

  fn next_label(&mut self) -> usize {
    self.labels += 1;
    trace!(label = self.labels, "allocated label");
    self.labels
  }

  fn push(&mut self) {
    self.emit("push %rax");
    self.depth += 1;
  }

  fn pop(&mut self, reg: &str) {
    self.emit(format!("pop {reg}"));
    self.depth -= 1;
  }

  fn error(&self, id: NodeId, message: &str) -> CompileError {
    CompileError::at(self.src, self.program.node(id).loc, message)
  }

  fn ty(&self, id: NodeId) -> CompileResult<&'a TypeRef> {
    self
      .program
      .ty(id)
      .ok_or_else(|| CompileError::internal("code generation reached an untyped node"))
  }

  fn current_name(&self) -> &'a str {
    self
      .current_fn
      .map_or("", |id| self.program.obj(id).name.as_str())
  }

  // ----------------------------------------------------------------------
  // Expressions

  /// Load the value at the address in `%rax`, sign-extending narrow types.
  fn load(&mut self, ty: &Type) {
    // Aggregates, arrays and functions are used through their address.
    if ty.is_array() || ty.is_aggregate() || ty.is_func() {
      return;
    }

    match ty.size {
      1 => self.emit("movsbq (%rax), %rax"),
      2 => self.emit("movswq (%rax), %rax"),
      4 => self.emit("movslq (%rax), %rax"),
      _ => self.emit("mov (%rax), %rax"),
    }
  }

  /// Store `%rax` to the address on top of the stack.
  fn store(&mut self, ty: &Type) {
    self.pop("%rdi");

    if ty.is_aggregate() {
      for i in 0..ty.size {
        self.emit(format!("mov {i}(%rax), %r8b"));
        self.emit(format!("mov %r8b, {i}(%rdi)"));
      }
      return;
    }

    // %rax ends up holding the stored value at the target's width.
    match ty.size {
      1 => {
        self.emit("mov %al, (%rdi)");
        self.emit("movsbq %al, %rax");
      }
      2 => {
        self.emit("mov %ax, (%rdi)");
        self.emit("movswq %ax, %rax");
      }
      4 => {
        self.emit("mov %eax, (%rdi)");
        self.emit("movslq %eax, %rax");
      }
      _ => self.emit("mov %rax, (%rdi)"),
    }
  }

  /// Compute the address of an lvalue into `%rax`.
  fn gen_addr(&mut self, id: NodeId) -> CompileResult<()> {
    let program = self.program;
    match &program.node(id).kind {
      NodeKind::Var(obj) => {
        let obj = program.obj(*obj);
        match &obj.kind {
          ObjKind::Local { offset } => self.emit(format!("lea {offset}(%rbp), %rax")),
          _ => self.emit(format!("lea {}(%rip), %rax", obj.name)),
        }
        Ok(())
      }
      NodeKind::Deref(operand) => self.gen_expr(*operand),
      NodeKind::Comma { lhs, rhs } => {
        self.gen_expr(*lhs)?;
        self.gen_addr(*rhs)
      }
      NodeKind::Member { base, member } => {
        self.gen_addr(*base)?;
        self.emit(format!("add ${}, %rax", member.offset));
        Ok(())
      }
      _ => Err(self.error(id, "not an lvalue")),
    }
  }

  /// Emit code leaving the value of `id` in `%rax`.
  fn gen_expr(&mut self, id: NodeId) -> CompileResult<()> {
    let program = self.program;
    match &program.node(id).kind {
      NodeKind::Num(value) => {
        self.emit(format!("mov ${value}, %rax"));
        Ok(())
      }
      NodeKind::Neg(operand) => {
        self.gen_expr(*operand)?;
        self.emit("neg %rax");
        Ok(())
      }
      NodeKind::Not(operand) => {
        self.gen_expr(*operand)?;
        self.emit("cmp $0, %rax");
        self.emit("sete %al");
        self.emit("movzb %al, %rax");
        Ok(())
      }
      NodeKind::BitNot(operand) => {
        self.gen_expr(*operand)?;
        self.emit("not %rax");
        Ok(())
      }
      NodeKind::Var(_) | NodeKind::Member { .. } => {
        self.gen_addr(id)?;
        self.load(self.ty(id)?);
        Ok(())
      }
      NodeKind::Deref(operand) => {
        self.gen_expr(*operand)?;
        self.load(self.ty(id)?);
        Ok(())
      }
      NodeKind::Addr(operand) => self.gen_addr(*operand),
      NodeKind::Assign { lhs, rhs } => {
        self.gen_addr(*lhs)?;
        self.push();
        self.gen_expr(*rhs)?;
        self.store(self.ty(id)?);
        Ok(())
      }
      NodeKind::Comma { lhs, rhs } => {
        self.gen_expr(*lhs)?;
        self.gen_expr(*rhs)
      }
      NodeKind::StmtExpr(body) => {
        for &stmt in body {
          self.gen_stmt(stmt)?;
        }
        Ok(())
      }
      NodeKind::LogAnd { lhs, rhs } => {
        let c = self.next_label();
        self.gen_expr(*lhs)?;
        self.emit("cmp $0, %rax");
        self.emit(format!("je .L.false.{c}"));
        self.gen_expr(*rhs)?;
        self.emit("cmp $0, %rax");
        self.emit(format!("je .L.false.{c}"));
        self.emit("mov $1, %rax");
        self.emit(format!("jmp .L.end.{c}"));
        self.label(format!(".L.false.{c}"));
        self.emit("mov $0, %rax");
        self.label(format!(".L.end.{c}"));
        Ok(())
      }
      NodeKind::LogOr { lhs, rhs } => {
        let c = self.next_label();
        self.gen_expr(*lhs)?;
        self.emit("cmp $0, %rax");
        self.emit(format!("jne .L.true.{c}"));
        self.gen_expr(*rhs)?;
        self.emit("cmp $0, %rax");
        self.emit(format!("jne .L.true.{c}"));
        self.emit("mov $0, %rax");
        self.emit(format!("jmp .L.end.{c}"));
        self.label(format!(".L.true.{c}"));
        self.emit("mov $1, %rax");
        self.label(format!(".L.end.{c}"));
        Ok(())
      }
      NodeKind::Call { name, args, .. } => self.gen_call(id, name, args),
      NodeKind::Binary { op, lhs, rhs } => self.gen_binary(*op, *lhs, *rhs),
      NodeKind::ExprStmt(_)
      | NodeKind::Return(_)
      | NodeKind::Block(_)
      | NodeKind::If { .. }
      | NodeKind::For { .. } => Err(self.error(id, "invalid expression")),
    }
  }

  fn gen_call(&mut self, id: NodeId, name: &str, args: &[NodeId]) -> CompileResult<()> {
    if args.len() > MAX_ARGS {
      return Err(self.error(id, "too many arguments"));
    }

    for &arg in args {
      if self.ty(arg)?.is_aggregate() {
        return Err(self.error(arg, "passing struct or union by value is not supported"));
      }
      self.gen_expr(arg)?;
      self.push();
    }

    for reg in ARGREG64[..args.len()].iter().rev() {
      self.pop(reg);
    }

    // Each push is 8 bytes; keep %rsp 16-byte aligned at the call.
    let misaligned = self.depth % 2 == 1;
    if misaligned {
      self.emit("sub $8, %rsp");
    }
    self.emit("mov $0, %rax");
    self.emit(format!("call {name}"));
    if misaligned {
      self.emit("add $8, %rsp");
    }

    // The callee only defines the low bits of narrow return values.
    match self.ty(id)?.kind {
      TypeKind::Char => self.emit("movsbq %al, %rax"),
      TypeKind::Short => self.emit("movswq %ax, %rax"),
      TypeKind::Int => self.emit("movslq %eax, %rax"),
      _ => {}
    }
    Ok(())
  }

  fn gen_binary(&mut self, op: BinaryOp, lhs: NodeId, rhs: NodeId) -> CompileResult<()> {
    self.gen_expr(rhs)?;
    self.push();
    self.gen_expr(lhs)?;
    self.pop("%rdi");

    let lhs_ty = self.ty(lhs)?;
    let wide = lhs_ty.base().is_some() || lhs_ty.size == 8;
    let (ax, di, dx) = if wide {
      ("%rax", "%rdi", "%rdx")
    } else {
      ("%eax", "%edi", "%edx")
    };

    match op {
      BinaryOp::Add => self.emit(format!("add {di}, {ax}")),
      BinaryOp::Sub => self.emit(format!("sub {di}, {ax}")),
      BinaryOp::Mul => self.emit(format!("imul {di}, {ax}")),
      BinaryOp::Div | BinaryOp::Mod => {
        self.emit(if wide { "cqo" } else { "cdq" });
        self.emit(format!("idiv {di}"));
        if op == BinaryOp::Mod {
          self.emit(format!("mov {dx}, {ax}"));
        }
      }
      BinaryOp::BitAnd => self.emit(format!("and {di}, {ax}")),
      BinaryOp::BitOr => self.emit(format!("or {di}, {ax}")),
      BinaryOp::BitXor => self.emit(format!("xor {di}, {ax}")),
      BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le => {
        self.emit(format!("cmp {di}, {ax}"));
        let set = match op {
          BinaryOp::Eq => "sete",
          BinaryOp::Ne => "setne",
          BinaryOp::Lt => "setl",
          _ => "setle",
        };
        self.emit(format!("{set} %al"));
        self.emit("movzb %al, %rax");
        return Ok(());
      }
    }

    // 32-bit results zero the upper half; sign-extend so %rax holds the value.
    if !wide {
      self.emit("movslq %eax, %rax");
    }
    Ok(())
  }

  // ----------------------------------------------------------------------
  // Statements

  fn gen_stmt(&mut self, id: NodeId) -> CompileResult<()> {
    let depth = self.depth;
    self.gen_stmt_inner(id)?;
    if self.depth != depth {
      return Err(CompileError::internal(format!(
        "unbalanced stack in {}: depth {} after statement, expected {depth}",
        self.current_name(),
        self.depth
      )));
    }
    Ok(())
  }

  fn gen_stmt_inner(&mut self, id: NodeId) -> CompileResult<()> {
    let program = self.program;
    match &program.node(id).kind {
      NodeKind::ExprStmt(expr) => self.gen_expr(*expr),
      NodeKind::Return(expr) => {
        self.gen_expr(*expr)?;
        let name = self.current_name();
        self.emit(format!("jmp .L.return.{name}"));
        Ok(())
      }
      NodeKind::Block(body) => {
        for &stmt in body {
          self.gen_stmt(stmt)?;
        }
        Ok(())
      }
      NodeKind::If { cond, then, els } => {
        let c = self.next_label();
        self.gen_expr(*cond)?;
        self.emit("cmp $0, %rax");
        self.emit(format!("je .L.else.{c}"));
        self.gen_stmt(*then)?;
        self.emit(format!("jmp .L.end.{c}"));
        self.label(format!(".L.else.{c}"));
        if let Some(els) = els {
          self.gen_stmt(*els)?;
        }
        self.label(format!(".L.end.{c}"));
        Ok(())
      }
      NodeKind::For {
        init,
        cond,
        inc,
        body,
      } => {
        let c = self.next_label();
        if let Some(init) = init {
          self.gen_stmt(*init)?;
        }
        self.label(format!(".L.begin.{c}"));
        if let Some(cond) = cond {
          self.gen_expr(*cond)?;
          self.emit("cmp $0, %rax");
          self.emit(format!("je .L.end.{c}"));
        }
        self.gen_stmt(*body)?;
        if let Some(inc) = inc {
          self.gen_expr(*inc)?;
        }
        self.emit(format!("jmp .L.begin.{c}"));
        self.label(format!(".L.end.{c}"));
        Ok(())
      }
      _ => Err(self.error(id, "invalid statement")),
    }
  }

  // ----------------------------------------------------------------------
  // Top level

  fn emit_data(&mut self) {
    let program = self.program;
    for &id in &program.globals {
      let obj = program.obj(id);
      let ObjKind::Global {
        init_data,
        is_anonymous,
      } = &obj.kind
      else {
        continue;
      };

      self.emit(".data");
      if !is_anonymous {
        self.emit(format!(".globl {}", obj.name));
      }
      self.emit(format!(".align {}", obj.ty.align));
      self.label(&obj.name);

      match init_data {
        Some(bytes) => {
          for byte in bytes {
            self.emit(format!(".byte {byte}"));
          }
        }
        None => self.emit(format!(".zero {}", obj.ty.size)),
      }
    }
  }

  fn emit_text(&mut self) -> CompileResult<()> {
    let program = self.program;
    for (id, func) in program.functions() {
      if !func.is_definition {
        continue;
      }
      self.emit_function(id, func)?;
    }
    Ok(())
  }

  fn emit_function(&mut self, id: ObjId, func: &'a Function) -> CompileResult<()> {
    let program = self.program;
    let name = program.obj(id).name.as_str();
    debug!(function = name, stack_size = func.stack_size, "emitting function");

    self.current_fn = Some(id);
    self.emit(format!(".globl {name}"));
    self.emit(".text");
    self.label(name);

    // Prologue
    self.emit("push %rbp");
    self.emit("mov %rsp, %rbp");
    if func.stack_size > 0 {
      self.emit(format!("sub ${}, %rsp", func.stack_size));
    }

    // Spill register arguments into their stack slots.
    for (i, &param) in func.params.iter().enumerate() {
      let obj = program.obj(param);
      let ObjKind::Local { offset } = obj.kind else {
        return Err(CompileError::internal(format!(
          "parameter {} of {name} is not a local",
          obj.name
        )));
      };
      let reg = match obj.ty.size {
        1 => ARGREG8[i],
        2 => ARGREG16[i],
        4 => ARGREG32[i],
        _ => ARGREG64[i],
      };
      self.emit(format!("mov {reg}, {offset}(%rbp)"));
    }

    if let Some(body) = func.body {
      self.gen_stmt(body)?;
    }
    if self.depth != 0 {
      return Err(CompileError::internal(format!(
        "unbalanced stack at the end of {name}"
      )));
    }

    // Falling off the end of main returns 0.
    if name == "main" {
      self.emit("mov $0, %rax");
    }

    // Epilogue
    self.label(format!(".L.return.{name}"));
    self.emit("mov %rbp, %rsp");
    self.emit("pop %rbp");
    self.emit("ret");

    self.current_fn = None;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::parser::parse;
  use crate::tokenizer::tokenize;
  use pretty_assertions::assert_eq;

  fn compile_program(input: &str) -> (Program, CompileResult<String>) {
    let src = SourceFile::new("test.c", input);
    let tokens = tokenize(&src).unwrap();
    let mut program = parse(tokens, &src).unwrap();
    let asm = generate(&mut program, &src);
    (program, asm)
  }

  fn asm(input: &str) -> String {
    compile_program(input).1.unwrap()
  }

  fn local_offsets(program: &Program, name: &str) -> Vec<i64> {
    let (_, func) = program
      .functions()
      .find(|(id, f)| program.obj(*id).name == name && f.is_definition)
      .unwrap();
    func
      .locals
      .iter()
      .map(|&id| match program.obj(id).kind {
        ObjKind::Local { offset } => offset,
        _ => panic!("not a local"),
      })
      .collect()
  }

  #[test]
  fn frame_layout_aligns_each_local() {
    let (program, asm) = compile_program("int main() { char c; int i; long l; char s[3]; return 0; }");
    asm.unwrap();
    assert_eq!(local_offsets(&program, "main"), [-1, -8, -16, -19]);
    let (_, main) = program.functions().next().unwrap();
    assert_eq!(main.stack_size, 32);
  }

  #[test]
  fn prologue_and_epilogue_frame_the_body() {
    let asm = asm("int main() { return 42; }");
    assert!(asm.contains("main:\n  push %rbp\n  mov %rsp, %rbp\n"));
    assert!(asm.contains("  mov $42, %rax\n  jmp .L.return.main\n"));
    assert!(asm.ends_with(".L.return.main:\n  mov %rbp, %rsp\n  pop %rbp\n  ret\n"));
  }

  #[test]
  fn parameters_are_spilled_with_their_width() {
    let asm = asm("int f(char a, short b, int c, long d) { return c; }");
    assert!(asm.contains("mov %dil, -1(%rbp)"));
    assert!(asm.contains("mov %si, -4(%rbp)"));
    assert!(asm.contains("mov %edx, -8(%rbp)"));
    assert!(asm.contains("mov %rcx, -16(%rbp)"));
  }

  #[test]
  fn call_arguments_fill_registers_in_order() {
    let asm = asm("int main() { return add(1, 2, 3); }");
    let pops: Vec<&str> = asm
      .lines()
      .map(str::trim)
      .filter(|l| l.starts_with("pop") && *l != "pop %rbp")
      .collect();
    assert_eq!(pops, ["pop %rdx", "pop %rsi", "pop %rdi"]);
    assert!(asm.contains("call add"));
  }

  #[test]
  fn call_with_odd_depth_realigns_the_stack() {
    let asm = asm("int main() { return f() + 1; }");
    assert!(asm.contains("  sub $8, %rsp\n  mov $0, %rax\n  call f\n  add $8, %rsp\n"));
  }

  #[test]
  fn width_follows_lhs_type() {
    let asm = asm("int main() { long a; int b; a + 1; b + 1; return 0; }");
    assert!(asm.contains("add %rdi, %rax"));
    assert!(asm.contains("add %edi, %eax"));
  }

  #[test]
  fn modulo_takes_the_remainder() {
    let asm = asm("int main() { return 7 % 3; }");
    assert!(asm.contains("  cdq\n  idiv %edi\n  mov %edx, %eax\n"));
  }

  #[test]
  fn struct_assignment_copies_bytes() {
    let asm = asm("int main() { struct { int a; char b; } x, y; x = y; return 0; }");
    let copies = asm.lines().filter(|l| l.contains("%r8b, ")).count();
    assert_eq!(copies, 8);
  }

  #[test]
  fn narrow_stores_leave_the_truncated_value() {
    let asm = asm("int main() { char c; short s; int i; return (c = 257) + (s = 1) + (i = 2); }");
    assert!(asm.contains("  mov %al, (%rdi)\n  movsbq %al, %rax\n"));
    assert!(asm.contains("  mov %ax, (%rdi)\n  movswq %ax, %rax\n"));
    assert!(asm.contains("  mov %eax, (%rdi)\n  movslq %eax, %rax\n"));
  }

  #[test]
  fn oversized_frames_are_rejected() {
    let (_, asm) = compile_program("int main() { char a[3000000000]; return 0; }");
    assert_eq!(asm.unwrap_err().message(), "stack frame too large");
  }

  #[test]
  fn labels_are_unique_across_constructs() {
    let asm = asm(
      "int main() { int i; for (i = 0; i < 3; i = i + 1) { if (i) i; else i; } while (i) i = 0; return 0; }",
    );
    let mut labels: Vec<&str> = asm.lines().filter(|l| l.starts_with(".L.")).collect();
    let total = labels.len();
    labels.sort_unstable();
    labels.dedup();
    assert_eq!(labels.len(), total);
  }

  #[test]
  fn globals_become_data() {
    let asm = asm("int g; char *s() { return \"ab\"; }");
    assert!(asm.contains("  .globl g\n  .align 4\ng:\n  .zero 4\n"));
    assert!(asm.contains(".L..0:\n  .byte 97\n  .byte 98\n  .byte 0\n"));
    assert!(!asm.contains(".globl .L..0"));
  }

  #[test]
  fn function_declarators_in_variable_lists_emit_no_storage() {
    let asm = asm("int g, h(); int main() { long k(int); return h() + k(1); }");
    assert!(asm.contains("\ng:\n  .zero 4\n"));
    assert!(!asm.contains("\nh:"));
    assert!(!asm.contains("\nk:"));
    assert!(asm.contains("  call h\n"));
    assert!(asm.contains("  call k\n"));
  }

  #[test]
  fn address_of_non_lvalue_is_rejected() {
    let (_, asm) = compile_program("int main() { return &1; }");
    assert_eq!(asm.unwrap_err().message(), "not an lvalue");
  }

  /// Generate `main`'s top-level statements one at a time and record the
  /// stack depth left after each.
  fn depth_after_each_statement(input: &str) -> CompileResult<Vec<usize>> {
    let src = SourceFile::new("test.c", input);
    let tokens = tokenize(&src)?;
    let mut program = parse(tokens, &src)?;
    assign_lvar_offsets(&mut program, &src)?;

    let (id, main) = program
      .functions()
      .find(|(id, f)| program.obj(*id).name == "main" && f.is_definition)
      .ok_or_else(|| CompileError::internal("no main"))?;
    let Some(NodeKind::Block(body)) = main.body.map(|body| &program.node(body).kind) else {
      return Err(CompileError::internal("function body is not a block"));
    };

    let mut codegen = CodeGen::new(&program, &src);
    codegen.current_fn = Some(id);
    let mut depths = Vec::with_capacity(body.len());
    for &stmt in body {
      codegen.gen_stmt(stmt)?;
      depths.push(codegen.depth);
    }
    Ok(depths)
  }

  #[test]
  fn depth_returns_to_zero_after_each_statement() {
    let depths = depth_after_each_statement(
      "int main() { int a[2]; int *p = a; a[1] = (1 + 2) * (3 - (4 / (5 + p[0]))); return ({ 1 + 2; }) + a[1]; }",
    )
    .unwrap();
    assert_eq!(depths, [0, 0, 0, 0]);
  }

  mod stack_depth {
    use super::depth_after_each_statement;
    use proptest::prelude::*;

    const BINARY_OPS: &[&str] = &[
      "+", "-", "*", "/", "%", "<", "<=", ">", ">=", "==", "!=", "&", "|", "^", "&&", "||",
    ];

    fn expr() -> impl Strategy<Value = String> {
      let leaf = prop_oneof![
        (0i64..1000).prop_map(|n| n.to_string()),
        prop::sample::select(vec!["a", "b", "c", "*p", "arr[1]", "s.x"]).prop_map(String::from),
      ];

      leaf.prop_recursive(4, 32, 2, |inner| {
        prop_oneof![
          (inner.clone(), prop::sample::select(BINARY_OPS), inner.clone())
            .prop_map(|(lhs, op, rhs)| format!("({lhs} {op} {rhs})")),
          inner.clone().prop_map(|e| format!("-({e})")),
          inner.clone().prop_map(|e| format!("!({e})")),
          (inner.clone(), inner.clone()).prop_map(|(x, y)| format!("add({x}, {y})")),
          (prop::sample::select(vec!["a", "b", "c", "arr[2]"]), inner.clone())
            .prop_map(|(var, e)| format!("({var} = {e})")),
          inner.prop_map(|e| format!("({{ {e}; }})")),
        ]
      })
    }

    fn stmt() -> impl Strategy<Value = String> {
      let simple = prop_oneof![
        expr().prop_map(|e| format!("{e};")),
        expr().prop_map(|e| format!("return {e};")),
      ];

      simple.prop_recursive(3, 16, 3, |inner| {
        prop_oneof![
          (expr(), inner.clone(), inner.clone())
            .prop_map(|(cond, then, els)| format!("if ({cond}) {then} else {els}")),
          (expr(), inner.clone()).prop_map(|(cond, body)| format!("while ({cond}) {body}")),
          (expr(), inner.clone())
            .prop_map(|(cond, body)| format!("for (a = 0; {cond}; a = a + 1) {body}")),
          prop::collection::vec(inner, 0..4).prop_map(|body| format!("{{ {} }}", body.join(" "))),
        ]
      })
    }

    fn program(stmts: &[String]) -> String {
      format!(
        "int add(int x, int y); \
         int main() {{ int a, b, c; int *p = &a; int arr[3]; struct {{ int x; }} s; {} return 0; }}",
        stmts.join(" ")
      )
    }

    proptest! {
      #[test]
      fn every_statement_leaves_the_stack_empty(stmts in prop::collection::vec(stmt(), 1..6)) {
        let input = program(&stmts);
        let depths = depth_after_each_statement(&input)
          .map_err(|err| TestCaseError::fail(format!("{input}\n{err}")))?;
        prop_assert!(depths.len() > stmts.len());
        for (i, depth) in depths.into_iter().enumerate() {
          prop_assert_eq!(depth, 0, "statement {} of {}", i, input);
        }
      }
    }
  }
}
