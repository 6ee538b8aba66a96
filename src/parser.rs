//! Recursive-descent parser producing the object and node arenas.
//!
//! The parser mirrors the classic chibicc structure: a precedence-climbing set
//! of expression helpers, a statement layer on top, and a declaration layer
//! that builds types while it reads declarators. Identifiers are resolved
//! against [`ScopeStack`] as they are read, so the resulting tree already links
//! every variable reference to its object.

use std::mem;

use tracing::debug;

use crate::SourceFile;
use crate::ast::{BinaryOp, Function, NodeId, NodeKind, Obj, ObjId, ObjKind, Program};
use crate::error::{CompileError, CompileResult};
use crate::scope::ScopeStack;
use crate::tokenizer::{Token, TokenKind, describe_token, token_text};
use crate::ty::{
  Param, TypeKind, TypeRef, array_of, func_type, pointer_to, struct_of, ty_char, ty_int, ty_long,
  ty_short, ty_void, union_of,
};

/// Number of integer argument registers in the calling convention.
pub const MAX_ARGS: usize = 6;

/// Storage-class information collected by `declspec`.
#[derive(Debug, Default)]
struct VarAttr {
  is_typedef: bool,
}

/// Result of parsing one declarator.
#[derive(Debug)]
struct Declarator {
  ty: TypeRef,
  name: Option<String>,
  /// Location of the name, or of the declarator start when it is abstract.
  loc: usize,
}

#[derive(Debug, Clone, Copy)]
enum Aggregate {
  Struct,
  Union,
}

/// Parse a whole translation unit.
pub fn parse(tokens: Vec<Token>, src: &SourceFile) -> CompileResult<Program> {
  let mut parser = Parser::new(tokens, src);
  parser.translation_unit()?;
  debug!(
    objects = parser.program.globals.len(),
    nodes = parser.program.nodes.len(),
    "parsed translation unit"
  );
  Ok(parser.program)
}

struct Parser<'a> {
  stream: TokenStream<'a>,
  src: &'a SourceFile,
  program: Program,
  scopes: ScopeStack,
  /// Locals of the function currently being parsed.
  locals: Vec<ObjId>,
  unique_names: usize,
}

impl<'a> Parser<'a> {
  fn new(tokens: Vec<Token>, src: &'a SourceFile) -> Self {
    Self {
      stream: TokenStream::new(tokens, src),
      src,
      program: Program::default(),
      scopes: ScopeStack::new(),
      locals: Vec::new(),
      unique_names: 0,
    }
  }

  fn error(&self, loc: usize, message: impl Into<String>) -> CompileError {
    CompileError::at(self.src, loc, message)
  }

  /// Run `f` inside a fresh scope frame, popping it on every exit path.
  fn scoped<T>(&mut self, f: impl FnOnce(&mut Self) -> CompileResult<T>) -> CompileResult<T> {
    self.scopes.enter();
    let result = f(self);
    self.scopes.leave();
    result
  }

  fn node(&mut self, kind: NodeKind, loc: usize) -> NodeId {
    self.program.add_node(kind, loc)
  }

  fn binary(&mut self, op: BinaryOp, lhs: NodeId, rhs: NodeId, loc: usize) -> NodeId {
    self.node(NodeKind::Binary { op, lhs, rhs }, loc)
  }

  fn typed(&self, id: NodeId) -> CompileResult<TypeRef> {
    self
      .program
      .ty(id)
      .cloned()
      .ok_or_else(|| CompileError::internal("operand used before it was typed"))
  }

  // ----------------------------------------------------------------------
  // Objects

  fn new_local(&mut self, name: &str, ty: TypeRef, loc: usize) -> CompileResult<ObjId> {
    let obj = self.program.add_obj(Obj {
      name: name.to_string(),
      ty,
      kind: ObjKind::Local { offset: 0 },
    });
    self
      .scopes
      .bind_variable(name, obj)
      .map_err(|_| self.error(loc, format!("redefinition of '{name}'")))?;
    self.locals.push(obj);
    Ok(obj)
  }

  fn new_global(&mut self, name: &str, ty: TypeRef, kind: ObjKind, loc: usize) -> CompileResult<ObjId> {
    let obj = self.program.add_obj(Obj {
      name: name.to_string(),
      ty,
      kind,
    });
    self
      .scopes
      .bind_variable(name, obj)
      .map_err(|_| self.error(loc, format!("redefinition of '{name}'")))?;
    self.program.globals.push(obj);
    Ok(obj)
  }

  /// String literals become anonymous `char[N]` globals.
  fn new_string_literal(&mut self, bytes: Vec<u8>, loc: usize) -> CompileResult<ObjId> {
    let name = format!(".L..{}", self.unique_names);
    self.unique_names += 1;

    let ty = i64::try_from(bytes.len())
      .ok()
      .and_then(|len| array_of(ty_char(), len))
      .ok_or_else(|| self.error(loc, "string literal too large"))?;
    let obj = self.program.add_obj(Obj {
      name,
      ty,
      kind: ObjKind::Global {
        init_data: Some(bytes),
        is_anonymous: true,
      },
    });
    self.program.globals.push(obj);
    Ok(obj)
  }

  /// Claim the single file-scope definition of `name`.
  fn define(&mut self, name: &str, loc: usize) -> CompileResult<()> {
    self
      .scopes
      .define(name)
      .map_err(|_| self.error(loc, format!("redefinition of '{name}'")))
  }

  /// A function declarator without a body, e.g. `h` in `int g, h();`.
  fn new_prototype(&mut self, name: &str, decl: &Declarator) -> CompileResult<ObjId> {
    let TypeKind::Func { params, .. } = &decl.ty.kind else {
      return Err(self.error(decl.loc, "expected a function declarator"));
    };
    if params.len() > MAX_ARGS {
      return Err(self.error(decl.loc, "too many parameters"));
    }
    self.new_global(
      name,
      decl.ty.clone(),
      ObjKind::Function(Function::default()),
      decl.loc,
    )
  }

  fn require_name(&self, decl: &Declarator) -> CompileResult<String> {
    decl
      .name
      .clone()
      .ok_or_else(|| self.error(decl.loc, "expected a variable name"))
  }

  // ----------------------------------------------------------------------
  // Top level

  fn translation_unit(&mut self) -> CompileResult<()> {
    while !self.stream.is_eof() {
      let mut attr = VarAttr::default();
      let base = self.declspec(Some(&mut attr))?;

      if attr.is_typedef {
        self.parse_typedef(base)?;
        continue;
      }

      if self.is_function()? {
        self.function(base)?;
        continue;
      }

      self.global_variables(base)?;
    }
    Ok(())
  }

  /// Speculatively read one declarator to see whether it declares a function.
  fn is_function(&mut self) -> CompileResult<bool> {
    if self.stream.is(";") {
      return Ok(false);
    }

    let start = self.stream.pos();
    let decl = self.declarator(ty_int());
    self.stream.set_pos(start);
    Ok(decl?.ty.is_func())
  }

  fn function(&mut self, base: TypeRef) -> CompileResult<()> {
    let decl = self.declarator(base)?;
    let name = self.require_name(&decl)?;
    let TypeKind::Func { params, .. } = &decl.ty.kind else {
      return Err(self.error(decl.loc, "expected a function declarator"));
    };
    let params = params.clone();

    if params.len() > MAX_ARGS {
      return Err(self.error(decl.loc, "too many parameters"));
    }
    if let Some(param) = params.iter().find(|p| p.ty.is_aggregate()) {
      return Err(self.error(
        param.loc,
        "passing struct or union by value is not supported",
      ));
    }

    let is_definition = !self.stream.equal(";");
    if is_definition {
      self.define(&name, decl.loc)?;
    }

    let obj = self.new_global(
      &name,
      decl.ty.clone(),
      ObjKind::Function(Function {
        is_definition,
        ..Function::default()
      }),
      decl.loc,
    )?;

    if !is_definition {
      return Ok(());
    }

    self.locals.clear();
    let (param_ids, body) = self.scoped(|p| {
      let mut ids = Vec::with_capacity(params.len());
      for param in &params {
        let Some(param_name) = &param.name else {
          return Err(p.error(param.loc, "parameter name omitted"));
        };
        ids.push(p.new_local(param_name, param.ty.clone(), param.loc)?);
      }
      p.stream.skip("{")?;
      let body = p.compound_stmt()?;
      Ok((ids, body))
    })?;
    let locals = mem::take(&mut self.locals);

    debug!(function = %name, locals = locals.len(), "parsed function");

    if let ObjKind::Function(func) = &mut self.program.obj_mut(obj).kind {
      func.params = param_ids;
      func.locals = locals;
      func.body = Some(body);
    }
    Ok(())
  }

  fn global_variables(&mut self, base: TypeRef) -> CompileResult<()> {
    let mut first = true;
    while !self.stream.equal(";") {
      if !first {
        self.stream.skip(",")?;
      }
      first = false;

      let decl = self.declarator(base.clone())?;
      let name = self.require_name(&decl)?;
      if decl.ty.is_func() {
        self.new_prototype(&name, &decl)?;
        continue;
      }
      if decl.ty.is_void() {
        return Err(self.error(decl.loc, "variable declared void"));
      }
      self.define(&name, decl.loc)?;
      self.new_global(
        &name,
        decl.ty,
        ObjKind::Global {
          init_data: None,
          is_anonymous: false,
        },
        decl.loc,
      )?;
    }
    Ok(())
  }

  fn parse_typedef(&mut self, base: TypeRef) -> CompileResult<()> {
    let mut first = true;
    while !self.stream.equal(";") {
      if !first {
        self.stream.skip(",")?;
      }
      first = false;

      let decl = self.declarator(base.clone())?;
      let name = self.require_name(&decl)?;
      self
        .scopes
        .bind_typedef(&name, decl.ty)
        .map_err(|_| self.error(decl.loc, format!("redefinition of '{name}'")))?;
    }
    Ok(())
  }

  // ----------------------------------------------------------------------
  // Declarations

  fn is_typename(&self) -> bool {
    self.is_typename_at(0)
  }

  fn is_typename_at(&self, n: usize) -> bool {
    let Some(token) = self.stream.peek_at(n) else {
      return false;
    };
    let text = token_text(token, &self.src.contents);
    match token.kind {
      TokenKind::Keyword => matches!(
        text,
        "void" | "char" | "short" | "int" | "long" | "struct" | "union" | "typedef"
      ),
      TokenKind::Ident => self.scopes.lookup_typedef(text).is_some(),
      _ => false,
    }
  }

  // declspec = ("typedef" | "void" | "char" | "short" | "int" | "long"
  //            | struct-decl | union-decl | typedef-name)+
  fn declspec(&mut self, mut attr: Option<&mut VarAttr>) -> CompileResult<TypeRef> {
    const VOID: u32 = 1 << 0;
    const CHAR: u32 = 1 << 2;
    const SHORT: u32 = 1 << 4;
    const INT: u32 = 1 << 6;
    const LONG: u32 = 1 << 8;
    const OTHER: u32 = 1 << 10;

    let mut ty = ty_int();
    let mut counter = 0;

    while self.is_typename() {
      let loc = self.stream.loc();

      if self.stream.is("typedef") {
        let Some(attr) = attr.as_deref_mut() else {
          return Err(self.error(
            loc,
            "storage class specifier is not allowed in this context",
          ));
        };
        attr.is_typedef = true;
        self.stream.advance();
        continue;
      }

      let aliased = self
        .stream
        .peek()
        .filter(|token| token.kind == TokenKind::Ident)
        .and_then(|token| self.scopes.lookup_typedef(token_text(token, &self.src.contents)))
        .cloned();

      if self.stream.is("struct") || self.stream.is("union") || aliased.is_some() {
        if counter != 0 {
          break;
        }
        ty = if self.stream.equal("struct") {
          self.aggregate_decl(Aggregate::Struct)?
        } else if self.stream.equal("union") {
          self.aggregate_decl(Aggregate::Union)?
        } else {
          self.stream.advance();
          aliased.unwrap_or_else(ty_int)
        };
        counter += OTHER;
        continue;
      }

      counter += match self.stream.current_text() {
        "void" => VOID,
        "char" => CHAR,
        "short" => SHORT,
        "int" => INT,
        "long" => LONG,
        _ => OTHER,
      };

      ty = match counter {
        VOID => ty_void(),
        CHAR => ty_char(),
        c if c == SHORT || c == SHORT + INT => ty_short(),
        INT => ty_int(),
        c if c == LONG || c == LONG + INT || c == LONG + LONG || c == LONG + LONG + INT => ty_long(),
        _ => return Err(self.error(loc, "invalid type")),
      };
      self.stream.advance();
    }

    Ok(ty)
  }

  // struct-decl = ident? ("{" struct-members)?
  fn aggregate_decl(&mut self, kind: Aggregate) -> CompileResult<TypeRef> {
    let tag = if self.stream.peek_kind() == Some(TokenKind::Ident) {
      Some(self.stream.get_ident()?)
    } else {
      None
    };

    if let Some((name, loc)) = &tag
      && !self.stream.is("{")
    {
      let message = match kind {
        Aggregate::Struct => "undefined struct",
        Aggregate::Union => "undefined union",
      };
      return self
        .scopes
        .lookup_tag(name)
        .cloned()
        .ok_or_else(|| self.error(*loc, message));
    }

    let loc = self.stream.loc();
    self.stream.skip("{")?;
    let fields = self.aggregate_members()?;
    let ty = match kind {
      Aggregate::Struct => struct_of(fields).ok_or_else(|| self.error(loc, "struct too large"))?,
      Aggregate::Union => union_of(fields).ok_or_else(|| self.error(loc, "union too large"))?,
    };

    if let Some((name, _)) = tag {
      self.scopes.bind_tag(&name, ty.clone());
    }
    Ok(ty)
  }

  fn aggregate_members(&mut self) -> CompileResult<Vec<(String, TypeRef)>> {
    let mut fields = Vec::new();

    while !self.stream.equal("}") {
      let base = self.declspec(None)?;
      let mut first = true;
      while !self.stream.equal(";") {
        if !first {
          self.stream.skip(",")?;
        }
        first = false;

        let decl = self.declarator(base.clone())?;
        let name = self.require_name(&decl)?;
        fields.push((name, decl.ty));
      }
    }

    Ok(fields)
  }

  // declarator = "*"* ("(" declarator ")" | ident?) type-suffix
  //
  // The name is optional here; callers that need one use `require_name`.
  fn declarator(&mut self, mut ty: TypeRef) -> CompileResult<Declarator> {
    while self.stream.equal("*") {
      ty = pointer_to(ty);
    }

    if self.stream.is("(") && !self.starts_param_list() {
      // The suffix after the parentheses binds tighter than anything inside
      // them, so skip the inner declarator, read the suffix, then come back.
      let start = self.stream.pos();
      self.stream.advance();
      self.declarator(ty_int())?;
      self.stream.skip(")")?;
      let ty = self.type_suffix(ty)?;
      let end = self.stream.pos();

      self.stream.set_pos(start + 1);
      let decl = self.declarator(ty)?;
      self.stream.set_pos(end);
      return Ok(decl);
    }

    let loc = self.stream.loc();
    let name = if self.stream.peek_kind() == Some(TokenKind::Ident) {
      Some(self.stream.get_ident()?.0)
    } else {
      None
    };

    let ty = self.type_suffix(ty)?;
    Ok(Declarator { ty, name, loc })
  }

  /// In an abstract declarator, `(` may open a parameter list instead of a
  /// nested declarator: `int (int)` or `int ()`.
  fn starts_param_list(&self) -> bool {
    self.stream.peek_at(1).is_some_and(|token| {
      token_text(token, &self.src.contents) == ")"
    }) || self.is_typename_at(1)
  }

  // type-suffix = "(" params | "[" num "]" type-suffix | ε
  fn type_suffix(&mut self, ty: TypeRef) -> CompileResult<TypeRef> {
    if self.stream.equal("(") {
      return self.params(ty);
    }

    if self.stream.equal("[") {
      let (len, loc) = self.stream.get_number()?;
      self.stream.skip("]")?;
      let ty = self.type_suffix(ty)?;
      return array_of(ty, len).ok_or_else(|| self.error(loc, "array too large"));
    }

    Ok(ty)
  }

  // params = ("void" | param ("," param)*)? ")"
  fn params(&mut self, ret: TypeRef) -> CompileResult<TypeRef> {
    if self.stream.is("void") && self.stream.peek_text_at(1) == Some(")") {
      self.stream.advance();
      self.stream.advance();
      return Ok(func_type(ret, Vec::new()));
    }

    let mut params = Vec::new();
    while !self.stream.equal(")") {
      if !params.is_empty() {
        self.stream.skip(",")?;
      }
      let base = self.declspec(None)?;
      let decl = self.declarator(base)?;

      // Array parameters are passed as pointers to their first element.
      let ty = match &decl.ty.kind {
        TypeKind::Array { base, .. } => pointer_to(base.clone()),
        _ => decl.ty.copy(),
      };
      params.push(Param {
        name: decl.name,
        loc: decl.loc,
        ty,
      });
    }

    Ok(func_type(ret, params))
  }

  // type-name = declspec abstract-declarator
  fn type_name(&mut self) -> CompileResult<TypeRef> {
    let base = self.declspec(None)?;
    let decl = self.declarator(base)?;
    if decl.name.is_some() {
      return Err(self.error(decl.loc, "unexpected identifier in type name"));
    }
    Ok(decl.ty)
  }

  // declaration = declspec (declarator ("=" assign)?
  //               ("," declarator ("=" assign)?)*)? ";"
  fn declaration(&mut self, base: TypeRef) -> CompileResult<NodeId> {
    let loc = self.stream.loc();
    let mut body = Vec::new();
    let mut first = true;

    while !self.stream.equal(";") {
      if !first {
        self.stream.skip(",")?;
      }
      first = false;

      let decl = self.declarator(base.clone())?;
      if decl.ty.is_void() {
        return Err(self.error(decl.loc, "variable declared void"));
      }
      let name = self.require_name(&decl)?;
      if decl.ty.is_func() {
        self.new_prototype(&name, &decl)?;
        continue;
      }
      let var = self.new_local(&name, decl.ty, decl.loc)?;

      if !self.stream.is("=") {
        continue;
      }
      let assign_loc = self.stream.loc();
      self.stream.advance();

      let lhs = self.node(NodeKind::Var(var), decl.loc);
      let rhs = self.assign()?;
      let assign = self.node(NodeKind::Assign { lhs, rhs }, assign_loc);
      body.push(self.node(NodeKind::ExprStmt(assign), assign_loc));
    }

    Ok(self.node(NodeKind::Block(body), loc))
  }

  // ----------------------------------------------------------------------
  // Statements

  // stmt = "return" expr ";"
  //      | "{" compound-stmt
  //      | "if" "(" expr ")" stmt ("else" stmt)?
  //      | "for" "(" (declaration | expr-stmt) expr? ";" expr? ")" stmt
  //      | "while" "(" expr ")" stmt
  //      | expr-stmt
  fn stmt(&mut self) -> CompileResult<NodeId> {
    let loc = self.stream.loc();

    if self.stream.equal("return") {
      let expr = self.expr()?;
      self.stream.skip(";")?;
      return Ok(self.node(NodeKind::Return(expr), loc));
    }

    if self.stream.equal("{") {
      return self.compound_stmt();
    }

    if self.stream.equal("if") {
      self.stream.skip("(")?;
      let cond = self.expr()?;
      self.stream.skip(")")?;
      let then = self.stmt()?;
      let els = if self.stream.equal("else") {
        Some(self.stmt()?)
      } else {
        None
      };
      return Ok(self.node(NodeKind::If { cond, then, els }, loc));
    }

    if self.stream.equal("for") {
      self.stream.skip("(")?;
      return self.scoped(|p| {
        let init = if p.stream.equal(";") {
          None
        } else if p.is_typename() {
          let base = p.declspec(None)?;
          Some(p.declaration(base)?)
        } else {
          Some(p.expr_stmt()?)
        };

        let cond = if p.stream.equal(";") {
          None
        } else {
          let cond = p.expr()?;
          p.stream.skip(";")?;
          Some(cond)
        };

        let inc = if p.stream.equal(")") {
          None
        } else {
          let inc = p.expr()?;
          p.stream.skip(")")?;
          Some(inc)
        };

        let body = p.stmt()?;
        Ok(p.node(
          NodeKind::For {
            init,
            cond,
            inc,
            body,
          },
          loc,
        ))
      });
    }

    if self.stream.equal("while") {
      self.stream.skip("(")?;
      let cond = self.expr()?;
      self.stream.skip(")")?;
      let body = self.stmt()?;
      return Ok(self.node(
        NodeKind::For {
          init: None,
          cond: Some(cond),
          inc: None,
          body,
        },
        loc,
      ));
    }

    self.expr_stmt()
  }

  // compound-stmt = (typedef | declaration | stmt)* "}"
  fn compound_stmt(&mut self) -> CompileResult<NodeId> {
    let loc = self.stream.loc();

    self.scoped(|p| {
      let mut body = Vec::new();

      while !p.stream.equal("}") {
        let node = if p.is_typename() {
          let mut attr = VarAttr::default();
          let base = p.declspec(Some(&mut attr))?;
          if attr.is_typedef {
            p.parse_typedef(base)?;
            continue;
          }
          p.declaration(base)?
        } else {
          p.stmt()?
        };

        p.program.add_type(p.src, node)?;
        body.push(node);
      }

      Ok(p.node(NodeKind::Block(body), loc))
    })
  }

  // expr-stmt = expr? ";"
  fn expr_stmt(&mut self) -> CompileResult<NodeId> {
    let loc = self.stream.loc();
    if self.stream.equal(";") {
      return Ok(self.node(NodeKind::Block(Vec::new()), loc));
    }

    let expr = self.expr()?;
    self.stream.skip(";")?;
    Ok(self.node(NodeKind::ExprStmt(expr), loc))
  }

  // ----------------------------------------------------------------------
  // Expressions

  // expr = assign ("," expr)?
  fn expr(&mut self) -> CompileResult<NodeId> {
    let node = self.assign()?;

    if self.stream.is(",") {
      let loc = self.stream.loc();
      self.stream.advance();
      let rhs = self.expr()?;
      return Ok(self.node(NodeKind::Comma { lhs: node, rhs }, loc));
    }

    Ok(node)
  }

  // assign = logor ("=" assign)?
  fn assign(&mut self) -> CompileResult<NodeId> {
    let node = self.logor()?;

    if self.stream.is("=") {
      let loc = self.stream.loc();
      self.stream.advance();
      let rhs = self.assign()?;
      return Ok(self.node(NodeKind::Assign { lhs: node, rhs }, loc));
    }

    Ok(node)
  }

  // logor = logand ("||" logand)*
  fn logor(&mut self) -> CompileResult<NodeId> {
    let mut node = self.logand()?;

    while self.stream.is("||") {
      let loc = self.stream.loc();
      self.stream.advance();
      let rhs = self.logand()?;
      node = self.node(NodeKind::LogOr { lhs: node, rhs }, loc);
    }

    Ok(node)
  }

  // logand = bitor ("&&" bitor)*
  fn logand(&mut self) -> CompileResult<NodeId> {
    let mut node = self.bitor()?;

    while self.stream.is("&&") {
      let loc = self.stream.loc();
      self.stream.advance();
      let rhs = self.bitor()?;
      node = self.node(NodeKind::LogAnd { lhs: node, rhs }, loc);
    }

    Ok(node)
  }

  // bitor = bitxor ("|" bitxor)*
  fn bitor(&mut self) -> CompileResult<NodeId> {
    let mut node = self.bitxor()?;

    while self.stream.is("|") {
      let loc = self.stream.loc();
      self.stream.advance();
      let rhs = self.bitxor()?;
      node = self.binary(BinaryOp::BitOr, node, rhs, loc);
    }

    Ok(node)
  }

  // bitxor = bitand ("^" bitand)*
  fn bitxor(&mut self) -> CompileResult<NodeId> {
    let mut node = self.bitand()?;

    while self.stream.is("^") {
      let loc = self.stream.loc();
      self.stream.advance();
      let rhs = self.bitand()?;
      node = self.binary(BinaryOp::BitXor, node, rhs, loc);
    }

    Ok(node)
  }

  // bitand = equality ("&" equality)*
  fn bitand(&mut self) -> CompileResult<NodeId> {
    let mut node = self.equality()?;

    while self.stream.is("&") {
      let loc = self.stream.loc();
      self.stream.advance();
      let rhs = self.equality()?;
      node = self.binary(BinaryOp::BitAnd, node, rhs, loc);
    }

    Ok(node)
  }

  // equality = relational ("==" relational | "!=" relational)*
  fn equality(&mut self) -> CompileResult<NodeId> {
    let mut node = self.relational()?;

    loop {
      let loc = self.stream.loc();
      let op = match self.stream.current_text() {
        "==" => BinaryOp::Eq,
        "!=" => BinaryOp::Ne,
        _ => break,
      };
      self.stream.advance();
      let rhs = self.relational()?;
      node = self.binary(op, node, rhs, loc);
    }

    Ok(node)
  }

  // relational = add ("<" add | "<=" add | ">" add | ">=" add)*
  fn relational(&mut self) -> CompileResult<NodeId> {
    let mut node = self.add()?;

    loop {
      let loc = self.stream.loc();
      // `a > b` is parsed as `b < a`.
      let (op, swapped) = match self.stream.current_text() {
        "<" => (BinaryOp::Lt, false),
        "<=" => (BinaryOp::Le, false),
        ">" => (BinaryOp::Lt, true),
        ">=" => (BinaryOp::Le, true),
        _ => break,
      };
      self.stream.advance();
      let rhs = self.add()?;
      node = if swapped {
        self.binary(op, rhs, node, loc)
      } else {
        self.binary(op, node, rhs, loc)
      };
    }

    Ok(node)
  }

  // add = mul ("+" mul | "-" mul)*
  fn add(&mut self) -> CompileResult<NodeId> {
    let mut node = self.mul()?;

    loop {
      let loc = self.stream.loc();
      if self.stream.equal("+") {
        let rhs = self.mul()?;
        node = self.new_add(node, rhs, loc)?;
        continue;
      }
      if self.stream.equal("-") {
        let rhs = self.mul()?;
        node = self.new_sub(node, rhs, loc)?;
        continue;
      }
      return Ok(node);
    }
  }

  /// `+` with C pointer arithmetic: `p + n` advances by `n` elements.
  fn new_add(&mut self, lhs: NodeId, rhs: NodeId, loc: usize) -> CompileResult<NodeId> {
    self.program.add_type(self.src, lhs)?;
    self.program.add_type(self.src, rhs)?;
    let lhs_ty = self.typed(lhs)?;
    let rhs_ty = self.typed(rhs)?;

    if lhs_ty.is_integer() && rhs_ty.is_integer() {
      return Ok(self.binary(BinaryOp::Add, lhs, rhs, loc));
    }

    match (lhs_ty.base(), rhs_ty.base()) {
      (Some(_), Some(_)) => Err(self.error(loc, "invalid operands")),
      (None, Some(_)) => self.new_add(rhs, lhs, loc),
      (Some(base), None) if rhs_ty.is_integer() => {
        let base = base.clone();
        let scaled = self.scale(rhs, base.size, loc)?;
        let node = self.binary(BinaryOp::Add, lhs, scaled, loc);
        self.program.node_mut(node).ty = Some(pointer_to(base));
        Ok(node)
      }
      _ => Err(self.error(loc, "invalid operands")),
    }
  }

  /// `-` with C pointer arithmetic; `p - q` yields an element count.
  fn new_sub(&mut self, lhs: NodeId, rhs: NodeId, loc: usize) -> CompileResult<NodeId> {
    self.program.add_type(self.src, lhs)?;
    self.program.add_type(self.src, rhs)?;
    let lhs_ty = self.typed(lhs)?;
    let rhs_ty = self.typed(rhs)?;

    if lhs_ty.is_integer() && rhs_ty.is_integer() {
      return Ok(self.binary(BinaryOp::Sub, lhs, rhs, loc));
    }

    match (lhs_ty.base(), rhs_ty.base()) {
      (Some(base), Some(_)) => {
        let size = base.size;
        let diff = self.binary(BinaryOp::Sub, lhs, rhs, loc);
        self.program.node_mut(diff).ty = Some(ty_int());
        let size = self.node(NodeKind::Num(size), loc);
        let node = self.binary(BinaryOp::Div, diff, size, loc);
        self.program.add_type(self.src, node)?;
        Ok(node)
      }
      (Some(base), None) if rhs_ty.is_integer() => {
        let base = base.clone();
        let scaled = self.scale(rhs, base.size, loc)?;
        let node = self.binary(BinaryOp::Sub, lhs, scaled, loc);
        self.program.node_mut(node).ty = Some(pointer_to(base));
        Ok(node)
      }
      _ => Err(self.error(loc, "invalid operands")),
    }
  }

  /// `index * size`, typed.
  fn scale(&mut self, index: NodeId, size: i64, loc: usize) -> CompileResult<NodeId> {
    let size = self.node(NodeKind::Num(size), loc);
    let scaled = self.binary(BinaryOp::Mul, index, size, loc);
    self.program.add_type(self.src, scaled)?;
    Ok(scaled)
  }

  // mul = unary ("*" unary | "/" unary | "%" unary)*
  fn mul(&mut self) -> CompileResult<NodeId> {
    let mut node = self.unary()?;

    loop {
      let loc = self.stream.loc();
      let op = match self.stream.current_text() {
        "*" => BinaryOp::Mul,
        "/" => BinaryOp::Div,
        "%" => BinaryOp::Mod,
        _ => break,
      };
      self.stream.advance();
      let rhs = self.unary()?;
      node = self.binary(op, node, rhs, loc);
    }

    Ok(node)
  }

  // unary = ("+" | "-" | "*" | "&" | "!" | "~") unary
  //       | postfix
  fn unary(&mut self) -> CompileResult<NodeId> {
    let loc = self.stream.loc();

    if self.stream.equal("+") {
      return self.unary();
    }

    let make: fn(NodeId) -> NodeKind = match self.stream.current_text() {
      "-" => NodeKind::Neg,
      "*" => NodeKind::Deref,
      "&" => NodeKind::Addr,
      "!" => NodeKind::Not,
      "~" => NodeKind::BitNot,
      _ => return self.postfix(),
    };
    self.stream.advance();
    let operand = self.unary()?;
    Ok(self.node(make(operand), loc))
  }

  // postfix = primary ("[" expr "]" | "." ident | "->" ident)*
  fn postfix(&mut self) -> CompileResult<NodeId> {
    let mut node = self.primary()?;

    loop {
      let loc = self.stream.loc();

      if self.stream.equal("[") {
        // a[b] is *(a + b)
        let index = self.expr()?;
        self.stream.skip("]")?;
        let sum = self.new_add(node, index, loc)?;
        node = self.node(NodeKind::Deref(sum), loc);
        continue;
      }

      if self.stream.equal(".") {
        node = self.struct_ref(node)?;
        continue;
      }

      if self.stream.equal("->") {
        // a->b is (*a).b
        node = self.node(NodeKind::Deref(node), loc);
        node = self.struct_ref(node)?;
        continue;
      }

      return Ok(node);
    }
  }

  fn struct_ref(&mut self, base: NodeId) -> CompileResult<NodeId> {
    self.program.add_type(self.src, base)?;
    let base_ty = self.typed(base)?;
    if !base_ty.is_aggregate() {
      let loc = self.program.node(base).loc;
      return Err(self.error(loc, "not a struct nor a union"));
    }

    let (name, loc) = self.stream.get_ident()?;
    let Some(member) = base_ty.find_member(&name).cloned() else {
      return Err(self.error(loc, "no such member"));
    };
    Ok(self.node(NodeKind::Member { base, member }, loc))
  }

  // primary = "(" "{" compound-stmt ")"
  //         | "(" expr ")"
  //         | "sizeof" "(" type-name ")"
  //         | "sizeof" unary
  //         | ident func-args?
  //         | str
  //         | num
  fn primary(&mut self) -> CompileResult<NodeId> {
    let loc = self.stream.loc();

    if self.stream.is("(") && self.stream.peek_text_at(1) == Some("{") {
      // GNU statement expression.
      self.stream.advance();
      self.stream.advance();
      let block = self.compound_stmt()?;
      self.stream.skip(")")?;
      let NodeKind::Block(body) = &self.program.node(block).kind else {
        return Err(CompileError::internal("compound statement is not a block"));
      };
      let body = body.clone();
      return Ok(self.node(NodeKind::StmtExpr(body), loc));
    }

    if self.stream.equal("(") {
      let node = self.expr()?;
      self.stream.skip(")")?;
      return Ok(node);
    }

    if self.stream.equal("sizeof") {
      if self.stream.is("(") && self.is_typename_at(1) {
        self.stream.advance();
        let ty = self.type_name()?;
        self.stream.skip(")")?;
        return Ok(self.node(NodeKind::Num(ty.size), loc));
      }

      let node = self.unary()?;
      self.program.add_type(self.src, node)?;
      let size = self.typed(node)?.size;
      return Ok(self.node(NodeKind::Num(size), loc));
    }

    match self.stream.peek_kind() {
      Some(TokenKind::Ident) => {
        if self.stream.peek_text_at(1) == Some("(") {
          return self.funcall();
        }

        let (name, loc) = self.stream.get_ident()?;
        let Some(var) = self.scopes.lookup_variable(&name) else {
          return Err(self.error(loc, format!("undeclared variable '{name}'")));
        };
        Ok(self.node(NodeKind::Var(var), loc))
      }
      Some(TokenKind::Str) => {
        let bytes = self.stream.get_string()?;
        let obj = self.new_string_literal(bytes, loc)?;
        Ok(self.node(NodeKind::Var(obj), loc))
      }
      Some(TokenKind::Num) => {
        let (value, loc) = self.stream.get_number()?;
        Ok(self.node(NodeKind::Num(value), loc))
      }
      _ => {
        let got = describe_token(self.stream.peek(), &self.src.contents);
        Err(self.error(loc, format!("expected an expression, but got \"{got}\"")))
      }
    }
  }

  // func-args = "(" (assign ("," assign)*)? ")"
  fn funcall(&mut self) -> CompileResult<NodeId> {
    let (name, loc) = self.stream.get_ident()?;
    self.stream.skip("(")?;

    let mut args = Vec::new();
    while !self.stream.equal(")") {
      if !args.is_empty() {
        self.stream.skip(",")?;
      }
      args.push(self.assign()?);
    }

    if args.len() > MAX_ARGS {
      return Err(self.error(loc, "too many arguments"));
    }

    // Undeclared callees are assumed to return int.
    let ret = match self.scopes.lookup_variable(&name) {
      None => None,
      Some(obj) => match &self.program.obj(obj).ty.kind {
        TypeKind::Func { ret, .. } => Some(ret.clone()),
        _ => return Err(self.error(loc, "not a function")),
      },
    };

    Ok(self.node(NodeKind::Call { name, args, ret }, loc))
  }
}

/// Lightweight cursor over the token vector.
struct TokenStream<'a> {
  tokens: Vec<Token>,
  src: &'a SourceFile,
  pos: usize,
}

impl<'a> TokenStream<'a> {
  /// Take ownership of the token stream; the parser will advance `pos` as it consumes input.
  fn new(tokens: Vec<Token>, src: &'a SourceFile) -> Self {
    Self {
      tokens,
      src,
      pos: 0,
    }
  }

  fn source(&self) -> &'a str {
    &self.src.contents
  }

  fn peek(&self) -> Option<&Token> {
    self.tokens.get(self.pos)
  }

  fn peek_at(&self, n: usize) -> Option<&Token> {
    self.tokens.get(self.pos + n)
  }

  fn peek_kind(&self) -> Option<TokenKind> {
    self.peek().map(|token| token.kind)
  }

  fn peek_text_at(&self, n: usize) -> Option<&'a str> {
    self
      .peek_at(n)
      .filter(|token| token.kind != TokenKind::Eof)
      .map(|token| token_text(token, self.source()))
  }

  /// Spelling of the current token, or `""` at the end of input.
  fn current_text(&self) -> &'a str {
    match self.peek() {
      Some(token) if matches!(token.kind, TokenKind::Punctuator | TokenKind::Keyword) => {
        token_text(token, self.source())
      }
      _ => "",
    }
  }

  fn loc(&self) -> usize {
    self.peek().map_or(self.source().len(), |token| token.loc)
  }

  fn pos(&self) -> usize {
    self.pos
  }

  fn set_pos(&mut self, pos: usize) {
    self.pos = pos;
  }

  fn advance(&mut self) {
    if self.pos < self.tokens.len() {
      self.pos += 1;
    }
  }

  /// Does the current token spell `op` (punctuator or keyword)?
  fn is(&self, op: &str) -> bool {
    self.current_text() == op
  }

  /// Consume the current token if it matches the provided punctuator or keyword.
  fn equal(&mut self, op: &str) -> bool {
    if self.is(op) {
      self.pos += 1;
      return true;
    }
    false
  }

  fn skip(&mut self, s: &str) -> CompileResult<()> {
    if self.equal(s) {
      Ok(())
    } else {
      let got = describe_token(self.peek(), self.source());
      Err(CompileError::at(
        self.src,
        self.loc(),
        format!("expected \"{s}\", but got \"{got}\""),
      ))
    }
  }

  fn unexpected(&self, what: &str) -> CompileError {
    let got = describe_token(self.peek(), self.source());
    CompileError::at(
      self.src,
      self.loc(),
      format!("expected {what}, but got \"{got}\""),
    )
  }

  /// Parse the current token as an integer literal returning its value and location.
  fn get_number(&mut self) -> CompileResult<(i64, usize)> {
    if let Some(token) = self.peek()
      && token.kind == TokenKind::Num
    {
      let loc = token.loc;
      let value = token
        .value
        .ok_or_else(|| CompileError::internal("numeric token missing value"))?;
      self.pos += 1;
      return Ok((value, loc));
    }
    Err(self.unexpected("a number"))
  }

  /// Parse the current token as an identifier.
  fn get_ident(&mut self) -> CompileResult<(String, usize)> {
    if let Some(token) = self.peek()
      && token.kind == TokenKind::Ident
    {
      let ident = token_text(token, self.source()).to_string();
      let loc = token.loc;
      self.pos += 1;
      return Ok((ident, loc));
    }
    Err(self.unexpected("an identifier"))
  }

  fn get_string(&mut self) -> CompileResult<Vec<u8>> {
    if let Some(token) = self.peek()
      && token.kind == TokenKind::Str
      && let Some(bytes) = &token.str_value
    {
      let bytes = bytes.clone();
      self.pos += 1;
      return Ok(bytes);
    }
    Err(self.unexpected("a string literal"))
  }

  fn is_eof(&self) -> bool {
    matches!(self.peek_kind(), Some(TokenKind::Eof) | None)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tokenizer::tokenize;
  use pretty_assertions::assert_eq;

  fn parse_src(input: &str) -> CompileResult<Program> {
    let src = SourceFile::new("test.c", input);
    let tokens = tokenize(&src)?;
    parse(tokens, &src)
  }

  fn parse_err(input: &str) -> String {
    parse_src(input).unwrap_err().message()
  }

  fn function<'p>(program: &'p Program, name: &str) -> &'p Function {
    program
      .functions()
      .find(|(id, f)| program.obj(*id).name == name && f.is_definition)
      .map(|(_, f)| f)
      .unwrap()
  }

  fn local_names(program: &Program, func: &Function) -> Vec<String> {
    func
      .locals
      .iter()
      .map(|&id| program.obj(id).name.clone())
      .collect()
  }

  #[test]
  fn greater_than_swaps_operands() {
    let program = parse_src("int main() { int a; int b; return a > b; }").unwrap();
    let main = function(&program, "main");
    let a = main.locals[0];
    let cmp = program
      .nodes
      .iter()
      .find_map(|n| match n.kind {
        NodeKind::Binary {
          op: BinaryOp::Lt,
          lhs,
          rhs,
        } => Some((lhs, rhs)),
        _ => None,
      })
      .unwrap();
    assert!(matches!(program.node(cmp.0).kind, NodeKind::Var(v) if v != a));
    assert!(matches!(program.node(cmp.1).kind, NodeKind::Var(v) if v == a));
  }

  #[test]
  fn pointer_addition_scales_by_pointee() {
    let program = parse_src("int main() { long *p; return *(p + 3); }").unwrap();
    let scale = program.nodes.iter().find_map(|n| match n.kind {
      NodeKind::Binary {
        op: BinaryOp::Mul,
        rhs,
        ..
      } => Some(rhs),
      _ => None,
    });
    assert!(matches!(program.node(scale.unwrap()).kind, NodeKind::Num(8)));
  }

  #[test]
  fn pointer_difference_divides_by_element_size() {
    let program = parse_src("int main() { int a[4]; int *p = a; return (p + 2) - p; }").unwrap();
    let div = program.nodes.iter().find(|n| {
      matches!(
        n.kind,
        NodeKind::Binary {
          op: BinaryOp::Div,
          ..
        }
      )
    });
    let div = div.unwrap();
    assert_eq!(div.ty.as_ref().unwrap().kind, TypeKind::Int);
  }

  #[test]
  fn struct_layout_and_sizeof() {
    let program = parse_src(
      "int main() { struct { char a; int b; } s; return sizeof(s) + sizeof(struct { char a; int b; }); }",
    )
    .unwrap();
    let sizes: Vec<i64> = program
      .nodes
      .iter()
      .filter_map(|n| match n.kind {
        NodeKind::Num(v) => Some(v),
        _ => None,
      })
      .collect();
    assert_eq!(sizes, [8, 8]);

    let main = function(&program, "main");
    let s = program.obj(main.locals[0]);
    assert_eq!(s.ty.find_member("b").unwrap().offset, 4);
  }

  #[test]
  fn member_access_resolves_offsets() {
    let program = parse_src(
      "struct P { int x; long y; }; int main() { struct P p; struct P *q = &p; return q->y; }",
    )
    .unwrap();
    let member = program.nodes.iter().find_map(|n| match &n.kind {
      NodeKind::Member { member, .. } => Some(member.clone()),
      _ => None,
    });
    let member = member.unwrap();
    assert_eq!(member.name, "y");
    assert_eq!(member.offset, 8);
  }

  #[test]
  fn string_literals_become_anonymous_globals() {
    let program = parse_src("int main() { return sizeof(\"abc\"); } char *s() { return \"hi\"; }").unwrap();
    let strings: Vec<_> = program
      .globals
      .iter()
      .map(|&id| program.obj(id))
      .filter(|obj| obj.name.starts_with(".L.."))
      .collect();
    assert_eq!(strings.len(), 2);
    assert_eq!(strings[0].ty.size, 4);
    assert!(matches!(
      &strings[1].kind,
      ObjKind::Global { init_data: Some(bytes), is_anonymous: true } if bytes == b"hi\0"
    ));
  }

  #[test]
  fn functions_and_globals_are_distinguished() {
    let program = parse_src("int x, *y; int f(int a, char b); int f(int a, char b) { return a; } int z[4];").unwrap();
    let names: Vec<_> = program.globals.iter().map(|&id| program.obj(id).name.as_str()).collect();
    assert_eq!(names, ["x", "y", "f", "f", "z"]);
    assert_eq!(program.obj(program.globals[4]).ty.size, 16);

    let f = function(&program, "f");
    assert_eq!(f.params.len(), 2);
    assert_eq!(local_names(&program, f), ["a", "b"]);
  }

  #[test]
  fn declarator_grouping_binds_suffix_first() {
    let program = parse_src("int main() { int (*p)[3]; int *q[3]; return 0; }").unwrap();
    let main = function(&program, "main");
    let p = &program.obj(main.locals[0]).ty;
    let q = &program.obj(main.locals[1]).ty;
    assert_eq!(p.size, 8);
    assert_eq!(p.base().unwrap().size, 12);
    assert_eq!(q.size, 24);
  }

  #[test]
  fn typedefs_respect_scope() {
    let program = parse_src(
      "typedef int T; int main() { typedef char T; T c; { T d; } return sizeof(c); } T g;",
    )
    .unwrap();
    let g = program.obj(*program.globals.last().unwrap());
    assert_eq!(g.ty.size, 4);
    let main = function(&program, "main");
    assert_eq!(program.obj(main.locals[0]).ty.size, 1);
    assert_eq!(program.obj(main.locals[1]).ty.size, 1);
  }

  #[test]
  fn block_and_for_scopes_do_not_leak() {
    assert_eq!(
      parse_err("int main() { { int x; } return x; }"),
      "undeclared variable 'x'"
    );
    assert_eq!(
      parse_err("int main() { for (int i = 0; i < 3; i = i + 1) ; return i; }"),
      "undeclared variable 'i'"
    );
    assert!(parse_src("int main() { int x; { int x; x = 1; } return x; }").is_ok());
  }

  #[test]
  fn declaration_errors() {
    assert_eq!(parse_err("int main() { void v; }"), "variable declared void");
    assert_eq!(parse_err("int main() { int a; int a; }"), "redefinition of 'a'");
    assert_eq!(parse_err("int main() { struct S s; }"), "undefined struct");
    assert_eq!(parse_err("int main() { union U u; }"), "undefined union");
    assert_eq!(
      parse_err("int f() { return 1; } int f() { return 2; }"),
      "redefinition of 'f'"
    );
    assert_eq!(
      parse_err("int f(int a, int b, int c, int d, int e, int f, int g);"),
      "too many parameters"
    );
  }

  #[test]
  fn expression_errors() {
    assert_eq!(
      parse_err("int main() { int *p; int *q; return p + q; }"),
      "invalid operands"
    );
    assert_eq!(
      parse_err("int main() { int a; return a.x; }"),
      "not a struct nor a union"
    );
    assert_eq!(
      parse_err("int main() { struct { int a; } s; return s.b; }"),
      "no such member"
    );
    assert_eq!(
      parse_err("int main() { return 1 +; }"),
      "expected an expression, but got \";\""
    );
    assert_eq!(
      parse_err("int main() { return 1 }"),
      "expected \";\", but got \"}\""
    );
  }
}
