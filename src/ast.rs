//! Syntax tree and object arena produced by the parser.
//!
//! Nodes and objects live in flat vectors owned by [`Program`] and refer to
//! each other through [`NodeId`] / [`ObjId`] handles. A node owns the children
//! it names; `Var` nodes hold a non-owning handle to the object they read.

use crate::ty::{Member, TypeRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjId(pub u32);

/// Binary operators recognised by the language.
///
/// `>` and `>=` never appear here: the parser swaps their operands and emits
/// `Lt` / `Le` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
  Add,
  Sub,
  Mul,
  Div,
  Mod,
  BitAnd,
  BitOr,
  BitXor,
  Eq,
  Ne,
  Lt,
  Le,
}

impl BinaryOp {
  pub fn is_comparison(self) -> bool {
    matches!(self, Self::Eq | Self::Ne | Self::Lt | Self::Le)
  }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
  // Expressions
  Num(i64),
  Var(ObjId),
  Neg(NodeId),
  Not(NodeId),
  BitNot(NodeId),
  Binary {
    op: BinaryOp,
    lhs: NodeId,
    rhs: NodeId,
  },
  LogAnd {
    lhs: NodeId,
    rhs: NodeId,
  },
  LogOr {
    lhs: NodeId,
    rhs: NodeId,
  },
  Assign {
    lhs: NodeId,
    rhs: NodeId,
  },
  Comma {
    lhs: NodeId,
    rhs: NodeId,
  },
  Addr(NodeId),
  Deref(NodeId),
  Member {
    base: NodeId,
    member: Member,
  },
  Call {
    name: String,
    args: Vec<NodeId>,
    /// Declared return type of the callee, when a declaration was in scope.
    ret: Option<TypeRef>,
  },
  StmtExpr(Vec<NodeId>),

  // Statements
  ExprStmt(NodeId),
  Return(NodeId),
  Block(Vec<NodeId>),
  If {
    cond: NodeId,
    then: NodeId,
    els: Option<NodeId>,
  },
  /// `for` and `while` loops; `while` leaves `init` and `inc` empty.
  For {
    init: Option<NodeId>,
    cond: Option<NodeId>,
    inc: Option<NodeId>,
    body: NodeId,
  },
}

#[derive(Debug, Clone)]
pub struct Node {
  pub kind: NodeKind,
  /// Byte offset of the token that introduced this node.
  pub loc: usize,
  /// Result type, filled in by the type-annotation pass.
  pub ty: Option<TypeRef>,
}

impl NodeKind {
  /// Structural children, in evaluation order.
  pub fn children(&self) -> Vec<NodeId> {
    match self {
      Self::Num(_) | Self::Var(_) => Vec::new(),
      Self::Neg(operand)
      | Self::Not(operand)
      | Self::BitNot(operand)
      | Self::Addr(operand)
      | Self::Deref(operand)
      | Self::ExprStmt(operand)
      | Self::Return(operand) => vec![*operand],
      Self::Member { base, .. } => vec![*base],
      Self::Binary { lhs, rhs, .. }
      | Self::LogAnd { lhs, rhs }
      | Self::LogOr { lhs, rhs }
      | Self::Assign { lhs, rhs }
      | Self::Comma { lhs, rhs } => vec![*lhs, *rhs],
      Self::Call { args, .. } => args.clone(),
      Self::StmtExpr(body) | Self::Block(body) => body.clone(),
      Self::If { cond, then, els } => [Some(*cond), Some(*then), *els].into_iter().flatten().collect(),
      Self::For {
        init,
        cond,
        inc,
        body,
      } => [*init, *cond, *inc, Some(*body)].into_iter().flatten().collect(),
    }
  }
}

/// A function's frame, parameters and body.
#[derive(Debug, Clone, Default)]
pub struct Function {
  pub params: Vec<ObjId>,
  /// Every local in declaration order, parameters first.
  pub locals: Vec<ObjId>,
  pub body: Option<NodeId>,
  pub stack_size: i64,
  pub is_definition: bool,
}

#[derive(Debug, Clone)]
pub enum ObjKind {
  Local {
    /// Offset from `%rbp`, assigned during frame layout.
    offset: i64,
  },
  Global {
    init_data: Option<Vec<u8>>,
    /// Compiler-generated objects (string literals) stay file-local.
    is_anonymous: bool,
  },
  Function(Function),
}

/// A named storage location or function.
#[derive(Debug, Clone)]
pub struct Obj {
  pub name: String,
  pub ty: TypeRef,
  pub kind: ObjKind,
}

impl Obj {
  pub fn as_function(&self) -> Option<&Function> {
    match &self.kind {
      ObjKind::Function(func) => Some(func),
      _ => None,
    }
  }
}

/// One translation unit: the node and object arenas plus the top-level
/// objects in declaration order.
#[derive(Debug, Default)]
pub struct Program {
  pub nodes: Vec<Node>,
  pub objs: Vec<Obj>,
  pub globals: Vec<ObjId>,
}

impl Program {
  pub fn add_node(&mut self, kind: NodeKind, loc: usize) -> NodeId {
    let id = NodeId(self.nodes.len() as u32);
    self.nodes.push(Node { kind, loc, ty: None });
    id
  }

  pub fn add_obj(&mut self, obj: Obj) -> ObjId {
    let id = ObjId(self.objs.len() as u32);
    self.objs.push(obj);
    id
  }

  pub fn node(&self, id: NodeId) -> &Node {
    &self.nodes[id.0 as usize]
  }

  pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
    &mut self.nodes[id.0 as usize]
  }

  pub fn obj(&self, id: ObjId) -> &Obj {
    &self.objs[id.0 as usize]
  }

  pub fn obj_mut(&mut self, id: ObjId) -> &mut Obj {
    &mut self.objs[id.0 as usize]
  }

  /// Type of a node that has already been through `add_type`.
  pub fn ty(&self, id: NodeId) -> Option<&TypeRef> {
    self.node(id).ty.as_ref()
  }

  /// Iterate top-level function objects.
  pub fn functions(&self) -> impl Iterator<Item = (ObjId, &Function)> {
    self
      .globals
      .iter()
      .filter_map(|&id| self.obj(id).as_function().map(|func| (id, func)))
  }
}
