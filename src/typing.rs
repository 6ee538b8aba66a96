//! Type annotation: assigns a result type to every expression node.
//!
//! The pass is bottom-up and idempotent. A node that already carries a type is
//! left alone, which lets the parser annotate operands eagerly (pointer
//! arithmetic, `sizeof`, member access) without double-processing them when
//! the enclosing statement is annotated later.

use crate::SourceFile;
use crate::ast::{BinaryOp, NodeId, NodeKind, Program};
use crate::error::{CompileError, CompileResult};
use crate::ty::{TypeRef, pointer_to, ty_int, ty_long};

impl Program {
  /// Annotate `id` and everything below it.
  pub fn add_type(&mut self, src: &SourceFile, id: NodeId) -> CompileResult<()> {
    if self.node(id).ty.is_some() {
      return Ok(());
    }

    for child in self.node(id).kind.children() {
      self.add_type(src, child)?;
    }

    let ty = self.infer(src, id)?;
    self.node_mut(id).ty = ty;
    Ok(())
  }

  /// Type of an already-annotated child.
  fn typed(&self, id: NodeId) -> CompileResult<TypeRef> {
    self
      .ty(id)
      .cloned()
      .ok_or_else(|| CompileError::internal("operand used before it was typed"))
  }

  fn infer(&self, src: &SourceFile, id: NodeId) -> CompileResult<Option<TypeRef>> {
    let node = self.node(id);
    let error = |message: &str| CompileError::at(src, node.loc, message);

    let ty = match &node.kind {
      NodeKind::Num(value) => {
        if i32::try_from(*value).is_ok() {
          ty_int()
        } else {
          ty_long()
        }
      }
      NodeKind::Binary { op, lhs, rhs } => {
        let lhs_ty = self.typed(*lhs)?;
        let rhs_ty = self.typed(*rhs)?;
        match op {
          BinaryOp::Mod | BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor
            if !lhs_ty.is_integer() || !rhs_ty.is_integer() =>
          {
            return Err(error("invalid operands"));
          }
          _ if lhs_ty.is_aggregate() || rhs_ty.is_aggregate() => {
            return Err(error("invalid operands"));
          }
          op if op.is_comparison() => ty_int(),
          _ => lhs_ty,
        }
      }
      NodeKind::Neg(operand) | NodeKind::BitNot(operand) => self.typed(*operand)?,
      NodeKind::Not(_) | NodeKind::LogAnd { .. } | NodeKind::LogOr { .. } => ty_int(),
      NodeKind::Assign { lhs, .. } => {
        let lhs_ty = self.typed(*lhs)?;
        if lhs_ty.is_array() {
          return Err(error("not an lvalue"));
        }
        lhs_ty
      }
      NodeKind::Comma { rhs, .. } => self.typed(*rhs)?,
      NodeKind::Addr(operand) => {
        let operand_ty = self.typed(*operand)?;
        match operand_ty.base() {
          Some(base) if operand_ty.is_array() => pointer_to(base.clone()),
          _ => pointer_to(operand_ty.clone()),
        }
      }
      NodeKind::Deref(operand) => {
        let operand_ty = self.typed(*operand)?;
        let Some(base) = operand_ty.base() else {
          return Err(error("invalid pointer dereference"));
        };
        base.clone()
      }
      NodeKind::Member { member, .. } => member.ty.clone(),
      NodeKind::Var(obj) => self.obj(*obj).ty.clone(),
      NodeKind::Call { ret, .. } => ret.clone().unwrap_or_else(ty_int),
      NodeKind::StmtExpr(body) => {
        let last = body.last().map(|&stmt| &self.node(stmt).kind);
        let Some(NodeKind::ExprStmt(expr)) = last else {
          return Err(error(
            "statement expression returning void is not supported",
          ));
        };
        self.typed(*expr)?
      }
      NodeKind::ExprStmt(_)
      | NodeKind::Return(_)
      | NodeKind::Block(_)
      | NodeKind::If { .. }
      | NodeKind::For { .. } => return Ok(None),
    };

    Ok(Some(ty))
  }
}
