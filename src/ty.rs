//! C type model: primitive singletons, derived types and aggregate layout.
//!
//! Types are immutable once built and shared through [`TypeRef`]. Primitive
//! types are cached per thread so every `int` in a compilation is the same
//! allocation; pointer, array, function and aggregate types are allocated by
//! the constructor that introduces them.

use std::rc::Rc;

pub type TypeRef = Rc<Type>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
  Void,
  Char,
  Short,
  Int,
  Long,
  Ptr { base: TypeRef },
  Array { base: TypeRef, len: i64 },
  Func { ret: TypeRef, params: Vec<Param> },
  Struct { members: Vec<Member> },
  Union { members: Vec<Member> },
}

/// A function parameter as written in a declarator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
  pub name: Option<String>,
  /// Byte offset of the parameter's declarator, for diagnostics.
  pub loc: usize,
  pub ty: TypeRef,
}

/// A struct or union member with its resolved byte offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
  pub name: String,
  pub ty: TypeRef,
  pub offset: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Type {
  pub kind: TypeKind,
  pub size: i64,
  pub align: i64,
}

thread_local! {
  static VOID: TypeRef = Rc::new(Type::new(TypeKind::Void, 1, 1));
  static CHAR: TypeRef = Rc::new(Type::new(TypeKind::Char, 1, 1));
  static SHORT: TypeRef = Rc::new(Type::new(TypeKind::Short, 2, 2));
  static INT: TypeRef = Rc::new(Type::new(TypeKind::Int, 4, 4));
  static LONG: TypeRef = Rc::new(Type::new(TypeKind::Long, 8, 8));
}

pub fn ty_void() -> TypeRef {
  VOID.with(Rc::clone)
}

pub fn ty_char() -> TypeRef {
  CHAR.with(Rc::clone)
}

pub fn ty_short() -> TypeRef {
  SHORT.with(Rc::clone)
}

pub fn ty_int() -> TypeRef {
  INT.with(Rc::clone)
}

pub fn ty_long() -> TypeRef {
  LONG.with(Rc::clone)
}

/// Round `n` up to the nearest multiple of `align`, or `None` on overflow.
pub fn align_to(n: i64, align: i64) -> Option<i64> {
  Some(n.checked_add(align - 1)? / align * align)
}

impl Type {
  pub fn new(kind: TypeKind, size: i64, align: i64) -> Self {
    Self { kind, size, align }
  }

  pub fn is_integer(&self) -> bool {
    matches!(
      self.kind,
      TypeKind::Char | TypeKind::Short | TypeKind::Int | TypeKind::Long
    )
  }

  /// Pointee or element type; arrays decay through this in arithmetic.
  pub fn base(&self) -> Option<&TypeRef> {
    match &self.kind {
      TypeKind::Ptr { base } | TypeKind::Array { base, .. } => Some(base),
      _ => None,
    }
  }

  pub fn is_array(&self) -> bool {
    matches!(self.kind, TypeKind::Array { .. })
  }

  pub fn is_void(&self) -> bool {
    matches!(self.kind, TypeKind::Void)
  }

  pub fn is_func(&self) -> bool {
    matches!(self.kind, TypeKind::Func { .. })
  }

  /// Struct or union; these are copied byte-wise and accessed by address.
  pub fn is_aggregate(&self) -> bool {
    matches!(self.kind, TypeKind::Struct { .. } | TypeKind::Union { .. })
  }

  pub fn members(&self) -> Option<&[Member]> {
    match &self.kind {
      TypeKind::Struct { members } | TypeKind::Union { members } => Some(members),
      _ => None,
    }
  }

  pub fn find_member(&self, name: &str) -> Option<&Member> {
    self.members()?.iter().find(|m| m.name == name)
  }

  /// Decouple a type from the declarator that produced it.
  pub fn copy(&self) -> TypeRef {
    Rc::new(self.clone())
  }
}

pub fn pointer_to(base: TypeRef) -> TypeRef {
  Rc::new(Type::new(TypeKind::Ptr { base }, 8, 8))
}

/// `None` when the array would not fit in the address space.
pub fn array_of(base: TypeRef, len: i64) -> Option<TypeRef> {
  let size = base.size.checked_mul(len)?;
  let align = base.align;
  Some(Rc::new(Type::new(TypeKind::Array { base, len }, size, align)))
}

pub fn func_type(ret: TypeRef, params: Vec<Param>) -> TypeRef {
  Rc::new(Type::new(TypeKind::Func { ret, params }, 1, 1))
}

/// Lay out members in declaration order, each at its own alignment.
pub fn struct_of(fields: Vec<(String, TypeRef)>) -> Option<TypeRef> {
  let mut offset = 0;
  let mut align = 1;
  let mut members = Vec::with_capacity(fields.len());
  for (name, ty) in fields {
    offset = align_to(offset, ty.align)?;
    let member = Member { name, offset, ty };
    offset = offset.checked_add(member.ty.size)?;
    align = align.max(member.ty.align);
    members.push(member);
  }

  Some(Rc::new(Type::new(
    TypeKind::Struct { members },
    align_to(offset, align)?,
    align,
  )))
}

/// Every union member lives at offset zero.
pub fn union_of(fields: Vec<(String, TypeRef)>) -> Option<TypeRef> {
  let mut size = 0;
  let mut align = 1;
  let members = fields
    .into_iter()
    .map(|(name, ty)| {
      size = size.max(ty.size);
      align = align.max(ty.align);
      Member {
        name,
        ty,
        offset: 0,
      }
    })
    .collect();

  Some(Rc::new(Type::new(
    TypeKind::Union { members },
    align_to(size, align)?,
    align,
  )))
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  fn field(name: &str, ty: TypeRef) -> (String, TypeRef) {
    (name.to_string(), ty)
  }

  #[test]
  fn primitives_are_shared() {
    assert!(Rc::ptr_eq(&ty_int(), &ty_int()));
    assert_eq!(ty_char().size, 1);
    assert_eq!(ty_short().size, 2);
    assert_eq!(ty_long().align, 8);
  }

  #[test]
  fn derived_types() {
    let p = pointer_to(ty_char());
    assert_eq!((p.size, p.align), (8, 8));
    assert!(Rc::ptr_eq(p.base().unwrap(), &ty_char()));

    let grid = array_of(array_of(ty_int(), 3).unwrap(), 2).unwrap();
    assert_eq!(grid.size, 24);
    assert_eq!(grid.align, 4);
    assert_eq!(grid.base().unwrap().size, 12);
    assert!(!grid.is_integer());
    assert!(ty_long().is_integer());
  }

  #[test]
  fn struct_members_are_padded_to_alignment() {
    let s = struct_of(vec![field("a", ty_char()), field("b", ty_int())]).unwrap();
    assert_eq!(s.find_member("b").unwrap().offset, 4);
    assert_eq!(s.size, 8);
    assert_eq!(s.align, 4);

    let t = struct_of(vec![
      field("a", ty_long()),
      field("b", ty_char()),
    ])
    .unwrap();
    assert_eq!(t.size, 16);
    assert!(t.find_member("c").is_none());
  }

  #[test]
  fn union_takes_largest_member() {
    let u = union_of(vec![
      field("c", array_of(ty_char(), 5).unwrap()),
      field("i", ty_int()),
    ])
    .unwrap();
    assert!(u.members().unwrap().iter().all(|m| m.offset == 0));
    assert_eq!(u.size, 8);
    assert_eq!(u.align, 4);
  }

  #[test]
  fn oversized_layouts_are_refused() {
    assert!(array_of(ty_int(), i64::MAX / 2).is_none());
    let huge = array_of(ty_char(), i64::MAX).unwrap();
    assert!(struct_of(vec![field("a", ty_char()), field("b", huge.clone())]).is_none());
    assert!(union_of(vec![field("a", huge), field("b", ty_int())]).is_none());
    assert_eq!(align_to(i64::MAX, 8), None);
    assert_eq!(align_to(13, 8), Some(16));
  }

  #[test]
  fn copy_is_independent() {
    let shared = pointer_to(ty_int());
    let copy = shared.copy();
    assert!(!Rc::ptr_eq(&shared, &copy));

    let mut edited = (*copy).clone();
    edited.size = 99;
    assert_eq!(edited.size, 99);
    assert_eq!(shared.size, 8);
    assert_eq!(copy.size, 8);
  }
}
