// SPDX-License-Identifier: Apache-2.0

//! Tagged symbolic values for IR results.
//!
//! Every IR value the encoder tracks is one of `Index`, `Integer`, `Float`,
//! `Tensor` or `MemRef`. Scalar cross-cutting code works on the common
//! `Expr` projection; accessing the wrong tag is a programmer error, not a
//! recoverable failure.

use crate::encode::memref::MemRef;
use crate::encode::tensor::Tensor;
use crate::smt::{Expr, FpPrec, Sort};
use crate::tv_ir::ir::{ElemType, Type};

/// A dimension or offset: an unsigned bit-vector of `Index::BITS` bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index(Expr);

impl Index {
    pub const BITS: u32 = 32;

    pub fn sort() -> Sort {
        Sort::Bv(Index::BITS)
    }

    pub fn constant(v: i64) -> Index {
        Index(Expr::mk_bv(v as u64, Index::BITS))
    }

    pub fn zero() -> Index {
        Index::constant(0)
    }

    pub fn one() -> Index {
        Index::constant(1)
    }

    pub fn from_expr(e: Expr) -> Index {
        assert_eq!(e.sort(), Index::sort(), "index must be a {}-bit vector", Index::BITS);
        Index(e)
    }

    pub fn expr(&self) -> &Expr {
        &self.0
    }

    pub fn into_expr(self) -> Expr {
        self.0
    }

    /// Adds a (possibly negative) constant offset.
    pub fn ofs(&self, d: i64) -> Index {
        Index(self.0.clone().add(&Expr::mk_bv(d as u64, Index::BITS)))
    }

    /// Fresh bound variables used to build lambdas and quantifiers.
    pub fn bound_index_vars(n: usize) -> Vec<Expr> {
        (0..n).map(|_| Expr::fresh_var("idx", Index::sort())).collect()
    }

    pub fn fresh(prefix: &str) -> Index {
        Index(Expr::fresh_var(prefix, Index::sort()))
    }
}

/// An integer of a fixed bit width; `i1` carries booleans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Integer(Expr);

impl Integer {
    pub fn constant(v: i64, width: u32) -> Integer {
        Integer(Expr::mk_bv(v as u64, width))
    }

    pub fn bool_true() -> Integer {
        Integer::constant(1, 1)
    }

    pub fn bool_false() -> Integer {
        Integer::constant(0, 1)
    }

    pub fn from_expr(e: Expr) -> Integer {
        assert!(e.sort().is_bv(), "integer must be a bit-vector");
        Integer(e)
    }

    pub fn expr(&self) -> &Expr {
        &self.0
    }

    pub fn into_expr(self) -> Expr {
        self.0
    }

    pub fn bitwidth(&self) -> u32 {
        self.0.bitwidth()
    }
}

/// An abstract float: an uninterpreted term of sort `Fp` plus its precision.
/// Two floats are equal only when the solver proves the terms equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Float {
    e: Expr,
    prec: FpPrec,
}

impl Float {
    pub fn sort(prec: FpPrec) -> Sort {
        Sort::Fp(prec)
    }

    /// A literal constant, identified by its bit pattern. Distinct patterns
    /// give distinct terms; the backend axiomatizes nothing else about them.
    pub fn constant(bits: u64, prec: FpPrec) -> Float {
        let width = match prec {
            FpPrec::F32 => 32,
            FpPrec::F64 => 64,
        };
        let e = Expr::app(
            &format!("fp.const.{}", prec.suffix()),
            vec![Expr::mk_bv(bits, width)],
            Float::sort(prec),
        );
        Float { e, prec }
    }

    pub fn from_expr(e: Expr, prec: FpPrec) -> Float {
        assert_eq!(e.sort(), Float::sort(prec), "float term has wrong sort");
        Float { e, prec }
    }

    pub fn prec(&self) -> FpPrec {
        self.prec
    }

    pub fn expr(&self) -> &Expr {
        &self.e
    }

    pub fn into_expr(self) -> Expr {
        self.e
    }

    fn apply2(&self, name: &str, rhs: &Float) -> Float {
        assert_eq!(self.prec, rhs.prec, "mixed-precision float op");
        let e = Expr::app(
            &format!("{}.{}", name, self.prec.suffix()),
            vec![self.e.clone(), rhs.e.clone()],
            Float::sort(self.prec),
        );
        Float { e, prec: self.prec }
    }

    fn apply1(&self, name: &str) -> Float {
        let e = Expr::app(
            &format!("{}.{}", name, self.prec.suffix()),
            vec![self.e.clone()],
            Float::sort(self.prec),
        );
        Float { e, prec: self.prec }
    }

    pub fn add(&self, rhs: &Float) -> Float {
        self.apply2("fp.add", rhs)
    }

    pub fn mul(&self, rhs: &Float) -> Float {
        self.apply2("fp.mul", rhs)
    }

    pub fn neg(&self) -> Float {
        self.apply1("fp.neg")
    }

    pub fn abs(&self) -> Float {
        self.apply1("fp.abs")
    }

    pub fn extend(&self, to: FpPrec) -> Float {
        assert!(to > self.prec, "extend must widen");
        let e = Expr::app(
            &format!("fp.ext.{}.{}", self.prec.suffix(), to.suffix()),
            vec![self.e.clone()],
            Float::sort(to),
        );
        Float { e, prec: to }
    }

    pub fn truncate(&self, to: FpPrec) -> Float {
        assert!(to < self.prec, "truncate must narrow");
        let e = Expr::app(
            &format!("fp.trunc.{}.{}", self.prec.suffix(), to.suffix()),
            vec![self.e.clone()],
            Float::sort(to),
        );
        Float { e, prec: to }
    }

    /// Ordered less-than; returns an `i1` term.
    pub fn fult(&self, rhs: &Float) -> Integer {
        assert_eq!(self.prec, rhs.prec, "mixed-precision comparison");
        Integer::from_expr(Expr::app(
            &format!("fp.ult.{}", self.prec.suffix()),
            vec![self.e.clone(), rhs.e.clone()],
            Sort::Bv(1),
        ))
    }
}

/// Scalar float operations on raw element terms, used when mapping over
/// tensor bodies (the element sort already fixes the precision).
pub fn fp_add(prec: FpPrec, a: Expr, b: Expr) -> Expr {
    Float::from_expr(a, prec).add(&Float::from_expr(b, prec)).into_expr()
}

pub fn fp_mul(prec: FpPrec, a: Expr, b: Expr) -> Expr {
    Float::from_expr(a, prec).mul(&Float::from_expr(b, prec)).into_expr()
}

pub fn fp_neg(prec: FpPrec, a: Expr) -> Expr {
    Float::from_expr(a, prec).neg().into_expr()
}

/// The solver sort of a tensor/memref element.
pub fn elem_sort(elem: ElemType) -> Sort {
    match elem {
        ElemType::Int(w) => Sort::Bv(w),
        ElemType::Float(p) => Sort::Fp(p),
        ElemType::Index => Index::sort(),
    }
}

/// The tagged symbolic value of an IR result.
#[derive(Debug, Clone)]
pub enum Value {
    Index(Index),
    Int(Integer),
    Float(Float),
    Tensor(Tensor),
    MemRef(MemRef),
}

impl Value {
    /// The common scalar projection. Calling this on a tensor or memref is
    /// a programmer error.
    pub fn expr(&self) -> Expr {
        match self {
            Value::Index(i) => i.expr().clone(),
            Value::Int(i) => i.expr().clone(),
            Value::Float(f) => f.expr().clone(),
            Value::Tensor(_) | Value::MemRef(_) => {
                panic!("scalar projection of a shaped value")
            }
        }
    }
}

/// Wraps a raw term with the tag the IR type prescribes. Returns `None` for
/// shaped types (tensor/memref terms are not built from a single `Expr`).
pub fn from_expr(e: Expr, ty: &Type) -> Option<Value> {
    match ty {
        Type::Index => Some(Value::Index(Index::from_expr(e))),
        Type::Int(w) => {
            assert_eq!(e.sort().bitwidth(), *w, "integer width mismatch");
            Some(Value::Int(Integer::from_expr(e)))
        }
        Type::Float(p) => Some(Value::Float(Float::from_expr(e, *p))),
        Type::Tensor(_) | Type::MemRef(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_arithmetic_saturates_to_width() {
        let i = Index::constant(-1);
        assert_eq!(i.expr().as_u64(), Some(u64::from(u32::MAX)));
        assert_eq!(Index::constant(7).ofs(-2).expr().as_u64(), Some(5));
    }

    #[test]
    fn bool_integers_are_width_one() {
        assert_eq!(Integer::bool_true().bitwidth(), 1);
        assert_eq!(Integer::bool_true().expr().as_u64(), Some(1));
        assert_eq!(Integer::bool_false().expr().as_u64(), Some(0));
    }

    #[test]
    fn equal_float_constants_have_equal_terms() {
        let a = Float::constant(0x3f80_0000, FpPrec::F32);
        let b = Float::constant(0x3f80_0000, FpPrec::F32);
        let c = Float::constant(0x4000_0000, FpPrec::F32);
        assert_eq!(a.expr(), b.expr());
        assert_ne!(a.expr(), c.expr());
    }

    #[test]
    fn float_ops_keep_precision() {
        let a = Float::constant(1, FpPrec::F32);
        let b = Float::constant(2, FpPrec::F32);
        assert_eq!(a.add(&b).prec(), FpPrec::F32);
        assert_eq!(a.mul(&b).expr().sort(), Sort::Fp(FpPrec::F32));
        assert_eq!(a.extend(FpPrec::F64).prec(), FpPrec::F64);
        assert_eq!(a.fult(&b).bitwidth(), 1);
    }

    #[test]
    #[should_panic]
    fn mixed_precision_add_is_a_contract_violation() {
        let a = Float::constant(1, FpPrec::F32);
        let b = Float::constant(1, FpPrec::F64);
        let _ = a.add(&b);
    }
}
