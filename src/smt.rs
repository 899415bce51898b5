// SPDX-License-Identifier: Apache-2.0

//! Owned symbolic term algebra.
//!
//! Terms are immutable trees with `Rc` sharing. Constructors perform light
//! simplification (constant folding, identity elimination); downstream code
//! must never rely on a particular simplified shape, only on the semantics.
//!
//! Floats have no bit-level semantics here: they are terms of an abstract
//! `Fp` sort combined with uninterpreted applications (`fp.add.f32`, ...).
//! The backend that lowers these terms to a concrete solver introduces the
//! algebraic axioms.

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Floating-point precision tag. F16 is unsupported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FpPrec {
    F32,
    F64,
}

impl FpPrec {
    pub fn suffix(&self) -> &'static str {
        match self {
            FpPrec::F32 => "f32",
            FpPrec::F64 => "f64",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Sort {
    Bool,
    Bv(u32),
    /// Abstract float sort; carries only the precision tag.
    Fp(FpPrec),
    Array(Box<Sort>, Box<Sort>),
}

impl Sort {
    pub fn bitwidth(&self) -> u32 {
        match self {
            Sort::Bv(w) => *w,
            _ => panic!("bitwidth called on non-bitvector sort {:?}", self),
        }
    }

    pub fn is_bv(&self) -> bool {
        matches!(self, Sort::Bv(_))
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Sort::Bool)
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Sort::Array(..))
    }

    pub fn array_range(&self) -> &Sort {
        match self {
            Sort::Array(_, r) => r,
            _ => panic!("array_range called on non-array sort {:?}", self),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Hash)]
enum Node {
    BoolConst(bool),
    /// Value is kept truncated to the width.
    BvConst { width: u32, value: u64 },
    Var { name: String, sort: Sort },

    // Bit-vector arithmetic.
    Add(Expr, Expr),
    Sub(Expr, Expr),
    Mul(Expr, Expr),
    UDiv(Expr, Expr),
    URem(Expr, Expr),

    // Comparisons (result sort Bool).
    Ule(Expr, Expr),
    Ult(Expr, Expr),
    Eq(Expr, Expr),

    // Bitwise on Bv, logical on Bool.
    And(Expr, Expr),
    Or(Expr, Expr),
    Xor(Expr, Expr),
    Not(Expr),

    Implies(Expr, Expr),

    Extract { hi: u32, lo: u32, arg: Expr },
    SExt { bits: u32, arg: Expr },

    Ite(Expr, Expr, Expr),

    Select(Expr, Expr),
    Store(Expr, Expr, Expr),

    Lambda { vars: Vec<Expr>, body: Expr },
    Forall { vars: Vec<Expr>, body: Expr },

    /// Uninterpreted application; the sort must be supplied at construction.
    App { name: String, args: Vec<Expr>, sort: Sort },
}

/// A symbolic term. Cheap to clone.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Expr {
    node: Rc<Node>,
}

static FRESH_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Returns a name that no other call site has handed out.
pub fn fresh_name(prefix: &str) -> String {
    let n = FRESH_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}#{}", prefix, n)
}

fn mask(width: u32, value: u64) -> u64 {
    if width >= 64 {
        value
    } else {
        value & ((1u64 << width) - 1)
    }
}

impl Expr {
    fn new(node: Node) -> Expr {
        Expr { node: Rc::new(node) }
    }

    // ---- constants and variables -------------------------------------

    pub fn mk_bool(b: bool) -> Expr {
        Expr::new(Node::BoolConst(b))
    }

    pub fn mk_bv(value: u64, width: u32) -> Expr {
        assert!(width > 0, "zero-width bit-vector");
        Expr::new(Node::BvConst { width, value: mask(width, value) })
    }

    pub fn var(name: &str, sort: Sort) -> Expr {
        Expr::new(Node::Var { name: name.to_string(), sort })
    }

    /// A fresh free variable; the returned name is never reused.
    pub fn fresh_var(prefix: &str, sort: Sort) -> Expr {
        Expr::var(&fresh_name(prefix), sort)
    }

    pub fn app(name: &str, args: Vec<Expr>, sort: Sort) -> Expr {
        Expr::new(Node::App { name: name.to_string(), args, sort })
    }

    // ---- inspection --------------------------------------------------

    pub fn sort(&self) -> Sort {
        match &*self.node {
            Node::BoolConst(_) => Sort::Bool,
            Node::BvConst { width, .. } => Sort::Bv(*width),
            Node::Var { sort, .. } => sort.clone(),
            Node::Add(a, _)
            | Node::Sub(a, _)
            | Node::Mul(a, _)
            | Node::UDiv(a, _)
            | Node::URem(a, _) => a.sort(),
            Node::Ule(..) | Node::Ult(..) | Node::Eq(..) | Node::Implies(..) => Sort::Bool,
            Node::And(a, _) | Node::Or(a, _) | Node::Xor(a, _) => a.sort(),
            Node::Not(a) => a.sort(),
            Node::Extract { hi, lo, .. } => Sort::Bv(hi - lo + 1),
            Node::SExt { bits, arg } => Sort::Bv(arg.sort().bitwidth() + bits),
            Node::Ite(_, t, _) => t.sort(),
            Node::Select(a, _) => a.sort().array_range().clone(),
            Node::Store(a, _, _) => a.sort(),
            Node::Lambda { vars, body } => {
                // Multi-var lambdas curry from the left.
                let mut s = body.sort();
                for v in vars.iter().rev() {
                    s = Sort::Array(Box::new(v.sort()), Box::new(s));
                }
                s
            }
            Node::Forall { .. } => Sort::Bool,
            Node::App { sort, .. } => sort.clone(),
        }
    }

    pub fn bitwidth(&self) -> u32 {
        self.sort().bitwidth()
    }

    /// Constant value, if this term is a bit-vector literal.
    pub fn as_u64(&self) -> Option<u64> {
        match &*self.node {
            Node::BvConst { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match &*self.node {
            Node::BoolConst(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_true(&self) -> bool {
        self.as_bool() == Some(true)
    }

    pub fn is_false(&self) -> bool {
        self.as_bool() == Some(false)
    }

    pub fn var_name(&self) -> Option<&str> {
        match &*self.node {
            Node::Var { name, .. } => Some(name),
            _ => None,
        }
    }

    // ---- bit-vector arithmetic ---------------------------------------

    pub fn add(&self, rhs: &Expr) -> Expr {
        self.assert_same_bv(rhs);
        match (self.as_u64(), rhs.as_u64()) {
            (Some(a), Some(b)) => Expr::mk_bv(a.wrapping_add(b), self.bitwidth()),
            (Some(0), _) => rhs.clone(),
            (_, Some(0)) => self.clone(),
            _ => Expr::new(Node::Add(self.clone(), rhs.clone())),
        }
    }

    pub fn sub(&self, rhs: &Expr) -> Expr {
        self.assert_same_bv(rhs);
        match (self.as_u64(), rhs.as_u64()) {
            (Some(a), Some(b)) => Expr::mk_bv(a.wrapping_sub(b), self.bitwidth()),
            (_, Some(0)) => self.clone(),
            _ => Expr::new(Node::Sub(self.clone(), rhs.clone())),
        }
    }

    pub fn mul(&self, rhs: &Expr) -> Expr {
        self.assert_same_bv(rhs);
        match (self.as_u64(), rhs.as_u64()) {
            (Some(a), Some(b)) => Expr::mk_bv(a.wrapping_mul(b), self.bitwidth()),
            (Some(1), _) => rhs.clone(),
            (_, Some(1)) => self.clone(),
            (Some(0), _) | (_, Some(0)) => Expr::mk_bv(0, self.bitwidth()),
            _ => Expr::new(Node::Mul(self.clone(), rhs.clone())),
        }
    }

    pub fn udiv(&self, rhs: &Expr) -> Expr {
        self.assert_same_bv(rhs);
        match (self.as_u64(), rhs.as_u64()) {
            (Some(a), Some(b)) if b != 0 => Expr::mk_bv(a / b, self.bitwidth()),
            (_, Some(1)) => self.clone(),
            _ => Expr::new(Node::UDiv(self.clone(), rhs.clone())),
        }
    }

    pub fn urem(&self, rhs: &Expr) -> Expr {
        self.assert_same_bv(rhs);
        match (self.as_u64(), rhs.as_u64()) {
            (Some(a), Some(b)) if b != 0 => Expr::mk_bv(a % b, self.bitwidth()),
            (_, Some(1)) => Expr::mk_bv(0, self.bitwidth()),
            _ => Expr::new(Node::URem(self.clone(), rhs.clone())),
        }
    }

    // ---- comparisons -------------------------------------------------

    pub fn ule(&self, rhs: &Expr) -> Expr {
        self.assert_same_bv(rhs);
        match (self.as_u64(), rhs.as_u64()) {
            (Some(a), Some(b)) => Expr::mk_bool(a <= b),
            (Some(0), _) => Expr::mk_bool(true),
            _ => Expr::new(Node::Ule(self.clone(), rhs.clone())),
        }
    }

    pub fn ult(&self, rhs: &Expr) -> Expr {
        self.assert_same_bv(rhs);
        match (self.as_u64(), rhs.as_u64()) {
            (Some(a), Some(b)) => Expr::mk_bool(a < b),
            (_, Some(0)) => Expr::mk_bool(false),
            _ => Expr::new(Node::Ult(self.clone(), rhs.clone())),
        }
    }

    pub fn eq(&self, rhs: &Expr) -> Expr {
        assert_eq!(self.sort(), rhs.sort(), "eq over mismatched sorts");
        if self == rhs {
            return Expr::mk_bool(true);
        }
        match (&*self.node, &*rhs.node) {
            (Node::BvConst { value: a, .. }, Node::BvConst { value: b, .. }) => {
                Expr::mk_bool(a == b)
            }
            (Node::BoolConst(a), Node::BoolConst(b)) => Expr::mk_bool(a == b),
            _ => Expr::new(Node::Eq(self.clone(), rhs.clone())),
        }
    }

    pub fn is_zero(&self) -> Expr {
        self.eq(&Expr::mk_bv(0, self.bitwidth()))
    }

    pub fn is_non_zero(&self) -> Expr {
        self.is_zero().not()
    }

    // ---- boolean / bitwise -------------------------------------------

    pub fn and(&self, rhs: &Expr) -> Expr {
        assert_eq!(self.sort(), rhs.sort(), "and over mismatched sorts");
        if self.sort().is_bool() {
            if self.is_true() {
                return rhs.clone();
            }
            if rhs.is_true() {
                return self.clone();
            }
            if self.is_false() || rhs.is_false() {
                return Expr::mk_bool(false);
            }
        } else if let (Some(a), Some(b)) = (self.as_u64(), rhs.as_u64()) {
            return Expr::mk_bv(a & b, self.bitwidth());
        }
        Expr::new(Node::And(self.clone(), rhs.clone()))
    }

    pub fn or(&self, rhs: &Expr) -> Expr {
        assert_eq!(self.sort(), rhs.sort(), "or over mismatched sorts");
        if self.sort().is_bool() {
            if self.is_false() {
                return rhs.clone();
            }
            if rhs.is_false() {
                return self.clone();
            }
            if self.is_true() || rhs.is_true() {
                return Expr::mk_bool(true);
            }
        } else if let (Some(a), Some(b)) = (self.as_u64(), rhs.as_u64()) {
            return Expr::mk_bv(a | b, self.bitwidth());
        }
        Expr::new(Node::Or(self.clone(), rhs.clone()))
    }

    pub fn xor(&self, rhs: &Expr) -> Expr {
        assert_eq!(self.sort(), rhs.sort(), "xor over mismatched sorts");
        if let (Some(a), Some(b)) = (self.as_u64(), rhs.as_u64()) {
            return Expr::mk_bv(a ^ b, self.bitwidth());
        }
        Expr::new(Node::Xor(self.clone(), rhs.clone()))
    }

    pub fn not(&self) -> Expr {
        match &*self.node {
            Node::BoolConst(b) => Expr::mk_bool(!b),
            Node::BvConst { width, value } => Expr::mk_bv(!value, *width),
            Node::Not(inner) => inner.clone(),
            _ => Expr::new(Node::Not(self.clone())),
        }
    }

    pub fn implies(&self, rhs: &Expr) -> Expr {
        assert!(self.sort().is_bool() && rhs.sort().is_bool());
        if self.is_false() || rhs.is_true() {
            return Expr::mk_bool(true);
        }
        if self.is_true() {
            return rhs.clone();
        }
        Expr::new(Node::Implies(self.clone(), rhs.clone()))
    }

    // ---- width changes -----------------------------------------------

    pub fn extract(&self, hi: u32, lo: u32) -> Expr {
        let w = self.bitwidth();
        assert!(lo <= hi && hi < w, "extract({hi},{lo}) out of a {w}-bit value");
        if lo == 0 && hi == w - 1 {
            return self.clone();
        }
        if let Some(v) = self.as_u64() {
            return Expr::mk_bv(v >> lo, hi - lo + 1);
        }
        Expr::new(Node::Extract { hi, lo, arg: self.clone() })
    }

    pub fn sext(&self, bits: u32) -> Expr {
        assert!(self.sort().is_bv());
        if bits == 0 {
            return self.clone();
        }
        let w = self.bitwidth();
        if let Some(v) = self.as_u64() {
            let signbit = w < 64 && (v >> (w - 1)) & 1 == 1;
            let ext = if signbit { mask(w + bits, u64::MAX) & !mask(w, u64::MAX) } else { 0 };
            return Expr::mk_bv(v | ext, w + bits);
        }
        Expr::new(Node::SExt { bits, arg: self.clone() })
    }

    // ---- structure ---------------------------------------------------

    pub fn ite(cond: &Expr, then: &Expr, els: &Expr) -> Expr {
        assert!(cond.sort().is_bool(), "ite condition must be Bool");
        assert_eq!(then.sort(), els.sort(), "ite arms over mismatched sorts");
        if cond.is_true() {
            return then.clone();
        }
        if cond.is_false() {
            return els.clone();
        }
        if then == els {
            return then.clone();
        }
        Expr::new(Node::Ite(cond.clone(), then.clone(), els.clone()))
    }

    pub fn select(&self, idx: &Expr) -> Expr {
        assert!(self.sort().is_array(), "select on non-array");
        match &*self.node {
            Node::Lambda { vars, body } if vars.len() == 1 => {
                return body.substitute(&vars[0], idx);
            }
            Node::Store(arr, i, v) => {
                if i == idx {
                    return v.clone();
                }
                if i.as_u64().is_some() && idx.as_u64().is_some() {
                    // Distinct constant indices: skip the store.
                    return arr.select(idx);
                }
            }
            _ => {}
        }
        Expr::new(Node::Select(self.clone(), idx.clone()))
    }

    pub fn store(&self, idx: &Expr, val: &Expr) -> Expr {
        assert!(self.sort().is_array(), "store on non-array");
        Expr::new(Node::Store(self.clone(), idx.clone(), val.clone()))
    }

    /// All `vars` must be free variables; they become bound in `body`.
    pub fn lambda(vars: Vec<Expr>, body: Expr) -> Expr {
        assert!(!vars.is_empty());
        assert!(vars.iter().all(|v| v.var_name().is_some()));
        Expr::new(Node::Lambda { vars, body })
    }

    pub fn forall(vars: Vec<Expr>, body: Expr) -> Expr {
        assert!(body.sort().is_bool());
        if vars.is_empty() || body.as_bool().is_some() {
            return body;
        }
        Expr::new(Node::Forall { vars, body })
    }

    /// Capture-free substitution of a named free variable.
    ///
    /// The encoder only substitutes variables created by `fresh_var`, whose
    /// names are globally unique, so shadowing cannot occur.
    pub fn substitute(&self, var: &Expr, with: &Expr) -> Expr {
        let name = var.var_name().expect("substitute target must be a variable");
        self.subst_rec(name, with)
    }

    fn subst_rec(&self, name: &str, with: &Expr) -> Expr {
        match &*self.node {
            Node::BoolConst(_) | Node::BvConst { .. } => self.clone(),
            Node::Var { name: n, .. } => {
                if n == name {
                    with.clone()
                } else {
                    self.clone()
                }
            }
            Node::Add(a, b) => a.subst_rec(name, with).add(&b.subst_rec(name, with)),
            Node::Sub(a, b) => a.subst_rec(name, with).sub(&b.subst_rec(name, with)),
            Node::Mul(a, b) => a.subst_rec(name, with).mul(&b.subst_rec(name, with)),
            Node::UDiv(a, b) => a.subst_rec(name, with).udiv(&b.subst_rec(name, with)),
            Node::URem(a, b) => a.subst_rec(name, with).urem(&b.subst_rec(name, with)),
            Node::Ule(a, b) => a.subst_rec(name, with).ule(&b.subst_rec(name, with)),
            Node::Ult(a, b) => a.subst_rec(name, with).ult(&b.subst_rec(name, with)),
            Node::Eq(a, b) => a.subst_rec(name, with).eq(&b.subst_rec(name, with)),
            Node::And(a, b) => a.subst_rec(name, with).and(&b.subst_rec(name, with)),
            Node::Or(a, b) => a.subst_rec(name, with).or(&b.subst_rec(name, with)),
            Node::Xor(a, b) => a.subst_rec(name, with).xor(&b.subst_rec(name, with)),
            Node::Not(a) => a.subst_rec(name, with).not(),
            Node::Implies(a, b) => a.subst_rec(name, with).implies(&b.subst_rec(name, with)),
            Node::Extract { hi, lo, arg } => arg.subst_rec(name, with).extract(*hi, *lo),
            Node::SExt { bits, arg } => arg.subst_rec(name, with).sext(*bits),
            Node::Ite(c, t, e) => Expr::ite(
                &c.subst_rec(name, with),
                &t.subst_rec(name, with),
                &e.subst_rec(name, with),
            ),
            Node::Select(a, i) => a.subst_rec(name, with).select(&i.subst_rec(name, with)),
            Node::Store(a, i, v) => a
                .subst_rec(name, with)
                .store(&i.subst_rec(name, with), &v.subst_rec(name, with)),
            Node::Lambda { vars, body } => {
                if vars.iter().any(|v| v.var_name() == Some(name)) {
                    return self.clone();
                }
                Expr::new(Node::Lambda {
                    vars: vars.clone(),
                    body: body.subst_rec(name, with),
                })
            }
            Node::Forall { vars, body } => {
                if vars.iter().any(|v| v.var_name() == Some(name)) {
                    return self.clone();
                }
                Expr::new(Node::Forall {
                    vars: vars.clone(),
                    body: body.subst_rec(name, with),
                })
            }
            Node::App { name: fname, args, sort } => Expr::new(Node::App {
                name: fname.clone(),
                args: args.iter().map(|a| a.subst_rec(name, with)).collect(),
                sort: sort.clone(),
            }),
        }
    }
}

impl Expr {
    fn assert_same_bv(&self, rhs: &Expr) {
        let (a, b) = (self.sort(), rhs.sort());
        assert!(
            a.is_bv() && a == b,
            "bit-vector operands expected, got {:?} and {:?}",
            a,
            b
        );
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.node {
            Node::BoolConst(b) => write!(f, "{}", b),
            Node::BvConst { width, value } => write!(f, "{}bv{}", value, width),
            Node::Var { name, .. } => write!(f, "{}", name),
            Node::Add(a, b) => write!(f, "(+ {:?} {:?})", a, b),
            Node::Sub(a, b) => write!(f, "(- {:?} {:?})", a, b),
            Node::Mul(a, b) => write!(f, "(* {:?} {:?})", a, b),
            Node::UDiv(a, b) => write!(f, "(udiv {:?} {:?})", a, b),
            Node::URem(a, b) => write!(f, "(urem {:?} {:?})", a, b),
            Node::Ule(a, b) => write!(f, "(ule {:?} {:?})", a, b),
            Node::Ult(a, b) => write!(f, "(ult {:?} {:?})", a, b),
            Node::Eq(a, b) => write!(f, "(= {:?} {:?})", a, b),
            Node::And(a, b) => write!(f, "(and {:?} {:?})", a, b),
            Node::Or(a, b) => write!(f, "(or {:?} {:?})", a, b),
            Node::Xor(a, b) => write!(f, "(xor {:?} {:?})", a, b),
            Node::Not(a) => write!(f, "(not {:?})", a),
            Node::Implies(a, b) => write!(f, "(=> {:?} {:?})", a, b),
            Node::Extract { hi, lo, arg } => write!(f, "(extract {} {} {:?})", hi, lo, arg),
            Node::SExt { bits, arg } => write!(f, "(sext {} {:?})", bits, arg),
            Node::Ite(c, t, e) => write!(f, "(ite {:?} {:?} {:?})", c, t, e),
            Node::Select(a, i) => write!(f, "(select {:?} {:?})", a, i),
            Node::Store(a, i, v) => write!(f, "(store {:?} {:?} {:?})", a, i, v),
            Node::Lambda { vars, body } => write!(f, "(lambda {:?} {:?})", vars, body),
            Node::Forall { vars, body } => write!(f, "(forall {:?} {:?})", vars, body),
            Node::App { name, args, .. } => {
                write!(f, "({}", name)?;
                for a in args {
                    write!(f, " {:?}", a)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Conjunction of pairwise equalities; true when both lists are empty.
/// Panics when the lengths differ (callers check shapes first).
pub fn lists_equal(a: &[Expr], b: &[Expr]) -> Expr {
    assert_eq!(a.len(), b.len(), "lists_equal over different lengths");
    let mut acc = Expr::mk_bool(true);
    for (x, y) in a.iter().zip(b.iter()) {
        acc = acc.and(&x.eq(y));
    }
    acc
}

/// Product of the given dimension sizes; `1` for an empty list.
pub fn fold_1d_size(dims: &[Expr]) -> Expr {
    let mut acc = match dims.first() {
        Some(d) => d.clone(),
        None => return Expr::mk_bv(1, crate::encode::value::Index::BITS),
    };
    for d in &dims[1..] {
        acc = acc.mul(d);
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bv32(v: u64) -> Expr {
        Expr::mk_bv(v, 32)
    }

    #[test]
    fn constant_folding_arith() {
        assert_eq!(bv32(3).add(&bv32(4)).as_u64(), Some(7));
        assert_eq!(bv32(10).sub(&bv32(4)).as_u64(), Some(6));
        assert_eq!(bv32(3).mul(&bv32(4)).as_u64(), Some(12));
        assert_eq!(bv32(12).udiv(&bv32(4)).as_u64(), Some(3));
        assert_eq!(bv32(13).urem(&bv32(4)).as_u64(), Some(1));
    }

    #[test]
    fn wrapping_is_per_width() {
        let a = Expr::mk_bv(0xff, 8);
        let one = Expr::mk_bv(1, 8);
        assert_eq!(a.add(&one).as_u64(), Some(0));
    }

    #[test]
    fn identity_elimination() {
        let x = Expr::var("x", Sort::Bv(32));
        assert_eq!(x.add(&bv32(0)), x);
        assert_eq!(x.mul(&bv32(1)), x);
        assert_eq!(Expr::mk_bool(true).and(&x.is_zero()), x.is_zero());
    }

    #[test]
    fn comparisons_fold() {
        assert!(bv32(3).ult(&bv32(4)).is_true());
        assert!(bv32(4).ule(&bv32(4)).is_true());
        assert!(bv32(5).ult(&bv32(4)).is_false());
        let x = Expr::var("x", Sort::Bv(32));
        assert!(x.eq(&x).is_true());
    }

    #[test]
    fn ite_on_constant_condition() {
        let t = bv32(1);
        let e = bv32(2);
        assert_eq!(Expr::ite(&Expr::mk_bool(true), &t, &e), t);
        assert_eq!(Expr::ite(&Expr::mk_bool(false), &t, &e), e);
        let c = Expr::var("c", Sort::Bool);
        assert_eq!(Expr::ite(&c, &t, &t), t);
    }

    #[test]
    fn extract_and_sext_fold() {
        let v = Expr::mk_bv(0b1101_0110, 8);
        assert_eq!(v.extract(3, 1).as_u64(), Some(0b011));
        assert_eq!(v.extract(7, 0), v);
        let neg = Expr::mk_bv(0b1000, 4);
        assert_eq!(neg.sext(4).as_u64(), Some(0xf8));
        let pos = Expr::mk_bv(0b0101, 4);
        assert_eq!(pos.sext(4).as_u64(), Some(0x05));
    }

    #[test]
    fn lambda_select_is_beta_reduction() {
        let i = Expr::fresh_var("i", Sort::Bv(32));
        let body = i.add(&bv32(1));
        let lam = Expr::lambda(vec![i], body);
        let applied = lam.select(&bv32(41));
        assert_eq!(applied.as_u64(), Some(42));
    }

    #[test]
    fn substitute_respects_binders() {
        let i = Expr::fresh_var("i", Sort::Bv(32));
        let j = Expr::fresh_var("j", Sort::Bv(32));
        let inner = Expr::lambda(vec![i.clone()], i.add(&j));
        // Substituting the bound variable is a no-op.
        let kept = inner.substitute(&i, &bv32(0));
        assert_eq!(kept, inner);
        // Substituting the free variable reaches under the binder.
        let replaced = inner.substitute(&j, &bv32(5));
        assert_ne!(replaced, inner);
    }

    #[test]
    fn forall_trivial_body_folds() {
        let i = Expr::fresh_var("i", Sort::Bv(32));
        assert!(Expr::forall(vec![i], Expr::mk_bool(true)).is_true());
    }

    #[test]
    fn fresh_names_are_unique() {
        assert_ne!(fresh_name("x"), fresh_name("x"));
    }

    #[test]
    fn lists_equal_folds_constants() {
        let a = vec![bv32(1), bv32(2)];
        let b = vec![bv32(1), bv32(2)];
        assert!(lists_equal(&a, &b).is_true());
        let c = vec![bv32(1), bv32(3)];
        assert!(lists_equal(&a, &c).is_false());
    }
}
