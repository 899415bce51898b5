// SPDX-License-Identifier: Apache-2.0

//! Composes a source and a target encoding into the refinement obligations
//! the SMT backend discharges. Both encodings must have been produced over
//! the same argument symbols and a clone of the same initial memory, so
//! that the obligations range over identical inputs.

use log::debug;

use crate::encode::state::State;
use crate::encode::value::{Index, Value};
use crate::encode::{EncodeResult, Unsupported};
use crate::smt::{lists_equal, Expr};

/// The three equivalence obligations, as closed terms (modulo the shared
/// argument symbols).
#[derive(Debug, Clone)]
pub struct Refinement {
    /// Source and target are simultaneously well-defined.
    pub precondition: Expr,
    /// Under the precondition, the return values agree pairwise.
    pub ret_values_refined: Expr,
    /// Under the precondition, observable writes to shared blocks agree.
    pub memory_refined: Expr,
    /// Target UB is covered by source UB.
    pub ub_refined: Expr,
}

fn values_equal(src: &State, tgt: &State, a: &Value, b: &Value) -> EncodeResult<Expr> {
    match (a, b) {
        (Value::Tensor(ta), Value::Tensor(tb)) => {
            if ta.rank() != tb.rank() {
                return Err(Unsupported::msg("return tensors have different ranks"));
            }
            let i = Expr::fresh_var("idx", Index::sort());
            let in_range = i.ult(&ta.get_1d_size());
            let elems_eq = ta.as_array().select(&i).eq(&tb.as_array().select(&i));
            let body = in_range.implies(&elems_eq);
            Ok(lists_equal(&ta.dims(), &tb.dims()).and(&Expr::forall(vec![i], body)))
        }
        (Value::MemRef(ma), Value::MemRef(mb)) => {
            if ma.rank() != mb.rank() {
                return Err(Unsupported::msg("return memrefs have different ranks"));
            }
            let idxs = Index::bound_index_vars(ma.rank());
            let (va, oka) = ma.get(&src.m, &idxs);
            let (vb, okb) = mb.get(&tgt.m, &idxs);
            let body = oka.and(&okb).implies(&va.eq(&vb));
            Ok(lists_equal(&ma.dims(), &mb.dims()).and(&Expr::forall(idxs, body)))
        }
        (Value::Index(_), Value::Index(_))
        | (Value::Int(_), Value::Int(_))
        | (Value::Float(_), Value::Float(_)) => Ok(a.expr().eq(&b.expr())),
        _ => Err(Unsupported::msg("return value kinds differ between source and target")),
    }
}

/// Builds the refinement obligations from two completed encodings.
pub fn build_refinement(src: &State, tgt: &State) -> EncodeResult<Refinement> {
    if src.ret_values.len() != tgt.ret_values.len() {
        return Err(Unsupported::msg("source and target return different value counts"));
    }

    let src_wd = src.well_defined_pred();
    let tgt_wd = tgt.well_defined_pred();
    let precondition = src_wd.and(&tgt_wd);

    let mut rets_eq = Expr::mk_bool(true);
    for (a, b) in src.ret_values.iter().zip(tgt.ret_values.iter()) {
        rets_eq = rets_eq.and(&values_equal(src, tgt, a, b)?);
    }
    let ret_values_refined = precondition.implies(&rets_eq);

    // Blocks backing function arguments exist on both sides with the same
    // ids; their final contents must agree element-wise.
    let mut mem_eq = Expr::mk_bool(true);
    for (k, blk_src) in src.m.external_blocks() {
        let blk_tgt = tgt.m.block(k);
        let i = Expr::fresh_var("ofs", Index::sort());
        let in_range = i.ult(&blk_src.num_elems);
        let elems_eq = blk_src.array.select(&i).eq(&blk_tgt.array.select(&i));
        mem_eq = mem_eq.and(&Expr::forall(vec![i], in_range.implies(&elems_eq)));
    }
    let memory_refined = precondition.implies(&mem_eq);

    let ub_refined = src_wd.implies(&tgt_wd);

    debug!(
        "refinement built: {} return values, {} source blocks",
        src.ret_values.len(),
        src.m.num_blocks()
    );
    Ok(Refinement { precondition, ret_values_refined, memory_refined, ub_refined })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::memory::Memory;
    use crate::encode::{encode_function, symbolic_args, EncodeOptions};
    use crate::smt::FpPrec;
    use crate::tv_ir::builder::FuncBuilder;
    use crate::tv_ir::ir::{ElemType, OpKind, Type};

    fn encode_pair(
        src: &crate::tv_ir::ir::Function,
        tgt: &crate::tv_ir::ir::Function,
    ) -> (State, State) {
        let mut m = Memory::new();
        let args = symbolic_args(src, &mut m).unwrap();
        let opts = EncodeOptions { encode_mem_write_ops: true };
        let s = encode_function(src, args.clone(), m.clone(), opts).unwrap();
        let t = encode_function(tgt, args, m, opts).unwrap();
        (s, t)
    }

    fn identity_fn(name: &str) -> crate::tv_ir::ir::Function {
        let mut b = FuncBuilder::new(name);
        let x = b.param(Type::tensor_of(ElemType::Float(FpPrec::F32), &[8]));
        b.ret(vec![x]);
        b.finish()
    }

    #[test]
    fn identical_functions_refine_trivially() {
        let (s, t) = encode_pair(&identity_fn("src"), &identity_fn("tgt"));
        let r = build_refinement(&s, &t).unwrap();
        assert!(r.precondition.is_true());
        assert!(r.ub_refined.is_true());
        // Same symbols on both sides: equality folds away.
        assert!(r.ret_values_refined.is_true());
        assert!(r.memory_refined.is_true());
    }

    #[test]
    fn scalar_disagreement_is_visible() {
        let mut b = FuncBuilder::new("src");
        let x = b.param(Type::f32());
        let y = b.param(Type::f32());
        let s = b.push(OpKind::AddF(x, y), Type::f32());
        b.ret(vec![s]);
        let src = b.finish();

        let mut b = FuncBuilder::new("tgt");
        let x = b.param(Type::f32());
        let y = b.param(Type::f32());
        let s = b.push(OpKind::MulF(x, y), Type::f32());
        b.ret(vec![s]);
        let tgt = b.finish();

        let (s, t) = encode_pair(&src, &tgt);
        let r = build_refinement(&s, &t).unwrap();
        // add(x, y) and mul(x, y) are distinct abstract terms; the
        // obligation must remain open for the solver.
        assert!(!r.ret_values_refined.is_true());
        assert!(!r.ret_values_refined.is_false());
    }

    #[test]
    fn mismatched_return_counts_are_rejected() {
        let mut b = FuncBuilder::new("src");
        let x = b.param(Type::f32());
        b.ret(vec![x]);
        let src = b.finish();

        let mut b = FuncBuilder::new("tgt");
        let _x = b.param(Type::f32());
        b.ret(vec![]);
        let tgt = b.finish();

        let (s, t) = encode_pair(&src, &tgt);
        assert!(build_refinement(&s, &t).is_err());
    }
}
