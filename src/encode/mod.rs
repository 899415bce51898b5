// SPDX-License-Identifier: Apache-2.0

//! Symbolic encoding of tensor-IR functions.
//!
//! `encode_function` walks a single-block function and produces, in its
//! `State`: a symbolic value per IR result, an accumulated well-definedness
//! predicate, and the final heap. Unsupported constructs abort the encoding
//! with [`Unsupported`]; undefined behavior never aborts and is instead
//! reflected into the predicate for the solver to reason about.

pub mod memory;
pub mod memref;
pub mod ops;
pub mod state;
pub mod tensor;
pub mod value;

use log::debug;
use thiserror::Error;

use crate::encode::memory::Memory;
use crate::encode::memref::MemRef;
use crate::encode::state::State;
use crate::encode::tensor::Tensor;
use crate::encode::value::{Float, Index, Integer, Value};
use crate::smt::{fold_1d_size, Expr};
use crate::tv_ir::ir::{Block, DimSize, Function, MemRefLayout, Op, Type};

/// The single failure kind the encoder exposes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Unsupported {
    #[error("unsupported construct at {op}: {reason}")]
    Op { op: String, reason: String },
    #[error("unsupported construct: {reason}")]
    General { reason: String },
}

impl Unsupported {
    pub fn op(op: &Op, reason: impl Into<String>) -> Unsupported {
        Unsupported::Op { op: op.to_string(), reason: reason.into() }
    }

    pub fn msg(reason: impl Into<String>) -> Unsupported {
        Unsupported::General { reason: reason.into() }
    }
}

pub type EncodeResult<T> = Result<T, Unsupported>;

#[derive(Debug, Clone, Copy, Default)]
pub struct EncodeOptions {
    /// Whether ops that commit memory writes may be encoded. Read-only
    /// encodings (loop bodies, one side of a pure comparison) refuse them.
    pub encode_mem_write_ops: bool,
}

/// Walks the ops of a block in textual order.
///
/// `pre` runs before each op; returning true skips it (loop drivers use
/// this to intercept `yield`). `post` runs after each successfully encoded
/// op with the conjunction of the UB obligations that op added.
pub(crate) fn encode_block(
    st: &mut State,
    block: &Block,
    opts: EncodeOptions,
    mut pre: Option<&mut dyn FnMut(&Op, usize) -> bool>,
    mut post: Option<&mut dyn FnMut(&Op, Expr)>,
) -> EncodeResult<()> {
    for (idx, op) in block.ops.iter().enumerate() {
        if let Some(hook) = pre.as_mut() {
            if hook(op, idx) {
                continue;
            }
        }
        let mark = st.wd_len();
        debug!("encoding {}", op);
        ops::encode_op(st, op, opts)?;
        if let Some(hook) = post.as_mut() {
            let wd = st.wd_since(mark);
            hook(op, wd);
        }
    }
    Ok(())
}

/// Encodes the body of `f` into `st`. The function arguments must already
/// be bound in the register file.
pub fn encode(st: &mut State, f: &Function, opts: EncodeOptions) -> EncodeResult<()> {
    let block = f
        .single_block()
        .ok_or_else(|| Unsupported::msg("only functions with a single block are supported"))?;
    encode_block(st, block, opts, None, None)
}

fn symbolic_shape(dims: &[DimSize]) -> Vec<Expr> {
    if dims.is_empty() {
        // Rank-0 shaped values hold exactly one element.
        return vec![Expr::mk_bv(1, Index::BITS)];
    }
    dims.iter()
        .map(|d| match d {
            Some(n) => Expr::mk_bv(*n, Index::BITS),
            None => Expr::fresh_var("dim", Index::sort()),
        })
        .collect()
}

/// A fresh unconstrained value of the given IR type. MemRef arguments get a
/// fresh external heap block.
fn symbolic_value(ty: &Type, m: &mut Memory) -> EncodeResult<Value> {
    match ty {
        Type::Index => Ok(Value::Index(Index::fresh("arg"))),
        Type::Int(w) => Ok(Value::Int(Integer::from_expr(Expr::fresh_var(
            "arg",
            crate::smt::Sort::Bv(*w),
        )))),
        Type::Float(p) => Ok(Value::Float(Float::from_expr(
            Expr::fresh_var("arg", Float::sort(*p)),
            *p,
        ))),
        Type::Tensor(tt) => {
            let dims = symbolic_shape(&tt.dims);
            Ok(Value::Tensor(Tensor::fresh(tt.elem, "arg", dims)))
        }
        Type::MemRef(mt) => {
            if mt.layout != MemRefLayout::Identity {
                return Err(Unsupported::msg(
                    "memref arguments with non-identity layouts are not supported",
                ));
            }
            let dims = symbolic_shape(&mt.dims);
            let bid = m.add_external_block(mt.elem, fold_1d_size(&dims));
            Ok(Value::MemRef(MemRef::with_identity_layout(mt.elem, bid, dims)))
        }
    }
}

/// Fresh argument values for a function signature, registering external
/// heap blocks for memref parameters. Reuse the same values (and a clone of
/// the same memory) on both sides of an equivalence check so the two
/// encodings range over identical input symbols.
pub fn symbolic_args(f: &Function, m: &mut Memory) -> EncodeResult<Vec<Value>> {
    f.params.iter().map(|(_, ty)| symbolic_value(ty, m)).collect()
}

/// Binds `args` to the function parameters and encodes the body.
pub fn encode_function(
    f: &Function,
    args: Vec<Value>,
    m: Memory,
    opts: EncodeOptions,
) -> EncodeResult<State> {
    assert_eq!(args.len(), f.params.len(), "argument count mismatch");
    let mut st = State::new(m);
    for ((vid, _), value) in f.params.iter().zip(args.into_iter()) {
        st.regs.add(*vid, value);
    }
    encode(&mut st, f, opts)?;
    Ok(st)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tv_ir::builder::FuncBuilder;
    use crate::tv_ir::ir::OpKind;

    #[test]
    fn multi_block_functions_are_rejected() {
        let mut b = FuncBuilder::new("f");
        let x = b.param(Type::f32());
        b.ret(vec![x]);
        let mut f = b.finish();
        f.blocks.push(Block::default());
        let mut m = Memory::new();
        let args = symbolic_args(&f, &mut m).unwrap();
        let err = encode_function(&f, args, m, EncodeOptions::default()).unwrap_err();
        assert!(matches!(err, Unsupported::General { .. }));
    }

    #[test]
    fn return_latches_values_in_order() {
        let mut b = FuncBuilder::new("f");
        let x = b.param(Type::f32());
        let y = b.param(Type::Index);
        b.ret(vec![y, x]);
        let f = b.finish();
        let mut m = Memory::new();
        let args = symbolic_args(&f, &mut m).unwrap();
        let st = encode_function(&f, args, m, EncodeOptions::default()).unwrap();
        assert_eq!(st.ret_values.len(), 2);
        assert!(matches!(st.ret_values[0], Value::Index(_)));
        assert!(matches!(st.ret_values[1], Value::Float(_)));
    }

    #[test]
    fn unknown_yield_outside_loops_is_unsupported() {
        let mut b = FuncBuilder::new("f");
        let x = b.param(Type::f32());
        b.push_no_result(OpKind::Yield(vec![x]));
        let f = b.finish();
        let mut m = Memory::new();
        let args = symbolic_args(&f, &mut m).unwrap();
        let err = encode_function(&f, args, m, EncodeOptions::default()).unwrap_err();
        assert!(matches!(err, Unsupported::Op { .. }));
    }
}
