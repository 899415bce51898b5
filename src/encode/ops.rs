// SPDX-License-Identifier: Apache-2.0

//! Per-op encoding rules.
//!
//! One rule per supported op: read operands from the register file, validate
//! the structural preconditions, emit the UB obligations the dialect leaves
//! undefined, and register the result values. Anything the rules do not
//! cover fails with [`Unsupported`] carrying the op and a reason.

use crate::encode::memref::MemRef;
use crate::encode::state::{LoopScope, State};
use crate::encode::tensor::Tensor;
use crate::encode::value::{elem_sort, from_expr, Float, Index, Integer, Value};
use crate::encode::{encode_block, EncodeOptions, EncodeResult, Unsupported};
use crate::smt::{fold_1d_size, lists_equal, Expr, FpPrec};
use crate::tv_ir::affine::{AffineExpr, AffineMap};
use crate::tv_ir::ir::{
    Attr, Block, CmpFPredicate, ConvLayout, DenseAttr, DimSize, ElemType, MemRefLayout,
    MixedVal, Op, OpKind, TensorType, Type, ValueId,
};

/// Reduction bodies the encoder recognizes: `yield(add(acc, v))` or
/// `yield(add(v, acc))` with a float or integer add, where `acc` is the
/// last block argument and no other body op reads it.
/// TODO: support more kinds of reduction loops (mul/min/max accumulators).
const REDUCTION_FORM_MSG: &str =
    "permutated output map or simple reduction form is supported only";

fn idx(v: i64) -> Expr {
    Index::constant(v).into_expr()
}

fn add_one(v: &[Expr]) -> Vec<Expr> {
    v.iter().map(|e| e.add(&idx(1))).collect()
}

fn vec_add(a: &[Expr], b: &[Expr]) -> Vec<Expr> {
    assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(x, y)| x.add(y)).collect()
}

fn make_cube(rank: usize) -> Vec<Expr> {
    vec![idx(1); rank.max(1)]
}

fn elem_width(elem: ElemType) -> u32 {
    match elem {
        ElemType::Int(w) => w,
        ElemType::Index => Index::BITS,
        ElemType::Float(_) => panic!("bit width of a float element"),
    }
}

fn value_elem_type(v: &Value) -> ElemType {
    match v {
        Value::Float(f) => ElemType::Float(f.prec()),
        Value::Int(i) => ElemType::Int(i.bitwidth()),
        Value::Index(_) => ElemType::Index,
        Value::Tensor(_) | Value::MemRef(_) => panic!("element type of a shaped value"),
    }
}

fn shaped_value_dims(v: &Value) -> Option<Vec<Expr>> {
    match v {
        Value::Tensor(t) => Some(t.dims()),
        Value::MemRef(m) => Some(m.dims()),
        _ => None,
    }
}

fn bind_elem(st: &mut State, id: ValueId, e: Expr, elem: ElemType) {
    let v = match elem {
        ElemType::Float(p) => Value::Float(Float::from_expr(e, p)),
        ElemType::Int(_) => Value::Int(Integer::from_expr(e)),
        ElemType::Index => Value::Index(Index::from_expr(e)),
    };
    st.regs.add(id, v);
}

// ---------------------------------------------------------------------
// Reusable helpers
// ---------------------------------------------------------------------

/// Total over add, mul, dim, symbol and non-negative constants; `None` for
/// anything else.
pub fn encode_affine_expr(
    ae: &AffineExpr,
    dim_vars: &[Expr],
    symbol_vars: &[Expr],
) -> Option<Expr> {
    match ae {
        AffineExpr::Add(l, r) => {
            let lhs = encode_affine_expr(l, dim_vars, symbol_vars)?;
            let rhs = encode_affine_expr(r, dim_vars, symbol_vars)?;
            Some(lhs.add(&rhs))
        }
        AffineExpr::Mul(l, r) => {
            let lhs = encode_affine_expr(l, dim_vars, symbol_vars)?;
            let rhs = encode_affine_expr(r, dim_vars, symbol_vars)?;
            Some(lhs.mul(&rhs))
        }
        AffineExpr::Dim(p) => {
            assert!(*p < dim_vars.len());
            Some(dim_vars[*p].clone())
        }
        AffineExpr::Symbol(p) => {
            assert!(*p < symbol_vars.len());
            Some(symbol_vars[*p].clone())
        }
        AffineExpr::Const(c) => {
            if *c < 0 {
                None
            } else {
                Some(idx(*c))
            }
        }
    }
}

/// Bit-vector cast between scalar integer widths: truncating extract or
/// sign extension.
pub fn eval_index_cast(val: Expr, dst_width: u32) -> Expr {
    let src_width = val.bitwidth();
    if src_width > dst_width {
        val.extract(dst_width - 1, 0)
    } else if src_width < dst_width {
        val.sext(dst_width - src_width)
    } else {
        val
    }
}

/// Normalizes a mixed operand-or-attribute list into index terms.
fn get_from_mixed(st: &State, vals: &[MixedVal]) -> Vec<Expr> {
    vals.iter()
        .map(|v| match v {
            MixedVal::Value(id) => st.regs.get_index(*id).into_expr(),
            MixedVal::Const(c) => idx(*c),
        })
        .collect()
}

/// NumPy-style broadcast of two tensors. Returns tensors of the common
/// rank; their dimension vectors stay per-operand so the caller can emit
/// the shape-mismatch UB. `None` means the form is unsupported (a dynamic
/// dim meets a static dim, or static dims that can never broadcast).
fn broadcast_tensors(st: &State, a: ValueId, b: ValueId) -> Option<(Tensor, Tensor)> {
    let t0 = st.regs.get_tensor(a);
    let t1 = st.regs.get_tensor(b);
    let (r0, r1) = (t0.rank(), t1.rank());
    let res_rank = r0.max(r1);

    let vars0 = Index::bound_index_vars(res_rank);
    let vars1 = Index::bound_index_vars(res_rank);
    let zero = idx(0);

    let mut res_dims0 = Vec::with_capacity(res_rank);
    let mut res_dims1 = Vec::with_capacity(res_rank);
    let mut out0 = Vec::with_capacity(r0);
    let mut out1 = Vec::with_capacity(r1);

    for k in 0..res_rank {
        let i0 = (k + r0).checked_sub(res_rank);
        let i1 = (k + r1).checked_sub(res_rank);
        match (i0, i1) {
            (Some(i0), Some(i1)) => {
                let d0 = t0.get_dim(i0);
                let d1 = t1.get_dim(i1);
                match (d0.as_u64(), d1.as_u64()) {
                    // Both dynamic: preserved per side; the caller's
                    // dims-equal UB relates them.
                    (None, None) => {
                        res_dims0.push(d0.clone());
                        res_dims1.push(d1.clone());
                    }
                    (Some(c0), Some(c1)) => {
                        if c0 != 1 && c1 != 1 && c0 != c1 {
                            return None;
                        }
                        let m = idx(c0.max(c1) as i64);
                        res_dims0.push(m.clone());
                        res_dims1.push(m);
                    }
                    // Dynamic against static is not broadcastable here.
                    _ => return None,
                }
                out0.push(if d0.as_u64() == Some(1) { zero.clone() } else { vars0[k].clone() });
                out1.push(if d1.as_u64() == Some(1) { zero.clone() } else { vars1[k].clone() });
            }
            (None, Some(i1)) => {
                let d = t1.get_dim(i1);
                res_dims0.push(d.clone());
                res_dims1.push(d);
                out1.push(vars1[k].clone());
            }
            (Some(i0), None) => {
                let d = t0.get_dim(i0);
                res_dims0.push(d.clone());
                res_dims1.push(d);
                out0.push(vars0[k].clone());
            }
            (None, None) => unreachable!(),
        }
    }

    let m0 = Tensor::mk_lambda(t0.elem_type(), res_dims0, vars0, t0.get(&out0).0);
    let m1 = Tensor::mk_lambda(t1.elem_type(), res_dims1, vars1, t1.get(&out1).0);
    Some((m0, m1))
}

fn encode_binary_op(
    st: &mut State,
    op: &Op,
    a: ValueId,
    b: ValueId,
    f_float: Option<&dyn Fn(Float, Float) -> Float>,
    f_int: Option<&dyn Fn(Expr, Expr) -> Expr>,
) -> EncodeResult<()> {
    match st.regs.find(a).clone() {
        Value::Float(fa) => {
            let f = f_float.ok_or_else(|| Unsupported::op(op, "unsupported type"))?;
            let fb = st.regs.get_float(b);
            st.regs.add(op.result(), Value::Float(f(fa, fb)));
        }
        Value::Tensor(_) => {
            let elem_out = op
                .result_ty()
                .elem_type()
                .ok_or_else(|| Unsupported::op(op, "unsupported element type"))?;
            let (ta, tb) = broadcast_tensors(st, a, b)
                .ok_or_else(|| Unsupported::op(op, "unsupported broadcast form"))?;
            let result = match ta.elem_type() {
                ElemType::Float(p) => {
                    let f = f_float.ok_or_else(|| Unsupported::op(op, "unsupported element type"))?;
                    ta.elementwise_binary(&tb, elem_out, |x, y| {
                        f(Float::from_expr(x, p), Float::from_expr(y, p)).into_expr()
                    })
                }
                ElemType::Int(_) | ElemType::Index => {
                    let f = f_int.ok_or_else(|| Unsupported::op(op, "unsupported element type"))?;
                    ta.elementwise_binary(&tb, elem_out, |x, y| f(x, y))
                }
            };
            st.regs.add(op.result(), Value::Tensor(result));
            st.well_defined(op.kind.name(), lists_equal(&ta.dims(), &tb.dims()));
        }
        _ => return Err(Unsupported::op(op, "unsupported type")),
    }
    Ok(())
}

fn encode_unary_op(
    st: &mut State,
    op: &Op,
    a: ValueId,
    f_float: Option<&dyn Fn(Float) -> Float>,
    f_int: Option<&dyn Fn(Expr) -> Expr>,
) -> EncodeResult<()> {
    match st.regs.find(a).clone() {
        Value::Float(fa) => {
            let f = f_float.ok_or_else(|| Unsupported::op(op, "unsupported type"))?;
            st.regs.add(op.result(), Value::Float(f(fa)));
        }
        Value::Tensor(t) => {
            let elem_out = op
                .result_ty()
                .elem_type()
                .ok_or_else(|| Unsupported::op(op, "unsupported element type"))?;
            let result = match t.elem_type() {
                ElemType::Float(p) => {
                    let f = f_float.ok_or_else(|| Unsupported::op(op, "unsupported element type"))?;
                    t.elementwise_unary(elem_out, |x| f(Float::from_expr(x, p)).into_expr())
                }
                ElemType::Int(_) | ElemType::Index => {
                    let f = f_int.ok_or_else(|| Unsupported::op(op, "unsupported element type"))?;
                    t.elementwise_unary(elem_out, |x| f(x))
                }
            };
            st.regs.add(op.result(), Value::Tensor(result));
        }
        _ => return Err(Unsupported::op(op, "unsupported type")),
    }
    Ok(())
}

// ---------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------

fn attr_to_value(a: &Attr) -> EncodeResult<Value> {
    match a {
        Attr::Int { value, width } => {
            if *width > 64 {
                return Err(Unsupported::msg("integer size is too large"));
            }
            Ok(Value::Int(Integer::constant(*value, *width)))
        }
        Attr::Index(v) => Ok(Value::Index(Index::constant(*v))),
        Attr::Float { bits, prec } => Ok(Value::Float(Float::constant(*bits, *prec))),
        Attr::Dense(_) | Attr::Sparse(_) => Err(Unsupported::msg("unsupported attribute")),
    }
}

fn attr_to_expr(a: &Attr) -> EncodeResult<Expr> {
    Ok(attr_to_value(a)?.expr())
}

fn static_dims(op: &Op, tt: &TensorType) -> EncodeResult<Vec<u64>> {
    tt.dims
        .iter()
        .map(|d| d.ok_or_else(|| Unsupported::op(op, "a constant tensor cannot have unknown dimensions")))
        .collect()
}

/// Expands a dense or sparse elements attribute into a tensor. The second
/// return marks sparse attributes for the `has_const_array` flag.
fn elem_attr_to_tensor(op: &Op, attr: &Attr, tt: &TensorType) -> EncodeResult<(Tensor, bool)> {
    match attr {
        Attr::Dense(DenseAttr::Splat(a)) => {
            let dims = static_dims(op, tt)?;
            let dim_exprs = if dims.is_empty() {
                vec![idx(1)]
            } else {
                dims.iter().map(|d| idx(*d as i64)).collect()
            };
            Ok((Tensor::splat(tt.elem, attr_to_expr(a)?, dim_exprs), false))
        }
        Attr::Dense(DenseAttr::Elems(list)) => {
            let dims = static_dims(op, tt)?;
            let count: u64 = dims.iter().product();
            if count != list.len() as u64 || list.is_empty() {
                return Err(Unsupported::op(op, "malformed dense element count"));
            }
            let exprs: Vec<Expr> = list.iter().map(attr_to_expr).collect::<EncodeResult<_>>()?;
            let flat = Tensor::from_elems(tt.elem, exprs);
            let dim_exprs: Vec<Expr> = if dims.is_empty() {
                vec![idx(1)]
            } else {
                dims.iter().map(|d| idx(*d as i64)).collect()
            };
            Ok((flat.reshape(dim_exprs), false))
        }
        Attr::Sparse(s) => {
            let dims = static_dims(op, tt)?;
            let values: Vec<Expr> =
                s.values.iter().map(attr_to_expr).collect::<EncodeResult<_>>()?;
            let zero = attr_to_expr(&s.zero)?;
            Ok((Tensor::sparse(tt.elem, &s.indices, values, &dims, zero), true))
        }
        _ => Err(Unsupported::op(op, "unsupported constant")),
    }
}

fn encode_constant(st: &mut State, op: &Op, attr: &Attr) -> EncodeResult<()> {
    match (op.result_ty(), attr) {
        (Type::Tensor(tt), Attr::Dense(_)) | (Type::Tensor(tt), Attr::Sparse(_)) => {
            let (t, sparse) = elem_attr_to_tensor(op, attr, tt)?;
            if sparse {
                st.has_const_array = true;
            }
            st.regs.add(op.result(), Value::Tensor(t));
            Ok(())
        }
        (_, Attr::Int { .. }) | (_, Attr::Index(_)) | (_, Attr::Float { .. }) => {
            let v = attr_to_value(attr).map_err(|e| match e {
                Unsupported::General { reason } => Unsupported::op(op, reason),
                other => other,
            })?;
            st.regs.add(op.result(), v);
            Ok(())
        }
        _ => Err(Unsupported::op(op, "unsupported constant")),
    }
}

// ---------------------------------------------------------------------
// Shape ops
// ---------------------------------------------------------------------

/// `dims[index]` as an ite cascade, plus the `index < rank` witness.
fn encode_dim_op(st: &State, dims: Vec<Expr>, index: ValueId) -> (Expr, Expr) {
    let i = st.regs.get_index(index).into_expr();
    let mut res = dims[0].clone();
    for (k, d) in dims.iter().enumerate().skip(1) {
        res = Expr::ite(&i.eq(&idx(k as i64)), d, &res);
    }
    let wf = i.ult(&idx(dims.len() as i64));
    (res, wf)
}

fn encode_extract_slice(
    st: &mut State,
    op: &Op,
    source: ValueId,
    offsets: &[MixedVal],
    sizes: &[MixedVal],
    strides: &[MixedVal],
) -> EncodeResult<()> {
    let src = st.regs.get_tensor(source);
    let res_tt = match op.result_ty() {
        Type::Tensor(tt) => tt.clone(),
        _ => return Err(Unsupported::op(op, "unsupported type")),
    };
    let offset_es = get_from_mixed(st, offsets);
    let size_es = get_from_mixed(st, sizes);
    let stride_es = get_from_mixed(st, strides);
    if offset_es.len() != size_es.len()
        || size_es.len() != stride_es.len()
        || stride_es.len() != src.rank()
    {
        return Err(Unsupported::op(op, "unsupported form"));
    }
    let res_rank = res_tt.rank();
    if res_rank == 0 {
        return Err(Unsupported::op(op, "rank-0 results are not supported"));
    }

    // Axes whose size-1 attribute is literal may be rank-reduced away; the
    // static result shape decides which ones actually are.
    let full: Vec<DimSize> = sizes
        .iter()
        .map(|s| match s {
            MixedVal::Const(c) => Some(*c as u64),
            MixedVal::Value(_) => None,
        })
        .collect();
    let mask = rank_reduction_mask(&full, &res_tt.dims)
        .ok_or_else(|| Unsupported::op(op, "unsupported form"))?;

    // Result dims are the kept sizes; a dropped axis reads its offset
    // directly, a kept output index j maps to offsets[i] + in_idx[j] *
    // strides[i].
    let in_idxs = Index::bound_index_vars(res_rank);
    let mut dims = Vec::with_capacity(res_rank);
    let mut out_idxs = Vec::with_capacity(src.rank());
    let mut cursor = 0;
    for i in 0..src.rank() {
        if mask[i] {
            out_idxs.push(offset_es[i].clone());
        } else {
            dims.push(size_es[i].clone());
            out_idxs.push(in_idxs[cursor].mul(&stride_es[i]).add(&offset_es[i]));
            cursor += 1;
        }
    }
    assert_eq!(cursor, res_rank);

    let body = src.get(&out_idxs).0;
    let t = Tensor::mk_lambda(src.elem_type(), dims, in_idxs, body);
    st.regs.add(op.result(), Value::Tensor(t));
    Ok(())
}

fn encode_insert_slice(
    st: &mut State,
    op: &Op,
    source: ValueId,
    dest: ValueId,
    offsets: &[MixedVal],
    sizes: &[MixedVal],
    strides: &[MixedVal],
) -> EncodeResult<()> {
    let src = st.regs.get_tensor(source);
    let tgt = st.regs.get_tensor(dest);
    let rank = src.rank();
    if rank != tgt.rank() {
        return Err(Unsupported::op(
            op,
            "unsupported tensor types of src and dest: their ranks do not match",
        ));
    }
    let offset_es = get_from_mixed(st, offsets);
    let size_es = get_from_mixed(st, sizes);
    let stride_es = get_from_mixed(st, strides);
    assert!(offset_es.len() == rank && size_es.len() == rank && stride_es.len() == rank);

    let ind_vars = Index::bound_index_vars(rank);
    let dims = tgt.dims();
    let mut src_idxs = Vec::with_capacity(rank);
    let mut cond = Expr::mk_bool(true);
    for i in 0..rank {
        let rel = ind_vars[i].sub(&offset_es[i]);
        src_idxs.push(rel.udiv(&stride_es[i]));
        cond = cond
            .and(&rel.urem(&stride_es[i]).is_zero())
            .and(&rel.ult(&size_es[i].mul(&stride_es[i])));
    }

    // Picking a source element must never read out of the source bounds.
    let (src_elem, src_wb) = src.get(&src_idxs);
    let (tgt_elem, tgt_wb) = tgt.get(&ind_vars);
    let output = Expr::ite(&cond, &src_elem, &tgt_elem);

    st.well_defined(
        op.kind.name(),
        Expr::forall(ind_vars.clone(), tgt_wb.and(&cond).implies(&src_wb)),
    );
    let t = Tensor::mk_lambda(src.elem_type(), dims, ind_vars, output);
    st.regs.add(op.result(), Value::Tensor(t));
    Ok(())
}

/// Greedy match of the full (pre-reduction) shape against the result
/// shape; unmatched axes must be statically 1 and are dropped.
fn rank_reduction_mask(full: &[DimSize], reduced: &[DimSize]) -> Option<Vec<bool>> {
    let mut mask = vec![false; full.len()];
    let mut ri = 0;
    for (i, f) in full.iter().enumerate() {
        if ri < reduced.len() && *f == reduced[ri] {
            ri += 1;
            continue;
        }
        if *f == Some(1) {
            mask[i] = true;
            continue;
        }
        return None;
    }
    if ri != reduced.len() {
        return None;
    }
    Some(mask)
}

// ---------------------------------------------------------------------
// Structured-loop machinery
// ---------------------------------------------------------------------

/// Runs a parallel loop body, intercepting `yield`, and wraps each yielded
/// scalar into a result tensor over the mapped iteration space.
/// `output_val_map` post-processes the yielded value (padding uses it to
/// choose between source and padding).
fn encode_parallel_loop_body_and_outputs(
    newst: &mut State,
    block: &Block,
    output_map: &AffineMap,
    output_val_map: Option<&dyn Fn(&Expr, &[Expr]) -> Expr>,
) -> EncodeResult<(Vec<Tensor>, Expr)> {
    let mut yielded: Vec<ValueId> = Vec::new();
    let mut welldef = Expr::mk_bool(true);
    {
        let mut pre = |op: &Op, _idx: usize| -> bool {
            if let OpKind::Yield(vals) = &op.kind {
                assert!(!vals.is_empty());
                yielded.extend(vals.iter().copied());
                true
            } else {
                false
            }
        };
        let mut post = |_op: &Op, wd: Expr| {
            welldef = welldef.and(&wd);
        };
        encode_block(
            newst,
            block,
            EncodeOptions { encode_mem_write_ops: false },
            Some(&mut pre),
            Some(&mut post),
        )?;
    }

    let scope = newst.current_scope().clone();
    let out_idx_vars = output_map.map_dims(&scope.ind_vars);
    let tensor_sz = add_one(&output_map.map_dims(&scope.ind_var_upper_bounds));

    let mut tensors = Vec::with_capacity(yielded.len());
    for y in yielded {
        let val = newst.regs.find(y).clone();
        let elem = value_elem_type(&val);
        let mut res = val.expr();
        if let Some(f) = output_val_map {
            res = f(&res, &out_idx_vars);
        }
        tensors.push(Tensor::mk_lambda(elem, tensor_sz.clone(), out_idx_vars.clone(), res));
    }
    Ok((tensors, welldef))
}

/// Collects, per flattened indexing-map result, the matching operand dim.
fn view_sizes(
    st: &State,
    op: &Op,
    operands: &[ValueId],
    maps: &[AffineMap],
) -> EncodeResult<Vec<Expr>> {
    let mut sizes = Vec::new();
    for (oid, map) in operands.iter().zip(maps.iter()) {
        let r = map.results.len();
        if r == 0 {
            continue;
        }
        let dims = shaped_value_dims(st.regs.find(*oid))
            .ok_or_else(|| Unsupported::op(op, "unsupported shaped value"))?;
        if dims.len() < r {
            return Err(Unsupported::op(op, "indexing map rank mismatch"));
        }
        sizes.extend_from_slice(&dims[..r]);
    }
    Ok(sizes)
}

/// Inclusive loop bounds: for each iterator, the first operand dimension
/// whose indexing-map result is that iterator, minus one.
fn find_loop_bounds(
    st: &State,
    op: &Op,
    operands: &[ValueId],
    maps: &[AffineMap],
) -> EncodeResult<Vec<Expr>> {
    let sizes = view_sizes(st, op, operands, maps)?;
    if sizes.is_empty() {
        // All operands have rank 0: a single iteration.
        return Ok(vec![idx(0)]);
    }
    let num_dims = maps.last().expect("generic without maps").num_dims;
    if maps.iter().any(|m| m.num_dims != num_dims) {
        return Err(Unsupported::op(op, "indexing maps disagree on iterator count"));
    }

    let mut bounds: Vec<Option<Expr>> = vec![None; num_dims];
    let mut flat = 0;
    for map in maps {
        for res in &map.results {
            if let Some(p) = res.as_dim() {
                if bounds[p].is_none() {
                    bounds[p] = Some(sizes[flat].sub(&idx(1)));
                }
            }
            flat += 1;
        }
    }
    bounds
        .into_iter()
        .map(|b| b.ok_or_else(|| Unsupported::op(op, "cannot infer a loop bound for an iterator")))
        .collect()
}

/// For every affine-map result applied to the inferred bounds, require
/// `f(bound) < dim` whenever `dim != 0`.
fn encode_ub_for_shape_match(
    st: &mut State,
    op: &Op,
    operands: &[ValueId],
    maps: &[AffineMap],
    bounds: &[Expr],
) -> EncodeResult<()> {
    let sizes = view_sizes(st, op, operands, maps)?;
    let mut flat = 0;
    for map in maps {
        for res in &map.results {
            let ae = encode_affine_expr(res, bounds, &[])
                .ok_or_else(|| Unsupported::op(op, "unsupported affine expr"))?;
            let size = &sizes[flat];
            st.well_defined(op.kind.name(), size.is_non_zero().implies(&ae.ult(size)));
            flat += 1;
        }
    }
    Ok(())
}

/// Binds the loop-body block arguments: scalars directly, shaped operands
/// through their indexing maps. Memref reads accumulate bounds UB into the
/// body predicate.
fn init_loop_body_regs(
    newst: &mut State,
    op: &Op,
    operands: &[ValueId],
    maps: &[AffineMap],
    body: &Block,
    welldef: &mut Expr,
) -> EncodeResult<()> {
    let ind_vars = newst.current_scope().ind_vars.clone();
    for (i, oid) in operands.iter().enumerate() {
        let map = &maps[i];
        let arg_id = body.args[i].0;
        let affine_idxs = || -> EncodeResult<Vec<Expr>> {
            if map.results.is_empty() {
                // A single-element shaped value; e.g. tensor<f32>.
                return Ok(vec![idx(0)]);
            }
            map.results
                .iter()
                .map(|r| {
                    encode_affine_expr(r, &ind_vars, &[])
                        .ok_or_else(|| Unsupported::op(op, "unsupported affine expr"))
                })
                .collect()
        };
        match newst.regs.find(*oid).clone() {
            Value::Float(f) => newst.regs.add(arg_id, Value::Float(f)),
            Value::Tensor(t) => {
                let idxs = affine_idxs()?;
                // Out-of-bounds reads are covered by the loop-bound UB.
                let e = t.get(&idxs).0;
                bind_elem(newst, arg_id, e, t.elem_type());
            }
            Value::MemRef(mr) => {
                let idxs = affine_idxs()?;
                let (e, wd) = mr.get(&newst.m, &idxs);
                *welldef = welldef.and(&wd);
                bind_elem(newst, arg_id, e, mr.elem_type());
            }
            _ => return Err(Unsupported::op(op, "unsupported block argument type")),
        }
    }
    Ok(())
}

/// Recognizes the supported add-reduction body shapes and produces the
/// reduced tensor. See [`REDUCTION_FORM_MSG`].
fn encode_reduction_loop_body_and_output(
    newst: &mut State,
    op: &Op,
    block: &Block,
    output_map: &AffineMap,
    output_rank: usize,
) -> EncodeResult<(Tensor, Expr)> {
    let n = block.ops.len();
    if n < 2 || block.args.is_empty() {
        return Err(Unsupported::op(op, REDUCTION_FORM_MSG));
    }
    let acc = block.args[block.args.len() - 1].0;

    let yielded = match &block.ops[n - 1].kind {
        OpKind::Yield(vals) if vals.len() == 1 => vals[0],
        _ => return Err(Unsupported::op(op, REDUCTION_FORM_MSG)),
    };
    let sum_op = &block.ops[n - 2];
    let (lhs, rhs) = match &sum_op.kind {
        OpKind::AddF(a, b) | OpKind::AddI(a, b) => (*a, *b),
        _ => return Err(Unsupported::op(op, REDUCTION_FORM_MSG)),
    };
    if sum_op.results.is_empty() || sum_op.result() != yielded {
        return Err(Unsupported::op(op, REDUCTION_FORM_MSG));
    }
    let v = if lhs == acc {
        rhs
    } else if rhs == acc {
        lhs
    } else {
        return Err(Unsupported::op(op, REDUCTION_FORM_MSG));
    };

    // The accumulator must not feed anything but the final add.
    for body_op in &block.ops[..n - 2] {
        if body_op.kind.operands().contains(&acc) {
            return Err(Unsupported::op(op, "unsupported reduction form because the accumulator escapes"));
        }
    }

    let mut welldef = Expr::mk_bool(true);
    {
        let mut pre = |_op: &Op, opindex: usize| -> bool { opindex >= n - 2 };
        let mut post = |_op: &Op, wd: Expr| {
            welldef = welldef.and(&wd);
        };
        encode_block(
            newst,
            block,
            EncodeOptions { encode_mem_write_ops: false },
            Some(&mut pre),
            Some(&mut post),
        )?;
    }

    let scope = newst.current_scope().clone();
    let elem = value_elem_type(newst.regs.find(v));

    // The summand as a tensor over the full iteration cube.
    let t_v = Tensor::mk_lambda(
        elem,
        add_one(&scope.ind_var_upper_bounds),
        scope.ind_vars.clone(),
        newst.regs.get_expr(v),
    );

    let all_zero = output_map.results.iter().all(|r| r.is_zero_const());
    let t_res = if all_zero {
        // out: (i, j) -> (0): a single-element splat of the full sum.
        Tensor::splat(elem, t_v.sum(), make_cube(output_rank))
    } else {
        let mut used = vec![false; output_map.num_dims];
        for r in &output_map.results {
            match r.as_dim() {
                Some(p) => used[p] = true,
                None => return Err(Unsupported::op(op, REDUCTION_FORM_MSG)),
            }
        }
        let mut bounds_for_res = Vec::new();
        let mut ind_vars_for_res = Vec::new();
        for (j, u) in used.iter().enumerate() {
            if !u {
                bounds_for_res.push(scope.ind_var_upper_bounds[j].clone());
                ind_vars_for_res.push(scope.ind_vars[j].clone());
            }
        }
        if ind_vars_for_res.is_empty() {
            return Err(Unsupported::op(op, REDUCTION_FORM_MSG));
        }

        // Sum along the axes missing from the output map.
        let tensor_sz = add_one(&output_map.map_dims(&scope.ind_var_upper_bounds));
        let t_sum = Tensor::mk_lambda(
            elem,
            add_one(&bounds_for_res),
            ind_vars_for_res,
            t_v.get(&scope.ind_vars).0,
        )
        .sum();
        let out_ind_vars = output_map.map_dims(&scope.ind_vars);
        Tensor::mk_lambda(elem, tensor_sz, out_ind_vars, t_sum)
    };
    Ok((t_res, welldef))
}

#[allow(clippy::too_many_arguments)]
fn encode_generic(
    st: &mut State,
    op: &Op,
    inputs: &[ValueId],
    outputs: &[ValueId],
    maps: &[AffineMap],
    body: &Block,
    opts: EncodeOptions,
) -> EncodeResult<()> {
    if maps.len() != inputs.len() + outputs.len() || body.args.len() != maps.len() {
        return Err(Unsupported::op(op, "unsupported form"));
    }
    let out_vals: Vec<Value> = outputs.iter().map(|o| st.regs.find(*o).clone()).collect();
    let all_tensor = out_vals.iter().all(|v| matches!(v, Value::Tensor(_)));
    let all_buffer = out_vals.iter().all(|v| matches!(v, Value::MemRef(_)));
    if !(all_tensor || all_buffer) || outputs.is_empty() {
        return Err(Unsupported::op(op, "tensor/buffer semantics is supported only"));
    }
    if all_buffer && !opts.encode_mem_write_ops {
        return Err(Unsupported::op(op, "memory writes are not encodable in this scope"));
    }
    if !body.args.iter().all(|(_, ty)| ty.is_scalar()) {
        return Err(Unsupported::op(op, "unsupported block arguments"));
    }

    let operands: Vec<ValueId> = inputs.iter().chain(outputs.iter()).copied().collect();
    let bounds = find_loop_bounds(st, op, &operands, maps)?;
    encode_ub_for_shape_match(st, op, &operands, maps, &bounds)?;

    let output_map = maps.last().expect("checked above");
    let all_rank0 = maps.iter().all(|m| m.results.is_empty());
    let is_parallel = output_map.is_permutation();

    let mut welldef = Expr::mk_bool(true);
    let mut newst = st.clone();
    newst.linalg_generic_scopes.push(LoopScope::new(bounds.clone()));
    init_loop_body_regs(&mut newst, op, &operands, maps, body, &mut welldef)?;

    let tensors: Vec<Tensor> = if all_rank0 {
        // A single iteration: yielded scalars become one-element tensors.
        let mut yielded: Vec<ValueId> = Vec::new();
        {
            let mut pre = |bop: &Op, _i: usize| -> bool {
                if let OpKind::Yield(vals) = &bop.kind {
                    yielded.extend(vals.iter().copied());
                    true
                } else {
                    false
                }
            };
            let mut post = |_op: &Op, wd: Expr| {
                welldef = welldef.and(&wd);
            };
            encode_block(
                &mut newst,
                body,
                EncodeOptions { encode_mem_write_ops: false },
                Some(&mut pre),
                Some(&mut post),
            )?;
        }
        yielded
            .into_iter()
            .map(|y| {
                let val = newst.regs.find(y).clone();
                Tensor::splat(value_elem_type(&val), val.expr(), vec![idx(1)])
            })
            .collect()
    } else if is_parallel {
        let (tensors, body_wd) =
            encode_parallel_loop_body_and_outputs(&mut newst, body, output_map, None)?;
        welldef = welldef.and(&body_wd);
        tensors
    } else {
        if outputs.len() > 1 {
            return Err(Unsupported::op(op, "unsupported reduction form"));
        }
        let output_rank = shaped_value_dims(&out_vals[0]).expect("checked above").len();
        let (t, body_wd) =
            encode_reduction_loop_body_and_output(&mut newst, op, body, output_map, output_rank)?;
        welldef = welldef.and(&body_wd);
        vec![t]
    };

    // For every iteration within bounds, the body must be well-defined.
    let scope = newst.current_scope();
    let mut inbounds = Expr::mk_bool(true);
    for (iv, b) in scope.ind_vars.iter().zip(bounds.iter()) {
        inbounds = inbounds.and(&iv.ule(b));
    }
    st.well_defined(
        op.kind.name(),
        Expr::forall(scope.ind_vars.clone(), inbounds.implies(&welldef)),
    );

    if all_tensor {
        if tensors.len() != op.results.len() {
            return Err(Unsupported::op(op, "yield and result counts differ"));
        }
        for ((rid, _), t) in op.results.iter().zip(tensors.into_iter()) {
            st.regs.add(*rid, Value::Tensor(t));
        }
    } else {
        let mut success = Expr::mk_bool(true);
        if tensors.len() != outputs.len() {
            return Err(Unsupported::op(op, "yield and output counts differ"));
        }
        for (o, t) in outputs.iter().zip(tensors.into_iter()) {
            let m_res = st.regs.get_memref(*o);
            let ok = m_res.store_array(&mut st.m, &t.as_array(), &idx(0), &t.get_1d_size(), true);
            success = success.and(&ok);
        }
        st.well_defined(op.kind.name(), success);
    }
    Ok(())
}

// ---------------------------------------------------------------------
// Memref helpers
// ---------------------------------------------------------------------

fn dims_with_dynamic(
    st: &State,
    dims: &[DimSize],
    dynamic: &[ValueId],
) -> Vec<Expr> {
    let mut dyn_iter = dynamic.iter();
    let out: Vec<Expr> = dims
        .iter()
        .map(|d| match d {
            Some(n) => idx(*n as i64),
            None => st
                .regs
                .get_index(*dyn_iter.next().expect("missing dynamic size operand"))
                .into_expr(),
        })
        .collect();
    if out.is_empty() {
        vec![idx(1)]
    } else {
        out
    }
}

fn create_local_block(
    st: &mut State,
    elem: ElemType,
    dims: Vec<Expr>,
    writable: bool,
) -> MemRef {
    let bid = st.m.add_local_block(elem, fold_1d_size(&dims), Expr::mk_bool(writable));
    MemRef::with_identity_layout(elem, bid, dims)
}

/// Writes a tensor through a memref. Identity layouts use a bulk array
/// store; other layouts constrain every element pointwise, which brings a
/// quantifier into the encoding.
fn store_tensor_to(
    st: &mut State,
    op_name: &str,
    tensor: &Tensor,
    memref: &MemRef,
    check_writable: bool,
) {
    if memref.is_identity_map() {
        let ok = memref.store_array(
            &mut st.m,
            &tensor.as_array(),
            &idx(0),
            &tensor.get_1d_size(),
            check_writable,
        );
        st.well_defined(op_name, ok);
    } else {
        let idxs = Index::bound_index_vars(memref.rank());
        let (t_val, t_ok) = tensor.get(&idxs);
        let (m_val, m_ok) = memref.get(&st.m, &idxs);
        let success = t_ok.and(&m_ok);
        st.well_defined(
            op_name,
            Expr::forall(idxs, success.implies(&m_val.eq(&t_val))),
        );
        st.has_quantifier = true;
    }
}

fn encode_conv(
    st: &mut State,
    op: &Op,
    layout: ConvLayout,
    image: ValueId,
    filter: ValueId,
    output: ValueId,
    strides: &[i64],
    dilations: &[i64],
    opts: EncodeOptions,
) -> EncodeResult<()> {
    let stride_es: Vec<Expr> = strides.iter().map(|s| idx(*s)).collect();
    let dilation_es: Vec<Expr> = dilations.iter().map(|d| idx(*d)).collect();

    match st.regs.find(output).clone() {
        Value::Tensor(_) => {
            let t_input = st.regs.get_tensor(image);
            let t_filter = st.regs.get_tensor(filter);
            let t_res = t_input.conv(&t_filter, &stride_es, &dilation_es, layout);
            st.regs.add(op.result(), Value::Tensor(t_res));
            Ok(())
        }
        Value::MemRef(out) => {
            if !opts.encode_mem_write_ops {
                return Err(Unsupported::op(op, "memory writes are not encodable in this scope"));
            }
            let input = st.regs.get_memref(image);
            let flt = st.regs.get_memref(filter);
            if !out.is_identity_map() {
                return Err(Unsupported::op(op, "the output memref should have identity layout"));
            }
            let success = out.conv(&mut st.m, &input, &flt, &stride_es, &dilation_es, layout);
            st.well_defined(op.kind.name(), success);
            Ok(())
        }
        _ => Err(Unsupported::op(op, "unsupported type")),
    }
}

// ---------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------

pub(crate) fn encode_op(st: &mut State, op: &Op, opts: EncodeOptions) -> EncodeResult<()> {
    use OpKind::*;
    match &op.kind {
        // -------- scalar and element-wise arithmetic --------
        AddF(a, b) => encode_binary_op(st, op, *a, *b, Some(&|x: Float, y: Float| x.add(&y)), None),
        SubF(a, b) => {
            encode_binary_op(st, op, *a, *b, Some(&|x: Float, y: Float| x.add(&y.neg())), None)
        }
        MulF(a, b) => encode_binary_op(st, op, *a, *b, Some(&|x: Float, y: Float| x.mul(&y)), None),
        NegF(a) => encode_unary_op(st, op, *a, Some(&|x: Float| x.neg()), None),
        CmpF { pred, lhs, rhs } => {
            if *pred != CmpFPredicate::Olt {
                return Err(Unsupported::op(op, "unsupported cmpf predicate"));
            }
            match (st.regs.find(*lhs).clone(), st.regs.find(*rhs).clone()) {
                (Value::Tensor(ta), Value::Tensor(tb)) => {
                    let p = match ta.elem_type() {
                        ElemType::Float(p) => p,
                        _ => {
                            return Err(Unsupported::op(
                                op,
                                "cmpf only accepts floating-like elemtype",
                            ))
                        }
                    };
                    if ta.elem_type() != tb.elem_type() {
                        return Err(Unsupported::op(op, "unsupported cmpf operand"));
                    }
                    let elem_out = op
                        .result_ty()
                        .elem_type()
                        .ok_or_else(|| Unsupported::op(op, "unsupported type"))?;
                    let res = ta.elementwise_binary(&tb, elem_out, |x, y| {
                        Float::from_expr(x, p).fult(&Float::from_expr(y, p)).into_expr()
                    });
                    st.regs.add(op.result(), Value::Tensor(res));
                    st.well_defined(op.kind.name(), lists_equal(&ta.dims(), &tb.dims()));
                    Ok(())
                }
                (Value::Float(fa), Value::Float(fb)) => {
                    st.regs.add(op.result(), Value::Int(fa.fult(&fb)));
                    Ok(())
                }
                _ => Err(Unsupported::op(op, "unsupported cmpf operand")),
            }
        }
        ExtF(a) => {
            let tgt_prec = float_precision(op, op.result_ty())?;
            let src_prec = operand_float_precision(st, op, *a)?;
            if src_prec == tgt_prec {
                // Extending into the identical type is a no-op.
                let v = st.regs.find(*a).clone();
                st.regs.add(op.result(), v);
                return Ok(());
            }
            if src_prec > tgt_prec {
                return Err(Unsupported::op(op, "cannot extf into a lower precision type"));
            }
            encode_unary_op(st, op, *a, Some(&|x: Float| x.extend(tgt_prec)), None)
        }
        TruncF(a) => {
            let tgt_prec = float_precision(op, op.result_ty())?;
            let src_prec = operand_float_precision(st, op, *a)?;
            if src_prec == tgt_prec {
                let v = st.regs.find(*a).clone();
                st.regs.add(op.result(), v);
                return Ok(());
            }
            if src_prec < tgt_prec {
                return Err(Unsupported::op(op, "cannot truncf into a higher precision type"));
            }
            encode_unary_op(st, op, *a, Some(&|x: Float| x.truncate(tgt_prec)), None)
        }
        AddI(a, b) => {
            let x = st.regs.get_expr(*a);
            let y = st.regs.get_expr(*b);
            add_int_or_index(st, op, x.add(&y));
            Ok(())
        }
        SubI(a, b) => {
            let x = st.regs.get_expr(*a);
            let y = st.regs.get_expr(*b);
            add_int_or_index(st, op, x.sub(&y));
            Ok(())
        }
        MulI(a, b) => {
            let x = st.regs.get_expr(*a);
            let y = st.regs.get_expr(*b);
            add_int_or_index(st, op, x.mul(&y));
            Ok(())
        }
        Constant(attr) => encode_constant(st, op, attr),
        IndexCast(a) => {
            match st.regs.find(*a).clone() {
                Value::Tensor(t) => {
                    let elem_out = op
                        .result_ty()
                        .elem_type()
                        .ok_or_else(|| Unsupported::op(op, "unknown type"))?;
                    let w = elem_width(elem_out);
                    let res = t.elementwise_unary(elem_out, |e| eval_index_cast(e, w));
                    st.regs.add(op.result(), Value::Tensor(res));
                }
                v @ (Value::Int(_) | Value::Index(_)) => {
                    let src = v.expr();
                    match op.result_ty() {
                        Type::Index => {
                            let res = eval_index_cast(src, Index::BITS);
                            st.regs.add(op.result(), Value::Index(Index::from_expr(res)));
                        }
                        Type::Int(w) => {
                            let res = eval_index_cast(src, *w);
                            st.regs.add(op.result(), Value::Int(Integer::from_expr(res)));
                        }
                        _ => return Err(Unsupported::op(op, "unknown type")),
                    }
                }
                _ => return Err(Unsupported::op(op, "unknown type")),
            }
            Ok(())
        }
        Select { cond, true_value, false_value } => {
            encode_select(st, op, *cond, *true_value, *false_value)
        }
        AbsF(a) => {
            let f = st.regs.get_float(*a);
            st.regs.add(op.result(), Value::Float(f.abs()));
            Ok(())
        }

        // -------- affine --------
        AffineApply { map, dim_operands, symbol_operands } => {
            if map.results.len() != 1 {
                return Err(Unsupported::op(op, "num results is larger than one"));
            }
            let dims: Vec<Expr> = dim_operands
                .iter()
                .map(|v| st.regs.get_index(*v).into_expr())
                .collect();
            let syms: Vec<Expr> = symbol_operands
                .iter()
                .map(|v| st.regs.get_index(*v).into_expr())
                .collect();
            let res = encode_affine_expr(&map.results[0], &dims, &syms)
                .ok_or_else(|| Unsupported::op(op, "unsupported affine expr"))?;
            st.regs.add(op.result(), Value::Index(Index::from_expr(res)));
            Ok(())
        }

        // -------- shape / sparse --------
        ShapeOf(a) => {
            let t = st.regs.get_tensor(*a);
            let elem_out = match op.result_ty() {
                Type::Tensor(tt) if elem_sort(tt.elem) == Index::sort() => tt.elem,
                _ => return Err(Unsupported::op(op, "unsupported type")),
            };
            st.regs
                .add(op.result(), Value::Tensor(Tensor::from_elems(elem_out, t.dims())));
            Ok(())
        }
        ToExtentTensor(a) => {
            // The operand is assumed to be a plain tensor; error shapes are
            // out of scope.
            let t = st.regs.get_tensor(*a);
            st.regs.add(op.result(), Value::Tensor(t));
            Ok(())
        }
        SparseConvert(a) => {
            let t = st.regs.get_tensor(*a);
            st.regs.add(op.result(), Value::Tensor(t));
            Ok(())
        }

        // -------- tensor --------
        Dim { source, index } => {
            let dims = shaped_value_dims(st.regs.find(*source))
                .ok_or_else(|| Unsupported::op(op, "unsupported type"))?;
            let (res, wf) = encode_dim_op(st, dims, *index);
            st.regs.add(op.result(), Value::Index(Index::from_expr(res)));
            st.well_defined(op.kind.name(), wf);
            Ok(())
        }
        Cast(a) => {
            let tt = match op.result_ty() {
                Type::Tensor(tt) => tt.clone(),
                _ => return Err(Unsupported::op(op, "unsupported type")),
            };
            let t = st.regs.get_tensor(*a);
            for (i, d) in tt.dims.iter().enumerate() {
                if let Some(n) = d {
                    st.well_defined(op.kind.name(), t.get_dim(i).eq(&idx(*n as i64)));
                }
            }
            st.regs.add(op.result(), Value::Tensor(t));
            Ok(())
        }
        Extract { tensor, indices } => {
            // Out-of-bounds extracts are encoded as UB.
            let t = st.regs.get_tensor(*tensor);
            let mut idxs: Vec<Expr> = indices
                .iter()
                .map(|i| st.regs.get_index(*i).into_expr())
                .collect();
            if idxs.is_empty() {
                // The zero-rank tensor case.
                idxs.push(idx(0));
            }
            let (elem, inbounds) = t.get(&idxs);
            let v = from_expr(elem, op.result_ty())
                .ok_or_else(|| Unsupported::op(op, "unsupported type"))?;
            st.regs.add(op.result(), v);
            st.well_defined(op.kind.name(), inbounds);
            Ok(())
        }
        Insert { scalar, dest, indices } => {
            let val = st.regs.get_expr(*scalar);
            let dest_t = st.regs.get_tensor(*dest);
            let idxs: Vec<Expr> = indices
                .iter()
                .map(|i| st.regs.get_index(*i).into_expr())
                .collect();
            let (t, inbounds) = dest_t.insert(val, &idxs);
            st.regs.add(op.result(), Value::Tensor(t));
            st.well_defined(op.kind.name(), inbounds);
            Ok(())
        }
        ExtractSlice { source, offsets, sizes, strides } => {
            encode_extract_slice(st, op, *source, offsets, sizes, strides)
        }
        InsertSlice { source, dest, offsets, sizes, strides } => {
            encode_insert_slice(st, op, *source, *dest, offsets, sizes, strides)
        }
        FromElements(vals) => {
            let elems: Vec<Expr> = vals.iter().map(|v| st.regs.get_expr(*v)).collect();
            let elem_out = op
                .result_ty()
                .elem_type()
                .ok_or_else(|| Unsupported::op(op, "unsupported type"))?;
            st.regs
                .add(op.result(), Value::Tensor(Tensor::from_elems(elem_out, elems)));
            Ok(())
        }
        Generate { dynamic_extents, body } => encode_generate(st, op, dynamic_extents, body),
        Pad { source, low, high, body } => encode_pad(st, op, *source, low, high, body),

        // -------- linalg --------
        LinalgIndex { dim } => {
            let scope = st.current_scope();
            assert!((*dim as usize) < scope.ind_vars.len());
            let v = scope.ind_vars[*dim as usize].clone();
            st.regs.add(op.result(), Value::Index(Index::from_expr(v)));
            Ok(())
        }
        InitTensor { sizes } => {
            let tt = match op.result_ty() {
                Type::Tensor(tt) => tt.clone(),
                _ => return Err(Unsupported::op(op, "unsupported tensor type")),
            };
            let dims = if tt.rank() == 0 {
                vec![idx(1)]
            } else {
                get_from_mixed(st, sizes)
            };
            let t = Tensor::fresh(tt.elem, "init_tensor", dims);
            st.regs.add(op.result(), Value::Tensor(t));
            Ok(())
        }
        Fill { value, dest } => {
            let elemval = st.regs.get_expr(*value);
            match st.regs.find(*dest).clone() {
                Value::Tensor(t) => {
                    let filled = Tensor::splat(t.elem_type(), elemval, t.dims());
                    st.regs.add(op.result(), Value::Tensor(filled));
                    Ok(())
                }
                Value::MemRef(m) => {
                    if !opts.encode_mem_write_ops {
                        return Err(Unsupported::op(
                            op,
                            "memory writes are not encodable in this scope",
                        ));
                    }
                    let filled = Tensor::splat(m.elem_type(), elemval, m.dims());
                    store_tensor_to(st, op.kind.name(), &filled, &m, true);
                    Ok(())
                }
                _ => Err(Unsupported::op(op, "unsupported type")),
            }
        }
        Matmul { a, b, out } => {
            if !matches!(st.regs.find(*out), Value::Tensor(_)) {
                return Err(Unsupported::op(op, "tensor semantics is supported only"));
            }
            let ta = st.regs.get_tensor(*a);
            let tb = st.regs.get_tensor(*b);
            let elem_out = op.result_ty().elem_type();
            if ta.elem_type() != tb.elem_type() || Some(ta.elem_type()) != elem_out {
                return Err(Unsupported::op(op, "unsupported types"));
            }
            st.regs.add(op.result(), Value::Tensor(ta.matmul(&tb)));
            Ok(())
        }
        Dot { a, b, out } => {
            if !matches!(st.regs.find(*out), Value::Tensor(_)) {
                return Err(Unsupported::op(op, "tensor semantics is supported only"));
            }
            let out_tt = match op.result_ty() {
                Type::Tensor(tt) => tt.clone(),
                _ => return Err(Unsupported::op(op, "unsupported type")),
            };
            if out_tt.rank() != 1 || out_tt.dims != vec![Some(1)] {
                return Err(Unsupported::op(
                    op,
                    "unknown dot format; the result tensor should have one element",
                ));
            }
            let t1 = st.regs.get_tensor(*a);
            let t2 = st.regs.get_tensor(*b);
            if t1.elem_type() != out_tt.elem {
                return Err(Unsupported::op(op, "casting is not supported"));
            }
            st.well_defined(op.kind.name(), t1.get_1d_size().eq(&t2.get_1d_size()));
            let res = t1.dot(&t2);
            st.regs
                .add(op.result(), Value::Tensor(Tensor::splat(out_tt.elem, res, vec![idx(1)])));
            Ok(())
        }
        Conv2D { layout, image, filter, output, strides, dilations } => {
            encode_conv(st, op, *layout, *image, *filter, *output, strides, dilations, opts)
        }
        Copy { input, output } => {
            if !opts.encode_mem_write_ops {
                return Err(Unsupported::op(op, "memory writes are not encodable in this scope"));
            }
            let mr_in = st.regs.get_memref(*input);
            let mr_out = st.regs.get_memref(*output);
            if mr_in.rank() != mr_out.rank() {
                return Err(Unsupported::op(op, "unsupported form"));
            }
            for i in 0..mr_in.rank() {
                st.well_defined(op.kind.name(), mr_in.get_dim(i).eq(&mr_out.get_dim(i)));
            }
            // The regions must not overlap.
            st.well_defined(op.kind.name(), mr_in.noalias(&mr_out));
            let t = mr_in.load_tensor(&st.m);
            store_tensor_to(st, op.kind.name(), &t, &mr_out, true);
            Ok(())
        }
        CollapseShape { source, reassociation } => {
            let t = st.regs.get_tensor(*source);
            let res_tt = match op.result_ty() {
                Type::Tensor(tt) => tt.clone(),
                _ => return Err(Unsupported::op(op, "unsupported type")),
            };
            assert_eq!(reassociation.len(), res_tt.rank());
            let mut new_dims = Vec::new();
            if reassociation.is_empty() {
                new_dims.push(idx(1));
            } else {
                // A group whose product mismatches a known output dim is UB.
                for (i, group) in reassociation.iter().enumerate() {
                    let mut size = idx(1);
                    for g in group {
                        size = size.mul(&t.get_dim(*g));
                    }
                    if let Some(n) = res_tt.dims[i] {
                        st.well_defined(op.kind.name(), size.eq(&idx(n as i64)));
                    }
                    new_dims.push(size);
                }
            }
            st.well_defined(op.kind.name(), t.get_1d_size().eq(&fold_1d_size(&new_dims)));
            st.regs.add(op.result(), Value::Tensor(t.reshape(new_dims)));
            Ok(())
        }
        ExpandShape { source, reassociation } => {
            encode_expand_shape(st, op, *source, reassociation)
        }
        Generic { inputs, outputs, indexing_maps, iterator_types: _, body } => {
            encode_generic(st, op, inputs, outputs, indexing_maps, body, opts)
        }
        Yield(_) => Err(Unsupported::op(op, "yield outside of a structured op")),

        // -------- memref --------
        Alloc { dynamic_sizes } => {
            let mt = match op.result_ty() {
                Type::MemRef(mt) => mt.clone(),
                _ => return Err(Unsupported::op(op, "unsupported type")),
            };
            if mt.layout != MemRefLayout::Identity {
                return Err(Unsupported::op(
                    op,
                    "unsupported memref type for alloc: it has a non-identity layout map",
                ));
            }
            let dims = dims_with_dynamic(st, &mt.dims, dynamic_sizes);
            let memref = create_local_block(st, mt.elem, dims, true);
            st.regs.add(op.result(), Value::MemRef(memref));
            Ok(())
        }
        GetGlobal { .. } => Err(Unsupported::op(op, "globals are not supported")),
        Load { memref, indices } => {
            // Out-of-bounds loads are encoded as UB.
            let m = st.regs.get_memref(*memref);
            let idxs: Vec<Expr> = indices
                .iter()
                .map(|i| st.regs.get_index(*i).into_expr())
                .collect();
            let (e, success) = m.get(&st.m, &idxs);
            let v = from_expr(e, op.result_ty())
                .ok_or_else(|| Unsupported::op(op, "unsupported type"))?;
            st.regs.add(op.result(), v);
            st.well_defined(op.kind.name(), success);
            Ok(())
        }
        Store { value, memref, indices } => {
            if !opts.encode_mem_write_ops {
                return Err(Unsupported::op(op, "memory writes are not encodable in this scope"));
            }
            // Out-of-bounds stores are encoded as UB. Only float memrefs are
            // supported for stores.
            let m = st.regs.get_memref(*memref);
            if !matches!(m.elem_type(), ElemType::Float(_)) {
                return Err(Unsupported::op(op, "unsupported type"));
            }
            let val = st.regs.get_float(*value);
            let idxs: Vec<Expr> = indices
                .iter()
                .map(|i| st.regs.get_index(*i).into_expr())
                .collect();
            let success = m.store(&mut st.m, val.expr(), &idxs);
            st.well_defined(op.kind.name(), success);
            Ok(())
        }
        Subview { source, offsets, sizes, strides } => {
            let src = st.regs.get_memref(*source);
            let res_mt = match op.result_ty() {
                Type::MemRef(mt) => mt.clone(),
                _ => return Err(Unsupported::op(op, "unsupported type")),
            };
            let offset_es = get_from_mixed(st, offsets);
            let size_es = get_from_mixed(st, sizes);
            let stride_es = get_from_mixed(st, strides);
            if offset_es.len() != src.rank()
                || size_es.len() != src.rank()
                || stride_es.len() != src.rank()
            {
                return Err(Unsupported::op(op, "unsupported form"));
            }
            // Static result shape vs. the inferred full shape decides which
            // axes are rank-reduced away.
            let full: Vec<DimSize> = sizes
                .iter()
                .map(|s| match s {
                    MixedVal::Const(c) => Some(*c as u64),
                    MixedVal::Value(_) => None,
                })
                .collect();
            let mask = rank_reduction_mask(&full, &res_mt.dims)
                .ok_or_else(|| Unsupported::op(op, "subview result size mismatch"))?;
            let memref = src.subview(&offset_es, &size_es, &stride_es, &mask);
            st.regs.add(op.result(), Value::MemRef(memref));
            Ok(())
        }
        BufferCast(a) => {
            if !opts.encode_mem_write_ops {
                return Err(Unsupported::op(op, "memory writes are not encodable in this scope"));
            }
            let tensor = st.regs.get_tensor(*a);
            let dims = tensor.dims();
            // The cast lives in a fresh read-only block.
            let memref = create_local_block(st, tensor.elem_type(), dims, false);
            store_tensor_to(st, op.kind.name(), &tensor, &memref, false);
            st.regs.add(op.result(), Value::MemRef(memref));
            Ok(())
        }
        MemRefClone(a) => {
            if !opts.encode_mem_write_ops {
                return Err(Unsupported::op(op, "memory writes are not encodable in this scope"));
            }
            let src = st.regs.get_memref(*a);
            let memref = create_local_block(st, src.elem_type(), src.dims(), false);
            let tensor = src.load_tensor(&st.m);
            store_tensor_to(st, op.kind.name(), &tensor, &memref, false);
            // The source loses writability as well.
            st.m.set_writable(src.bid(), false);
            st.regs.add(op.result(), Value::MemRef(memref));
            Ok(())
        }
        TensorLoad(a) => {
            let m = st.regs.get_memref(*a);
            // The block becomes read-only once it escapes into a tensor.
            st.m.set_writable(m.bid(), false);
            let inb = m.is_in_bounds(&st.m);
            st.regs.add(op.result(), Value::Tensor(m.load_tensor(&st.m)));
            st.well_defined(op.kind.name(), inb);
            Ok(())
        }
        TensorStore { tensor, memref } => {
            if !opts.encode_mem_write_ops {
                return Err(Unsupported::op(op, "memory writes are not encodable in this scope"));
            }
            let t = st.regs.get_tensor(*tensor);
            let m = st.regs.get_memref(*memref);
            if t.rank() != m.rank() {
                return Err(Unsupported::op(op, "unsupported form"));
            }
            // Shapes must match; the memref may have its own layout.
            for i in 0..t.rank() {
                st.well_defined(op.kind.name(), t.get_dim(i).eq(&m.get_dim(i)));
            }
            store_tensor_to(st, op.kind.name(), &t, &m, true);
            Ok(())
        }

        // -------- tosa --------
        TosaAbs(a) => {
            require_ranked_tensor_result(op)?;
            let input = st.regs.get_tensor(*a);
            let p = match input.elem_type() {
                ElemType::Float(p) => p,
                _ => return Err(Unsupported::op(op, "unsupported element type")),
            };
            let elem_out = op.result_ty().elem_type().expect("checked above");
            let res =
                input.elementwise_unary(elem_out, |e| Float::from_expr(e, p).abs().into_expr());
            st.regs.add(op.result(), Value::Tensor(res));
            Ok(())
        }
        TosaAdd(a, b) => {
            require_tensor_operands(st, op, &[*a, *b])?;
            encode_binary_op(
                st,
                op,
                *a,
                *b,
                Some(&|x: Float, y: Float| x.add(&y)),
                Some(&|x: Expr, y: Expr| x.add(&y)),
            )
        }
        TosaSub(a, b) => {
            require_tensor_operands(st, op, &[*a, *b])?;
            encode_binary_op(
                st,
                op,
                *a,
                *b,
                Some(&|x: Float, y: Float| x.add(&y.neg())),
                Some(&|x: Expr, y: Expr| x.sub(&y)),
            )
        }
        TosaMul { lhs, rhs, shift } => {
            require_tensor_operands(st, op, &[*lhs, *rhs])?;
            if *shift != 0 {
                return Err(Unsupported::op(op, "mul with shift is unsupported"));
            }
            encode_binary_op(
                st,
                op,
                *lhs,
                *rhs,
                Some(&|x: Float, y: Float| x.mul(&y)),
                Some(&|x: Expr, y: Expr| x.mul(&y)),
            )
        }
        TosaNegate { input, quantized } => {
            require_tensor_operands(st, op, &[*input])?;
            if *quantized {
                return Err(Unsupported::op(op, "quantization is unsupported"));
            }
            encode_unary_op(
                st,
                op,
                *input,
                Some(&|x: Float| x.neg()),
                Some(&|x: Expr| Expr::mk_bv(0, x.bitwidth()).sub(&x)),
            )
        }
        TosaReshape { input, new_shape } => {
            let t = st.regs.get_tensor(*input);
            if new_shape.iter().any(|d| *d == -1) {
                return Err(Unsupported::op(op, "dynamic shape is unsupported"));
            }
            let new_dims: Vec<Expr> = new_shape.iter().map(|d| idx(*d)).collect();
            st.well_defined(op.kind.name(), t.get_1d_size().eq(&fold_1d_size(&new_dims)));
            st.regs.add(op.result(), Value::Tensor(t.reshape(new_dims)));
            Ok(())
        }
        TosaReverse { input, axis } => {
            require_ranked_tensor_result(op)?;
            let t = st.regs.get_tensor(*input);
            st.regs.add(op.result(), Value::Tensor(t.reverse(*axis)));
            Ok(())
        }
        TosaTile { input, multiples } => {
            require_ranked_tensor_result(op)?;
            let t = st.regs.get_tensor(*input);
            st.regs.add(op.result(), Value::Tensor(t.tile(multiples)));
            Ok(())
        }
        TosaConcat { axis, inputs } => {
            require_ranked_tensor_result(op)?;
            let mut t = st.regs.get_tensor(inputs[0]);
            for other in &inputs[1..] {
                let t2 = st.regs.get_tensor(*other);
                for i in 0..t2.rank() {
                    if i as u64 != *axis {
                        st.well_defined(op.kind.name(), t.get_dim(i).eq(&t2.get_dim(i)));
                    }
                }
                t = t.concat(&t2, *axis);
            }
            st.regs.add(op.result(), Value::Tensor(t));
            Ok(())
        }
        TosaConst(attr) => {
            let tt = match op.result_ty() {
                Type::Tensor(tt) => tt.clone(),
                _ => return Err(Unsupported::op(op, "unsupported type")),
            };
            if !matches!(attr, Attr::Dense(_) | Attr::Sparse(_)) {
                return Err(Unsupported::op(op, "unsupported attribute"));
            }
            let (t, sparse) = elem_attr_to_tensor(op, attr, &tt)?;
            if sparse {
                st.has_const_array = true;
            }
            st.regs.add(op.result(), Value::Tensor(t));
            Ok(())
        }
        TosaBitwiseAnd(a, b) => encode_tosa_bitwise2(st, op, *a, *b, &|x, y| x.and(&y)),
        TosaBitwiseOr(a, b) => encode_tosa_bitwise2(st, op, *a, *b, &|x, y| x.or(&y)),
        TosaBitwiseXor(a, b) => encode_tosa_bitwise2(st, op, *a, *b, &|x, y| x.xor(&y)),
        TosaBitwiseNot(a) => {
            require_int_tensor_operands(st, op, &[*a])?;
            encode_unary_op(st, op, *a, None, Some(&|x: Expr| x.not()))
        }

        Return(vals) => {
            for v in vals {
                let value = st.regs.find(*v).clone();
                st.ret_values.push(value);
            }
            Ok(())
        }
    }
}

fn add_int_or_index(st: &mut State, op: &Op, e: Expr) {
    if matches!(op.result_ty(), Type::Index) {
        st.regs.add(op.result(), Value::Index(Index::from_expr(e)));
    } else {
        st.regs.add(op.result(), Value::Int(Integer::from_expr(e)));
    }
}

fn float_precision(op: &Op, ty: &Type) -> EncodeResult<FpPrec> {
    match ty {
        Type::Float(p) => Ok(*p),
        Type::Tensor(tt) => match tt.elem {
            ElemType::Float(p) => Ok(p),
            _ => Err(Unsupported::op(op, "unsupported fp type")),
        },
        _ => Err(Unsupported::op(op, "unsupported fp type")),
    }
}

fn operand_float_precision(st: &State, op: &Op, v: ValueId) -> EncodeResult<FpPrec> {
    match st.regs.find(v) {
        Value::Float(f) => Ok(f.prec()),
        Value::Tensor(t) => match t.elem_type() {
            ElemType::Float(p) => Ok(p),
            _ => Err(Unsupported::op(op, "unsupported fp type")),
        },
        _ => Err(Unsupported::op(op, "unsupported fp type")),
    }
}

fn require_ranked_tensor_result(op: &Op) -> EncodeResult<()> {
    match op.result_ty() {
        Type::Tensor(_) => Ok(()),
        _ => Err(Unsupported::op(op, "unsupported type")),
    }
}

fn require_tensor_operands(st: &State, op: &Op, vals: &[ValueId]) -> EncodeResult<()> {
    for v in vals {
        if !matches!(st.regs.find(*v), Value::Tensor(_)) {
            return Err(Unsupported::op(op, "unsupported operand types"));
        }
    }
    Ok(())
}

fn require_int_tensor_operands(st: &State, op: &Op, vals: &[ValueId]) -> EncodeResult<()> {
    for v in vals {
        match st.regs.find(*v) {
            Value::Tensor(t) if matches!(t.elem_type(), ElemType::Int(_)) => {}
            _ => return Err(Unsupported::op(op, "unsupported element type")),
        }
    }
    Ok(())
}

fn encode_tosa_bitwise2(
    st: &mut State,
    op: &Op,
    a: ValueId,
    b: ValueId,
    f: &dyn Fn(Expr, Expr) -> Expr,
) -> EncodeResult<()> {
    require_int_tensor_operands(st, op, &[a, b])?;
    encode_binary_op(st, op, a, b, None, Some(f))
}

fn encode_select(
    st: &mut State,
    op: &Op,
    cond: ValueId,
    true_value: ValueId,
    false_value: ValueId,
) -> EncodeResult<()> {
    match (st.regs.find(true_value).clone(), st.regs.find(false_value).clone()) {
        (Value::Tensor(tv), Value::Tensor(fv)) => {
            let mut welldef = lists_equal(&tv.dims(), &fv.dims());
            let result = match st.regs.find(cond).clone() {
                Value::Tensor(cv) => {
                    welldef = welldef.and(&lists_equal(&tv.dims(), &cv.dims()));
                    Tensor::mk_ite(|idxs| cv.get(idxs).0, &tv, &fv)
                }
                Value::Int(ci) => {
                    let c = ci.into_expr();
                    Tensor::mk_ite(move |_| c.clone(), &tv, &fv)
                }
                _ => return Err(Unsupported::op(op, "unsupported operands")),
            };
            st.regs.add(op.result(), Value::Tensor(result));
            st.well_defined(op.kind.name(), welldef);
            Ok(())
        }
        (Value::MemRef(tv), Value::MemRef(fv)) => {
            let ci = match st.regs.find(cond) {
                Value::Int(ci) => ci.clone(),
                _ => {
                    return Err(Unsupported::op(
                        op,
                        "for memref operands, an i1 typed condition is supported only",
                    ))
                }
            };
            let result = MemRef::mk_ite(&ci, &tv, &fv);
            st.regs.add(op.result(), Value::MemRef(result));
            // The dimensions must agree, otherwise the layout is bogus.
            st.well_defined(op.kind.name(), lists_equal(&tv.dims(), &fv.dims()));
            Ok(())
        }
        (tv, fv) => {
            let ci = st.regs.get_integer(cond);
            let is_true = ci.expr().eq(&Integer::bool_true().into_expr());
            let res = Expr::ite(&is_true, &tv.expr(), &fv.expr());
            let v = from_expr(res, op.result_ty())
                .ok_or_else(|| Unsupported::op(op, "unsupported operands"))?;
            st.regs.add(op.result(), v);
            Ok(())
        }
    }
}

fn encode_expand_shape(
    st: &mut State,
    op: &Op,
    source: ValueId,
    reassociation: &[Vec<usize>],
) -> EncodeResult<()> {
    let t = st.regs.get_tensor(source);
    let res_tt = match op.result_ty() {
        Type::Tensor(tt) => tt.clone(),
        _ => return Err(Unsupported::op(op, "unsupported type")),
    };
    let mut new_dims: Vec<Expr> = res_tt
        .dims
        .iter()
        .map(|d| match d {
            Some(n) => idx(*n as i64),
            None => Expr::fresh_var("dim", Index::sort()),
        })
        .collect();

    for (srci, group) in reassociation.iter().enumerate() {
        let orgdim = t.get_dim(srci);

        // At most one '?' per group.
        let mut unknown_dim: Option<usize> = None;
        let mut const_size: u64 = 1;
        for id in group {
            match res_tt.dims[*id] {
                None => {
                    if unknown_dim.is_some() {
                        return Err(Unsupported::op(
                            op,
                            "more than one unknown dimension size in one group",
                        ));
                    }
                    unknown_dim = Some(*id);
                }
                Some(n) => const_size = const_size.saturating_mul(n),
            }
        }
        let unknown = match unknown_dim {
            // Fully static groups are already well-defined.
            None => continue,
            Some(u) => u,
        };
        if const_size >= 1u64 << Index::BITS {
            return Err(Unsupported::op(op, "tensor size is too large"));
        }

        // The original size must be divisible by the known factor.
        let cs = idx(const_size as i64);
        st.well_defined(op.kind.name(), orgdim.urem(&cs).is_zero());
        new_dims[unknown] = orgdim.udiv(&cs);
    }

    st.regs.add(op.result(), Value::Tensor(t.reshape(new_dims)));
    Ok(())
}

fn encode_generate(
    st: &mut State,
    op: &Op,
    dynamic_extents: &[ValueId],
    body: &Block,
) -> EncodeResult<()> {
    let res_tt = match op.result_ty() {
        Type::Tensor(tt) => tt.clone(),
        _ => return Err(Unsupported::op(op, "unsupported type")),
    };
    if res_tt.rank() == 0 {
        return Err(Unsupported::op(op, "unsupported form"));
    }

    let mut dyn_iter = dynamic_extents.iter();
    let upper_bounds: Vec<Expr> = res_tt
        .dims
        .iter()
        .map(|d| match d {
            Some(n) => idx(*n as i64 - 1),
            None => {
                let e = dyn_iter.next().expect("missing dynamic extent");
                st.regs.get_index(*e).ofs(-1).into_expr()
            }
        })
        .collect();

    let mut newst = st.clone();
    newst.linalg_generic_scopes.push(LoopScope::new(upper_bounds));
    let ind_vars = newst.current_scope().ind_vars.clone();
    assert_eq!(body.args.len(), ind_vars.len());
    for ((arg_id, _), iv) in body.args.iter().zip(ind_vars.iter()) {
        newst.regs.add(*arg_id, Value::Index(Index::from_expr(iv.clone())));
    }

    let identity = AffineMap::identity(res_tt.rank());
    let (tensors, welldef) =
        encode_parallel_loop_body_and_outputs(&mut newst, body, &identity, None)?;
    let result = tensors.into_iter().next().expect("generate yields one value");

    let wrapped = Expr::forall(
        ind_vars.clone(),
        result.is_in_bounds(&ind_vars).implies(&welldef),
    );
    st.regs.add(op.result(), Value::Tensor(result));
    st.well_defined(op.kind.name(), wrapped);
    Ok(())
}

fn encode_pad(
    st: &mut State,
    op: &Op,
    source: ValueId,
    low: &[MixedVal],
    high: &[MixedVal],
    body: &Block,
) -> EncodeResult<()> {
    let res_tt = match op.result_ty() {
        Type::Tensor(tt) => tt.clone(),
        _ => return Err(Unsupported::op(op, "unsupported type")),
    };
    let pad_low = get_from_mixed(st, low);
    let pad_high = get_from_mixed(st, high);
    let src = st.regs.get_tensor(source);
    if pad_low.len() != src.rank() || pad_high.len() != src.rank() {
        return Err(Unsupported::op(op, "unsupported form"));
    }

    let new_size = vec_add(&vec_add(&src.dims(), &pad_low), &pad_high);
    let upper_bounds: Vec<Expr> = new_size.iter().map(|d| d.sub(&idx(1))).collect();

    let mut newst = st.clone();
    newst.linalg_generic_scopes.push(LoopScope::new(upper_bounds));
    let ind_vars = newst.current_scope().ind_vars.clone();
    assert_eq!(body.args.len(), ind_vars.len());
    for ((arg_id, _), iv) in body.args.iter().zip(ind_vars.iter()) {
        newst.regs.add(*arg_id, Value::Index(Index::from_expr(iv.clone())));
    }

    // At an index inside the source region, read the source; outside, use
    // the value the padding body yields.
    let src_for_map = src.clone();
    let pad_low_for_map = pad_low.clone();
    let padding_or_source = move |pad: &Expr, indvars: &[Expr]| -> Expr {
        let mut is_source = Expr::mk_bool(true);
        let mut src_indices = Vec::with_capacity(indvars.len());
        for (i, iv) in indvars.iter().enumerate() {
            let l = &pad_low_for_map[i];
            let h = l.add(&src_for_map.get_dim(i));
            is_source = is_source.and(&l.ule(iv)).and(&iv.ult(&h));
            src_indices.push(iv.sub(l));
        }
        Expr::ite(&is_source, &src_for_map.get(&src_indices).0, pad)
    };

    let identity = AffineMap::identity(res_tt.rank());
    let (tensors, welldef) = encode_parallel_loop_body_and_outputs(
        &mut newst,
        body,
        &identity,
        Some(&padding_or_source),
    )?;
    let result = tensors.into_iter().next().expect("pad yields one value");

    let wrapped = Expr::forall(
        ind_vars.clone(),
        result.is_in_bounds(&ind_vars).implies(&welldef),
    );

    // Known result dims must match the padded size.
    for (i, d) in res_tt.dims.iter().enumerate() {
        if let Some(n) = d {
            st.well_defined(op.kind.name(), result.get_dim(i).eq(&idx(*n as i64)));
        }
    }
    st.regs.add(op.result(), Value::Tensor(result));
    st.well_defined(op.kind.name(), wrapped);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::memory::Memory;
    use crate::encode::{encode_function, symbolic_args, EncodeOptions};
    use crate::tv_ir::builder::FuncBuilder;

    fn f32_tensor(dims: &[u64]) -> Type {
        Type::tensor_of(ElemType::Float(FpPrec::F32), dims)
    }

    fn run(f: &crate::tv_ir::ir::Function, mem_writes: bool) -> EncodeResult<State> {
        let mut m = Memory::new();
        let args = symbolic_args(f, &mut m).unwrap();
        encode_function(f, args, m, EncodeOptions { encode_mem_write_ops: mem_writes })
    }

    #[test]
    fn addf_scalar() {
        let mut b = FuncBuilder::new("f");
        let x = b.param(Type::f32());
        let y = b.param(Type::f32());
        let s = b.push(OpKind::AddF(x, y), Type::f32());
        b.ret(vec![s]);
        let st = run(&b.finish(), false).unwrap();
        assert!(matches!(st.ret_values[0], Value::Float(_)));
        assert!(st.well_defined_pred().is_true());
    }

    #[test]
    fn addf_tensor_equal_shapes_has_no_residual_ub() {
        let mut b = FuncBuilder::new("f");
        let x = b.param(f32_tensor(&[4, 4]));
        let y = b.param(f32_tensor(&[4, 4]));
        let s = b.push(OpKind::AddF(x, y), f32_tensor(&[4, 4]));
        b.ret(vec![s]);
        let st = run(&b.finish(), false).unwrap();
        // Static equal shapes fold the shape-match predicate away.
        assert!(st.well_defined_pred().is_true());
    }

    #[test]
    fn broadcast_scalar_like_axis() {
        let mut b = FuncBuilder::new("f");
        let x = b.param(f32_tensor(&[3, 4]));
        let y = b.param(f32_tensor(&[4]));
        let s = b.push(OpKind::AddF(x, y), f32_tensor(&[3, 4]));
        b.ret(vec![s]);
        let st = run(&b.finish(), false).unwrap();
        match &st.ret_values[0] {
            Value::Tensor(t) => {
                assert_eq!(t.rank(), 2);
                assert_eq!(t.get_dim(0).as_u64(), Some(3));
                assert_eq!(t.get_dim(1).as_u64(), Some(4));
            }
            other => panic!("expected tensor, got {:?}", other),
        }
    }

    #[test]
    fn broadcast_size_one_axis_reads_index_zero() {
        let mut b = FuncBuilder::new("f");
        let x = b.param(f32_tensor(&[3, 1]));
        let y = b.param(f32_tensor(&[3, 5]));
        let s = b.push(OpKind::MulF(x, y), f32_tensor(&[3, 5]));
        b.ret(vec![s]);
        let st = run(&b.finish(), false).unwrap();
        match &st.ret_values[0] {
            Value::Tensor(t) => assert_eq!(t.get_dim(1).as_u64(), Some(5)),
            other => panic!("expected tensor, got {:?}", other),
        }
    }

    #[test]
    fn broadcast_dynamic_static_mix_is_unsupported() {
        let mut b = FuncBuilder::new("f");
        let x = b.param(Type::Tensor(TensorType::new(
            ElemType::Float(FpPrec::F32),
            vec![None],
        )));
        let y = b.param(f32_tensor(&[4]));
        let s = b.push(OpKind::AddF(x, y), f32_tensor(&[4]));
        b.ret(vec![s]);
        let err = run(&b.finish(), false).unwrap_err();
        assert!(err.to_string().contains("broadcast"));
    }

    #[test]
    fn cmpf_only_supports_olt() {
        let mut b = FuncBuilder::new("f");
        let x = b.param(Type::f32());
        let y = b.param(Type::f32());
        let c = b.push(
            OpKind::CmpF { pred: CmpFPredicate::Oeq, lhs: x, rhs: y },
            Type::i1(),
        );
        b.ret(vec![c]);
        let err = run(&b.finish(), false).unwrap_err();
        assert!(err.to_string().contains("cmpf"));
    }

    #[test]
    fn dim_out_of_rank_is_ub_not_error() {
        let mut b = FuncBuilder::new("f");
        let t = b.param(f32_tensor(&[7, 9]));
        let i = b.push(OpKind::Constant(Attr::Index(5)), Type::Index);
        let d = b.push(OpKind::Dim { source: t, index: i }, Type::Index);
        b.ret(vec![d]);
        let st = run(&b.finish(), false).unwrap();
        // idx 5 >= rank 2: the accumulated predicate must be false.
        assert!(st.well_defined_pred().is_false());
    }

    #[test]
    fn dim_in_rank_resolves_to_the_dimension() {
        let mut b = FuncBuilder::new("f");
        let t = b.param(f32_tensor(&[7, 9]));
        let i = b.push(OpKind::Constant(Attr::Index(1)), Type::Index);
        let d = b.push(OpKind::Dim { source: t, index: i }, Type::Index);
        b.ret(vec![d]);
        let st = run(&b.finish(), false).unwrap();
        assert!(st.well_defined_pred().is_true());
        assert_eq!(st.ret_values[0].expr().as_u64(), Some(9));
    }

    #[test]
    fn extract_emits_inbounds_ub() {
        let mut b = FuncBuilder::new("f");
        let t = b.param(f32_tensor(&[8]));
        let i = b.push(OpKind::Constant(Attr::Index(8)), Type::Index);
        let e = b.push(OpKind::Extract { tensor: t, indices: vec![i] }, Type::f32());
        b.ret(vec![e]);
        let st = run(&b.finish(), false).unwrap();
        assert!(st.well_defined_pred().is_false());
    }

    #[test]
    fn dense_splat_constant() {
        let mut b = FuncBuilder::new("f");
        let c = b.push(
            OpKind::Constant(Attr::Dense(DenseAttr::Splat(Box::new(Attr::Int {
                value: 7,
                width: 32,
            })))),
            Type::tensor_of(ElemType::Int(32), &[2, 2]),
        );
        b.ret(vec![c]);
        let st = run(&b.finish(), false).unwrap();
        match &st.ret_values[0] {
            Value::Tensor(t) => {
                let v = t.get(&[idx(1), idx(1)]).0;
                assert_eq!(v.as_u64(), Some(7));
            }
            other => panic!("expected tensor, got {:?}", other),
        }
        assert!(!st.has_const_array);
    }

    #[test]
    fn sparse_constant_sets_flag() {
        let mut b = FuncBuilder::new("f");
        let c = b.push(
            OpKind::Constant(Attr::Sparse(crate::tv_ir::ir::SparseAttr {
                indices: vec![vec![0, 0]],
                values: vec![Attr::Int { value: 3, width: 32 }],
                zero: Box::new(Attr::Int { value: 0, width: 32 }),
            })),
            Type::tensor_of(ElemType::Int(32), &[2, 2]),
        );
        b.ret(vec![c]);
        let st = run(&b.finish(), false).unwrap();
        assert!(st.has_const_array);
    }

    #[test]
    fn collapse_shape_static_ok() {
        let mut b = FuncBuilder::new("f");
        let t = b.param(f32_tensor(&[2, 3, 4]));
        let c = b.push(
            OpKind::CollapseShape { source: t, reassociation: vec![vec![0, 1], vec![2]] },
            f32_tensor(&[6, 4]),
        );
        b.ret(vec![c]);
        let st = run(&b.finish(), false).unwrap();
        assert!(st.well_defined_pred().is_true());
        match &st.ret_values[0] {
            Value::Tensor(t) => {
                assert_eq!(t.get_dim(0).as_u64(), Some(6));
                assert_eq!(t.get_dim(1).as_u64(), Some(4));
            }
            other => panic!("expected tensor, got {:?}", other),
        }
    }

    #[test]
    fn expand_shape_multiple_unknowns_rejected() {
        let mut b = FuncBuilder::new("f");
        let t = b.param(Type::Tensor(TensorType::new(
            ElemType::Float(FpPrec::F32),
            vec![None],
        )));
        let c = b.push(
            OpKind::ExpandShape { source: t, reassociation: vec![vec![0, 1]] },
            Type::Tensor(TensorType::new(ElemType::Float(FpPrec::F32), vec![None, None])),
        );
        b.ret(vec![c]);
        let err = run(&b.finish(), false).unwrap_err();
        assert!(err.to_string().contains("unknown dimension"));
    }

    #[test]
    fn store_requires_mem_write_scope() {
        let mut b = FuncBuilder::new("f");
        let m = b.param(Type::MemRef(crate::tv_ir::ir::MemRefType::new(
            ElemType::Float(FpPrec::F32),
            vec![Some(4)],
        )));
        let v = b.param(Type::f32());
        let i = b.push(OpKind::Constant(Attr::Index(0)), Type::Index);
        b.push_no_result(OpKind::Store { value: v, memref: m, indices: vec![i] });
        b.push_no_result(OpKind::Return(vec![]));
        let f = b.finish();
        let err = run(&f, false).unwrap_err();
        assert!(err.to_string().contains("memory writes"));
        assert!(run(&f, true).is_ok());
    }

    #[test]
    fn alloc_load_roundtrip_is_well_formed() {
        let mut b = FuncBuilder::new("f");
        let a = b.push(
            OpKind::Alloc { dynamic_sizes: vec![] },
            Type::MemRef(crate::tv_ir::ir::MemRefType::new(
                ElemType::Float(FpPrec::F32),
                vec![Some(4)],
            )),
        );
        let i = b.push(OpKind::Constant(Attr::Index(2)), Type::Index);
        let l = b.push(OpKind::Load { memref: a, indices: vec![i] }, Type::f32());
        b.ret(vec![l]);
        let st = run(&b.finish(), true).unwrap();
        assert!(st.well_defined_pred().is_true());
    }

    #[test]
    fn tosa_mul_with_shift_is_unsupported() {
        let mut b = FuncBuilder::new("f");
        let x = b.param(Type::tensor_of(ElemType::Int(32), &[4]));
        let y = b.param(Type::tensor_of(ElemType::Int(32), &[4]));
        let s = b.push(
            OpKind::TosaMul { lhs: x, rhs: y, shift: 1 },
            Type::tensor_of(ElemType::Int(32), &[4]),
        );
        b.ret(vec![s]);
        let err = run(&b.finish(), false).unwrap_err();
        assert!(err.to_string().contains("shift"));
    }

    #[test]
    fn tosa_bitwise_requires_int_elements() {
        let mut b = FuncBuilder::new("f");
        let x = b.param(f32_tensor(&[4]));
        let y = b.param(f32_tensor(&[4]));
        let s = b.push(OpKind::TosaBitwiseAnd(x, y), f32_tensor(&[4]));
        b.ret(vec![s]);
        let err = run(&b.finish(), false).unwrap_err();
        assert!(err.to_string().contains("element type"));
    }

    #[test]
    fn rank_reduction_mask_examples() {
        // [3, 1, 4] -> [3, 4]: the middle unit axis is dropped.
        let mask =
            rank_reduction_mask(&[Some(3), Some(1), Some(4)], &[Some(3), Some(4)]).unwrap();
        assert_eq!(mask, vec![false, true, false]);
        // Mismatched shapes produce no mask.
        assert!(rank_reduction_mask(&[Some(3), Some(2)], &[Some(3), Some(4)]).is_none());
        // Identity.
        let id = rank_reduction_mask(&[Some(3), Some(4)], &[Some(3), Some(4)]).unwrap();
        assert_eq!(id, vec![false, false]);
    }

    #[test]
    fn affine_apply_evaluates_supported_kinds() {
        let mut b = FuncBuilder::new("f");
        let i = b.push(OpKind::Constant(Attr::Index(6)), Type::Index);
        let map = AffineMap::new(
            1,
            0,
            vec![AffineExpr::add(
                AffineExpr::mul(AffineExpr::Dim(0), AffineExpr::Const(2)),
                AffineExpr::Const(3),
            )],
        );
        let r = b.push(
            OpKind::AffineApply { map, dim_operands: vec![i], symbol_operands: vec![] },
            Type::Index,
        );
        b.ret(vec![r]);
        let st = run(&b.finish(), false).unwrap();
        assert_eq!(st.ret_values[0].expr().as_u64(), Some(15));
    }

    #[test]
    fn affine_apply_negative_constant_unsupported() {
        let mut b = FuncBuilder::new("f");
        let i = b.push(OpKind::Constant(Attr::Index(6)), Type::Index);
        let map = AffineMap::new(
            1,
            0,
            vec![AffineExpr::add(AffineExpr::Dim(0), AffineExpr::Const(-1))],
        );
        let r = b.push(
            OpKind::AffineApply { map, dim_operands: vec![i], symbol_operands: vec![] },
            Type::Index,
        );
        b.ret(vec![r]);
        let err = run(&b.finish(), false).unwrap_err();
        assert!(err.to_string().contains("affine"));
    }
}
