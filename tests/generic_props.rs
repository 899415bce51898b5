// SPDX-License-Identifier: Apache-2.0

//! Invariant-level tests for the structured-loop encodings: padding,
//! reductions, broadcasting, and encoding determinism.

use test_case::test_case;

use tensortv::encode::memory::Memory;
use tensortv::encode::state::State;
use tensortv::encode::value::{fp_add, Index, Value};
use tensortv::encode::{encode_function, symbolic_args, EncodeOptions};
use tensortv::smt::{Expr, FpPrec};
use tensortv::tv_ir::affine::AffineMap;
use tensortv::tv_ir::builder::FuncBuilder;
use tensortv::tv_ir::ir::{
    Attr, ElemType, Function, IteratorType, MixedVal, OpKind, TensorType, Type,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn f32_tensor(dims: &[u64]) -> Type {
    Type::tensor_of(ElemType::Float(FpPrec::F32), dims)
}

fn iv(v: u64) -> Expr {
    Expr::mk_bv(v, Index::BITS)
}

/// Encodes `f`, returning the state plus the argument values it ran over.
fn encode_with_args(f: &Function) -> (State, Vec<Value>) {
    let mut m = Memory::new();
    let args = symbolic_args(f, &mut m).expect("symbolic args");
    let st = encode_function(f, args.clone(), m, EncodeOptions::default()).expect("encode");
    (st, args)
}

fn ret_tensor(st: &State, i: usize) -> tensortv::encode::tensor::Tensor {
    match &st.ret_values[i] {
        Value::Tensor(t) => t.clone(),
        other => panic!("expected tensor return, got {:?}", other),
    }
}

fn arg_tensor(args: &[Value], i: usize) -> tensortv::encode::tensor::Tensor {
    match &args[i] {
        Value::Tensor(t) => t.clone(),
        other => panic!("expected tensor arg, got {:?}", other),
    }
}

// ---------------------------------------------------------------------
// Padding: in-source indices read the source, others the padding body
// ---------------------------------------------------------------------

#[test]
fn pad_reads_source_inside_and_padding_outside() {
    init_logging();
    let mut b = FuncBuilder::new("f");
    let t = b.param(f32_tensor(&[4]));
    let body = b.block(vec![Type::Index], |bb, _args| {
        let c = bb.push(OpKind::Constant(Attr::f32(0.0)), Type::f32());
        bb.push_no_result(OpKind::Yield(vec![c]));
    });
    let p = b.push(
        OpKind::Pad {
            source: t,
            low: vec![MixedVal::Const(1)],
            high: vec![MixedVal::Const(1)],
            body,
        },
        f32_tensor(&[6]),
    );
    b.ret(vec![p]);
    let f = b.finish();

    let (st, args) = encode_with_args(&f);
    let padded = ret_tensor(&st, 0);
    let src = arg_tensor(&args, 0);

    assert_eq!(padded.get_dim(0).as_u64(), Some(6));

    // Index 2 lands at source index 1.
    assert_eq!(padded.get(&[iv(2)]).0, src.get(&[iv(1)]).0);
    // Index 0 and 5 are outside the source: the padding value.
    let pad_val = padded.get(&[iv(0)]).0;
    assert_eq!(padded.get(&[iv(5)]).0, pad_val);
    assert!(format!("{:?}", pad_val).contains("fp.const"));

    // Static pad sizes close every obligation.
    assert!(st.well_defined_pred().is_true());
}

// ---------------------------------------------------------------------
// Reduction: [parallel, reduction] with identity input map sums rows
// ---------------------------------------------------------------------

fn row_sum_fn(zero_output_map: bool) -> Function {
    let mut b = FuncBuilder::new("f");
    let t = b.param(f32_tensor(&[3, 4]));
    let out_dims: &[u64] = if zero_output_map { &[1] } else { &[3] };
    let out = b.push(
        OpKind::InitTensor {
            sizes: out_dims.iter().map(|d| MixedVal::Const(*d as i64)).collect(),
        },
        f32_tensor(out_dims),
    );
    let body = b.block(vec![Type::f32(), Type::f32()], |bb, args| {
        let s = bb.push(OpKind::AddF(args[1], args[0]), Type::f32());
        bb.push_no_result(OpKind::Yield(vec![s]));
    });
    let out_map = if zero_output_map {
        AffineMap::zero_result(2)
    } else {
        AffineMap::projection(2, &[0])
    };
    let g = b.push(
        OpKind::Generic {
            inputs: vec![t],
            outputs: vec![out],
            indexing_maps: vec![AffineMap::identity(2), out_map],
            iterator_types: vec![IteratorType::Parallel, IteratorType::Reduction],
            body,
        },
        f32_tensor(out_dims),
    );
    b.ret(vec![g]);
    b.finish()
}

#[test]
fn add_reduction_along_one_axis() {
    init_logging();
    let (st, _) = encode_with_args(&row_sum_fn(false));
    let r = ret_tensor(&st, 0);
    assert_eq!(r.get_dim(0).as_u64(), Some(3));
    let elem = format!("{:?}", r.get(&[iv(1)]).0);
    assert!(elem.contains("sum.f32"), "row element is not a sum: {elem}");
}

#[test]
fn add_reduction_to_scalar_splat() {
    init_logging();
    let (st, _) = encode_with_args(&row_sum_fn(true));
    let r = ret_tensor(&st, 0);
    assert_eq!(r.get_dim(0).as_u64(), Some(1));
    // Every index carries the same full sum.
    assert_eq!(r.get(&[iv(0)]).0, r.get(&[iv(0)]).0);
    assert!(format!("{:?}", r.get(&[iv(0)]).0).contains("sum.f32"));
}

#[test]
fn reduction_with_foreign_body_shape_is_unsupported() {
    init_logging();
    let mut b = FuncBuilder::new("f");
    let t = b.param(f32_tensor(&[3, 4]));
    let out = b.push(
        OpKind::InitTensor { sizes: vec![MixedVal::Const(3)] },
        f32_tensor(&[3]),
    );
    // mul-accumulate is outside the recognized reduction shapes.
    let body = b.block(vec![Type::f32(), Type::f32()], |bb, args| {
        let s = bb.push(OpKind::MulF(args[1], args[0]), Type::f32());
        bb.push_no_result(OpKind::Yield(vec![s]));
    });
    let g = b.push(
        OpKind::Generic {
            inputs: vec![t],
            outputs: vec![out],
            indexing_maps: vec![AffineMap::identity(2), AffineMap::projection(2, &[0])],
            iterator_types: vec![IteratorType::Parallel, IteratorType::Reduction],
            body,
        },
        f32_tensor(&[3]),
    );
    b.ret(vec![g]);
    let f = b.finish();

    let mut m = Memory::new();
    let args = symbolic_args(&f, &mut m).unwrap();
    let err = encode_function(&f, args, m, EncodeOptions::default()).unwrap_err();
    assert!(err.to_string().contains("reduction"));
}

// ---------------------------------------------------------------------
// Broadcast soundness
// ---------------------------------------------------------------------

#[test_case(&[1, 4], &[3, 4], &[3, 4] ; "unit_leading_axis")]
#[test_case(&[3, 4], &[4], &[3, 4] ; "rank_promotion")]
#[test_case(&[3, 1], &[3, 5], &[3, 5] ; "unit_trailing_axis")]
#[test_case(&[2, 1, 4], &[7, 4], &[2, 7, 4] ; "both_sides_stretch")]
fn broadcast_result_shape(a: &[u64], b: &[u64], expect: &[u64]) {
    init_logging();
    let mut bld = FuncBuilder::new("f");
    let x = bld.param(f32_tensor(a));
    let y = bld.param(f32_tensor(b));
    let s = bld.push(OpKind::AddF(x, y), f32_tensor(expect));
    bld.ret(vec![s]);
    let (st, _) = encode_with_args(&bld.finish());
    let t = ret_tensor(&st, 0);
    let dims: Vec<Option<u64>> = (0..t.rank()).map(|i| t.get_dim(i).as_u64()).collect();
    let want: Vec<Option<u64>> = expect.iter().map(|d| Some(*d)).collect();
    assert_eq!(dims, want);
}

#[test]
fn broadcast_reads_the_original_element() {
    init_logging();
    let mut b = FuncBuilder::new("f");
    let x = b.param(f32_tensor(&[1, 4]));
    let y = b.param(f32_tensor(&[3, 4]));
    let s = b.push(OpKind::AddF(x, y), f32_tensor(&[3, 4]));
    b.ret(vec![s]);
    let (st, args) = encode_with_args(&b.finish());

    let r = ret_tensor(&st, 0);
    let xa = arg_tensor(&args, 0);
    let ya = arg_tensor(&args, 1);

    // The broadcast axis of x pins its index to zero.
    let got = r.get(&[iv(2), iv(3)]).0;
    let want = fp_add(FpPrec::F32, xa.get(&[iv(0), iv(3)]).0, ya.get(&[iv(2), iv(3)]).0);
    assert_eq!(got, want);
}

// ---------------------------------------------------------------------
// tensor.generate: a parallel loop with identity output map
// ---------------------------------------------------------------------

#[test]
fn generate_identity_index_tensor() {
    init_logging();
    let mut b = FuncBuilder::new("f");
    let body = b.block(vec![Type::Index], |bb, args| {
        bb.push_no_result(OpKind::Yield(vec![args[0]]));
    });
    let g = b.push(
        OpKind::Generate { dynamic_extents: vec![], body },
        Type::tensor_of(ElemType::Index, &[5]),
    );
    b.ret(vec![g]);
    let (st, _) = encode_with_args(&b.finish());
    let t = ret_tensor(&st, 0);
    assert_eq!(t.get(&[iv(3)]).0.as_u64(), Some(3));
    assert_eq!(t.get(&[iv(0)]).0.as_u64(), Some(0));
}

// ---------------------------------------------------------------------
// Determinism: re-encoding produces the same element terms
// ---------------------------------------------------------------------

#[test]
fn re_encoding_is_deterministic_at_concrete_indices() {
    init_logging();
    let mut b = FuncBuilder::new("f");
    let x = b.param(f32_tensor(&[4]));
    let y = b.param(f32_tensor(&[4]));
    let n = b.push(OpKind::TosaNegate { input: y, quantized: false }, f32_tensor(&[4]));
    let s = b.push(OpKind::TosaAdd(x, n), f32_tensor(&[4]));
    b.ret(vec![s]);
    let f = b.finish();

    let mut m = Memory::new();
    let args = symbolic_args(&f, &mut m).unwrap();
    let st1 = encode_function(&f, args.clone(), m.clone(), EncodeOptions::default()).unwrap();
    let st2 = encode_function(&f, args, m, EncodeOptions::default()).unwrap();

    let t1 = ret_tensor(&st1, 0);
    let t2 = ret_tensor(&st2, 0);
    for i in 0..4 {
        assert_eq!(t1.get(&[iv(i)]).0, t2.get(&[iv(i)]).0);
    }
    assert_eq!(st1.well_defined_pred(), st2.well_defined_pred());
}

// ---------------------------------------------------------------------
// UB monotonicity: encoding only ever adds obligations
// ---------------------------------------------------------------------

#[test]
fn ub_accumulates_across_ops() {
    init_logging();
    let dyn_tensor = Type::Tensor(TensorType::new(
        ElemType::Float(FpPrec::F32),
        vec![None],
    ));
    let mut b = FuncBuilder::new("f");
    let t = b.param(dyn_tensor);
    let c = b.push(OpKind::Cast(t), f32_tensor(&[10]));
    let i = b.push(OpKind::Constant(Attr::Index(12)), Type::Index);
    let e = b.push(OpKind::Extract { tensor: c, indices: vec![i] }, Type::f32());
    b.ret(vec![e]);
    let (st, _) = encode_with_args(&b.finish());

    // Two obligations were recorded: the cast's dim check and the extract's
    // bound check; the conjunction is their and.
    assert_eq!(st.well_defined_entries().len(), 2);
    assert!(!st.well_defined_pred().is_true());
}
