// SPDX-License-Identifier: Apache-2.0

//! Read-only pre-pass over a function.
//!
//! Collects the floating-point constants and value counts the caller uses
//! to size the abstract float and memory theories before encoding. Every
//! op, including region bodies, is visited exactly once.

use std::collections::{BTreeMap, BTreeSet};

use crate::smt::FpPrec;
use crate::tv_ir::ir::{Attr, Block, DenseAttr, ElemType, Function, OpKind, Type};

/// Per-precision floating-point usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FpAnalysis {
    /// Distinct literal constants, identified by bit pattern.
    pub const_set: BTreeSet<u64>,
    /// Function arguments involving this precision.
    pub arg_count: usize,
    /// Intermediate results involving this precision.
    pub var_count: usize,
}

/// Memref usage, keyed per element type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemRefAnalysis {
    pub arg_count: BTreeMap<ElemType, usize>,
    pub var_count: BTreeMap<ElemType, usize>,
    pub used_globals: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisResult {
    pub f32: FpAnalysis,
    pub f64: FpAnalysis,
    pub memref: MemRefAnalysis,
}

impl AnalysisResult {
    fn fp(&mut self, prec: FpPrec) -> &mut FpAnalysis {
        match prec {
            FpPrec::F32 => &mut self.f32,
            FpPrec::F64 => &mut self.f64,
        }
    }
}

fn type_precision(ty: &Type) -> Option<FpPrec> {
    match ty {
        Type::Float(p) => Some(*p),
        Type::Tensor(tt) => match tt.elem {
            ElemType::Float(p) => Some(p),
            _ => None,
        },
        Type::MemRef(mt) => match mt.elem {
            ElemType::Float(p) => Some(p),
            _ => None,
        },
        _ => None,
    }
}

fn collect_attr_consts(res: &mut AnalysisResult, attr: &Attr) {
    match attr {
        Attr::Float { bits, prec } => {
            res.fp(*prec).const_set.insert(*bits);
        }
        Attr::Dense(DenseAttr::Splat(a)) => collect_attr_consts(res, a),
        Attr::Dense(DenseAttr::Elems(list)) => {
            for a in list {
                collect_attr_consts(res, a);
            }
        }
        Attr::Sparse(s) => {
            for a in &s.values {
                collect_attr_consts(res, a);
            }
            collect_attr_consts(res, &s.zero);
        }
        Attr::Int { .. } | Attr::Index(_) => {}
    }
}

fn analyze_block(res: &mut AnalysisResult, block: &Block, collect_consts: bool) {
    for op in &block.ops {
        match &op.kind {
            OpKind::Constant(attr) | OpKind::TosaConst(attr) if collect_consts => {
                collect_attr_consts(res, attr);
            }
            OpKind::GetGlobal { name } => {
                res.memref.used_globals.insert(name.clone());
            }
            _ => {}
        }

        for (_, ty) in &op.results {
            if let Some(p) = type_precision(ty) {
                res.fp(p).var_count += 1;
            }
            if let Type::MemRef(mt) = ty {
                *res.memref.var_count.entry(mt.elem).or_insert(0) += 1;
            }
        }

        for region in op.kind.regions() {
            analyze_block(res, region, collect_consts);
        }
    }
}

/// Walks `f` once and aggregates its floating-point and memref footprint.
/// With `is_fully_abstract`, literal constants are not enumerated; they
/// are already abstract values to the caller.
pub fn analyze(f: &Function, is_fully_abstract: bool) -> AnalysisResult {
    let mut res = AnalysisResult::default();

    for (_, ty) in &f.params {
        if let Some(p) = type_precision(ty) {
            res.fp(p).arg_count += 1;
        }
        if let Type::MemRef(mt) = ty {
            *res.memref.arg_count.entry(mt.elem).or_insert(0) += 1;
        }
    }

    for block in &f.blocks {
        analyze_block(&mut res, block, !is_fully_abstract);
    }
    res
}
