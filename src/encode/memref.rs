// SPDX-License-Identifier: Apache-2.0

//! Symbolic memref views.
//!
//! A memref is a strided window into one heap block: a block id term, a base
//! element offset, per-dim sizes and per-dim strides. The layout maps an
//! index tuple to `offset + sum(idx[i] * stride[i])`; the identity layout is
//! the row-major special case.

use crate::encode::memory::Memory;
use crate::encode::tensor::Tensor;
use crate::encode::value::{Index, Integer};
use crate::smt::{fold_1d_size, Expr};
use crate::tv_ir::ir::{ConvLayout, ElemType};

/// Row-major strides for the given sizes.
pub fn identity_strides(dims: &[Expr]) -> Vec<Expr> {
    let mut strides = vec![Expr::mk_bv(1, Index::BITS); dims.len()];
    for i in (0..dims.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1].mul(&dims[i + 1]);
    }
    strides
}

#[derive(Debug, Clone)]
pub struct MemRef {
    elem: ElemType,
    bid: Expr,
    offset: Expr,
    dims: Vec<Expr>,
    strides: Vec<Expr>,
}

impl MemRef {
    pub fn new(elem: ElemType, bid: Expr, offset: Expr, dims: Vec<Expr>, strides: Vec<Expr>) -> MemRef {
        assert_eq!(dims.len(), strides.len());
        assert!(!dims.is_empty());
        MemRef { elem, bid, offset, dims, strides }
    }

    /// A view covering a whole block with row-major layout.
    pub fn with_identity_layout(elem: ElemType, bid: Expr, dims: Vec<Expr>) -> MemRef {
        let strides = identity_strides(&dims);
        MemRef::new(elem, bid, Expr::mk_bv(0, Index::BITS), dims, strides)
    }

    pub fn elem_type(&self) -> ElemType {
        self.elem
    }

    pub fn bid(&self) -> &Expr {
        &self.bid
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> Vec<Expr> {
        self.dims.clone()
    }

    pub fn get_dim(&self, i: usize) -> Expr {
        self.dims[i].clone()
    }

    pub fn get_1d_size(&self) -> Expr {
        fold_1d_size(&self.dims)
    }

    /// Linear element offset of an index tuple within the block.
    fn map(&self, indices: &[Expr]) -> Expr {
        assert_eq!(indices.len(), self.strides.len());
        let mut acc = self.offset.clone();
        for (i, s) in indices.iter().zip(self.strides.iter()) {
            acc = acc.add(&i.mul(s));
        }
        acc
    }

    fn index_in_bounds(&self, indices: &[Expr]) -> Expr {
        let mut acc = Expr::mk_bool(true);
        for (i, d) in indices.iter().zip(self.dims.iter()) {
            acc = acc.and(&i.ult(d));
        }
        acc
    }

    /// True when the view is the plain row-major window at offset zero.
    pub fn is_identity_map(&self) -> bool {
        self.offset.as_u64() == Some(0) && self.strides == identity_strides(&self.dims)
    }

    pub fn get(&self, m: &Memory, indices: &[Expr]) -> (Expr, Expr) {
        let (val, loaded) = m.load(self.elem, &self.bid, &self.map(indices));
        (val, loaded.and(&self.index_in_bounds(indices)))
    }

    pub fn store(&self, m: &mut Memory, value: &Expr, indices: &[Expr]) -> Expr {
        let ok = m.store(self.elem, &self.bid, &self.map(indices), value);
        ok.and(&self.index_in_bounds(indices))
    }

    /// Writes `size` elements of a 1-D array through the view base. Only
    /// meaningful for identity layouts; callers check.
    pub fn store_array(
        &self,
        m: &mut Memory,
        array: &Expr,
        offset: &Expr,
        size: &Expr,
        check_writable: bool,
    ) -> Expr {
        let base = self.offset.add(offset);
        m.store_array(self.elem, &self.bid, &base, size, array, check_writable)
    }

    /// Lifts the viewed region to a tensor via a lambda over the layout.
    pub fn load_tensor(&self, m: &Memory) -> Tensor {
        let idx_vars = Index::bound_index_vars(self.rank());
        let body = self.get(m, &idx_vars).0;
        Tensor::mk_lambda(self.elem, self.dims.clone(), idx_vars, body)
    }

    /// The whole view lies inside its block.
    pub fn is_in_bounds(&self, m: &Memory) -> Expr {
        let empty = self.get_1d_size().is_zero();
        let last: Vec<Expr> = self
            .dims
            .iter()
            .map(|d| d.sub(&Expr::mk_bv(1, Index::BITS)))
            .collect();
        let max_ofs = self.map(&last);
        let fits = max_ofs.ult(&m.num_elems(self.elem, &self.bid));
        empty.or(&fits)
    }

    /// Derived view: per-dim offsets, sizes and strides compose with the
    /// current layout; axes flagged in `dropped` are rank-reduced away.
    pub fn subview(
        &self,
        offsets: &[Expr],
        sizes: &[Expr],
        strides: &[Expr],
        dropped: &[bool],
    ) -> MemRef {
        assert_eq!(offsets.len(), self.rank());
        assert_eq!(sizes.len(), self.rank());
        assert_eq!(strides.len(), self.rank());
        assert_eq!(dropped.len(), self.rank());
        let mut offset = self.offset.clone();
        let mut new_dims = Vec::new();
        let mut new_strides = Vec::new();
        for i in 0..self.rank() {
            offset = offset.add(&offsets[i].mul(&self.strides[i]));
            if dropped[i] {
                continue;
            }
            new_dims.push(sizes[i].clone());
            new_strides.push(self.strides[i].mul(&strides[i]));
        }
        assert!(!new_dims.is_empty(), "subview dropped every axis");
        MemRef::new(self.elem, self.bid.clone(), offset, new_dims, new_strides)
    }

    /// No element of `self` overlaps an element of `other`.
    pub fn noalias(&self, other: &MemRef) -> Expr {
        let distinct = self.bid.eq(&other.bid).not();
        let self_empty = self.get_1d_size().is_zero();
        let other_empty = other.get_1d_size().is_zero();

        // Conservative span comparison: [offset, max linear offset].
        let span_end = |mr: &MemRef| {
            let last: Vec<Expr> = mr
                .dims
                .iter()
                .map(|d| d.sub(&Expr::mk_bv(1, Index::BITS)))
                .collect();
            mr.map(&last)
        };
        let self_before = span_end(self).ult(&other.offset);
        let other_before = span_end(other).ult(&self.offset);

        distinct
            .or(&self_empty)
            .or(&other_empty)
            .or(&self_before)
            .or(&other_before)
    }

    /// 2-D convolution with buffer semantics: reads `image` and `filter`,
    /// writes the result through `self`. Returns the store success.
    pub fn conv(
        &self,
        m: &mut Memory,
        image: &MemRef,
        filter: &MemRef,
        strides: &[Expr],
        dilations: &[Expr],
        layout: ConvLayout,
    ) -> Expr {
        let t_image = image.load_tensor(m);
        let t_filter = filter.load_tensor(m);
        let t_res = t_image.conv(&t_filter, strides, dilations, layout);
        self.store_array(
            m,
            &t_res.as_array(),
            &Expr::mk_bv(0, Index::BITS),
            &t_res.get_1d_size(),
            true,
        )
    }

    /// Select between two views of equal shape under an `i1` condition.
    pub fn mk_ite(cond: &Integer, t: &MemRef, f: &MemRef) -> MemRef {
        assert_eq!(t.elem, f.elem);
        assert_eq!(t.rank(), f.rank());
        let c = cond.expr().eq(&Expr::mk_bv(1, 1));
        let pick = |a: &Expr, b: &Expr| Expr::ite(&c, a, b);
        MemRef {
            elem: t.elem,
            bid: pick(&t.bid, &f.bid),
            offset: pick(&t.offset, &f.offset),
            dims: t
                .dims
                .iter()
                .zip(f.dims.iter())
                .map(|(a, b)| pick(a, b))
                .collect(),
            strides: t
                .strides
                .iter()
                .zip(f.strides.iter())
                .map(|(a, b)| pick(a, b))
                .collect(),
        }
    }
}
