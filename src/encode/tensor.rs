// SPDX-License-Identifier: Apache-2.0

//! Symbolic tensors.
//!
//! A tensor is semantically a total function from index tuples to element
//! terms. The carrier is a 1-D array term over the row-major flattened
//! index; `in_bounds` witnesses the valid region. Literal constants produce
//! concrete ite/store chains, everything else is lambda-backed; all
//! operations go through `get` and work uniformly over both.

use crate::encode::value::{elem_sort, Index};
use crate::smt::{fold_1d_size, Expr, Sort};
use crate::tv_ir::ir::{ConvLayout, ElemType};

/// Row-major flattening of an index tuple.
pub fn to_1d_idx(indices: &[Expr], dims: &[Expr]) -> Expr {
    assert_eq!(indices.len(), dims.len());
    let mut acc = Expr::mk_bv(0, Index::BITS);
    for (i, d) in indices.iter().zip(dims.iter()) {
        acc = acc.mul(d).add(i);
    }
    acc
}

/// Inverse of `to_1d_idx`.
pub fn from_1d_idx(i: &Expr, dims: &[Expr]) -> Vec<Expr> {
    let mut out = vec![Expr::mk_bv(0, Index::BITS); dims.len()];
    let mut rest = i.clone();
    for k in (0..dims.len()).rev() {
        out[k] = rest.urem(&dims[k]);
        rest = rest.udiv(&dims[k]);
    }
    out
}

/// Element-level multiply, dispatching on the element type.
pub(crate) fn scalar_mul(elem: ElemType, a: Expr, b: Expr) -> Expr {
    match elem {
        ElemType::Float(p) => crate::encode::value::fp_mul(p, a, b),
        ElemType::Int(_) | ElemType::Index => a.mul(&b),
    }
}

fn sum_fn_name(elem: ElemType) -> String {
    match elem {
        ElemType::Float(p) => format!("sum.{}", p.suffix()),
        ElemType::Int(w) => format!("sum.i{}", w),
        ElemType::Index => "sum.index".to_string(),
    }
}

/// The abstract reduction operator: `sum(arr, n)` folds the first `n`
/// elements of a 1-D array. The backend introduces its algebraic axioms.
pub fn sum_of(elem: ElemType, arr: &Expr, count: &Expr) -> Expr {
    Expr::app(&sum_fn_name(elem), vec![arr.clone(), count.clone()], elem_sort(elem))
}

#[derive(Debug, Clone)]
pub struct Tensor {
    elem: ElemType,
    dims: Vec<Expr>,
    arr: Expr,
}

impl Tensor {
    fn array_sort(elem: ElemType) -> Sort {
        Sort::Array(Box::new(Index::sort()), Box::new(elem_sort(elem)))
    }

    /// A tensor holding `value` at every index.
    pub fn splat(elem: ElemType, value: Expr, dims: Vec<Expr>) -> Tensor {
        assert!(!dims.is_empty());
        assert_eq!(value.sort(), elem_sort(elem));
        let i = Expr::fresh_var("idx", Index::sort());
        Tensor { elem, dims, arr: Expr::lambda(vec![i], value) }
    }

    /// A rank-1 tensor from an element list.
    pub fn from_elems(elem: ElemType, elems: Vec<Expr>) -> Tensor {
        assert!(!elems.is_empty());
        let n = elems.len();
        let i = Expr::fresh_var("idx", Index::sort());
        let mut body = elems[n - 1].clone();
        for (k, e) in elems.iter().enumerate().take(n - 1).rev() {
            let cond = i.eq(&Expr::mk_bv(k as u64, Index::BITS));
            body = Expr::ite(&cond, e, &body);
        }
        Tensor {
            elem,
            dims: vec![Expr::mk_bv(n as u64, Index::BITS)],
            arr: Expr::lambda(vec![i], body),
        }
    }

    /// A tensor with entirely unconstrained contents.
    pub fn fresh(elem: ElemType, prefix: &str, dims: Vec<Expr>) -> Tensor {
        assert!(!dims.is_empty());
        Tensor { elem, dims, arr: Expr::fresh_var(prefix, Tensor::array_sort(elem)) }
    }

    /// Sparse literal: listed indices carry the listed values, every other
    /// index carries `zero`.
    pub fn sparse(
        elem: ElemType,
        indices: &[Vec<u64>],
        values: Vec<Expr>,
        dims: &[u64],
        zero: Expr,
    ) -> Tensor {
        assert_eq!(indices.len(), values.len());
        let dim_exprs: Vec<Expr> =
            dims.iter().map(|d| Expr::mk_bv(*d, Index::BITS)).collect();
        let mut t = Tensor::splat(elem, zero, dim_exprs.clone());
        for (idx, v) in indices.iter().zip(values.into_iter()) {
            let idx_exprs: Vec<Expr> =
                idx.iter().map(|i| Expr::mk_bv(*i, Index::BITS)).collect();
            let flat = to_1d_idx(&idx_exprs, &dim_exprs);
            t.arr = t.arr.store(&flat, &v);
        }
        t
    }

    /// Builds a tensor from a body expression over bound index variables.
    /// The body must mention no free occurrences of other index variables.
    pub fn mk_lambda(elem: ElemType, dims: Vec<Expr>, idx_vars: Vec<Expr>, body: Expr) -> Tensor {
        assert_eq!(dims.len(), idx_vars.len());
        assert!(!dims.is_empty());
        assert_eq!(body.sort(), elem_sort(elem), "lambda body sort mismatch");
        let flat = Expr::fresh_var("idx", Index::sort());
        let unflattened = from_1d_idx(&flat, &dims);
        let mut b = body;
        for (var, idx) in idx_vars.iter().zip(unflattened.iter()) {
            b = b.substitute(var, idx);
        }
        Tensor { elem, dims, arr: Expr::lambda(vec![flat], b) }
    }

    /// Element-wise select between two same-shaped tensors. `cond_fn` maps
    /// an index tuple to an `i1` term.
    pub fn mk_ite(
        cond_fn: impl Fn(&[Expr]) -> Expr,
        t: &Tensor,
        f: &Tensor,
    ) -> Tensor {
        assert_eq!(t.elem, f.elem);
        assert_eq!(t.rank(), f.rank());
        let idx_vars = Index::bound_index_vars(t.rank());
        let cond = cond_fn(&idx_vars).eq(&Expr::mk_bv(1, 1));
        let body = Expr::ite(&cond, &t.get(&idx_vars).0, &f.get(&idx_vars).0);
        Tensor::mk_lambda(t.elem, t.dims.clone(), idx_vars, body)
    }

    pub fn elem_type(&self) -> ElemType {
        self.elem
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

    /// Flattening to a 1-D array in row-major order.
    pub fn as_array(&self) -> Expr {
        self.arr.clone()
    }

    pub fn is_in_bounds(&self, indices: &[Expr]) -> Expr {
        assert_eq!(indices.len(), self.dims.len());
        let mut acc = Expr::mk_bool(true);
        for (i, d) in indices.iter().zip(self.dims.iter()) {
            acc = acc.and(&i.ult(d));
        }
        acc
    }

    /// Element at the given indices plus the in-bounds witness.
    pub fn get(&self, indices: &[Expr]) -> (Expr, Expr) {
        let flat = to_1d_idx(indices, &self.dims);
        (self.arr.select(&flat), self.is_in_bounds(indices))
    }

    /// Same carrier under a new shape; callers emit the size-equality UB.
    pub fn reshape(&self, new_dims: Vec<Expr>) -> Tensor {
        assert!(!new_dims.is_empty());
        Tensor { elem: self.elem, dims: new_dims, arr: self.arr.clone() }
    }

    pub fn reverse(&self, axis: u64) -> Tensor {
        let axis = axis as usize;
        assert!(axis < self.rank());
        let idx_vars = Index::bound_index_vars(self.rank());
        let mut src = idx_vars.clone();
        let last = self.dims[axis].sub(&Expr::mk_bv(1, Index::BITS));
        src[axis] = last.sub(&idx_vars[axis]);
        let body = self.get(&src).0;
        Tensor::mk_lambda(self.elem, self.dims.clone(), idx_vars, body)
    }

    pub fn tile(&self, multiples: &[u64]) -> Tensor {
        assert_eq!(multiples.len(), self.rank());
        let new_dims: Vec<Expr> = self
            .dims
            .iter()
            .zip(multiples.iter())
            .map(|(d, m)| d.mul(&Expr::mk_bv(*m, Index::BITS)))
            .collect();
        let idx_vars = Index::bound_index_vars(self.rank());
        let src: Vec<Expr> = idx_vars
            .iter()
            .zip(self.dims.iter())
            .map(|(i, d)| i.urem(d))
            .collect();
        let body = self.get(&src).0;
        Tensor::mk_lambda(self.elem, new_dims, idx_vars, body)
    }

    /// Concatenation along `axis`; non-axis dims must match (callers emit
    /// the UB predicate).
    pub fn concat(&self, other: &Tensor, axis: u64) -> Tensor {
        let axis = axis as usize;
        assert_eq!(self.rank(), other.rank());
        assert!(axis < self.rank());
        let mut new_dims = self.dims.clone();
        new_dims[axis] = self.dims[axis].add(&other.dims[axis]);
        let idx_vars = Index::bound_index_vars(self.rank());
        let in_first = idx_vars[axis].ult(&self.dims[axis]);
        let mut shifted = idx_vars.clone();
        shifted[axis] = idx_vars[axis].sub(&self.dims[axis]);
        let body = Expr::ite(&in_first, &self.get(&idx_vars).0, &other.get(&shifted).0);
        Tensor::mk_lambda(self.elem, new_dims, idx_vars, body)
    }

    pub fn elementwise_unary(
        &self,
        elem_out: ElemType,
        f: impl Fn(Expr) -> Expr,
    ) -> Tensor {
        let idx_vars = Index::bound_index_vars(self.rank());
        let body = f(self.get(&idx_vars).0);
        Tensor::mk_lambda(elem_out, self.dims.clone(), idx_vars, body)
    }

    /// Element-wise combination of two same-shaped tensors. Shape-mismatch
    /// UB is the caller's concern.
    pub fn elementwise_binary(
        &self,
        other: &Tensor,
        elem_out: ElemType,
        f: impl Fn(Expr, Expr) -> Expr,
    ) -> Tensor {
        assert_eq!(self.rank(), other.rank());
        let idx_vars = Index::bound_index_vars(self.rank());
        let body = f(self.get(&idx_vars).0, other.get(&idx_vars).0);
        Tensor::mk_lambda(elem_out, self.dims.clone(), idx_vars, body)
    }

    /// Scalar reduction of the whole tensor.
    pub fn sum(&self) -> Expr {
        sum_of(self.elem, &self.arr, &self.get_1d_size())
    }

    /// 1-D dot product; lengths must match (callers emit the UB predicate).
    pub fn dot(&self, other: &Tensor) -> Expr {
        assert_eq!(self.rank(), 1);
        assert_eq!(other.rank(), 1);
        assert_eq!(self.elem, other.elem);
        let i = Expr::fresh_var("idx", Index::sort());
        let prod = scalar_mul(self.elem, self.arr.select(&i), other.arr.select(&i));
        let prods = Expr::lambda(vec![i], prod);
        sum_of(self.elem, &prods, &self.get_1d_size())
    }

    /// `[i, k] x [k, j] -> [i, j]`.
    pub fn matmul(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.rank(), 2);
        assert_eq!(other.rank(), 2);
        assert_eq!(self.elem, other.elem);
        let k_dim = self.dims[1].clone();
        let idx_vars = Index::bound_index_vars(2);
        let (i, j) = (idx_vars[0].clone(), idx_vars[1].clone());

        let k = Expr::fresh_var("idx", Index::sort());
        let a_elem = self.get(&[i.clone(), k.clone()]).0;
        let b_elem = other.get(&[k.clone(), j.clone()]).0;
        let prods = Expr::lambda(vec![k], scalar_mul(self.elem, a_elem, b_elem));
        let body = sum_of(self.elem, &prods, &k_dim);

        let out_dims = vec![self.dims[0].clone(), other.dims[1].clone()];
        Tensor::mk_lambda(self.elem, out_dims, idx_vars, body)
    }

    /// 2-D convolution. Dims follow the layout:
    /// `NchwFchw`: image `[N,C,H,W]`, filter `[F,C,KH,KW]`, out `[N,F,OH,OW]`;
    /// `NhwcHwcf`: image `[N,H,W,C]`, filter `[KH,KW,C,F]`, out `[N,OH,OW,F]`.
    pub fn conv(
        &self,
        filter: &Tensor,
        strides: &[Expr],
        dilations: &[Expr],
        layout: ConvLayout,
    ) -> Tensor {
        assert_eq!(self.rank(), 4);
        assert_eq!(filter.rank(), 4);
        assert_eq!(strides.len(), 2);
        assert_eq!(dilations.len(), 2);
        assert_eq!(self.elem, filter.elem);
        let one = Expr::mk_bv(1, Index::BITS);

        // Spatial dims of image and filter, per layout.
        let (h, w, kh, kw, chans, fcount) = match layout {
            ConvLayout::NchwFchw => (
                self.dims[2].clone(),
                self.dims[3].clone(),
                filter.dims[2].clone(),
                filter.dims[3].clone(),
                self.dims[1].clone(),
                filter.dims[0].clone(),
            ),
            ConvLayout::NhwcHwcf => (
                self.dims[1].clone(),
                self.dims[2].clone(),
                filter.dims[0].clone(),
                filter.dims[1].clone(),
                self.dims[3].clone(),
                filter.dims[3].clone(),
            ),
        };

        // OH = (H - (KH-1)*dil_h - 1) / stride_h + 1
        let out_spatial = |dim: &Expr, k: &Expr, stride: &Expr, dil: &Expr| {
            let span = k.sub(&one).mul(dil);
            dim.sub(&span).sub(&one).udiv(stride).add(&one)
        };
        let oh = out_spatial(&h, &kh, &strides[0], &dilations[0]);
        let ow = out_spatial(&w, &kw, &strides[1], &dilations[1]);

        let n = self.dims[0].clone();
        let out_dims = match layout {
            ConvLayout::NchwFchw => vec![n, fcount, oh, ow],
            ConvLayout::NhwcHwcf => vec![n, oh, ow, fcount],
        };

        let out_vars = Index::bound_index_vars(4);
        let on = out_vars[0].clone();
        let (f, oh_v, ow_v) = match layout {
            ConvLayout::NchwFchw => {
                (out_vars[1].clone(), out_vars[2].clone(), out_vars[3].clone())
            }
            ConvLayout::NhwcHwcf => {
                (out_vars[3].clone(), out_vars[1].clone(), out_vars[2].clone())
            }
        };

        // One flattened variable ranges over the (C, KH, KW) cube.
        let cube_dims = vec![chans.clone(), kh.clone(), kw.clone()];
        let t = Expr::fresh_var("idx", Index::sort());
        let cube = from_1d_idx(&t, &cube_dims);
        let (c, dkh, dkw) = (cube[0].clone(), cube[1].clone(), cube[2].clone());

        let ih = oh_v.mul(&strides[0]).add(&dkh.mul(&dilations[0]));
        let iw = ow_v.mul(&strides[1]).add(&dkw.mul(&dilations[1]));
        let (img_idx, flt_idx) = match layout {
            ConvLayout::NchwFchw => (
                vec![on, c.clone(), ih, iw],
                vec![f, c, dkh, dkw],
            ),
            ConvLayout::NhwcHwcf => (
                vec![on, ih, iw, c.clone()],
                vec![dkh, dkw, c, f],
            ),
        };

        let prod = scalar_mul(self.elem, self.get(&img_idx).0, filter.get(&flt_idx).0);
        let prods = Expr::lambda(vec![t], prod);
        let body = sum_of(self.elem, &prods, &fold_1d_size(&cube_dims));

        Tensor::mk_lambda(self.elem, out_dims, out_vars, body)
    }

    /// Functional update at one index tuple.
    pub fn insert(&self, value: Expr, indices: &[Expr]) -> (Tensor, Expr) {
        assert_eq!(value.sort(), elem_sort(self.elem));
        let flat = to_1d_idx(indices, &self.dims);
        let arr = self.arr.store(&flat, &value);
        let t = Tensor { elem: self.elem, dims: self.dims.clone(), arr };
        (t, self.is_in_bounds(indices))
    }
}
