// SPDX-License-Identifier: Apache-2.0

//! Block-addressed symbolic heap.
//!
//! The heap is an indexed family of 1-D arrays: block id -> (size, writable,
//! contents). Block ids handed to memrefs are *terms* so that a memref
//! `select` can produce a conditional block id; loads and stores therefore
//! resolve a bid by cascading over the concrete block table. Distinct blocks
//! never alias by construction.

use crate::encode::value::{elem_sort, Index};
use crate::smt::{Expr, Sort};
use crate::tv_ir::ir::ElemType;

#[derive(Debug, Clone)]
pub struct MemBlock {
    pub elem: ElemType,
    pub array: Expr,
    pub writable: Expr,
    pub num_elems: Expr,
    pub is_external: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Memory {
    blocks: Vec<MemBlock>,
}

impl Memory {
    pub fn new() -> Memory {
        Memory::default()
    }

    fn bid_const(k: usize) -> Expr {
        Expr::mk_bv(k as u64, Index::BITS)
    }

    fn fresh_array(elem: ElemType, prefix: &str) -> Expr {
        Expr::fresh_var(
            prefix,
            Sort::Array(Box::new(Index::sort()), Box::new(elem_sort(elem))),
        )
    }

    /// Adds a locally allocated block; returns its bid term.
    pub fn add_local_block(&mut self, elem: ElemType, num_elems: Expr, writable: Expr) -> Expr {
        let bid = Memory::bid_const(self.blocks.len());
        self.blocks.push(MemBlock {
            elem,
            array: Memory::fresh_array(elem, "block"),
            writable,
            num_elems,
            is_external: false,
        });
        bid
    }

    /// Adds a block backing a function argument. Its contents and
    /// conditional writability are unconstrained symbols.
    pub fn add_external_block(&mut self, elem: ElemType, num_elems: Expr) -> Expr {
        let bid = Memory::bid_const(self.blocks.len());
        self.blocks.push(MemBlock {
            elem,
            array: Memory::fresh_array(elem, "extblock"),
            writable: Expr::fresh_var("writable", Sort::Bool),
            num_elems,
            is_external: true,
        });
        bid
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn block(&self, k: usize) -> &MemBlock {
        &self.blocks[k]
    }

    pub fn external_blocks(&self) -> impl Iterator<Item = (usize, &MemBlock)> {
        self.blocks.iter().enumerate().filter(|(_, b)| b.is_external)
    }

    fn matching(&self, elem: ElemType) -> impl Iterator<Item = (usize, &MemBlock)> {
        self.blocks.iter().enumerate().filter(move |(_, b)| b.elem == elem)
    }

    /// Lowers writability; a block marked read-only stays read-only.
    pub fn set_writable(&mut self, bid: &Expr, writable: bool) {
        let w = Expr::mk_bool(writable);
        for k in 0..self.blocks.len() {
            let sel = bid.eq(&Memory::bid_const(k));
            let cur = self.blocks[k].writable.clone();
            self.blocks[k].writable = cur.and(&sel.implies(&w));
        }
    }

    /// Size of the block `bid` resolves to.
    pub fn num_elems(&self, elem: ElemType, bid: &Expr) -> Expr {
        let mut it = self.matching(elem);
        let (_, b0) = it.next().expect("no block of the requested element type");
        let mut acc = b0.num_elems.clone();
        for (k, b) in it {
            acc = Expr::ite(&bid.eq(&Memory::bid_const(k)), &b.num_elems, &acc);
        }
        acc
    }

    /// Reads one element; the success predicate is the in-bounds check of
    /// the resolved block.
    pub fn load(&self, elem: ElemType, bid: &Expr, ofs: &Expr) -> (Expr, Expr) {
        let mut it = self.matching(elem);
        let (_, b0) = it.next().expect("no block of the requested element type");
        let mut value = b0.array.select(ofs);
        let mut inbounds = ofs.ult(&b0.num_elems);
        for (k, b) in it {
            let sel = bid.eq(&Memory::bid_const(k));
            value = Expr::ite(&sel, &b.array.select(ofs), &value);
            inbounds = Expr::ite(&sel, &ofs.ult(&b.num_elems), &inbounds);
        }
        (value, inbounds)
    }

    /// Writes one element; succeeds when the resolved block is writable and
    /// the offset is in bounds.
    pub fn store(&mut self, elem: ElemType, bid: &Expr, ofs: &Expr, val: &Expr) -> Expr {
        let mut success = Expr::mk_bool(false);
        for k in 0..self.blocks.len() {
            if self.blocks[k].elem != elem {
                continue;
            }
            let sel = bid.eq(&Memory::bid_const(k));
            let b = self.blocks[k].clone();
            let ok = ofs.ult(&b.num_elems).and(&b.writable);
            success = Expr::ite(&sel, &ok, &success);
            let stored = b.array.store(ofs, val);
            self.blocks[k].array = Expr::ite(&sel, &stored, &b.array);
        }
        success
    }

    /// Writes `size` elements of `src` (a 1-D array) starting at `offset`.
    /// `check_writable` is false only when initializing a block that was
    /// created read-only.
    pub fn store_array(
        &mut self,
        elem: ElemType,
        bid: &Expr,
        offset: &Expr,
        size: &Expr,
        src: &Expr,
        check_writable: bool,
    ) -> Expr {
        let mut success = Expr::mk_bool(false);
        for k in 0..self.blocks.len() {
            if self.blocks[k].elem != elem {
                continue;
            }
            let sel = bid.eq(&Memory::bid_const(k));
            let b = self.blocks[k].clone();

            let i = Expr::fresh_var("ofs", Index::sort());
            let rel = i.sub(offset);
            let in_range = offset.ule(&i).and(&rel.ult(size));
            let body = Expr::ite(&in_range, &src.select(&rel), &b.array.select(&i));
            let merged = Expr::lambda(vec![i], body);

            let fits = offset.add(size).ule(&b.num_elems);
            let ok = if check_writable { fits.and(&b.writable) } else { fits };
            success = Expr::ite(&sel, &ok, &success);
            self.blocks[k].array = Expr::ite(&sel, &merged, &b.array);
        }
        success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smt::FpPrec;

    fn f32_elem() -> ElemType {
        ElemType::Float(FpPrec::F32)
    }

    fn idx(v: u64) -> Expr {
        Expr::mk_bv(v, Index::BITS)
    }

    #[test]
    fn local_blocks_get_distinct_bids() {
        let mut m = Memory::new();
        let b0 = m.add_local_block(f32_elem(), idx(8), Expr::mk_bool(true));
        let b1 = m.add_local_block(f32_elem(), idx(4), Expr::mk_bool(true));
        assert!(b0.eq(&b1).is_false());
        assert_eq!(m.num_blocks(), 2);
    }

    #[test]
    fn load_out_of_bounds_is_not_successful() {
        let mut m = Memory::new();
        let bid = m.add_local_block(f32_elem(), idx(8), Expr::mk_bool(true));
        let (_, ok) = m.load(f32_elem(), &bid, &idx(7));
        assert!(ok.is_true());
        let (_, bad) = m.load(f32_elem(), &bid, &idx(8));
        assert!(bad.is_false());
    }

    #[test]
    fn store_to_readonly_block_fails() {
        let mut m = Memory::new();
        let bid = m.add_local_block(f32_elem(), idx(8), Expr::mk_bool(false));
        let v = Expr::fresh_var("v", Sort::Fp(FpPrec::F32));
        let ok = m.store(f32_elem(), &bid, &idx(0), &v);
        assert!(ok.is_false());
    }

    #[test]
    fn set_writable_is_monotone() {
        let mut m = Memory::new();
        let bid = m.add_local_block(f32_elem(), idx(8), Expr::mk_bool(true));
        m.set_writable(&bid, false);
        m.set_writable(&bid, true);
        let v = Expr::fresh_var("v", Sort::Fp(FpPrec::F32));
        let ok = m.store(f32_elem(), &bid, &idx(0), &v);
        assert!(ok.is_false());
    }

    #[test]
    fn store_then_load_roundtrips() {
        let mut m = Memory::new();
        let bid = m.add_local_block(f32_elem(), idx(8), Expr::mk_bool(true));
        let v = Expr::fresh_var("v", Sort::Fp(FpPrec::F32));
        let ok = m.store(f32_elem(), &bid, &idx(3), &v);
        assert!(ok.is_true());
        let (got, inb) = m.load(f32_elem(), &bid, &idx(3));
        assert!(inb.is_true());
        // The read resolves through the store chain; with a concrete bid the
        // ite collapses and the select targets the stored array.
        assert_eq!(got.sort(), Sort::Fp(FpPrec::F32));
    }

    #[test]
    fn store_array_bounds() {
        let mut m = Memory::new();
        let bid = m.add_local_block(f32_elem(), idx(8), Expr::mk_bool(true));
        let src = Expr::fresh_var(
            "src",
            Sort::Array(Box::new(Index::sort()), Box::new(Sort::Fp(FpPrec::F32))),
        );
        let ok = m.store_array(f32_elem(), &bid, &idx(0), &idx(8), &src, true);
        assert!(ok.is_true());
        let too_big = m.store_array(f32_elem(), &bid, &idx(4), &idx(8), &src, true);
        assert!(too_big.is_false());
    }
}
