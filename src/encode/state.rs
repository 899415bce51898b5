// SPDX-License-Identifier: Apache-2.0

//! Encoding state: the register file, accumulated well-definedness, loop
//! scopes, and the symbolic heap.

use std::collections::HashMap;

use crate::encode::memory::Memory;
use crate::encode::memref::MemRef;
use crate::encode::tensor::Tensor;
use crate::encode::value::{Float, Index, Integer, Value};
use crate::smt::Expr;
use crate::tv_ir::ir::ValueId;

/// Write-once map from IR values to symbolic values. Double binds and tag
/// mismatches are contract violations and panic.
#[derive(Debug, Clone, Default)]
pub struct RegFile {
    map: HashMap<ValueId, Value>,
}

impl RegFile {
    pub fn add(&mut self, v: ValueId, value: Value) {
        let prev = self.map.insert(v, value);
        assert!(prev.is_none(), "value %{} bound twice", v.0);
    }

    pub fn contains(&self, v: ValueId) -> bool {
        self.map.contains_key(&v)
    }

    pub fn find(&self, v: ValueId) -> &Value {
        self.map
            .get(&v)
            .unwrap_or_else(|| panic!("value %{} read before definition", v.0))
    }

    pub fn get_index(&self, v: ValueId) -> Index {
        match self.find(v) {
            Value::Index(i) => i.clone(),
            other => panic!("%{} is not an index: {:?}", v.0, other),
        }
    }

    pub fn get_integer(&self, v: ValueId) -> Integer {
        match self.find(v) {
            Value::Int(i) => i.clone(),
            other => panic!("%{} is not an integer: {:?}", v.0, other),
        }
    }

    pub fn get_float(&self, v: ValueId) -> Float {
        match self.find(v) {
            Value::Float(f) => f.clone(),
            other => panic!("%{} is not a float: {:?}", v.0, other),
        }
    }

    pub fn get_tensor(&self, v: ValueId) -> Tensor {
        match self.find(v) {
            Value::Tensor(t) => t.clone(),
            other => panic!("%{} is not a tensor: {:?}", v.0, other),
        }
    }

    pub fn get_memref(&self, v: ValueId) -> MemRef {
        match self.find(v) {
            Value::MemRef(m) => m.clone(),
            other => panic!("%{} is not a memref: {:?}", v.0, other),
        }
    }

    /// The underlying scalar term, for contexts accepting any scalar sort.
    pub fn get_expr(&self, v: ValueId) -> Expr {
        self.find(v).expr()
    }
}

/// One frame per enclosing structured loop: induction variables and their
/// inclusive upper bounds.
#[derive(Debug, Clone)]
pub struct LoopScope {
    pub ind_vars: Vec<Expr>,
    pub ind_var_upper_bounds: Vec<Expr>,
}

impl LoopScope {
    /// Fresh induction symbols, one per bound.
    pub fn new(upper_bounds: Vec<Expr>) -> LoopScope {
        LoopScope {
            ind_vars: Index::bound_index_vars(upper_bounds.len()),
            ind_var_upper_bounds: upper_bounds,
        }
    }
}

/// The mutable context of one encoding run.
#[derive(Debug, Clone)]
pub struct State {
    pub regs: RegFile,
    pub m: Memory,
    pub ret_values: Vec<Value>,
    pub linalg_generic_scopes: Vec<LoopScope>,
    /// (provenance, predicate) pairs, accumulated conjunctively.
    well_defined: Vec<(String, Expr)>,
    pub has_const_array: bool,
    pub has_quantifier: bool,
}

impl State {
    pub fn new(m: Memory) -> State {
        State {
            regs: RegFile::default(),
            m,
            ret_values: Vec::new(),
            linalg_generic_scopes: Vec::new(),
            well_defined: Vec::new(),
            has_const_array: false,
            has_quantifier: false,
        }
    }

    /// Conjoins a UB obligation, annotated with the emitting op for
    /// counterexample reporting.
    pub fn well_defined(&mut self, op_name: &str, pred: Expr) {
        self.well_defined.push((op_name.to_string(), pred));
    }

    pub fn well_defined_pred(&self) -> Expr {
        let mut acc = Expr::mk_bool(true);
        for (_, p) in &self.well_defined {
            acc = acc.and(p);
        }
        acc
    }

    pub fn well_defined_entries(&self) -> &[(String, Expr)] {
        &self.well_defined
    }

    /// Number of recorded obligations; used by the block driver to slice
    /// out a single op's contribution.
    pub fn wd_len(&self) -> usize {
        self.well_defined.len()
    }

    /// Conjunction of the obligations recorded after the given mark.
    pub fn wd_since(&self, mark: usize) -> Expr {
        let mut acc = Expr::mk_bool(true);
        for (_, p) in &self.well_defined[mark..] {
            acc = acc.and(p);
        }
        acc
    }

    pub fn current_scope(&self) -> &LoopScope {
        self.linalg_generic_scopes
            .last()
            .expect("no enclosing structured-loop scope")
    }
}
