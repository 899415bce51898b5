// SPDX-License-Identifier: Apache-2.0

//! Symbolic encoding core of a translation validator for a tensor/linalg
//! intermediate representation.
//!
//! Given a source function and a target function (typically the output of an
//! optimization pass), the surrounding pipeline decides semantic
//! equivalence with an SMT solver. This crate owns the hard part: walking a
//! function and producing a symbolic value per IR result, an accumulated
//! well-definedness predicate, and a symbolic memory state. Parsing the
//! textual IR, running solvers, and formatting counterexamples live
//! outside.

pub mod analysis;
pub mod encode;
pub mod refinement;
pub mod smt;
pub mod tv_ir;
