// SPDX-License-Identifier: Apache-2.0

pub mod affine;
pub mod builder;
pub mod ir;
