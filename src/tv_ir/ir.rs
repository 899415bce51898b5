// SPDX-License-Identifier: Apache-2.0

//! In-memory tensor IR consumed by the symbolic encoder.
//!
//! The representation is deliberately flat: a function is a list of ops over
//! SSA value ids, each op a payload enum carrying its operands and
//! attributes. Region-bearing ops (`generic`, `generate`, `pad`) embed their
//! single body block directly in the payload.

use std::fmt;

use crate::smt::FpPrec;
use crate::tv_ir::affine::AffineMap;

/// An SSA value identity. Unique within a function, including block
/// arguments of nested regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

/// Element type of a tensor or memref.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElemType {
    Int(u32),
    Float(FpPrec),
    Index,
}

/// A dimension size; `None` is the dynamic `?`.
pub type DimSize = Option<u64>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorType {
    pub elem: ElemType,
    pub dims: Vec<DimSize>,
}

impl TensorType {
    pub fn new(elem: ElemType, dims: Vec<DimSize>) -> TensorType {
        TensorType { elem, dims }
    }

    pub fn ranked(elem: ElemType, dims: &[u64]) -> TensorType {
        TensorType { elem, dims: dims.iter().map(|d| Some(*d)).collect() }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn is_static(&self) -> bool {
        self.dims.iter().all(|d| d.is_some())
    }
}

/// Memref layouts: identity (row-major) or an opaque strided form. The
/// symbolic layout of a memref *value* is reconstructed by the encoder; the
/// type only records whether the row-major fast path applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemRefLayout {
    Identity,
    Strided,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemRefType {
    pub elem: ElemType,
    pub dims: Vec<DimSize>,
    pub layout: MemRefLayout,
}

impl MemRefType {
    pub fn new(elem: ElemType, dims: Vec<DimSize>) -> MemRefType {
        MemRefType { elem, dims, layout: MemRefLayout::Identity }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Index,
    Int(u32),
    Float(FpPrec),
    Tensor(TensorType),
    MemRef(MemRefType),
}

impl Type {
    pub fn i1() -> Type {
        Type::Int(1)
    }

    pub fn f32() -> Type {
        Type::Float(FpPrec::F32)
    }

    pub fn f64() -> Type {
        Type::Float(FpPrec::F64)
    }

    pub fn tensor_of(elem: ElemType, dims: &[u64]) -> Type {
        Type::Tensor(TensorType::ranked(elem, dims))
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Type::Index | Type::Int(_) | Type::Float(_))
    }

    pub fn as_tensor(&self) -> Option<&TensorType> {
        match self {
            Type::Tensor(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_memref(&self) -> Option<&MemRefType> {
        match self {
            Type::MemRef(m) => Some(m),
            _ => None,
        }
    }

    pub fn elem_type(&self) -> Option<ElemType> {
        match self {
            Type::Tensor(t) => Some(t.elem),
            Type::MemRef(m) => Some(m.elem),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn dims(f: &mut fmt::Formatter<'_>, ds: &[DimSize]) -> fmt::Result {
            for d in ds {
                match d {
                    Some(n) => write!(f, "{}x", n)?,
                    None => write!(f, "?x")?,
                }
            }
            Ok(())
        }
        fn elem(f: &mut fmt::Formatter<'_>, e: &ElemType) -> fmt::Result {
            match e {
                ElemType::Int(w) => write!(f, "i{}", w),
                ElemType::Float(p) => write!(f, "{}", p.suffix()),
                ElemType::Index => write!(f, "index"),
            }
        }
        match self {
            Type::Index => write!(f, "index"),
            Type::Int(w) => write!(f, "i{}", w),
            Type::Float(p) => write!(f, "{}", p.suffix()),
            Type::Tensor(t) => {
                write!(f, "tensor<")?;
                dims(f, &t.dims)?;
                elem(f, &t.elem)?;
                write!(f, ">")
            }
            Type::MemRef(m) => {
                write!(f, "memref<")?;
                dims(f, &m.dims)?;
                elem(f, &m.elem)?;
                write!(f, ">")
            }
        }
    }
}

/// Constant attribute payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum Attr {
    Int { value: i64, width: u32 },
    Index(i64),
    /// Bit pattern plus precision; the encoder never interprets the bits.
    Float { bits: u64, prec: FpPrec },
    Dense(DenseAttr),
    Sparse(SparseAttr),
}

impl Attr {
    pub fn f32(v: f32) -> Attr {
        Attr::Float { bits: v.to_bits() as u64, prec: FpPrec::F32 }
    }

    pub fn f64(v: f64) -> Attr {
        Attr::Float { bits: v.to_bits(), prec: FpPrec::F64 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DenseAttr {
    Splat(Box<Attr>),
    /// Row-major element list; the length must equal the static element
    /// count of the result type.
    Elems(Vec<Attr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SparseAttr {
    pub indices: Vec<Vec<u64>>,
    pub values: Vec<Attr>,
    pub zero: Box<Attr>,
}

/// Either an SSA operand or an inline integer attribute. Mirrors the mixed
/// offset/size/stride operand lists of the slicing and padding ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixedVal {
    Value(ValueId),
    Const(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpFPredicate {
    Oeq,
    Ogt,
    Oge,
    Olt,
    Ole,
    Une,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvLayout {
    NchwFchw,
    NhwcHwcf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorType {
    Parallel,
    Reduction,
    Window,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OpKind {
    // arith
    AddF(ValueId, ValueId),
    SubF(ValueId, ValueId),
    MulF(ValueId, ValueId),
    NegF(ValueId),
    CmpF { pred: CmpFPredicate, lhs: ValueId, rhs: ValueId },
    ExtF(ValueId),
    TruncF(ValueId),
    AddI(ValueId, ValueId),
    SubI(ValueId, ValueId),
    MulI(ValueId, ValueId),
    Constant(Attr),
    IndexCast(ValueId),
    Select { cond: ValueId, true_value: ValueId, false_value: ValueId },

    // math
    AbsF(ValueId),

    // affine
    AffineApply { map: AffineMap, dim_operands: Vec<ValueId>, symbol_operands: Vec<ValueId> },

    // shape
    ShapeOf(ValueId),
    ToExtentTensor(ValueId),

    // sparse_tensor
    SparseConvert(ValueId),

    // tensor
    Dim { source: ValueId, index: ValueId },
    Cast(ValueId),
    Extract { tensor: ValueId, indices: Vec<ValueId> },
    Insert { scalar: ValueId, dest: ValueId, indices: Vec<ValueId> },
    ExtractSlice {
        source: ValueId,
        offsets: Vec<MixedVal>,
        sizes: Vec<MixedVal>,
        strides: Vec<MixedVal>,
    },
    InsertSlice {
        source: ValueId,
        dest: ValueId,
        offsets: Vec<MixedVal>,
        sizes: Vec<MixedVal>,
        strides: Vec<MixedVal>,
    },
    FromElements(Vec<ValueId>),
    Generate { dynamic_extents: Vec<ValueId>, body: Block },
    Pad { source: ValueId, low: Vec<MixedVal>, high: Vec<MixedVal>, body: Block },

    // linalg
    LinalgIndex { dim: u64 },
    InitTensor { sizes: Vec<MixedVal> },
    Fill { value: ValueId, dest: ValueId },
    Matmul { a: ValueId, b: ValueId, out: ValueId },
    Dot { a: ValueId, b: ValueId, out: ValueId },
    Conv2D {
        layout: ConvLayout,
        image: ValueId,
        filter: ValueId,
        output: ValueId,
        strides: Vec<i64>,
        dilations: Vec<i64>,
    },
    Copy { input: ValueId, output: ValueId },
    CollapseShape { source: ValueId, reassociation: Vec<Vec<usize>> },
    ExpandShape { source: ValueId, reassociation: Vec<Vec<usize>> },
    Generic {
        inputs: Vec<ValueId>,
        outputs: Vec<ValueId>,
        indexing_maps: Vec<AffineMap>,
        iterator_types: Vec<IteratorType>,
        body: Block,
    },
    Yield(Vec<ValueId>),

    // memref
    Alloc { dynamic_sizes: Vec<ValueId> },
    GetGlobal { name: String },
    Load { memref: ValueId, indices: Vec<ValueId> },
    Store { value: ValueId, memref: ValueId, indices: Vec<ValueId> },
    Subview {
        source: ValueId,
        offsets: Vec<MixedVal>,
        sizes: Vec<MixedVal>,
        strides: Vec<MixedVal>,
    },
    BufferCast(ValueId),
    MemRefClone(ValueId),
    TensorLoad(ValueId),
    TensorStore { tensor: ValueId, memref: ValueId },

    // tosa
    TosaAbs(ValueId),
    TosaAdd(ValueId, ValueId),
    TosaSub(ValueId, ValueId),
    TosaMul { lhs: ValueId, rhs: ValueId, shift: u32 },
    TosaNegate { input: ValueId, quantized: bool },
    TosaReshape { input: ValueId, new_shape: Vec<i64> },
    TosaReverse { input: ValueId, axis: u64 },
    TosaTile { input: ValueId, multiples: Vec<u64> },
    TosaConcat { axis: u64, inputs: Vec<ValueId> },
    TosaConst(Attr),
    TosaBitwiseAnd(ValueId, ValueId),
    TosaBitwiseOr(ValueId, ValueId),
    TosaBitwiseXor(ValueId, ValueId),
    TosaBitwiseNot(ValueId),

    Return(Vec<ValueId>),
}

impl OpKind {
    /// SSA operands read by this op, in order. Mixed operand-or-attribute
    /// lists contribute only their operand entries; region bodies are not
    /// walked (see [`OpKind::regions`]).
    pub fn operands(&self) -> Vec<ValueId> {
        use OpKind::*;
        fn mixed(vals: &[MixedVal]) -> Vec<ValueId> {
            vals.iter()
                .filter_map(|v| match v {
                    MixedVal::Value(id) => Some(*id),
                    MixedVal::Const(_) => None,
                })
                .collect()
        }
        match self {
            AddF(a, b)
            | SubF(a, b)
            | MulF(a, b)
            | AddI(a, b)
            | SubI(a, b)
            | MulI(a, b)
            | TosaAdd(a, b)
            | TosaSub(a, b)
            | TosaBitwiseAnd(a, b)
            | TosaBitwiseOr(a, b)
            | TosaBitwiseXor(a, b) => vec![*a, *b],
            CmpF { lhs, rhs, .. } | TosaMul { lhs, rhs, .. } => vec![*lhs, *rhs],
            NegF(a) | ExtF(a) | TruncF(a) | IndexCast(a) | AbsF(a) | ShapeOf(a)
            | ToExtentTensor(a) | SparseConvert(a) | Cast(a) | BufferCast(a)
            | MemRefClone(a) | TensorLoad(a) | TosaAbs(a) | TosaBitwiseNot(a) => vec![*a],
            TosaNegate { input, .. }
            | TosaReshape { input, .. }
            | TosaReverse { input, .. }
            | TosaTile { input, .. } => vec![*input],
            Constant(..) | TosaConst(..) | LinalgIndex { .. } | GetGlobal { .. } => vec![],
            Select { cond, true_value, false_value } => vec![*cond, *true_value, *false_value],
            AffineApply { dim_operands, symbol_operands, .. } => {
                dim_operands.iter().chain(symbol_operands.iter()).copied().collect()
            }
            Dim { source, index } => vec![*source, *index],
            Extract { tensor, indices } => {
                std::iter::once(*tensor).chain(indices.iter().copied()).collect()
            }
            Insert { scalar, dest, indices } => {
                vec![*scalar, *dest].into_iter().chain(indices.iter().copied()).collect()
            }
            ExtractSlice { source, offsets, sizes, strides } => std::iter::once(*source)
                .chain(mixed(offsets))
                .chain(mixed(sizes))
                .chain(mixed(strides))
                .collect(),
            InsertSlice { source, dest, offsets, sizes, strides } => {
                vec![*source, *dest]
                    .into_iter()
                    .chain(mixed(offsets))
                    .chain(mixed(sizes))
                    .chain(mixed(strides))
                    .collect()
            }
            FromElements(vs) | Yield(vs) | Return(vs) => vs.clone(),
            Generate { dynamic_extents, .. } => dynamic_extents.clone(),
            Pad { source, low, high, .. } => std::iter::once(*source)
                .chain(mixed(low))
                .chain(mixed(high))
                .collect(),
            InitTensor { sizes } => mixed(sizes),
            Fill { value, dest } => vec![*value, *dest],
            Matmul { a, b, out } | Dot { a, b, out } => vec![*a, *b, *out],
            Conv2D { image, filter, output, .. } => vec![*image, *filter, *output],
            Copy { input, output } => vec![*input, *output],
            CollapseShape { source, .. } | ExpandShape { source, .. } => vec![*source],
            Generic { inputs, outputs, .. } => {
                inputs.iter().chain(outputs.iter()).copied().collect()
            }
            Alloc { dynamic_sizes } => dynamic_sizes.clone(),
            Load { memref, indices } => {
                std::iter::once(*memref).chain(indices.iter().copied()).collect()
            }
            Store { value, memref, indices } => {
                vec![*value, *memref].into_iter().chain(indices.iter().copied()).collect()
            }
            Subview { source, offsets, sizes, strides } => std::iter::once(*source)
                .chain(mixed(offsets))
                .chain(mixed(sizes))
                .chain(mixed(strides))
                .collect(),
            TensorStore { tensor, memref } => vec![*tensor, *memref],
            TosaConcat { inputs, .. } => inputs.clone(),
        }
    }

    /// Nested region bodies, if any.
    pub fn regions(&self) -> Vec<&Block> {
        use OpKind::*;
        match self {
            Generate { body, .. } | Pad { body, .. } | Generic { body, .. } => vec![body],
            _ => vec![],
        }
    }

    /// Dialect-qualified operation name, used in diagnostics.
    pub fn name(&self) -> &'static str {
        use OpKind::*;
        match self {
            AddF(..) => "arith.addf",
            SubF(..) => "arith.subf",
            MulF(..) => "arith.mulf",
            NegF(..) => "arith.negf",
            CmpF { .. } => "arith.cmpf",
            ExtF(..) => "arith.extf",
            TruncF(..) => "arith.truncf",
            AddI(..) => "arith.addi",
            SubI(..) => "arith.subi",
            MulI(..) => "arith.muli",
            Constant(..) => "arith.constant",
            IndexCast(..) => "arith.index_cast",
            Select { .. } => "std.select",
            AbsF(..) => "math.abs",
            AffineApply { .. } => "affine.apply",
            ShapeOf(..) => "shape.shape_of",
            ToExtentTensor(..) => "shape.to_extent_tensor",
            SparseConvert(..) => "sparse_tensor.convert",
            Dim { .. } => "tensor.dim",
            Cast(..) => "tensor.cast",
            Extract { .. } => "tensor.extract",
            Insert { .. } => "tensor.insert",
            ExtractSlice { .. } => "tensor.extract_slice",
            InsertSlice { .. } => "tensor.insert_slice",
            FromElements(..) => "tensor.from_elements",
            Generate { .. } => "tensor.generate",
            Pad { .. } => "tensor.pad",
            LinalgIndex { .. } => "linalg.index",
            InitTensor { .. } => "linalg.init_tensor",
            Fill { .. } => "linalg.fill",
            Matmul { .. } => "linalg.matmul",
            Dot { .. } => "linalg.dot",
            Conv2D { layout: ConvLayout::NchwFchw, .. } => "linalg.conv_2d_nchw_fchw",
            Conv2D { layout: ConvLayout::NhwcHwcf, .. } => "linalg.conv_2d_nhwc_hwcf",
            Copy { .. } => "linalg.copy",
            CollapseShape { .. } => "linalg.collapse_shape",
            ExpandShape { .. } => "linalg.expand_shape",
            Generic { .. } => "linalg.generic",
            Yield(..) => "linalg.yield",
            Alloc { .. } => "memref.alloc",
            GetGlobal { .. } => "memref.get_global",
            Load { .. } => "memref.load",
            Store { .. } => "memref.store",
            Subview { .. } => "memref.subview",
            BufferCast(..) => "memref.buffer_cast",
            MemRefClone(..) => "memref.clone",
            TensorLoad(..) => "memref.tensor_load",
            TensorStore { .. } => "memref.tensor_store",
            TosaAbs(..) => "tosa.abs",
            TosaAdd(..) => "tosa.add",
            TosaSub(..) => "tosa.sub",
            TosaMul { .. } => "tosa.mul",
            TosaNegate { .. } => "tosa.negate",
            TosaReshape { .. } => "tosa.reshape",
            TosaReverse { .. } => "tosa.reverse",
            TosaTile { .. } => "tosa.tile",
            TosaConcat { .. } => "tosa.concat",
            TosaConst(..) => "tosa.const",
            TosaBitwiseAnd(..) => "tosa.bitwise_and",
            TosaBitwiseOr(..) => "tosa.bitwise_or",
            TosaBitwiseXor(..) => "tosa.bitwise_xor",
            TosaBitwiseNot(..) => "tosa.bitwise_not",
            Return(..) => "std.return",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Op {
    pub results: Vec<(ValueId, Type)>,
    pub kind: OpKind,
}

impl Op {
    pub fn result(&self) -> ValueId {
        self.results[0].0
    }

    pub fn result_ty(&self) -> &Type {
        &self.results[0].1
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some((v, ty)) = self.results.first() {
            write!(f, "%{} = {} : {}", v.0, self.kind.name(), ty)
        } else {
            write!(f, "{}", self.kind.name())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub args: Vec<(ValueId, Type)>,
    pub ops: Vec<Op>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<(ValueId, Type)>,
    pub blocks: Vec<Block>,
}

impl Function {
    /// The unique body block, or `None` for multi-block functions (which the
    /// encoder rejects).
    pub fn single_block(&self) -> Option<&Block> {
        match self.blocks.as_slice() {
            [b] => Some(b),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_display() {
        let t = Type::tensor_of(ElemType::Float(FpPrec::F32), &[10, 20]);
        assert_eq!(t.to_string(), "tensor<10x20xf32>");
        let d = Type::Tensor(TensorType::new(
            ElemType::Float(FpPrec::F32),
            vec![None, Some(4)],
        ));
        assert_eq!(d.to_string(), "tensor<?x4xf32>");
        let m = Type::MemRef(MemRefType::new(ElemType::Float(FpPrec::F32), vec![None, None]));
        assert_eq!(m.to_string(), "memref<?x?xf32>");
    }

    #[test]
    fn op_names_are_dialect_qualified() {
        let k = OpKind::AddF(ValueId(0), ValueId(1));
        assert_eq!(k.name(), "arith.addf");
        let g = OpKind::Conv2D {
            layout: ConvLayout::NhwcHwcf,
            image: ValueId(0),
            filter: ValueId(1),
            output: ValueId(2),
            strides: vec![1, 1],
            dilations: vec![1, 1],
        };
        assert_eq!(g.name(), "linalg.conv_2d_nhwc_hwcf");
    }
}
