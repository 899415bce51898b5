// SPDX-License-Identifier: Apache-2.0

//! Programmatic construction of IR functions.
//!
//! Hands out dense `ValueId`s and keeps the op list in emission order, which
//! is also encoding order. Region bodies are built with a child builder so
//! their block arguments draw from the same id space as the parent.

use crate::tv_ir::ir::*;

pub struct FuncBuilder {
    name: String,
    next_id: u32,
    params: Vec<(ValueId, Type)>,
    ops: Vec<Op>,
}

impl FuncBuilder {
    pub fn new(name: &str) -> FuncBuilder {
        FuncBuilder { name: name.to_string(), next_id: 0, params: Vec::new(), ops: Vec::new() }
    }

    fn fresh(&mut self) -> ValueId {
        let id = ValueId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn param(&mut self, ty: Type) -> ValueId {
        let id = self.fresh();
        self.params.push((id, ty));
        id
    }

    /// Emits an op with a single result of the given type.
    pub fn push(&mut self, kind: OpKind, ty: Type) -> ValueId {
        let id = self.fresh();
        self.ops.push(Op { results: vec![(id, ty)], kind });
        id
    }

    /// Emits a resultless op (`return`, `store`, `yield`, ...).
    pub fn push_no_result(&mut self, kind: OpKind) {
        self.ops.push(Op { results: vec![], kind });
    }

    pub fn ret(&mut self, values: Vec<ValueId>) {
        self.push_no_result(OpKind::Return(values));
    }

    /// Builds a nested block: `f` receives a child builder whose block
    /// arguments have the given types, and fills in the block body.
    pub fn block(&mut self, arg_tys: Vec<Type>, f: impl FnOnce(&mut FuncBuilder, &[ValueId])) -> Block {
        let mut child = FuncBuilder {
            name: String::new(),
            next_id: self.next_id,
            params: Vec::new(),
            ops: Vec::new(),
        };
        let args: Vec<(ValueId, Type)> =
            arg_tys.into_iter().map(|ty| (child.fresh(), ty)).collect();
        let ids: Vec<ValueId> = args.iter().map(|(v, _)| *v).collect();
        f(&mut child, &ids);
        self.next_id = child.next_id;
        Block { args, ops: child.ops }
    }

    pub fn finish(self) -> Function {
        Function {
            name: self.name,
            params: self.params.clone(),
            blocks: vec![Block { args: self.params, ops: self.ops }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smt::FpPrec;

    #[test]
    fn builds_single_block_function() {
        let mut b = FuncBuilder::new("f");
        let x = b.param(Type::f32());
        let y = b.param(Type::f32());
        let s = b.push(OpKind::AddF(x, y), Type::f32());
        b.ret(vec![s]);
        let f = b.finish();
        assert_eq!(f.params.len(), 2);
        let blk = f.single_block().unwrap();
        assert_eq!(blk.ops.len(), 2);
        assert!(matches!(blk.ops[1].kind, OpKind::Return(_)));
    }

    #[test]
    fn nested_block_ids_do_not_collide() {
        let mut b = FuncBuilder::new("g");
        let t = b.param(Type::tensor_of(ElemType::Float(FpPrec::F32), &[4]));
        let body = b.block(vec![Type::Index], |bb, args| {
            let c = bb.push(OpKind::Constant(Attr::f32(0.0)), Type::f32());
            bb.push_no_result(OpKind::Yield(vec![c]));
            let _ = args;
        });
        let ids: Vec<u32> = body
            .args
            .iter()
            .map(|(v, _)| v.0)
            .chain(body.ops.iter().flat_map(|o| o.results.iter().map(|(v, _)| v.0)))
            .collect();
        assert!(!ids.contains(&t.0));
        let all_unique: std::collections::BTreeSet<u32> = ids.iter().copied().collect();
        assert_eq!(all_unique.len(), ids.len());
    }
}
