// SPDX-License-Identifier: Apache-2.0

//! Affine expressions and maps over loop iterators.

/// A multi-dimensional affine expression tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AffineExpr {
    /// The i-th dimension (loop iterator).
    Dim(usize),
    /// The i-th symbol operand.
    Symbol(usize),
    Const(i64),
    Add(Box<AffineExpr>, Box<AffineExpr>),
    Mul(Box<AffineExpr>, Box<AffineExpr>),
}

impl AffineExpr {
    pub fn add(lhs: AffineExpr, rhs: AffineExpr) -> AffineExpr {
        AffineExpr::Add(Box::new(lhs), Box::new(rhs))
    }

    pub fn mul(lhs: AffineExpr, rhs: AffineExpr) -> AffineExpr {
        AffineExpr::Mul(Box::new(lhs), Box::new(rhs))
    }

    pub fn as_dim(&self) -> Option<usize> {
        match self {
            AffineExpr::Dim(p) => Some(*p),
            _ => None,
        }
    }

    pub fn is_zero_const(&self) -> bool {
        matches!(self, AffineExpr::Const(0))
    }
}

/// An affine map `(d0, .., dN; s0, .., sM) -> (e0, .., eK)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffineMap {
    pub num_dims: usize,
    pub num_symbols: usize,
    pub results: Vec<AffineExpr>,
}

impl AffineMap {
    pub fn new(num_dims: usize, num_symbols: usize, results: Vec<AffineExpr>) -> AffineMap {
        AffineMap { num_dims, num_symbols, results }
    }

    /// `(d0, .., dN) -> (d0, .., dN)`
    pub fn identity(rank: usize) -> AffineMap {
        AffineMap {
            num_dims: rank,
            num_symbols: 0,
            results: (0..rank).map(AffineExpr::Dim).collect(),
        }
    }

    /// A map whose results are the given dimension positions.
    pub fn projection(num_dims: usize, positions: &[usize]) -> AffineMap {
        AffineMap {
            num_dims,
            num_symbols: 0,
            results: positions.iter().map(|p| AffineExpr::Dim(*p)).collect(),
        }
    }

    /// `(d0, .., dN) -> (0)`, the scalar-reduction output map.
    pub fn zero_result(num_dims: usize) -> AffineMap {
        AffineMap { num_dims, num_symbols: 0, results: vec![AffineExpr::Const(0)] }
    }

    pub fn is_identity(&self) -> bool {
        self.results.len() == self.num_dims
            && self
                .results
                .iter()
                .enumerate()
                .all(|(i, e)| e.as_dim() == Some(i))
    }

    /// True when every iterator appears exactly once among the results.
    pub fn is_permutation(&self) -> bool {
        if self.results.len() != self.num_dims {
            return false;
        }
        let mut seen = vec![false; self.num_dims];
        for e in &self.results {
            match e.as_dim() {
                Some(p) if !seen[p] => seen[p] = true,
                _ => return false,
            }
        }
        true
    }

    /// Applies the map to a generic input list by dimension position.
    /// Only valid for maps whose results are all plain dims.
    pub fn map_dims<T: Clone>(&self, input: &[T]) -> Vec<T> {
        self.results
            .iter()
            .map(|e| input[e.as_dim().expect("map_dims over non-dim result")].clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_map() {
        let m = AffineMap::identity(3);
        assert!(m.is_identity());
        assert!(m.is_permutation());
    }

    #[test]
    fn transpose_is_permutation_not_identity() {
        let m = AffineMap::projection(2, &[1, 0]);
        assert!(!m.is_identity());
        assert!(m.is_permutation());
        assert_eq!(m.map_dims(&['a', 'b']), vec!['b', 'a']);
    }

    #[test]
    fn reduction_map_is_not_permutation() {
        // (i, j) -> (i)
        let m = AffineMap::projection(2, &[0]);
        assert!(!m.is_permutation());
        // (i, j) -> (0)
        let z = AffineMap::zero_result(2);
        assert!(!z.is_permutation());
        assert!(z.results[0].is_zero_const());
    }
}
