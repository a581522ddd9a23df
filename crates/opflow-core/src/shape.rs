use std::fmt;

use serde::{Deserialize, Serialize};

// Shape - static shape of a logical blob
//
// Every blob recorded in a job carries a fully known static shape. Shapes
// are produced by input/variable declarations and then derived by the
// inference rules of each operator kind:
//
//   - Input:  Shape([32, 28, 28, 1])   declared by the caller
//   - Conv:   Shape([32, 26, 26, 16])  derived from input + filter + strides
//   - Loss:   Shape([32])              prediction shape minus the class axis
//
// A zero-sized dimension never appears in a registered signature: the
// inference engine rejects any rule that would produce one.

/// N-dimensional static shape of a blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Shape(Vec<usize>);

impl Shape {
    /// Create a new shape from a vector of dimension sizes.
    pub fn new(dims: Vec<usize>) -> Self {
        Shape(dims)
    }

    /// The dimension sizes as a slice.
    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Number of dimensions (0 for scalar, 1 for vector, 2 for matrix, etc.).
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Total number of elements (product of all dimensions).
    /// A scalar shape [] has 1 element.
    pub fn elem_count(&self) -> usize {
        self.0.iter().product::<usize>().max(1)
    }

    /// Size of a specific dimension.
    pub fn dim(&self, d: usize) -> Option<usize> {
        self.0.get(d).copied()
    }

    /// Whether any dimension is zero.
    pub fn has_zero_dim(&self) -> bool {
        self.0.contains(&0)
    }

    /// Resolve a possibly negative axis against this shape's rank.
    ///
    /// `-1` is the last axis, `-rank` the first. Returns `None` when the
    /// axis falls outside `[-rank, rank)`.
    pub fn resolve_axis(&self, axis: i32) -> Option<usize> {
        let rank = self.rank() as i64;
        let axis = axis as i64;
        let resolved = if axis < 0 { axis + rank } else { axis };
        if (0..rank).contains(&resolved) {
            Some(resolved as usize)
        } else {
            None
        }
    }

    /// Whether `self` can be broadcast onto `target` without changing rank.
    ///
    /// Every dimension must either be 1 or match the target exactly. This is
    /// the rule dropout noise shapes follow: `[N, 1, 1, C]` fits `[N, H, W, C]`.
    pub fn broadcasts_to(&self, target: &Shape) -> bool {
        self.rank() == target.rank()
            && self
                .0
                .iter()
                .zip(target.dims())
                .all(|(&d, &t)| d == 1 || d == t)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}

// These let you write: Shape::from((3, 4)) instead of Shape::new(vec![3, 4])

impl From<()> for Shape {
    /// Scalar shape (0 dimensions).
    fn from(_: ()) -> Self {
        Shape(vec![])
    }
}

impl From<usize> for Shape {
    /// 1-D shape.
    fn from(d: usize) -> Self {
        Shape(vec![d])
    }
}

impl From<(usize, usize)> for Shape {
    fn from((d0, d1): (usize, usize)) -> Self {
        Shape(vec![d0, d1])
    }
}

impl From<(usize, usize, usize)> for Shape {
    fn from((d0, d1, d2): (usize, usize, usize)) -> Self {
        Shape(vec![d0, d1, d2])
    }
}

impl From<(usize, usize, usize, usize)> for Shape {
    fn from((d0, d1, d2, d3): (usize, usize, usize, usize)) -> Self {
        Shape(vec![d0, d1, d2, d3])
    }
}

impl From<(usize, usize, usize, usize, usize)> for Shape {
    fn from((d0, d1, d2, d3, d4): (usize, usize, usize, usize, usize)) -> Self {
        Shape(vec![d0, d1, d2, d3, d4])
    }
}

impl From<Vec<usize>> for Shape {
    fn from(v: Vec<usize>) -> Self {
        Shape(v)
    }
}

impl From<&[usize]> for Shape {
    fn from(s: &[usize]) -> Self {
        Shape(s.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(a: [usize; N]) -> Self {
        Shape(a.to_vec())
    }
}
