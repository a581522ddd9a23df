// Parameter normalization
//
// Window sizes, strides and dilations may be given as a scalar or as a
// sequence. Before they reach a config they are normalized to a canonical
// fixed-length sequence:
//
//   None        -> [1; n]
//   k           -> [k; n]
//   [k]         -> [k; n]
//   [k0..kn-1]  -> as-is
//   anything else is an error naming the parameter

use crate::error::{Error, Result};

/// A parameter the caller may give as a single integer or a sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IntOrSeq {
    Int(usize),
    Seq(Vec<usize>),
}

impl IntOrSeq {
    pub fn len(&self) -> usize {
        match self {
            IntOrSeq::Int(_) => 1,
            IntOrSeq::Seq(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<usize> for IntOrSeq {
    fn from(v: usize) -> Self {
        IntOrSeq::Int(v)
    }
}

impl From<Vec<usize>> for IntOrSeq {
    fn from(v: Vec<usize>) -> Self {
        IntOrSeq::Seq(v)
    }
}

impl From<&[usize]> for IntOrSeq {
    fn from(v: &[usize]) -> Self {
        IntOrSeq::Seq(v.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for IntOrSeq {
    fn from(v: [usize; N]) -> Self {
        IntOrSeq::Seq(v.to_vec())
    }
}

/// Broadcast a scalar-or-sequence parameter to exactly `n` entries.
pub fn normalize_to_length(value: Option<&IntOrSeq>, n: usize, param_name: &str) -> Result<Vec<usize>> {
    let seq: &[usize] = match value {
        None => return Ok(vec![1; n]),
        Some(IntOrSeq::Int(v)) => return Ok(vec![*v; n]),
        Some(IntOrSeq::Seq(seq)) => seq,
    };
    match seq.len() {
        1 => Ok(vec![seq[0]; n]),
        len if len == n => Ok(seq.to_vec()),
        len => Err(Error::ParamLength {
            param: param_name.to_string(),
            expected: n,
            got: len,
        }),
    }
}
