// Blob - logical blob identities and their recorded signatures
//
// A logical blob is one named output slot of one operator. It is referenced
// by a LogicalBlobId, the pair (op_name, blob_name), whose textual form is
// the "logical blob name" "op_name/blob_name".
//
// A BlobDesc is everything inference knows about a blob: its static shape,
// dtype, and the placement/distribution attributes that say where the blob
// lives and how it is laid out across devices.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::shape::Shape;

/// Identity of one output of one operator.
///
/// A back-reference only: the job graph owns the producing operator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LogicalBlobId {
    pub op_name: String,
    pub blob_name: String,
}

impl LogicalBlobId {
    pub fn new(op_name: impl Into<String>, blob_name: impl Into<String>) -> Self {
        Self {
            op_name: op_name.into(),
            blob_name: blob_name.into(),
        }
    }

    /// The textual "op_name/blob_name" form.
    pub fn logical_blob_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for LogicalBlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.op_name, self.blob_name)
    }
}

impl FromStr for LogicalBlobId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((op, blob)) if !op.is_empty() && !blob.is_empty() && !blob.contains('/') => {
                Ok(LogicalBlobId::new(op, blob))
            }
            _ => Err(Error::Decode(format!(
                "malformed logical blob name \"{s}\", expected \"op_name/blob_name\""
            ))),
        }
    }
}

impl TryFrom<String> for LogicalBlobId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<LogicalBlobId> for String {
    fn from(lbi: LogicalBlobId) -> String {
        lbi.to_string()
    }
}

/// Set of devices a blob is placed on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Placement {
    /// Device family, e.g. `"cpu"` or `"gpu"`.
    pub device_tag: String,
    /// Number of devices the blob is spread across (>= 1).
    pub parallel_num: usize,
}

impl Placement {
    pub fn new(device_tag: impl Into<String>, parallel_num: usize) -> Self {
        Self {
            device_tag: device_tag.into(),
            parallel_num: parallel_num.max(1),
        }
    }

    pub fn cpu() -> Self {
        Self::new("cpu", 1)
    }
}

impl Default for Placement {
    fn default() -> Self {
        Self::cpu()
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.device_tag, self.parallel_num)
    }
}

/// How a blob's logical value is laid out across its placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Distribution {
    /// Every device holds the full blob.
    #[default]
    Broadcast,
    /// The blob is sliced along one axis.
    Split(usize),
    /// Every device holds a partial sum of the blob.
    PartialSum,
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Distribution::Broadcast => write!(f, "B"),
            Distribution::Split(axis) => write!(f, "S({axis})"),
            Distribution::PartialSum => write!(f, "P"),
        }
    }
}

/// Recorded metadata of one logical blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobDesc {
    pub shape: Shape,
    pub dtype: DType,
    #[serde(default)]
    pub placement: Placement,
    #[serde(default)]
    pub distribution: Distribution,
}

impl BlobDesc {
    pub fn new(shape: impl Into<Shape>, dtype: DType) -> Self {
        Self {
            shape: shape.into(),
            dtype,
            placement: Placement::default(),
            distribution: Distribution::default(),
        }
    }

    pub fn with_placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    pub fn with_distribution(mut self, distribution: Distribution) -> Self {
        self.distribution = distribution;
        self
    }

    /// Same attributes, different shape.
    pub fn reshaped(&self, shape: Shape) -> Self {
        Self {
            shape,
            ..self.clone()
        }
    }
}

/// Handle to a registered blob, returned by every operator constructor.
///
/// Handles are plain values: they carry the blob's identity and the
/// signature recorded for it at registration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobHandle {
    lbi: LogicalBlobId,
    desc: BlobDesc,
}

impl BlobHandle {
    pub fn new(lbi: LogicalBlobId, desc: BlobDesc) -> Self {
        Self { lbi, desc }
    }

    pub fn lbi(&self) -> &LogicalBlobId {
        &self.lbi
    }

    pub fn op_name(&self) -> &str {
        &self.lbi.op_name
    }

    pub fn blob_name(&self) -> &str {
        &self.lbi.blob_name
    }

    pub fn logical_blob_name(&self) -> String {
        self.lbi.logical_blob_name()
    }

    pub fn desc(&self) -> &BlobDesc {
        &self.desc
    }

    pub fn shape(&self) -> &Shape {
        &self.desc.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.desc.shape.dims()
    }

    pub fn rank(&self) -> usize {
        self.desc.shape.rank()
    }

    pub fn dtype(&self) -> DType {
        self.desc.dtype
    }

    pub fn placement(&self) -> &Placement {
        &self.desc.placement
    }

    pub fn distribution(&self) -> Distribution {
        self.desc.distribution
    }
}
