//! # opflow
//!
//! Typed operator construction with shape and attribute inference.
//!
//! This is the top-level facade crate that re-exports everything you need
//! to build a job graph one operator at a time.
//!
//! ## Usage
//!
//! ```rust
//! use opflow::prelude::*;
//!
//! # fn main() -> opflow::Result<()> {
//! let mut session = Session::default();
//! let x = input(&mut session, InputArgs::new(vec![1, 8, 8, 3]))?;
//! let y = max_pool2d(&mut session, &x, PoolArgs::new(2usize, 2usize, "VALID"))?;
//! assert_eq!(y.dims(), &[1, 4, 4, 3]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! | Crate | Purpose |
//! |-------|----------|
//! | `opflow-core` | Shape, DType, layouts, OperatorConfig, ShapeInferenceEngine, GraphRegistry, Session |
//! | `opflow-nn` | Operator constructors (conv, pooling, softmax, cross entropy, dropout, bias add) |
//!
//! ## Modules
//!
//! - [`proto`]: protobuf wire format for operator configs and whole jobs

/// Re-export core types.
pub use opflow_core::{
    bail, normalize_to_length, BlobDesc, BlobHandle, ChannelPosition, DType, DataFormat,
    Distribution, Error, ErrorCategory, GraphRegistry, IntOrSeq, JobGraph, LogicalBlobId, OpConf,
    OpKind, OperatorConfig, OutputSignature, Padding, Placement, Result, ScopeHandle, Session,
    SessionConfig, Shape, ShapeInferenceEngine, SignatureTable, UpstreamSignature, OUT,
};

/// Per-kind parameter groups.
pub mod config {
    pub use opflow_core::config::*;
}

/// Re-export operator constructors.
pub mod nn {
    pub use opflow_nn::*;
}

/// Proto: encode/decode configs and jobs, save/load job files.
pub mod proto;

/// Prelude: import this for the most common types.
pub mod prelude {
    pub use crate::nn::{
        avg_pool1d, avg_pool2d, avg_pool3d, bias_add, conv2d, deconv2d, dropout, input,
        max_pool1d, max_pool2d, max_pool3d, softmax, sparse_softmax_cross_entropy_with_logits,
        variable, Conv2dArgs, Deconv2dArgs, DropoutArgs, InputArgs, PoolArgs, VariableArgs,
    };
    pub use crate::proto::{decode_job, decode_op, encode_job, encode_op, load_job, save_job};
    pub use crate::{
        BlobHandle, DType, Distribution, Error, ErrorCategory, GraphRegistry, JobGraph,
        LogicalBlobId, OpKind, OperatorConfig, Placement, ScopeHandle, Session, SessionConfig,
        Shape,
    };
}
