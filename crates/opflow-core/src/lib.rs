//! # opflow-core
//!
//! Operator model, shape/attribute inference and job-building sessions.
//!
//! This crate provides:
//! - [`OperatorConfig`]: serializable description of one operator instance
//! - [`ShapeInferenceEngine`]: derives output signatures from input signatures
//! - [`GraphRegistry`] / [`JobGraph`]: where registered operators are kept
//! - [`Session`]: per-session name counter, registry and signature table
//! - [`normalize_to_length`]: scalar-or-sequence parameter normalization
// - Shape / DType: static blob metadata
// - Layout: padding modes, data formats, channel positions
// - Blob: logical blob ids, placement/distribution attributes, handles

pub mod blob;
pub mod config;
pub mod dtype;
pub mod error;
pub mod infer;
pub mod layout;
pub mod normalize;
pub mod registry;
pub mod session;
pub mod shape;

pub use blob::{BlobDesc, BlobHandle, Distribution, LogicalBlobId, Placement};
pub use config::{OpConf, OpKind, OperatorConfig, OUT};
pub use dtype::DType;
pub use error::{Error, ErrorCategory, Result};
pub use infer::{OutputSignature, ShapeInferenceEngine, SignatureTable, UpstreamSignature};
pub use layout::{ChannelPosition, DataFormat, Padding};
pub use normalize::{normalize_to_length, IntOrSeq};
pub use registry::{GraphRegistry, JobGraph, ScopeHandle};
pub use session::{Session, SessionConfig};
pub use shape::Shape;
