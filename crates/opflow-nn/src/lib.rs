//! # opflow-nn
//!
//! Operator constructors for opflow jobs.
//!
//! Each constructor turns one symbolic call into a registered operator node
//! and returns a [`BlobHandle`](opflow_core::BlobHandle) to its output:
//!
//! 1. **Inputs**: `input`, `variable`
//! 2. **Convolution**: `conv2d`, `deconv2d`
//! 3. **Pooling**: `max_pool2d`, `avg_pool2d`, `max_pool3d`, `avg_pool3d`
//! 4. **Activations**: `softmax`
//! 5. **Losses**: `sparse_softmax_cross_entropy_with_logits`
//! 6. **Regularization / arithmetic**: `dropout`, `bias_add`
//!
//! Every constructor takes `&mut Session`, validates its arguments before
//! touching the session, and is all-or-nothing: a failed call leaves the job
//! exactly as it was.

pub mod activation;
pub mod bias_add;
pub mod conv;
pub mod dropout;
pub mod input;
pub mod loss;
mod params;
pub mod pool;

pub use activation::softmax;
pub use bias_add::bias_add;
pub use conv::{conv2d, deconv2d, Conv2dArgs, Deconv2dArgs};
pub use dropout::{dropout, DropoutArgs};
pub use input::{input, variable, InputArgs, VariableArgs};
pub use loss::sparse_softmax_cross_entropy_with_logits;
pub use pool::{avg_pool1d, avg_pool2d, avg_pool3d, max_pool1d, max_pool2d, max_pool3d, PoolArgs};
