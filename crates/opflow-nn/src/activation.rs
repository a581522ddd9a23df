// Softmax
//
// softmax(x)_i = exp(x_i) / sum_j exp(x_j), taken along one axis.
//
// The axis defaults to -1 (the last axis). Negative axes count from the
// end; whether the axis is in range is checked by inference, once the
// input rank is known from its recorded signature.

use opflow_core::config::SoftmaxConf;
use opflow_core::{BlobHandle, GraphRegistry, OpConf, OpKind, OperatorConfig, Result, Session, OUT};

/// Softmax of `logits` along `axis` (default -1).
pub fn softmax<R: GraphRegistry>(
    session: &mut Session<R>,
    logits: &BlobHandle,
    axis: Option<i32>,
    name: Option<&str>,
) -> Result<BlobHandle> {
    let axis = axis.unwrap_or(-1);
    let name = session.resolve_name(name, OpKind::Softmax)?;
    let config = OperatorConfig::new(
        name,
        OpConf::Softmax(SoftmaxConf {
            input: logits.lbi().clone(),
            out: OUT.to_string(),
            axis,
        }),
    );
    session.register(config)
}
