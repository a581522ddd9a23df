// Sparse softmax cross entropy
//
// loss[b] = -log(softmax(logits[b])[labels[b]])
//
// The loss operator consumes probabilities, not logits, so the constructor
// first builds a Softmax node over the logits (last axis, auto-named) and
// wires its output in as `prediction`. The loss node is named before the
// softmax node, so an unnamed call produces e.g. SparseCrossEntropy_0 fed
// by Softmax_1.
//
// Both nodes are committed as one unit: if the loss node is rejected (a
// taken name, mismatched label attributes, a label unknown to the session)
// the softmax node is not registered either.
//
//   labels:  integer, shape [B...]
//   logits:  float,   shape [B..., num_classes]
//   output:  logits dtype, shape [B...]

use opflow_core::config::{SoftmaxConf, SparseCrossEntropyConf};
use opflow_core::{
    BlobHandle, Error, GraphRegistry, LogicalBlobId, OpConf, OpKind, OperatorConfig, Result,
    Session, OUT,
};
use tracing::debug;

/// Cross entropy between integer class `labels` and unnormalized `logits`.
pub fn sparse_softmax_cross_entropy_with_logits<R: GraphRegistry>(
    session: &mut Session<R>,
    labels: &BlobHandle,
    logits: &BlobHandle,
    name: Option<&str>,
) -> Result<BlobHandle> {
    let kind = OpKind::SparseSoftmaxCrossEntropy;
    if !labels.dtype().is_integer() {
        return Err(Error::invalid(
            kind,
            "labels",
            format!("labels must be an integer type, got {}", labels.dtype()),
        ));
    }
    let batch = logits.dims().split_last().map(|(_, batch)| batch);
    if batch != Some(labels.dims()) {
        return Err(Error::invalid(
            kind,
            "labels",
            format!(
                "labels shape {} does not match logits shape {} without its class axis",
                labels.shape(),
                logits.shape()
            ),
        ));
    }
    let name = session.resolve_name(name, kind)?;
    let softmax_name = session.resolve_name(None, OpKind::Softmax)?;
    let prediction = LogicalBlobId::new(&softmax_name, OUT);
    debug!(op = %name, prediction = %prediction, "staging softmax for cross entropy");

    let softmax = OperatorConfig::new(
        softmax_name,
        OpConf::Softmax(SoftmaxConf {
            input: logits.lbi().clone(),
            out: OUT.to_string(),
            axis: -1,
        }),
    );
    let loss = OperatorConfig::new(
        name.clone(),
        OpConf::SparseCrossEntropy(SparseCrossEntropyConf {
            prediction,
            label: labels.lbi().clone(),
            out: OUT.to_string(),
        }),
    );
    session
        .register_all(vec![softmax, loss])?
        .pop()
        .ok_or_else(|| Error::inference(name, "operator produced no outputs"))
}
