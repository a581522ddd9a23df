// Argument checks shared by the operator constructors
//
// These run in step 1 of the construction protocol, before a name is
// resolved, so a failure here never consumes a counter value or touches
// the session.

use opflow_core::{normalize_to_length, BlobHandle, Error, IntOrSeq, OpKind, Result};

/// Require `handle` to have exactly `rank` dimensions.
pub(crate) fn expect_rank(kind: OpKind, field: &str, handle: &BlobHandle, rank: usize) -> Result<()> {
    if handle.rank() != rank {
        return Err(Error::invalid(
            kind,
            field,
            format!(
                "expected a rank-{rank} blob, `{}` has shape {}",
                handle.logical_blob_name(),
                handle.shape()
            ),
        ));
    }
    Ok(())
}

/// Every entry of a window/stride/dilation sequence must be at least 1.
pub(crate) fn expect_positive(kind: OpKind, field: &str, values: &[usize]) -> Result<()> {
    if values.iter().any(|&v| v == 0) {
        return Err(Error::invalid(
            kind,
            field,
            format!("entries must be positive, got {values:?}"),
        ));
    }
    Ok(())
}

/// Convolution strides/dilations: a scalar, or a sequence of exactly two.
///
/// Stricter than [`normalize_to_length`], which would also broadcast a
/// one-element sequence.
pub(crate) fn scalar_or_pair(kind: OpKind, field: &str, value: &IntOrSeq) -> Result<Vec<usize>> {
    let pair = match value {
        IntOrSeq::Int(v) => vec![*v, *v],
        IntOrSeq::Seq(seq) if seq.len() == 2 => seq.clone(),
        IntOrSeq::Seq(seq) => {
            return Err(Error::invalid(
                kind,
                field,
                format!("{field} length must be 2 when passed as a list, got {}", seq.len()),
            ))
        }
    };
    expect_positive(kind, field, &pair)?;
    Ok(pair)
}

/// Pooling windows and strides: broadcast to `n` entries, all positive.
pub(crate) fn window(kind: OpKind, field: &str, value: &IntOrSeq, n: usize) -> Result<Vec<usize>> {
    let seq = normalize_to_length(Some(value), n, field)?;
    expect_positive(kind, field, &seq)?;
    Ok(seq)
}
