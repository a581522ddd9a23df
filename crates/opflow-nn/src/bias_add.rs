// BiasAdd - add a 1-D bias along the channel axis
//
// The channel axis is taken from the data format string:
//
//   None       -> 1
//   "NC..."    -> 1            (channels first)
//   "N...C"    -> rank - 1     (channels last)
//   otherwise  -> InvalidParameter
//
// The bias length must equal value.shape[axis]. This is checked here from
// the static shapes, and again by inference against recorded signatures.

use opflow_core::config::BiasAddConf;
use opflow_core::{
    BlobHandle, Error, GraphRegistry, OpConf, OpKind, OperatorConfig, Result, Session, OUT,
};

use crate::params::expect_rank;

fn bias_axis(data_format: Option<&str>, rank: usize) -> Result<usize> {
    match data_format {
        None => Ok(1),
        Some(f) if f.starts_with("NC") => Ok(1),
        Some(f) if f.starts_with('N') && f.ends_with('C') => Ok(rank - 1),
        Some(f) => Err(Error::invalid(
            OpKind::BiasAdd,
            "data_format",
            format!("data_format must be of the form `N...C` or `NC...`, got \"{f}\""),
        )),
    }
}

/// `value + bias`, with `bias` laid along the channel axis of `value`.
pub fn bias_add<R: GraphRegistry>(
    session: &mut Session<R>,
    value: &BlobHandle,
    bias: &BlobHandle,
    data_format: Option<&str>,
    name: Option<&str>,
) -> Result<BlobHandle> {
    let kind = OpKind::BiasAdd;
    let rank = value.rank();
    if rank < 2 {
        return Err(Error::invalid(
            kind,
            "value",
            format!("value must have rank >= 2, got shape {}", value.shape()),
        ));
    }
    let axis = bias_axis(data_format, rank)?;
    expect_rank(kind, "bias", bias, 1)?;
    let channels = value.dims()[axis];
    if bias.dims()[0] != channels {
        return Err(Error::invalid(
            kind,
            "bias",
            format!(
                "bias length {} does not match value.shape[{axis}] = {channels}",
                bias.dims()[0]
            ),
        ));
    }

    let name = session.resolve_name(name, kind)?;
    let config = OperatorConfig::new(
        name,
        OpConf::BiasAdd(BiasAddConf {
            a: value.lbi().clone(),
            b: bias.lbi().clone(),
            out: OUT.to_string(),
            axis: axis as i32,
        }),
    );
    session.register(config)
}
