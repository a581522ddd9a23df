// Pooling - max and average pooling over 2 or 3 spatial dimensions
//
// All four kinds share one parameter group (pool_size, strides, padding,
// data_format) and differ only in the kind tag, the name prefix and the
// number of spatial dimensions. Pooling never changes the channel count.
//
//   2-D: input [N, H, W, C] (NHWC) or [N, C, H, W] (NCHW, NCHW_VECT_C)
//   3-D: input [N, D, H, W, C] (NDHWC) or [N, C, D, H, W] (NCDHW)
//
// The 1-D variants exist so callers get a clear Unsupported error rather
// than a missing function.

use opflow_core::bail;
use opflow_core::config::PoolingConf;
use opflow_core::{
    BlobHandle, DataFormat, Error, GraphRegistry, IntOrSeq, OpConf, OpKind, OperatorConfig,
    Padding, Result, Session, OUT,
};

use crate::params::window;

/// Arguments shared by every pooling constructor.
#[derive(Debug, Clone)]
pub struct PoolArgs {
    pub ksize: IntOrSeq,
    pub strides: IntOrSeq,
    pub padding: String,
    /// Defaults to the channels-last format of the pooling rank.
    pub data_format: Option<String>,
    pub name: Option<String>,
}

impl PoolArgs {
    pub fn new(
        ksize: impl Into<IntOrSeq>,
        strides: impl Into<IntOrSeq>,
        padding: impl Into<String>,
    ) -> Self {
        Self {
            ksize: ksize.into(),
            strides: strides.into(),
            padding: padding.into(),
            data_format: None,
            name: None,
        }
    }

    pub fn with_data_format(mut self, data_format: impl Into<String>) -> Self {
        self.data_format = Some(data_format.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

fn pool<R: GraphRegistry>(
    session: &mut Session<R>,
    kind: OpKind,
    input: &BlobHandle,
    args: PoolArgs,
) -> Result<BlobHandle> {
    let (n, allowed, default_format) = match kind.pool_dims() {
        Some(2) => (2, DataFormat::POOL_2D, "NHWC"),
        Some(3) => (3, DataFormat::POOL_3D, "NDHWC"),
        _ => bail!("{kind} is not a pooling kind"),
    };

    let pool_size = window(kind, "ksize", &args.ksize, n)?;
    let strides = window(kind, "strides", &args.strides, n)?;
    let padding = Padding::parse(&args.padding, kind)?;
    let format = args.data_format.as_deref().unwrap_or(default_format);
    let data_format = DataFormat::parse(format, allowed, kind)?.channel_position();

    let name = session.resolve_name(args.name.as_deref(), kind)?;
    let conf = PoolingConf {
        input: input.lbi().clone(),
        out: OUT.to_string(),
        pool_size,
        strides,
        padding,
        data_format,
    };
    let conf = match kind {
        OpKind::MaxPool2D => OpConf::MaxPool2d(conf),
        OpKind::AvgPool2D => OpConf::AvgPool2d(conf),
        OpKind::MaxPool3D => OpConf::MaxPool3d(conf),
        _ => OpConf::AvgPool3d(conf),
    };
    session.register(OperatorConfig::new(name, conf))
}

/// Not available: 1-D pooling always fails with [`Error::Unsupported`].
pub fn max_pool1d<R: GraphRegistry>(
    _session: &mut Session<R>,
    _input: &BlobHandle,
    _args: PoolArgs,
) -> Result<BlobHandle> {
    Err(Error::unsupported("MaxPool1D", "1-D pooling"))
}

/// Not available: 1-D pooling always fails with [`Error::Unsupported`].
pub fn avg_pool1d<R: GraphRegistry>(
    _session: &mut Session<R>,
    _input: &BlobHandle,
    _args: PoolArgs,
) -> Result<BlobHandle> {
    Err(Error::unsupported("AveragePool1D", "1-D pooling"))
}

/// 2-D max pooling. `data_format` is one of NHWC (default), NCHW, NCHW_VECT_C.
pub fn max_pool2d<R: GraphRegistry>(
    session: &mut Session<R>,
    input: &BlobHandle,
    args: PoolArgs,
) -> Result<BlobHandle> {
    pool(session, OpKind::MaxPool2D, input, args)
}

/// 2-D average pooling. `data_format` is one of NHWC (default), NCHW, NCHW_VECT_C.
pub fn avg_pool2d<R: GraphRegistry>(
    session: &mut Session<R>,
    input: &BlobHandle,
    args: PoolArgs,
) -> Result<BlobHandle> {
    pool(session, OpKind::AvgPool2D, input, args)
}

/// 3-D max pooling. `data_format` is NDHWC (default) or NCDHW.
pub fn max_pool3d<R: GraphRegistry>(
    session: &mut Session<R>,
    input: &BlobHandle,
    args: PoolArgs,
) -> Result<BlobHandle> {
    pool(session, OpKind::MaxPool3D, input, args)
}

/// 3-D average pooling. `data_format` is NDHWC (default) or NCDHW.
pub fn avg_pool3d<R: GraphRegistry>(
    session: &mut Session<R>,
    input: &BlobHandle,
    args: PoolArgs,
) -> Result<BlobHandle> {
    pool(session, OpKind::AvgPool3D, input, args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{input, InputArgs};
    use opflow_core::{ChannelPosition, ErrorCategory};

    #[test]
    fn test_pool2d_layouts() {
        let mut s = Session::default();
        let x = input(&mut s, InputArgs::new(vec![4, 3, 9, 9])).unwrap();
        let y = avg_pool2d(
            &mut s,
            &x,
            PoolArgs::new(3usize, 3usize, "VALID").with_data_format("NCHW_VECT_C"),
        )
        .unwrap();
        assert_eq!(y.dims(), &[4, 3, 3, 3]);
        assert_eq!(y.op_name(), "AveragePool2D_1");
        match &s.job().op(y.op_name()).unwrap().conf {
            OpConf::AvgPool2d(c) => {
                assert_eq!(c.data_format, ChannelPosition::ChannelsFirst);
                assert_eq!(c.pool_size, vec![3, 3]);
            }
            other => panic!("unexpected conf {other:?}"),
        }
    }

    #[test]
    fn test_pool3d_same_padding() {
        let mut s = Session::default();
        let x = input(&mut s, InputArgs::new(vec![1, 5, 6, 7, 2])).unwrap();
        let y = max_pool3d(&mut s, &x, PoolArgs::new(2usize, vec![2, 2, 3], "same")).unwrap();
        assert_eq!(y.dims(), &[1, 3, 3, 3, 2]);
    }

    #[test]
    fn test_pool_rejects_wrong_format_for_rank() {
        let mut s = Session::default();
        let x = input(&mut s, InputArgs::new(vec![1, 4, 4, 4, 2])).unwrap();
        let err = max_pool3d(
            &mut s,
            &x,
            PoolArgs::new(2usize, 2usize, "SAME").with_data_format("NHWC"),
        )
        .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::InvalidParameter);
        let err = max_pool2d(&mut s, &x, PoolArgs::new(2usize, 2usize, "SAME")).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Inference);
        assert_eq!(s.op_count(), 1);
    }

    #[test]
    fn test_pool1d_unsupported() {
        let mut s = Session::default();
        let x = input(&mut s, InputArgs::new(vec![1, 8, 2])).unwrap();
        let args = PoolArgs::new(2usize, 2usize, "VALID");
        let err = max_pool1d(&mut s, &x, args.clone()).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Unsupported);
        let err = avg_pool1d(&mut s, &x, args).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Unsupported);
        assert_eq!(s.op_count(), 1);
    }
}
