// Convolution - Conv2d and its transpose
//
// Both constructors read everything the config needs off the filter blob:
//
//   filters      = filter.shape[0]
//   kernel_size  = filter.shape[2..4]   for NCHW  (filter laid out [O, I, kH, kW])
//                  filter.shape[1..3]   for NHWC  (filter laid out [O, kH, kW, I])
//
// Output spatial sizes are left to inference:
//
//   conv    VALID: (in - ((k-1)*d + 1)) / s + 1     SAME: ceil(in / s)
//   deconv  VALID: (in - 1) * s + k                  SAME: in * s
//
// Bias is never fused into the convolution; use bias_add on the output.

use opflow_core::config::{Conv2dConf, ConvParams, DeconvConf};
use opflow_core::{
    BlobHandle, ChannelPosition, DataFormat, Error, GraphRegistry, IntOrSeq, OpConf, OpKind,
    OperatorConfig, Padding, Result, Session, OUT,
};

use crate::params::{expect_rank, scalar_or_pair};

/// Optional arguments of [`conv2d`].
#[derive(Debug, Clone)]
pub struct Conv2dArgs {
    pub strides: IntOrSeq,
    /// `"SAME"` or `"VALID"`, any case.
    pub padding: String,
    /// `"NHWC"` (default) or `"NCHW"`, any case.
    pub data_format: String,
    /// Defaults to `[1, 1]`.
    pub dilations: Option<IntOrSeq>,
    pub name: Option<String>,
}

impl Conv2dArgs {
    pub fn new(strides: impl Into<IntOrSeq>, padding: impl Into<String>) -> Self {
        Self {
            strides: strides.into(),
            padding: padding.into(),
            data_format: "NHWC".to_string(),
            dilations: None,
            name: None,
        }
    }

    pub fn with_data_format(mut self, data_format: impl Into<String>) -> Self {
        self.data_format = data_format.into();
        self
    }

    pub fn with_dilations(mut self, dilations: impl Into<IntOrSeq>) -> Self {
        self.dilations = Some(dilations.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Checked and derived convolution parameters, before naming.
struct ConvPlan {
    filters: usize,
    params: ConvParams,
}

fn kernel_size(filter: &BlobHandle, pos: ChannelPosition) -> Vec<usize> {
    filter.dims()[pos.spatial_axes(4)].to_vec()
}

fn plan_conv(
    kind: OpKind,
    filter: &BlobHandle,
    strides: Option<&IntOrSeq>,
    padding: &str,
    data_format: &str,
    dilations: Option<&IntOrSeq>,
) -> Result<ConvPlan> {
    let strides = match strides {
        Some(s) => scalar_or_pair(kind, "strides", s)?,
        None => {
            return Err(Error::invalid(kind, "strides", "strides must be an int or a list"))
        }
    };
    let padding = Padding::parse(padding, kind)?;
    let pos = DataFormat::parse(data_format, DataFormat::CONV_2D, kind)?.channel_position();
    let dilation_rate = match dilations {
        Some(d) => scalar_or_pair(kind, "dilations", d)?,
        None => vec![1, 1],
    };
    Ok(ConvPlan {
        filters: filter.dims()[0],
        params: ConvParams {
            padding,
            data_format: pos,
            kernel_size: kernel_size(filter, pos),
            strides,
            dilation_rate,
        },
    })
}

/// 2-D convolution of `input` with `filters`.
///
/// Both blobs must have rank 4. The output has `filters.shape[0]` channels.
pub fn conv2d<R: GraphRegistry>(
    session: &mut Session<R>,
    input: &BlobHandle,
    filters: &BlobHandle,
    args: Conv2dArgs,
) -> Result<BlobHandle> {
    let kind = OpKind::Conv2D;
    expect_rank(kind, "input", input, 4)?;
    expect_rank(kind, "filters", filters, 4)?;
    let plan = plan_conv(
        kind,
        filters,
        Some(&args.strides),
        &args.padding,
        &args.data_format,
        args.dilations.as_ref(),
    )?;

    let name = session.resolve_name(args.name.as_deref(), kind)?;
    let config = OperatorConfig::new(
        name,
        OpConf::Conv2d(Conv2dConf {
            input: input.lbi().clone(),
            out: OUT.to_string(),
            weight: filters.lbi().clone(),
            filters: plan.filters,
            conv: plan.params,
            use_bias: false,
        }),
    );
    session.register(config)
}

/// Arguments of [`deconv2d`].
///
/// `value`/`input` and `filter`/`filters` are aliases: exactly one of each
/// pair must be set, and whichever is set is used. `output_shape` and
/// `dilations` exist only to be rejected.
#[derive(Debug, Clone)]
pub struct Deconv2dArgs {
    pub value: Option<BlobHandle>,
    pub input: Option<BlobHandle>,
    pub filter: Option<BlobHandle>,
    pub filters: Option<BlobHandle>,
    pub output_shape: Option<Vec<usize>>,
    pub strides: Option<IntOrSeq>,
    pub padding: String,
    pub data_format: String,
    pub dilations: Option<IntOrSeq>,
    pub name: Option<String>,
}

impl Default for Deconv2dArgs {
    fn default() -> Self {
        Self {
            value: None,
            input: None,
            filter: None,
            filters: None,
            output_shape: None,
            strides: None,
            padding: "SAME".to_string(),
            data_format: "NHWC".to_string(),
            dilations: None,
            name: None,
        }
    }
}

impl Deconv2dArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, value: &BlobHandle) -> Self {
        self.value = Some(value.clone());
        self
    }

    pub fn with_input(mut self, input: &BlobHandle) -> Self {
        self.input = Some(input.clone());
        self
    }

    pub fn with_filter(mut self, filter: &BlobHandle) -> Self {
        self.filter = Some(filter.clone());
        self
    }

    pub fn with_filters(mut self, filters: &BlobHandle) -> Self {
        self.filters = Some(filters.clone());
        self
    }

    pub fn with_output_shape(mut self, shape: Vec<usize>) -> Self {
        self.output_shape = Some(shape);
        self
    }

    pub fn with_strides(mut self, strides: impl Into<IntOrSeq>) -> Self {
        self.strides = Some(strides.into());
        self
    }

    pub fn with_padding(mut self, padding: impl Into<String>) -> Self {
        self.padding = padding.into();
        self
    }

    pub fn with_data_format(mut self, data_format: impl Into<String>) -> Self {
        self.data_format = data_format.into();
        self
    }

    pub fn with_dilations(mut self, dilations: impl Into<IntOrSeq>) -> Self {
        self.dilations = Some(dilations.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Pick the one alias of a pair that was supplied.
fn exactly_one<'a>(
    kind: OpKind,
    fields: (&str, &str),
    a: Option<&'a BlobHandle>,
    b: Option<&'a BlobHandle>,
) -> Result<&'a BlobHandle> {
    match (a, b) {
        (Some(h), None) | (None, Some(h)) => Ok(h),
        (Some(_), Some(_)) => Err(Error::invalid(
            kind,
            fields.1,
            format!("only one of `{}` and `{}` may be given", fields.0, fields.1),
        )),
        (None, None) => Err(Error::invalid(
            kind,
            fields.1,
            format!("one of `{}` and `{}` is required", fields.0, fields.1),
        )),
    }
}

/// 2-D transposed convolution.
pub fn deconv2d<R: GraphRegistry>(session: &mut Session<R>, args: Deconv2dArgs) -> Result<BlobHandle> {
    let kind = OpKind::Deconv2D;
    let input = exactly_one(kind, ("value", "input"), args.value.as_ref(), args.input.as_ref())?;
    let filter = exactly_one(kind, ("filter", "filters"), args.filter.as_ref(), args.filters.as_ref())?;
    if args.output_shape.is_some() {
        return Err(Error::unsupported(kind, "output_shape"));
    }
    if args.dilations.is_some() {
        return Err(Error::unsupported(kind, "dilations"));
    }
    expect_rank(kind, "input", input, 4)?;
    expect_rank(kind, "filters", filter, 4)?;
    let plan = plan_conv(
        kind,
        filter,
        args.strides.as_ref(),
        &args.padding,
        &args.data_format,
        None,
    )?;

    let name = session.resolve_name(args.name.as_deref(), kind)?;
    let config = OperatorConfig::new(
        name,
        OpConf::Deconv2d(DeconvConf {
            input: input.lbi().clone(),
            out: OUT.to_string(),
            filter: filter.lbi().clone(),
            filters: plan.filters,
            conv_conf: plan.params,
            use_bias: false,
        }),
    );
    session.register(config)
}
