// Shape inference - derive output signatures from a config and its inputs
//
// Inference is a pure function of (config, upstream signature). The
// upstream signature is gathered by looking up each input binding in the
// session's SignatureTable: a lookup of what was recorded when the
// producer registered, never a recomputation of its ancestors.
//
// OUTPUT SIZE FORMULAS (per spatial axis, effective kernel e = (k-1)*d + 1):
//
//   conv / pool   VALID: (in - e) / s + 1      (requires in >= e)
//                 SAME:  ceil(in / s)
//   deconv        VALID: (in - 1) * s + e
//                 SAME:  in * s
//
// ATTRIBUTES:
//
//   All inputs must share one placement. Outputs inherit the placement and
//   distribution of the primary (first) input. Weight-like inputs must be
//   broadcast. A split along an axis the operator reduces over or mixes
//   (softmax axis, pooling windows, loss class axis) is rejected; conv data
//   may only be split along the batch axis. A partial-sum input to any
//   non-linear operator is rejected too.
//
// The table the results are written to is append-only: once a blob's
// signature is recorded it never changes.

use std::collections::{BTreeMap, HashMap};

use crate::blob::{BlobDesc, Distribution, LogicalBlobId, Placement};
use crate::config::{
    BiasAddConf, ConvParams, Conv2dConf, DeconvConf, DropoutConf, InputConf, OpConf,
    OperatorConfig, PoolingConf, SoftmaxConf, VariableConf,
};
use crate::error::{Error, Result};
use crate::layout::Padding;
use crate::shape::Shape;

/// Metadata of every input of one operator, keyed by input-bindable name.
pub type UpstreamSignature = BTreeMap<String, BlobDesc>;

/// Inferred metadata of every output of one operator, keyed by output slot.
pub type OutputSignature = BTreeMap<String, BlobDesc>;

/// Append-only record of every blob signature registered in a session.
#[derive(Debug, Clone, Default)]
pub struct SignatureTable {
    entries: HashMap<LogicalBlobId, BlobDesc>,
}

impl SignatureTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, lbi: &LogicalBlobId) -> Option<&BlobDesc> {
        self.entries.get(lbi)
    }

    pub fn contains(&self, lbi: &LogicalBlobId) -> bool {
        self.entries.contains_key(lbi)
    }

    /// Record a signature. Fails if one is already recorded for `lbi`.
    pub fn insert(&mut self, lbi: LogicalBlobId, desc: BlobDesc) -> Result<()> {
        if self.entries.contains_key(&lbi) {
            return Err(Error::SignatureExists { lbi });
        }
        self.entries.insert(lbi, desc);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LogicalBlobId, &BlobDesc)> {
        self.entries.iter()
    }
}

/// Kind-dispatching shape/attribute inference.
#[derive(Debug, Clone, Default)]
pub struct ShapeInferenceEngine {
    default_placement: Placement,
}

impl ShapeInferenceEngine {
    /// `default_placement` is assigned to blobs that have no inputs to inherit from.
    pub fn new(default_placement: Placement) -> Self {
        Self { default_placement }
    }

    /// Collect the recorded signature of every input binding of `config`.
    pub fn upstream_signature(
        &self,
        config: &OperatorConfig,
        table: &SignatureTable,
    ) -> Result<UpstreamSignature> {
        self.upstream_signature_with(config, |lbi| table.get(lbi))
    }

    /// Like [`upstream_signature`](Self::upstream_signature), resolving
    /// inputs through `lookup` instead of a table.
    pub fn upstream_signature_with<'t>(
        &self,
        config: &OperatorConfig,
        lookup: impl Fn(&LogicalBlobId) -> Option<&'t BlobDesc>,
    ) -> Result<UpstreamSignature> {
        let mut upstream = UpstreamSignature::new();
        for (ibn, lbi) in config.inputs() {
            let desc = lookup(lbi).ok_or_else(|| {
                Error::inference(
                    &config.name,
                    format!("input `{ibn}` references unknown blob `{lbi}`"),
                )
            })?;
            upstream.insert(ibn.to_string(), desc.clone());
        }
        Ok(upstream)
    }

    /// Infer the signature of every output slot of `config`.
    pub fn infer(
        &self,
        config: &OperatorConfig,
        upstream: &UpstreamSignature,
    ) -> Result<OutputSignature> {
        let ctx = Ctx {
            op_name: &config.name,
            upstream,
        };
        ctx.check_placement()?;

        let desc = match &config.conf {
            OpConf::Input(c) => self.infer_input(&ctx, c)?,
            OpConf::Variable(c) => self.infer_variable(c),
            OpConf::Conv2d(c) => infer_conv2d(&ctx, c)?,
            OpConf::Deconv2d(c) => infer_deconv2d(&ctx, c)?,
            OpConf::MaxPool2d(c) | OpConf::AvgPool2d(c) => infer_pooling(&ctx, c, 2)?,
            OpConf::MaxPool3d(c) | OpConf::AvgPool3d(c) => infer_pooling(&ctx, c, 3)?,
            OpConf::Softmax(c) => infer_softmax(&ctx, c)?,
            OpConf::SparseCrossEntropy(_) => infer_sparse_cross_entropy(&ctx)?,
            OpConf::Dropout(c) => infer_dropout(&ctx, c)?,
            OpConf::BiasAdd(c) => infer_bias_add(&ctx, c)?,
        };

        if desc.shape.has_zero_dim() {
            return Err(ctx.err(format!("inferred shape {} has a zero dimension", desc.shape)));
        }

        let mut out = OutputSignature::new();
        for obn in config.outputs() {
            out.insert(obn.to_string(), desc.clone());
        }
        Ok(out)
    }

    fn infer_input(&self, ctx: &Ctx<'_>, c: &InputConf) -> Result<BlobDesc> {
        if let Distribution::Split(axis) = c.distribution {
            if axis >= c.shape.rank() {
                return Err(ctx.err(format!(
                    "split axis {axis} out of range for shape {}",
                    c.shape
                )));
            }
        }
        Ok(BlobDesc::new(c.shape.clone(), c.data_type)
            .with_placement(self.default_placement.clone())
            .with_distribution(c.distribution))
    }

    fn infer_variable(&self, c: &VariableConf) -> BlobDesc {
        BlobDesc::new(c.shape.clone(), c.data_type)
            .with_placement(self.default_placement.clone())
            .with_distribution(Distribution::Broadcast)
    }
}

/// Per-call inference context: the node being inferred and its inputs.
struct Ctx<'a> {
    op_name: &'a str,
    upstream: &'a UpstreamSignature,
}

impl<'a> Ctx<'a> {
    fn err(&self, cause: impl Into<String>) -> Error {
        Error::inference(self.op_name, cause)
    }

    fn get(&self, ibn: &str) -> Result<&'a BlobDesc> {
        self.upstream
            .get(ibn)
            .ok_or_else(|| self.err(format!("missing upstream signature for input `{ibn}`")))
    }

    fn check_placement(&self) -> Result<()> {
        let mut iter = self.upstream.iter();
        if let Some((first_ibn, first)) = iter.next() {
            for (ibn, desc) in iter {
                if desc.placement != first.placement {
                    return Err(self.err(format!(
                        "placement mismatch: `{first_ibn}` is on {} but `{ibn}` is on {}",
                        first.placement, desc.placement
                    )));
                }
            }
        }
        Ok(())
    }

    fn expect_rank(&self, ibn: &str, desc: &BlobDesc, rank: usize) -> Result<()> {
        if desc.shape.rank() != rank {
            return Err(self.err(format!(
                "`{ibn}` must have rank {rank}, got shape {}",
                desc.shape
            )));
        }
        Ok(())
    }

    fn expect_float(&self, ibn: &str, desc: &BlobDesc) -> Result<()> {
        if !desc.dtype.is_float() {
            return Err(self.err(format!(
                "`{ibn}` must be floating point, got {}",
                desc.dtype
            )));
        }
        Ok(())
    }

    fn expect_same_dtype(&self, lhs: (&str, &BlobDesc), rhs: (&str, &BlobDesc)) -> Result<()> {
        if lhs.1.dtype != rhs.1.dtype {
            return Err(self.err(format!(
                "dtype mismatch: `{}` is {} but `{}` is {}",
                lhs.0, lhs.1.dtype, rhs.0, rhs.1.dtype
            )));
        }
        Ok(())
    }

    fn expect_broadcast(&self, ibn: &str, desc: &BlobDesc) -> Result<()> {
        if desc.distribution != Distribution::Broadcast {
            return Err(self.err(format!(
                "`{ibn}` must be broadcast, got {}",
                desc.distribution
            )));
        }
        Ok(())
    }

    fn reject_partial_sum(&self, ibn: &str, desc: &BlobDesc) -> Result<()> {
        if desc.distribution == Distribution::PartialSum {
            return Err(self.err(format!("`{ibn}` cannot be a partial sum")));
        }
        Ok(())
    }

    fn reject_split_on(&self, ibn: &str, desc: &BlobDesc, axis: usize) -> Result<()> {
        if desc.distribution == Distribution::Split(axis) {
            return Err(self.err(format!("`{ibn}` cannot be split along axis {axis}")));
        }
        Ok(())
    }
}

fn conv_out_size(input: usize, kernel: usize, stride: usize, dilation: usize, padding: Padding) -> Option<usize> {
    if kernel == 0 || stride == 0 || dilation == 0 {
        return None;
    }
    let effective = (kernel - 1) * dilation + 1;
    match padding {
        Padding::Valid => input.checked_sub(effective).map(|d| d / stride + 1),
        Padding::Same => Some((input + stride - 1) / stride),
    }
}

fn deconv_out_size(input: usize, kernel: usize, stride: usize, dilation: usize, padding: Padding) -> Option<usize> {
    if kernel == 0 || stride == 0 || dilation == 0 || input == 0 {
        return None;
    }
    let effective = (kernel - 1) * dilation + 1;
    match padding {
        Padding::Valid => Some((input - 1) * stride + effective),
        Padding::Same => Some(input * stride),
    }
}

/// Checks shared by convolution and deconvolution; returns the input desc.
fn check_conv_operands<'a>(
    ctx: &Ctx<'a>,
    weight_ibn: &str,
    filters: usize,
    params: &ConvParams,
) -> Result<&'a BlobDesc> {
    let x = ctx.get("in")?;
    let w = ctx.get(weight_ibn)?;
    ctx.expect_rank("in", x, 4)?;
    ctx.expect_rank(weight_ibn, w, 4)?;
    ctx.expect_float("in", x)?;
    ctx.expect_same_dtype(("in", x), (weight_ibn, w))?;
    ctx.expect_broadcast(weight_ibn, w)?;
    ctx.reject_partial_sum("in", x)?;

    if let Distribution::Split(axis) = x.distribution {
        if axis != 0 {
            return Err(ctx.err(format!(
                "`in` may only be split along the batch axis, got {}",
                x.distribution
            )));
        }
    }

    let pos = params.data_format;
    let c_axis = pos.channel_axis(4);

    for (field, values) in [
        ("kernel_size", &params.kernel_size),
        ("strides", &params.strides),
        ("dilation_rate", &params.dilation_rate),
    ] {
        if values.len() != 2 {
            return Err(ctx.err(format!("{field} must have 2 entries, got {:?}", values)));
        }
    }

    let w_dims = w.shape.dims();
    if w_dims[0] != filters {
        return Err(ctx.err(format!(
            "filters = {filters} but `{weight_ibn}` has {} output channels",
            w_dims[0]
        )));
    }
    let kernel: Vec<usize> = pos.spatial_axes(4).map(|a| w_dims[a]).collect();
    if kernel != params.kernel_size {
        return Err(ctx.err(format!(
            "kernel_size {:?} does not match `{weight_ibn}` spatial dims {:?}",
            params.kernel_size, kernel
        )));
    }
    let in_channels = x.shape.dims()[c_axis];
    if w_dims[c_axis] != in_channels {
        return Err(ctx.err(format!(
            "input has {in_channels} channels but `{weight_ibn}` expects {}",
            w_dims[c_axis]
        )));
    }
    Ok(x)
}

fn infer_conv2d(ctx: &Ctx<'_>, c: &Conv2dConf) -> Result<BlobDesc> {
    let x = check_conv_operands(ctx, "weight", c.filters, &c.conv)?;
    let pos = c.conv.data_format;
    let mut dims = x.shape.dims().to_vec();
    for (i, axis) in pos.spatial_axes(4).enumerate() {
        dims[axis] = conv_out_size(
            dims[axis],
            c.conv.kernel_size[i],
            c.conv.strides[i],
            c.conv.dilation_rate[i],
            c.conv.padding,
        )
        .ok_or_else(|| {
            ctx.err(format!(
                "window {} (dilation {}) does not fit input extent {} on axis {axis}",
                c.conv.kernel_size[i], c.conv.dilation_rate[i], dims[axis]
            ))
        })?;
    }
    dims[pos.channel_axis(4)] = c.filters;
    Ok(x.reshaped(Shape::new(dims)))
}

fn infer_deconv2d(ctx: &Ctx<'_>, c: &DeconvConf) -> Result<BlobDesc> {
    let x = check_conv_operands(ctx, "filter", c.filters, &c.conv_conf)?;
    let params = &c.conv_conf;
    let pos = params.data_format;
    let mut dims = x.shape.dims().to_vec();
    for (i, axis) in pos.spatial_axes(4).enumerate() {
        dims[axis] = deconv_out_size(
            dims[axis],
            params.kernel_size[i],
            params.strides[i],
            params.dilation_rate[i],
            params.padding,
        )
        .ok_or_else(|| ctx.err(format!("invalid transposed window on axis {axis}")))?;
    }
    dims[pos.channel_axis(4)] = c.filters;
    Ok(x.reshaped(Shape::new(dims)))
}

fn infer_pooling(ctx: &Ctx<'_>, c: &PoolingConf, spatial: usize) -> Result<BlobDesc> {
    let x = ctx.get("in")?;
    let rank = spatial + 2;
    ctx.expect_rank("in", x, rank)?;
    ctx.expect_float("in", x)?;
    ctx.reject_partial_sum("in", x)?;
    for (field, values) in [("pool_size", &c.pool_size), ("strides", &c.strides)] {
        if values.len() != spatial {
            return Err(ctx.err(format!(
                "{field} must have {spatial} entries, got {:?}",
                values
            )));
        }
    }

    let pos = c.data_format;
    let mut dims = x.shape.dims().to_vec();
    for (i, axis) in pos.spatial_axes(rank).enumerate() {
        ctx.reject_split_on("in", x, axis)?;
        dims[axis] = conv_out_size(dims[axis], c.pool_size[i], c.strides[i], 1, c.padding)
            .ok_or_else(|| {
                ctx.err(format!(
                    "pool window {} with stride {} does not fit input extent {} on axis {axis}",
                    c.pool_size[i], c.strides[i], dims[axis]
                ))
            })?;
    }
    Ok(x.reshaped(Shape::new(dims)))
}

fn infer_softmax(ctx: &Ctx<'_>, c: &SoftmaxConf) -> Result<BlobDesc> {
    let x = ctx.get("in")?;
    ctx.expect_float("in", x)?;
    ctx.reject_partial_sum("in", x)?;
    let axis = x.shape.resolve_axis(c.axis).ok_or_else(|| {
        ctx.err(format!("axis {} out of range for shape {}", c.axis, x.shape))
    })?;
    ctx.reject_split_on("in", x, axis)?;
    Ok(x.clone())
}

fn infer_sparse_cross_entropy(ctx: &Ctx<'_>) -> Result<BlobDesc> {
    let pred = ctx.get("prediction")?;
    let label = ctx.get("label")?;
    ctx.expect_float("prediction", pred)?;
    if !label.dtype.is_integer() {
        return Err(ctx.err(format!("`label` must be an integer type, got {}", label.dtype)));
    }
    ctx.reject_partial_sum("prediction", pred)?;
    let rank = pred.shape.rank();
    if rank == 0 {
        return Err(ctx.err("`prediction` must have at least one dimension"));
    }
    let class_axis = rank - 1;
    ctx.reject_split_on("prediction", pred, class_axis)?;
    let expected = &pred.shape.dims()[..class_axis];
    if label.shape.dims() != expected {
        return Err(ctx.err(format!(
            "`label` shape {} does not match prediction batch shape {}",
            label.shape,
            Shape::from(expected)
        )));
    }
    if label.distribution != pred.distribution {
        return Err(ctx.err(format!(
            "`label` distribution {} differs from `prediction` distribution {}",
            label.distribution, pred.distribution
        )));
    }
    Ok(BlobDesc {
        shape: label.shape.clone(),
        dtype: pred.dtype,
        placement: pred.placement.clone(),
        distribution: pred.distribution,
    })
}

fn infer_dropout(ctx: &Ctx<'_>, c: &DropoutConf) -> Result<BlobDesc> {
    let x = ctx.get("in")?;
    ctx.expect_float("in", x)?;
    ctx.reject_partial_sum("in", x)?;
    if !(0.0..1.0).contains(&c.rate) {
        return Err(ctx.err(format!("rate must be in [0, 1), got {}", c.rate)));
    }
    if let Some(noise) = &c.noise_shape {
        if !noise.broadcasts_to(&x.shape) {
            return Err(ctx.err(format!(
                "noise_shape {noise} is not broadcast-compatible with input {}",
                x.shape
            )));
        }
    }
    Ok(x.clone())
}

fn infer_bias_add(ctx: &Ctx<'_>, c: &BiasAddConf) -> Result<BlobDesc> {
    let a = ctx.get("a")?;
    let b = ctx.get("b")?;
    ctx.expect_same_dtype(("a", a), ("b", b))?;
    ctx.expect_broadcast("b", b)?;
    ctx.reject_partial_sum("a", a)?;
    let axis = a.shape.resolve_axis(c.axis).ok_or_else(|| {
        ctx.err(format!("axis {} out of range for shape {}", c.axis, a.shape))
    })?;
    ctx.expect_rank("b", b, 1)?;
    if b.shape.dims()[0] != a.shape.dims()[axis] {
        return Err(ctx.err(format!(
            "bias length {} does not match axis {axis} of `a` (shape {})",
            b.shape.dims()[0],
            a.shape
        )));
    }
    Ok(a.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SparseCrossEntropyConf, OUT};
    use crate::dtype::DType;
    use crate::layout::ChannelPosition;

    fn lbi(op: &str) -> LogicalBlobId {
        LogicalBlobId::new(op, OUT)
    }

    fn upstream(entries: &[(&str, BlobDesc)]) -> UpstreamSignature {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn pool(kernel: usize, stride: usize, padding: Padding, pos: ChannelPosition) -> OperatorConfig {
        OperatorConfig::new(
            "pool",
            OpConf::MaxPool2d(PoolingConf {
                input: lbi("x"),
                out: OUT.into(),
                pool_size: vec![kernel; 2],
                strides: vec![stride; 2],
                padding,
                data_format: pos,
            }),
        )
    }

    #[test]
    fn test_output_size_formulas() {
        assert_eq!(conv_out_size(8, 3, 1, 1, Padding::Same), Some(8));
        assert_eq!(conv_out_size(8, 3, 1, 1, Padding::Valid), Some(6));
        assert_eq!(conv_out_size(7, 2, 2, 1, Padding::Same), Some(4));
        assert_eq!(conv_out_size(7, 2, 2, 1, Padding::Valid), Some(3));
        assert_eq!(conv_out_size(8, 3, 1, 2, Padding::Valid), Some(4));
        assert_eq!(conv_out_size(2, 3, 1, 1, Padding::Valid), None);
        assert_eq!(conv_out_size(8, 3, 0, 1, Padding::Same), None);
        assert_eq!(deconv_out_size(4, 3, 2, 1, Padding::Valid), Some(9));
        assert_eq!(deconv_out_size(4, 3, 2, 1, Padding::Same), Some(8));
    }

    #[test]
    fn test_pool_nhwc_and_nchw() {
        let engine = ShapeInferenceEngine::default();
        let nhwc = upstream(&[("in", BlobDesc::new([2, 8, 8, 3], DType::F32))]);
        let out = engine
            .infer(&pool(2, 2, Padding::Valid, ChannelPosition::ChannelsLast), &nhwc)
            .unwrap();
        assert_eq!(out[OUT].shape.dims(), &[2, 4, 4, 3]);

        let nchw = upstream(&[("in", BlobDesc::new([2, 3, 8, 8], DType::F32))]);
        let out = engine
            .infer(&pool(3, 2, Padding::Same, ChannelPosition::ChannelsFirst), &nchw)
            .unwrap();
        assert_eq!(out[OUT].shape.dims(), &[2, 3, 4, 4]);
    }

    #[test]
    fn test_pool_rejects_wrong_rank_and_dtype() {
        let engine = ShapeInferenceEngine::default();
        let cfg = pool(2, 2, Padding::Valid, ChannelPosition::ChannelsLast);
        let rank3 = upstream(&[("in", BlobDesc::new([8, 8, 3], DType::F32))]);
        assert!(matches!(engine.infer(&cfg, &rank3), Err(Error::Inference { .. })));
        let ints = upstream(&[("in", BlobDesc::new([1, 8, 8, 3], DType::I32))]);
        assert!(matches!(engine.infer(&cfg, &ints), Err(Error::Inference { .. })));
    }

    #[test]
    fn test_placement_mismatch() {
        let engine = ShapeInferenceEngine::default();
        let cfg = OperatorConfig::new(
            "ce",
            OpConf::SparseCrossEntropy(SparseCrossEntropyConf {
                prediction: lbi("p"),
                label: lbi("l"),
                out: OUT.into(),
            }),
        );
        let up = upstream(&[
            ("prediction", BlobDesc::new([4, 10], DType::F32)),
            (
                "label",
                BlobDesc::new([4], DType::I32).with_placement(Placement::new("gpu", 1)),
            ),
        ]);
        let err = engine.infer(&cfg, &up).unwrap_err();
        assert!(err.to_string().contains("placement mismatch"));
    }

    #[test]
    fn test_softmax_split_on_axis_rejected() {
        let engine = ShapeInferenceEngine::default();
        let cfg = OperatorConfig::new(
            "sm",
            OpConf::Softmax(SoftmaxConf {
                input: lbi("x"),
                out: OUT.into(),
                axis: -1,
            }),
        );
        let batch_split = upstream(&[(
            "in",
            BlobDesc::new([4, 10], DType::F32).with_distribution(Distribution::Split(0)),
        )]);
        let out = engine.infer(&cfg, &batch_split).unwrap();
        assert_eq!(out[OUT].distribution, Distribution::Split(0));

        let class_split = upstream(&[(
            "in",
            BlobDesc::new([4, 10], DType::F32).with_distribution(Distribution::Split(1)),
        )]);
        assert!(engine.infer(&cfg, &class_split).is_err());
    }

    #[test]
    fn test_signature_table_append_only() {
        let mut table = SignatureTable::new();
        table.insert(lbi("x"), BlobDesc::new([2], DType::F32)).unwrap();
        let err = table
            .insert(lbi("x"), BlobDesc::new([3], DType::F32))
            .unwrap_err();
        assert!(matches!(err, Error::SignatureExists { .. }));
        assert_eq!(table.get(&lbi("x")).unwrap().shape.dims(), &[2]);
    }

    #[test]
    fn test_unknown_upstream_reference() {
        let engine = ShapeInferenceEngine::default();
        let cfg = pool(2, 2, Padding::Valid, ChannelPosition::ChannelsLast);
        let err = engine
            .upstream_signature(&cfg, &SignatureTable::new())
            .unwrap_err();
        assert!(matches!(err, Error::Inference { ref op_name, .. } if op_name == "pool"));
    }
}
