// OperatorConfig - the serializable description of one operator instance
//
// A config is assembled once by a constructor in opflow-nn, stamped with
// the current scope, checked by inference and then handed to the registry,
// which owns it for the rest of the job. It is never mutated afterwards.
//
// Each kind carries its own parameter group. The groups and their field
// names mirror the wire schema (see opflow::proto):
//
//   conv_2d_conf            { in, out, weight, filters, padding, data_format,
//                             kernel_size[], strides[], dilation_rate[], use_bias }
//   deconv_conf             { in, out, filter, filters, conv_conf { ... }, use_bias }
//   max_pooling_2d_conf     { in, out, pool_size[], strides[], padding, data_format }
//   softmax_conf            { in, out, axis }
//   sparse_cross_entropy_conf { prediction, label, out }
//   dropout_conf            { in, out, noise_shape?, seed?, rate }
//   bias_add_conf           { a, b, out, axis }

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::blob::{Distribution, LogicalBlobId};
use crate::dtype::DType;
use crate::layout::{ChannelPosition, Padding};
use crate::shape::Shape;

/// Name of the single output slot every kind produces.
pub const OUT: &str = "out";

/// Kind tag of an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Input,
    Variable,
    Conv2D,
    Deconv2D,
    MaxPool2D,
    AvgPool2D,
    MaxPool3D,
    AvgPool3D,
    Softmax,
    SparseSoftmaxCrossEntropy,
    Dropout,
    BiasAdd,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Input => "Input",
            OpKind::Variable => "Variable",
            OpKind::Conv2D => "Conv2D",
            OpKind::Deconv2D => "Deconv2D",
            OpKind::MaxPool2D => "MaxPool2D",
            OpKind::AvgPool2D => "AvgPool2D",
            OpKind::MaxPool3D => "MaxPool3D",
            OpKind::AvgPool3D => "AvgPool3D",
            OpKind::Softmax => "Softmax",
            OpKind::SparseSoftmaxCrossEntropy => "SparseSoftmaxCrossEntropyWithLogits",
            OpKind::Dropout => "Dropout",
            OpKind::BiasAdd => "BiasAdd",
        }
    }

    /// Prefix used when synthesizing an operator name.
    pub fn name_prefix(&self) -> &'static str {
        match self {
            OpKind::Input => "Input_",
            OpKind::Variable => "Variable_",
            OpKind::Conv2D => "Conv2d_",
            OpKind::Deconv2D => "Deconv2d_",
            OpKind::MaxPool2D => "MaxPool2D_",
            OpKind::AvgPool2D => "AveragePool2D_",
            OpKind::MaxPool3D => "MaxPool3D_",
            OpKind::AvgPool3D => "AveragePool3D_",
            OpKind::Softmax => "Softmax_",
            OpKind::SparseSoftmaxCrossEntropy => "SparseCrossEntropy_",
            OpKind::Dropout => "Dropout_",
            OpKind::BiasAdd => "BiasAdd_",
        }
    }

    /// Name of the kind's parameter group in the serialized schema.
    pub fn conf_field(&self) -> &'static str {
        match self {
            OpKind::Input => "input_conf",
            OpKind::Variable => "variable_conf",
            OpKind::Conv2D => "conv_2d_conf",
            OpKind::Deconv2D => "deconv_conf",
            OpKind::MaxPool2D => "max_pooling_2d_conf",
            OpKind::AvgPool2D => "average_pooling_2d_conf",
            OpKind::MaxPool3D => "max_pooling_3d_conf",
            OpKind::AvgPool3D => "average_pooling_3d_conf",
            OpKind::Softmax => "softmax_conf",
            OpKind::SparseSoftmaxCrossEntropy => "sparse_cross_entropy_conf",
            OpKind::Dropout => "dropout_conf",
            OpKind::BiasAdd => "bias_add_conf",
        }
    }

    /// Number of spatial dimensions for pooling kinds.
    pub fn pool_dims(&self) -> Option<usize> {
        match self {
            OpKind::MaxPool2D | OpKind::AvgPool2D => Some(2),
            OpKind::MaxPool3D | OpKind::AvgPool3D => Some(3),
            _ => None,
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Placeholder for data fed into the job from outside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputConf {
    pub out: String,
    pub shape: Shape,
    pub data_type: DType,
    #[serde(default)]
    pub distribution: Distribution,
}

/// Trainable state owned by the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableConf {
    pub out: String,
    pub shape: Shape,
    pub data_type: DType,
}

/// Window geometry shared by convolution and deconvolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvParams {
    pub padding: Padding,
    pub data_format: ChannelPosition,
    pub kernel_size: Vec<usize>,
    pub strides: Vec<usize>,
    pub dilation_rate: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conv2dConf {
    #[serde(rename = "in")]
    pub input: LogicalBlobId,
    pub out: String,
    pub weight: LogicalBlobId,
    pub filters: usize,
    #[serde(flatten)]
    pub conv: ConvParams,
    pub use_bias: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeconvConf {
    #[serde(rename = "in")]
    pub input: LogicalBlobId,
    pub out: String,
    pub filter: LogicalBlobId,
    pub filters: usize,
    pub conv_conf: ConvParams,
    pub use_bias: bool,
}

/// Parameters of max/average pooling in 2 or 3 spatial dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolingConf {
    #[serde(rename = "in")]
    pub input: LogicalBlobId,
    pub out: String,
    pub pool_size: Vec<usize>,
    pub strides: Vec<usize>,
    pub padding: Padding,
    pub data_format: ChannelPosition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftmaxConf {
    #[serde(rename = "in")]
    pub input: LogicalBlobId,
    pub out: String,
    pub axis: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseCrossEntropyConf {
    pub prediction: LogicalBlobId,
    pub label: LogicalBlobId,
    pub out: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropoutConf {
    #[serde(rename = "in")]
    pub input: LogicalBlobId,
    pub out: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noise_shape: Option<Shape>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiasAddConf {
    pub a: LogicalBlobId,
    pub b: LogicalBlobId,
    pub out: String,
    pub axis: i32,
}

/// Kind-specific parameter group of an operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OpConf {
    #[serde(rename = "input_conf")]
    Input(InputConf),
    #[serde(rename = "variable_conf")]
    Variable(VariableConf),
    #[serde(rename = "conv_2d_conf")]
    Conv2d(Conv2dConf),
    #[serde(rename = "deconv_conf")]
    Deconv2d(DeconvConf),
    #[serde(rename = "max_pooling_2d_conf")]
    MaxPool2d(PoolingConf),
    #[serde(rename = "average_pooling_2d_conf")]
    AvgPool2d(PoolingConf),
    #[serde(rename = "max_pooling_3d_conf")]
    MaxPool3d(PoolingConf),
    #[serde(rename = "average_pooling_3d_conf")]
    AvgPool3d(PoolingConf),
    #[serde(rename = "softmax_conf")]
    Softmax(SoftmaxConf),
    #[serde(rename = "sparse_cross_entropy_conf")]
    SparseCrossEntropy(SparseCrossEntropyConf),
    #[serde(rename = "dropout_conf")]
    Dropout(DropoutConf),
    #[serde(rename = "bias_add_conf")]
    BiasAdd(BiasAddConf),
}

impl OpConf {
    pub fn kind(&self) -> OpKind {
        match self {
            OpConf::Input(_) => OpKind::Input,
            OpConf::Variable(_) => OpKind::Variable,
            OpConf::Conv2d(_) => OpKind::Conv2D,
            OpConf::Deconv2d(_) => OpKind::Deconv2D,
            OpConf::MaxPool2d(_) => OpKind::MaxPool2D,
            OpConf::AvgPool2d(_) => OpKind::AvgPool2D,
            OpConf::MaxPool3d(_) => OpKind::MaxPool3D,
            OpConf::AvgPool3d(_) => OpKind::AvgPool3D,
            OpConf::Softmax(_) => OpKind::Softmax,
            OpConf::SparseCrossEntropy(_) => OpKind::SparseSoftmaxCrossEntropy,
            OpConf::Dropout(_) => OpKind::Dropout,
            OpConf::BiasAdd(_) => OpKind::BiasAdd,
        }
    }

    /// Input bindings as `(input-bindable-name, blob)` pairs, in a fixed order.
    ///
    /// The first entry, when present, is the primary data input whose
    /// attributes the outputs inherit.
    pub fn inputs(&self) -> Vec<(&'static str, &LogicalBlobId)> {
        match self {
            OpConf::Input(_) | OpConf::Variable(_) => vec![],
            OpConf::Conv2d(c) => vec![("in", &c.input), ("weight", &c.weight)],
            OpConf::Deconv2d(c) => vec![("in", &c.input), ("filter", &c.filter)],
            OpConf::MaxPool2d(c) | OpConf::AvgPool2d(c) | OpConf::MaxPool3d(c) | OpConf::AvgPool3d(c) => {
                vec![("in", &c.input)]
            }
            OpConf::Softmax(c) => vec![("in", &c.input)],
            OpConf::SparseCrossEntropy(c) => vec![("prediction", &c.prediction), ("label", &c.label)],
            OpConf::Dropout(c) => vec![("in", &c.input)],
            OpConf::BiasAdd(c) => vec![("a", &c.a), ("b", &c.b)],
        }
    }

    /// Output slot names produced by this operator.
    pub fn outputs(&self) -> Vec<&str> {
        let out = match self {
            OpConf::Input(c) => &c.out,
            OpConf::Variable(c) => &c.out,
            OpConf::Conv2d(c) => &c.out,
            OpConf::Deconv2d(c) => &c.out,
            OpConf::MaxPool2d(c) | OpConf::AvgPool2d(c) | OpConf::MaxPool3d(c) | OpConf::AvgPool3d(c) => {
                &c.out
            }
            OpConf::Softmax(c) => &c.out,
            OpConf::SparseCrossEntropy(c) => &c.out,
            OpConf::Dropout(c) => &c.out,
            OpConf::BiasAdd(c) => &c.out,
        };
        vec![out.as_str()]
    }
}

/// One operator instance in a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorConfig {
    pub name: String,
    /// Symbol table the operator's free variables resolve against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_symbol_id: Option<i64>,
    #[serde(flatten)]
    pub conf: OpConf,
}

impl OperatorConfig {
    pub fn new(name: impl Into<String>, conf: OpConf) -> Self {
        Self {
            name: name.into(),
            scope_symbol_id: None,
            conf,
        }
    }

    pub fn kind(&self) -> OpKind {
        self.conf.kind()
    }

    pub fn inputs(&self) -> Vec<(&'static str, &LogicalBlobId)> {
        self.conf.inputs()
    }

    pub fn outputs(&self) -> Vec<&str> {
        self.conf.outputs()
    }

    /// Identity of the named output slot of this operator.
    pub fn output_lbi(&self, blob_name: &str) -> LogicalBlobId {
        LogicalBlobId::new(&self.name, blob_name)
    }
}
