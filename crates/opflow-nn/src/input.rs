// Inputs and variables - the blobs every job starts from
//
// Neither kind has an input of its own, so their signatures come straight
// from the declared shape and dtype, placed on the session's default
// placement. A dtype left unset falls back to the session default.

use opflow_core::config::{InputConf, VariableConf};
use opflow_core::{
    BlobHandle, DType, Distribution, GraphRegistry, OpConf, OpKind, OperatorConfig, Result,
    Session, Shape, OUT,
};

/// Arguments of [`input`].
#[derive(Debug, Clone)]
pub struct InputArgs {
    pub shape: Shape,
    pub dtype: Option<DType>,
    pub distribution: Distribution,
    pub name: Option<String>,
}

impl InputArgs {
    pub fn new(shape: impl Into<Shape>) -> Self {
        Self {
            shape: shape.into(),
            dtype: None,
            distribution: Distribution::Broadcast,
            name: None,
        }
    }

    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = Some(dtype);
        self
    }

    pub fn with_distribution(mut self, distribution: Distribution) -> Self {
        self.distribution = distribution;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Declare data fed into the job from outside.
pub fn input<R: GraphRegistry>(session: &mut Session<R>, args: InputArgs) -> Result<BlobHandle> {
    let data_type = args.dtype.unwrap_or(session.config().default_dtype);
    let name = session.resolve_name(args.name.as_deref(), OpKind::Input)?;
    let config = OperatorConfig::new(
        name,
        OpConf::Input(InputConf {
            out: OUT.to_string(),
            shape: args.shape,
            data_type,
            distribution: args.distribution,
        }),
    );
    session.register(config)
}

/// Arguments of [`variable`].
#[derive(Debug, Clone)]
pub struct VariableArgs {
    pub shape: Shape,
    pub dtype: Option<DType>,
    pub name: Option<String>,
}

impl VariableArgs {
    pub fn new(shape: impl Into<Shape>) -> Self {
        Self {
            shape: shape.into(),
            dtype: None,
            name: None,
        }
    }

    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = Some(dtype);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Declare a trainable parameter. Variables are always broadcast.
pub fn variable<R: GraphRegistry>(session: &mut Session<R>, args: VariableArgs) -> Result<BlobHandle> {
    let data_type = args.dtype.unwrap_or(session.config().default_dtype);
    let name = session.resolve_name(args.name.as_deref(), OpKind::Variable)?;
    let config = OperatorConfig::new(
        name,
        OpConf::Variable(VariableConf {
            out: OUT.to_string(),
            shape: args.shape,
            data_type,
        }),
    );
    session.register(config)
}
