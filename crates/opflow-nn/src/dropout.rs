// Dropout - random zeroing, as a graph operator
//
// At run time each element is zeroed with probability `rate` and the
// survivors are scaled by 1/(1-rate). Building the node only records the
// parameters:
//
//   rate         required, in [0, 1)
//   noise_shape  optional; broadcast against the input to share one mask
//                across the broadcast dimensions
//   seed         optional, passed through untouched

use opflow_core::config::DropoutConf;
use opflow_core::{
    BlobHandle, Error, GraphRegistry, OpConf, OpKind, OperatorConfig, Result, Session, Shape, OUT,
};

/// Arguments of [`dropout`].
#[derive(Debug, Clone, Default)]
pub struct DropoutArgs {
    /// Probability of zeroing an element. Required.
    pub rate: Option<f64>,
    pub noise_shape: Option<Vec<usize>>,
    pub seed: Option<i64>,
    pub name: Option<String>,
}

impl DropoutArgs {
    pub fn new(rate: f64) -> Self {
        Self {
            rate: Some(rate),
            ..Default::default()
        }
    }

    pub fn with_noise_shape(mut self, noise_shape: Vec<usize>) -> Self {
        self.noise_shape = Some(noise_shape);
        self
    }

    pub fn with_seed(mut self, seed: i64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Dropout applied to `x`.
pub fn dropout<R: GraphRegistry>(
    session: &mut Session<R>,
    x: &BlobHandle,
    args: DropoutArgs,
) -> Result<BlobHandle> {
    let kind = OpKind::Dropout;
    let rate = args
        .rate
        .ok_or_else(|| Error::invalid(kind, "rate", "rate is required"))?;
    if !(0.0..1.0).contains(&rate) {
        return Err(Error::invalid(
            kind,
            "rate",
            format!("rate must be in [0, 1), got {rate}"),
        ));
    }

    let name = session.resolve_name(args.name.as_deref(), kind)?;
    let config = OperatorConfig::new(
        name,
        OpConf::Dropout(DropoutConf {
            input: x.lbi().clone(),
            out: OUT.to_string(),
            noise_shape: args.noise_shape.map(Shape::new),
            seed: args.seed,
            rate,
        }),
    );
    session.register(config)
}
