// Session - state of one job-building session
//
// Every operator constructor follows the same protocol:
//
//   1. validate arguments            (constructor, no side effects)
//   2. resolve the operator name     (Session::resolve_name)
//   3. assemble the OperatorConfig   (constructor)
//   4. stamp scope, infer, register  (Session::register)
//
// The session owns all mutable state that protocol touches: the name
// counter, the registry and the append-only signature table. Nothing is
// global, so two sessions never observe each other. Constructors take
// `&mut Session`, which serializes calls within one session.
//
// Step 4 is all-or-nothing. Inference and the collision checks run before
// the registry is touched; signatures are recorded only after the registry
// accepted the config. Constructors that emit more than one operator stage
// them through Session::register_all so the whole group commits together.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::blob::{BlobDesc, BlobHandle, LogicalBlobId, Placement};
use crate::config::{OpKind, OperatorConfig};
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::infer::{OutputSignature, ShapeInferenceEngine, SignatureTable};
use crate::registry::{GraphRegistry, JobGraph, ScopeHandle};

/// Settings of a job-building session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Name of the job the session builds (default: "job").
    pub job_name: String,
    /// Dtype of inputs and variables declared without one (default: F32).
    pub default_dtype: DType,
    /// Placement of blobs with no inputs to inherit one from (default: cpu x1).
    pub default_placement: Placement,
    /// Scope the default registry reports to the builder.
    pub scope: ScopeHandle,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            job_name: "job".to_string(),
            default_dtype: DType::F32,
            default_placement: Placement::cpu(),
            scope: ScopeHandle::default(),
        }
    }
}

impl SessionConfig {
    pub fn with_job_name(mut self, name: impl Into<String>) -> Self {
        self.job_name = name.into();
        self
    }

    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.default_dtype = dtype;
        self
    }

    pub fn with_placement(mut self, placement: Placement) -> Self {
        self.default_placement = placement;
        self
    }

    pub fn with_scope(mut self, scope: ScopeHandle) -> Self {
        self.scope = scope;
        self
    }
}

/// A job-building session over a [`GraphRegistry`].
#[derive(Debug)]
pub struct Session<R: GraphRegistry = JobGraph> {
    config: SessionConfig,
    registry: R,
    engine: ShapeInferenceEngine,
    signatures: SignatureTable,
    op_names: HashSet<String>,
    next_id: u64,
}

impl Session<JobGraph> {
    /// Start a session building a fresh in-memory job.
    pub fn new(config: SessionConfig) -> Self {
        let registry = JobGraph::new(config.job_name.clone()).with_scope(config.scope);
        Self::with_registry(registry, config)
    }

    pub fn job(&self) -> &JobGraph {
        &self.registry
    }

    /// Rebuild a session by registering `ops` in order, re-running inference.
    ///
    /// Each config keeps the scope it was stamped with; configs without one
    /// get the session's current scope.
    pub fn replay(
        config: SessionConfig,
        ops: impl IntoIterator<Item = OperatorConfig>,
    ) -> Result<Self> {
        let mut session = Session::new(config);
        for op in ops {
            let stamp = op.scope_symbol_id.is_none();
            session.commit(vec![op], stamp)?;
        }
        Ok(session)
    }
}

impl Default for Session<JobGraph> {
    fn default() -> Self {
        Session::new(SessionConfig::default())
    }
}

impl<R: GraphRegistry> Session<R> {
    /// Start a session that registers into an externally supplied registry.
    ///
    /// The session only knows the names it registered itself. If `registry`
    /// already holds operators, an auto name may collide with one of them;
    /// `add_op` then fails with [`Error::NameCollision`], the session records
    /// nothing and the next call moves on to the next counter value.
    pub fn with_registry(registry: R, config: SessionConfig) -> Self {
        let engine = ShapeInferenceEngine::new(config.default_placement.clone());
        Self {
            config,
            registry,
            engine,
            signatures: SignatureTable::new(),
            op_names: HashSet::new(),
            next_id: 0,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn into_registry(self) -> R {
        self.registry
    }

    pub fn signatures(&self) -> &SignatureTable {
        &self.signatures
    }

    /// Number of operators registered through this session.
    pub fn op_count(&self) -> usize {
        self.op_names.len()
    }

    pub fn signature(&self, lbi: &LogicalBlobId) -> Option<&BlobDesc> {
        self.signatures.get(lbi)
    }

    /// Handle to an already registered blob.
    pub fn handle(&self, lbi: &LogicalBlobId) -> Option<BlobHandle> {
        self.signatures
            .get(lbi)
            .map(|desc| BlobHandle::new(lbi.clone(), desc.clone()))
    }

    /// Step 2 of the construction protocol.
    ///
    /// An explicit name is used verbatim (a duplicate surfaces later as
    /// [`Error::NameCollision`]). Otherwise `"<Prefix>_<n>"` is synthesized
    /// from the session counter, skipping names already registered.
    pub fn resolve_name(&mut self, name: Option<&str>, kind: OpKind) -> Result<String> {
        if let Some(name) = name {
            if name.is_empty() || name.contains('/') {
                return Err(Error::invalid(
                    kind,
                    "name",
                    format!("operator name must be non-empty and contain no '/', got \"{name}\""),
                ));
            }
            return Ok(name.to_string());
        }
        loop {
            let candidate = format!("{}{}", kind.name_prefix(), self.next_id);
            self.next_id += 1;
            if !self.op_names.contains(&candidate) {
                return Ok(candidate);
            }
        }
    }

    /// Step 4 of the construction protocol: stamp, infer, register.
    ///
    /// Returns a handle to the operator's `out` blob.
    pub fn register(&mut self, config: OperatorConfig) -> Result<BlobHandle> {
        let name = config.name.clone();
        self.commit(vec![config], true)?
            .pop()
            .ok_or_else(|| Error::inference(name, "operator produced no outputs"))
    }

    /// Register `configs` as one unit, in order.
    ///
    /// Later configs may consume outputs of earlier ones. Every config is
    /// inferred and checked for collisions before the first one reaches the
    /// registry, so a failure anywhere registers none of them. Returns one
    /// handle per config.
    pub fn register_all(&mut self, configs: Vec<OperatorConfig>) -> Result<Vec<BlobHandle>> {
        self.commit(configs, true)
    }

    fn commit(
        &mut self,
        configs: Vec<OperatorConfig>,
        stamp_scope: bool,
    ) -> Result<Vec<BlobHandle>> {
        let scope = self.registry.current_scope().symbol_id;
        let mut staged: Vec<(OperatorConfig, OutputSignature)> = Vec::with_capacity(configs.len());

        for mut config in configs {
            if stamp_scope {
                config.scope_symbol_id = Some(scope);
            }
            let kind = config.kind();

            let outputs = self.infer_staged(&config, &staged).map_err(|e| {
                warn!(op = %config.name, %kind, error = %e, "inference rejected operator");
                e
            })?;

            if self.op_names.contains(&config.name)
                || staged.iter().any(|(c, _)| c.name == config.name)
                || outputs
                    .keys()
                    .any(|obn| self.signatures.contains(&config.output_lbi(obn)))
            {
                warn!(op = %config.name, %kind, "duplicate operator name");
                return Err(Error::NameCollision { name: config.name });
            }
            staged.push((config, outputs));
        }

        // A registry refusal part way through keeps the configs it already
        // accepted recorded, so the session never disagrees with its registry.
        let mut handles = Vec::with_capacity(staged.len());
        for (config, outputs) in staged {
            let name = config.name.clone();
            let kind = config.kind();
            self.registry.add_op(config)?;

            let mut primary = None;
            for (obn, desc) in outputs {
                let lbi = LogicalBlobId::new(&name, obn);
                debug!(
                    op = %name,
                    %kind,
                    blob = %lbi,
                    shape = %desc.shape,
                    dtype = %desc.dtype,
                    distribution = %desc.distribution,
                    "registered operator"
                );
                self.signatures.insert(lbi.clone(), desc.clone())?;
                if primary.is_none() {
                    primary = Some(BlobHandle::new(lbi, desc));
                }
            }
            self.op_names.insert(name.clone());
            handles.push(
                primary.ok_or_else(|| Error::inference(name, "operator produced no outputs"))?,
            );
        }
        Ok(handles)
    }

    /// Infer `config` against the recorded signatures plus the outputs of
    /// configs staged earlier in the same commit.
    fn infer_staged(
        &self,
        config: &OperatorConfig,
        staged: &[(OperatorConfig, OutputSignature)],
    ) -> Result<OutputSignature> {
        let upstream = self.engine.upstream_signature_with(config, |lbi| {
            self.signatures.get(lbi).or_else(|| {
                staged
                    .iter()
                    .find(|(c, _)| c.name == lbi.op_name)
                    .and_then(|(_, outputs)| outputs.get(&lbi.blob_name))
            })
        })?;
        self.engine.infer(config, &upstream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::Distribution;
    use crate::config::{InputConf, OpConf, SoftmaxConf, OUT};
    use crate::shape::Shape;

    fn input_conf(name: &str, shape: Shape) -> OperatorConfig {
        OperatorConfig::new(
            name,
            OpConf::Input(InputConf {
                out: OUT.into(),
                shape,
                data_type: DType::F32,
                distribution: Distribution::Broadcast,
            }),
        )
    }

    #[test]
    fn test_auto_names_are_distinct() {
        let mut s = Session::default();
        let a = s.resolve_name(None, OpKind::Softmax).unwrap();
        let b = s.resolve_name(None, OpKind::Softmax).unwrap();
        let c = s.resolve_name(None, OpKind::Dropout).unwrap();
        assert_eq!(a, "Softmax_0");
        assert_eq!(b, "Softmax_1");
        assert_eq!(c, "Dropout_2");
    }

    #[test]
    fn test_auto_name_skips_registered() {
        let mut s = Session::default();
        s.register(input_conf("Input_0", Shape::from(4))).unwrap();
        assert_eq!(s.resolve_name(None, OpKind::Input).unwrap(), "Input_1");
    }

    #[test]
    fn test_explicit_name_validation() {
        let mut s = Session::default();
        assert_eq!(s.resolve_name(Some("x"), OpKind::Input).unwrap(), "x");
        assert!(s.resolve_name(Some("a/b"), OpKind::Input).is_err());
        assert!(s.resolve_name(Some(""), OpKind::Input).is_err());
    }

    #[test]
    fn test_register_stamps_scope_and_records() {
        let config = SessionConfig::default().with_scope(ScopeHandle::new(42));
        let mut s = Session::new(config);
        let h = s.register(input_conf("x", Shape::from((2, 5)))).unwrap();
        assert_eq!(h.logical_blob_name(), "x/out");
        assert_eq!(s.job().op("x").unwrap().scope_symbol_id, Some(42));
        assert_eq!(s.signature(h.lbi()).unwrap().shape.dims(), &[2, 5]);
    }

    #[test]
    fn test_failed_inference_leaves_no_trace() {
        let mut s = Session::default();
        s.register(input_conf("x", Shape::from((2, 5)))).unwrap();
        let bad = OperatorConfig::new(
            "sm",
            OpConf::Softmax(SoftmaxConf {
                input: LogicalBlobId::new("x", OUT),
                out: OUT.into(),
                axis: 4,
            }),
        );
        assert!(matches!(s.register(bad), Err(Error::Inference { .. })));
        assert_eq!(s.job().len(), 1);
        assert_eq!(s.signatures().len(), 1);
        assert_eq!(s.op_count(), 1);
    }

    #[test]
    fn test_duplicate_registration() {
        let mut s = Session::default();
        s.register(input_conf("x", Shape::from(3))).unwrap();
        let err = s.register(input_conf("x", Shape::from(4))).unwrap_err();
        assert_eq!(err, Error::NameCollision { name: "x".into() });
        assert_eq!(s.signature(&LogicalBlobId::new("x", OUT)).unwrap().shape.dims(), &[3]);
    }

    #[test]
    fn test_register_all_is_atomic() {
        let mut s = Session::default();
        s.register(input_conf("x", Shape::from((2, 5)))).unwrap();
        let sm = |name: &str, input: &str, axis: i32| {
            OperatorConfig::new(
                name,
                OpConf::Softmax(SoftmaxConf {
                    input: LogicalBlobId::new(input, OUT),
                    out: OUT.into(),
                    axis,
                }),
            )
        };

        // second config fails: the first must not be registered
        let err = s.register_all(vec![sm("a", "x", -1), sm("b", "a", 7)]).unwrap_err();
        assert!(matches!(err, Error::Inference { ref op_name, .. } if op_name == "b"));
        let err = s.register_all(vec![sm("a", "x", -1), sm("a", "x", 0)]).unwrap_err();
        assert_eq!(err, Error::NameCollision { name: "a".into() });
        assert_eq!(s.job().len(), 1);
        assert_eq!(s.signatures().len(), 1);

        // a later config may consume an earlier staged output
        let handles = s.register_all(vec![sm("a", "x", -1), sm("b", "a", 0)]).unwrap();
        assert_eq!(handles.len(), 2);
        assert_eq!(handles[1].dims(), &[2, 5]);
        assert_eq!(s.op_count(), 3);
    }

    #[test]
    fn test_prefilled_registry_collision() {
        let existing = JobGraph::from_ops("job", vec![input_conf("Input_0", Shape::from(2))]).unwrap();
        let mut s = Session::with_registry(existing, SessionConfig::default());
        let name = s.resolve_name(None, OpKind::Input).unwrap();
        let err = s.register(input_conf(&name, Shape::from(3))).unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::NameCollision);
        assert_eq!(s.op_count(), 0);
        assert!(s.signatures().is_empty());

        let name = s.resolve_name(None, OpKind::Input).unwrap();
        assert_eq!(name, "Input_1");
        s.register(input_conf(&name, Shape::from(3))).unwrap();
        assert_eq!(s.registry().len(), 2);
    }

    #[test]
    fn test_replay_keeps_scope() {
        let mut op = input_conf("x", Shape::from(3));
        op.scope_symbol_id = Some(9);
        let s = Session::replay(SessionConfig::default(), vec![op]).unwrap();
        assert_eq!(s.job().op("x").unwrap().scope_symbol_id, Some(9));
    }
}
