// GraphRegistry - where registered operators end up
//
// The builder only needs two things from the job it is adding to:
//
//   add_op(config)    append the operator, refusing duplicate names
//   current_scope()   the symbol table new operators are stamped with
//
// JobGraph is the in-memory implementation used by default. It keeps the
// operators in registration order, which is also a valid topological order
// since an operator can only reference blobs registered before it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::OperatorConfig;
use crate::error::{Error, Result};

/// Identifier of the symbol table an operator resolves its free variables against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ScopeHandle {
    pub symbol_id: i64,
}

impl ScopeHandle {
    pub fn new(symbol_id: i64) -> Self {
        Self { symbol_id }
    }
}

/// The job-graph collaborator the builder registers operators into.
pub trait GraphRegistry {
    /// Append an operator. Fails with [`Error::NameCollision`] if the name is taken.
    fn add_op(&mut self, config: OperatorConfig) -> Result<()>;

    /// Scope stamped into every config before inference.
    fn current_scope(&self) -> ScopeHandle;
}

/// In-memory job: an ordered list of operator configs.
#[derive(Debug, Clone, Default)]
pub struct JobGraph {
    name: String,
    scope: ScopeHandle,
    ops: Vec<OperatorConfig>,
    index: HashMap<String, usize>,
}

#[derive(Serialize, Deserialize)]
struct JobRecord {
    job_name: String,
    #[serde(default)]
    scope: ScopeHandle,
    ops: Vec<OperatorConfig>,
}

impl JobGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_scope(mut self, scope: ScopeHandle) -> Self {
        self.scope = scope;
        self
    }

    /// Rebuild a job from configs in registration order.
    pub fn from_ops(name: impl Into<String>, ops: Vec<OperatorConfig>) -> Result<Self> {
        let mut job = JobGraph::new(name);
        for op in ops {
            job.add_op(op)?;
        }
        Ok(job)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> ScopeHandle {
        self.scope
    }

    pub fn ops(&self) -> &[OperatorConfig] {
        &self.ops
    }

    pub fn op(&self, name: &str) -> Option<&OperatorConfig> {
        self.index.get(name).map(|&i| &self.ops[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<OperatorConfig> {
        self.ops
    }

    /// Serialize the job as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        let record = JobRecord {
            job_name: self.name.clone(),
            scope: self.scope,
            ops: self.ops.clone(),
        };
        serde_json::to_string_pretty(&record)
            .map_err(|e| Error::msg(format!("failed to serialize job: {e}")))
    }

    /// Parse a job previously written by [`JobGraph::to_json`].
    pub fn from_json(s: &str) -> Result<Self> {
        let record: JobRecord =
            serde_json::from_str(s).map_err(|e| Error::Decode(format!("invalid job JSON: {e}")))?;
        Ok(JobGraph::from_ops(record.job_name, record.ops)?.with_scope(record.scope))
    }
}

impl GraphRegistry for JobGraph {
    fn add_op(&mut self, config: OperatorConfig) -> Result<()> {
        if self.index.contains_key(&config.name) {
            return Err(Error::NameCollision { name: config.name });
        }
        self.index.insert(config.name.clone(), self.ops.len());
        self.ops.push(config);
        Ok(())
    }

    fn current_scope(&self) -> ScopeHandle {
        self.scope
    }
}
