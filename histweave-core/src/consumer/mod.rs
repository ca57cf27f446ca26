//! Data consumers (strategies and models) and how their data is registered,
//! fetched and shared.
//!
//! - `Consumer`: owns its data requests, the declarations it was given and
//!   the assembler its tables land in.
//! - `DataRegistrar`: the plain registration seam that `FetchAndAttach`
//!   decorates with data-source resolution, fetching and storage.
//! - `propagate`: hands a parent's stored tables to a dependent by `Arc`.

pub mod attach;
pub mod propagate;
pub mod registration;

pub use attach::FetchAndAttach;
pub use propagate::propagate;
pub use registration::build_requests;

use crate::data::CanonicalAssembler;
use crate::domain::{DataDeclaration, DataKwargs, DataRequest};
use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Name and parameters a consumer was built with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
}

impl Signature {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// What a consumer is, fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConsumerKind {
    Strategy { signature: Signature },
    Model { signature: Signature },
}

impl ConsumerKind {
    pub fn signature(&self) -> &Signature {
        match self {
            ConsumerKind::Strategy { signature } | ConsumerKind::Model { signature } => signature,
        }
    }

    pub fn is_strategy(&self) -> bool {
        matches!(self, ConsumerKind::Strategy { .. })
    }

    pub fn is_model(&self) -> bool {
        matches!(self, ConsumerKind::Model { .. })
    }
}

/// BLAKE3 hex digest identifying a consumer's configuration and data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsumerFingerprint(pub String);

impl fmt::Display for ConsumerFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Plain data registration, without fetching.
pub trait DataRegistrar {
    /// Build and keep the requests for one declaration.
    fn register_data(
        &mut self,
        declaration: &DataDeclaration,
        kwargs: &DataKwargs,
    ) -> Result<Vec<Arc<DataRequest>>, PipelineError>;

    /// Remember the declaration exactly as the caller wrote it.
    fn record_signature(&mut self, declaration: &DataDeclaration);

    fn assembler_mut(&mut self) -> &mut CanonicalAssembler;
}

pub struct Consumer {
    name: String,
    kind: ConsumerKind,
    datas: Vec<Arc<DataRequest>>,
    data_signatures: Vec<DataDeclaration>,
    assembler: CanonicalAssembler,
}

impl Consumer {
    pub fn strategy(signature: Signature) -> Self {
        Self::with_kind(ConsumerKind::Strategy { signature })
    }

    pub fn model(signature: Signature) -> Self {
        Self::with_kind(ConsumerKind::Model { signature })
    }

    fn with_kind(kind: ConsumerKind) -> Self {
        Self {
            name: kind.signature().name.clone(),
            kind,
            datas: Vec::new(),
            data_signatures: Vec::new(),
            assembler: CanonicalAssembler::default(),
        }
    }

    /// Replace the (empty) table store, e.g. to use a non-default index.
    pub fn with_assembler(mut self, assembler: CanonicalAssembler) -> Self {
        self.assembler = assembler;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ConsumerKind {
        &self.kind
    }

    pub fn datas(&self) -> &[Arc<DataRequest>] {
        &self.datas
    }

    pub fn data_signatures(&self) -> &[DataDeclaration] {
        &self.data_signatures
    }

    pub fn assembler(&self) -> &CanonicalAssembler {
        &self.assembler
    }

    /// Reuse `parent`'s data: its requests are shared, not rebuilt, and its
    /// stored tables are propagated without a refetch.
    pub fn add_consumer_datas(&mut self, parent: &Consumer) {
        for data in &parent.datas {
            let key = data.key();
            if !self.datas.iter().any(|d| d.key() == key) {
                self.datas.push(Arc::clone(data));
            }
        }
        for signature in &parent.data_signatures {
            if !self.data_signatures.contains(signature) {
                self.data_signatures.push(signature.clone());
            }
        }
        let shared = propagate(&parent.assembler, &mut self.assembler, &parent.datas);
        tracing::debug!(
            parent = parent.name(),
            consumer = self.name(),
            requests = parent.datas.len(),
            tables = shared,
            "shared consumer data"
        );
    }

    /// Stable hash over the kind signature and the declared data.
    pub fn fingerprint(&self) -> ConsumerFingerprint {
        let canonical = serde_json::json!({
            "kind": &self.kind,
            "data_signatures": &self.data_signatures,
        });
        ConsumerFingerprint(blake3::hash(canonical.to_string().as_bytes()).to_hex().to_string())
    }
}

impl DataRegistrar for Consumer {
    fn register_data(
        &mut self,
        declaration: &DataDeclaration,
        kwargs: &DataKwargs,
    ) -> Result<Vec<Arc<DataRequest>>, PipelineError> {
        let requests: Vec<Arc<DataRequest>> = build_requests(declaration, kwargs)?
            .into_iter()
            .map(Arc::new)
            .collect();
        for request in &requests {
            let key = request.key();
            match self.datas.iter_mut().find(|d| d.key() == key) {
                Some(slot) => *slot = Arc::clone(request),
                None => self.datas.push(Arc::clone(request)),
            }
        }
        Ok(requests)
    }

    fn record_signature(&mut self, declaration: &DataDeclaration) {
        self.data_signatures.push(declaration.clone());
    }

    fn assembler_mut(&mut self) -> &mut CanonicalAssembler {
        &mut self.assembler
    }
}
