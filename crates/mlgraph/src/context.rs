//! Execution contexts: device/power configuration plus the kernel backend
//! every `compute` call on the context is routed through.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::KernelBackend;
use crate::builder::GraphBuilder;
use crate::error::{GraphError, Result};
use crate::executor::{self, ComputeResult};
use crate::graph::Graph;

/// Device class a context targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeviceType {
    #[default]
    Cpu,
    Gpu,
    Npu,
}

/// Power/performance preference hint carried by the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PowerPreference {
    #[default]
    Default,
    HighPerformance,
    LowPower,
}

/// Configuration for [`Context::create`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ContextOptions {
    pub device_type: DeviceType,
    pub power_preference: PowerPreference,
}

/// Configured entry point for building and executing graphs.
///
/// A context pairs the requested device configuration with the kernel
/// collaborator that evaluates compiled nodes. Contexts are cheap to share;
/// the backend is held behind an `Arc`.
pub struct Context {
    options: ContextOptions,
    backend: Arc<dyn KernelBackend>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("options", &self.options)
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl Context {
    /// Creates a context over the given kernel collaborator.
    ///
    /// Fails with [`GraphError::ContextCreationFailed`] when the backend does
    /// not serve the requested device type.
    pub async fn create(options: ContextOptions, backend: Arc<dyn KernelBackend>) -> Result<Self> {
        if !backend.supports(options.device_type) {
            return Err(GraphError::ContextCreationFailed(format!(
                "backend `{}` does not support {:?}",
                backend.name(),
                options.device_type
            )));
        }
        debug!(
            backend = backend.name(),
            device = ?options.device_type,
            power = ?options.power_preference,
            "context created"
        );
        Ok(Self { options, backend })
    }

    pub fn device_type(&self) -> DeviceType {
        self.options.device_type
    }

    pub fn power_preference(&self) -> PowerPreference {
        self.options.power_preference
    }

    /// Starts a fresh builder bound to this context's configuration.
    pub fn graph_builder(&self) -> GraphBuilder {
        GraphBuilder::new()
    }

    /// Executes a compiled graph against named input and output buffers.
    ///
    /// The binding maps are consumed and echoed back populated; see
    /// [`ComputeResult`]. All bindings are validated before the backend sees
    /// a single node.
    pub async fn compute(
        &self,
        graph: &Graph,
        inputs: HashMap<String, Vec<u8>>,
        outputs: HashMap<String, Vec<u8>>,
    ) -> Result<ComputeResult> {
        executor::compute(graph, inputs, outputs, self.backend.as_ref())
    }
}
