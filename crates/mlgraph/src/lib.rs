//! Computation-graph core for neural-network inference.
//!
//! The crate is organized around four stages:
//!
//! 1. **Operands** ([`operand`]): typed handles carrying a dtype/shape
//!    contract fixed at creation.
//! 2. **Building** ([`builder`]): a mutable [`GraphBuilder`] with one method
//!    per catalog operator; every method validates and infers eagerly, so a
//!    failed call appends nothing.
//! 3. **Compilation** ([`graph`]): [`GraphBuilder::build`] freezes the
//!    reachable subgraph into an immutable, topologically ordered [`Graph`].
//! 4. **Execution** ([`context`], [`executor`]): a [`Context`] binds named
//!    byte buffers to a graph and drives a [`KernelBackend`] collaborator
//!    through the compiled order.
//!
//! Numeric kernels never live here; they are reached through the
//! [`KernelBackend`] trait, and a context refuses to be created over a
//! backend that cannot serve its device type.
//!
//! ```no_run
//! # async fn demo() -> Result<(), mlgraph::GraphError> {
//! # let backend: std::sync::Arc<dyn mlgraph::KernelBackend> = unimplemented!();
//! use mlgraph::{Context, ContextOptions, DataType, OperandDescriptor};
//!
//! let context = Context::create(ContextOptions::default(), backend).await?;
//! let mut builder = context.graph_builder();
//! let x = builder.input("x", OperandDescriptor::new(DataType::F32, vec![2, 3]))?;
//! let y = builder.relu(&x)?;
//! let graph = builder.build([("y", y)]).await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod builder;
pub mod context;
pub mod error;
pub mod executor;
pub mod graph;
pub mod infer;
pub mod operand;
pub mod ops;

pub use backend::{BackendError, BackendResult, KernelBackend, TensorValue};
pub use builder::{GraphBuilder, GruCellOperands, GruOperands, LstmCellOperands, LstmOperands};
pub use context::{Context, ContextOptions, DeviceType, PowerPreference};
pub use error::{GraphError, Result};
pub use executor::ComputeResult;
pub use graph::Graph;
pub use operand::{DataType, Operand, OperandDescriptor, OperandId, Shape};
