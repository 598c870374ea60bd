//! Reference CPU kernel backend.
//!
//! [`CpuBackend`] implements a useful subset of the operator catalog with
//! straightforward scalar kernels, precise enough to validate graphs end to
//! end. Convolution, pooling, normalization, and recurrent operators report
//! [`Unimplemented`]; this backend exists for correctness, not coverage or
//! speed.
//!
//! [`Unimplemented`]: mlgraph::BackendError::Unimplemented

mod cpu;

pub use cpu::CpuBackend;
