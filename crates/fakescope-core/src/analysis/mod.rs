//! Model-independent image analysis.

mod residual;

pub use residual::{ResidualAnalyzer, ResidualConfig, ResidualMetrics, RESIDUAL_KERNEL};
