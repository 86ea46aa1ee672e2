//! cdagent build session engine
//!
//! Executes [`Builder`] trees: commands, filesystem steps and environment
//! exports, sequenced with fail-fast composites, cleanup children and
//! cancellation handlers. Output is captured in a [`ConsoleSink`] that masks
//! every registered secret.

pub mod builder;
pub mod config;
pub mod console;
pub mod env;
pub mod error;
pub mod obs;
pub mod result;
pub mod session;
pub mod telemetry;

pub use builder::{Builder, BuilderKind, Condition, ExecSpec};
pub use config::SessionConfig;
pub use console::{ConsoleSink, Redactor, MASK};
pub use env::{EnvValue, EnvironmentContext, SetOutcome};
pub use error::{BuildError, ConfigError};
pub use result::{BuildReport, JobResult, StepRecord, StepStatus};
pub use session::{BuildSession, CancelHandle, CONSOLE_PREFIX};
pub use telemetry::init_tracing;
