//! # nvreport
//!
//! Reports NVIDIA GPU telemetry through NVML: driver version, device count,
//! and for every device its minor number, UUID, name, memory, per-process
//! memory attribution, utilization, power draw (current and averaged),
//! temperature, and fan speed.
//!
//! The run is strictly sequential and fail-fast: the first failing call is
//! printed and nothing after it is queried. The NVML session is an owned
//! value that is shut down on every exit path.
//!
//! ## Quick Start
//!
//! ```no_run
//! # #[cfg(feature = "nvidia")]
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use nvreport::{DeviceQuery, NvmlSession, SamplingMode, Session};
//!
//! let session = NvmlSession::init(SamplingMode::Lookback)?;
//! for i in 0..session.device_count()? {
//!     let gpu = session.device_by_index(i)?;
//!     println!("GPU {}: {} ({} C)", i, gpu.name()?, gpu.temperature()?);
//! }
//! session.shutdown()?;
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "nvidia"))]
//! # fn main() {}
//! ```
//!
//! ## Feature Flags
//!
//! - `nvidia` - NVML backend (requires the NVIDIA driver at runtime)
//! - `cli` - the `nvreport` command-line tool

pub mod config; // Configuration management with TOML persistence
pub mod error;
pub mod report; // Sequential fail-fast report driver
pub mod telemetry; // Session and device query abstraction

pub use config::{Config, OutputConfig, OutputFormat, ProcessConfig, SamplingConfig};
pub use error::{Error, Result};
pub use report::{DeviceReport, Report, ReportOptions};
pub use telemetry::{
    DeviceQuery, MemoryInfo, Operation, SamplingMode, Session, UtilizationRates,
};

#[cfg(feature = "nvidia")]
pub use telemetry::nvml::{NvidiaDevice, NvmlSession};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
