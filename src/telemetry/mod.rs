// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2024 NervoSys

//! Telemetry session abstraction
//!
//! A [`Session`] is the initialized state of a native GPU telemetry library. It is
//! an owned value: dropping it (or calling [`Session::shutdown`]) releases the
//! library. Devices are borrowed from the session, so a device handle cannot
//! outlive the session it came from.
//!
//! The [`DeviceQuery`] trait is the fixed set of per-device readings the
//! reporter prints. Every query either returns its reading or a
//! [`Error::Query`] naming the metric and the device.
//!
//! # Backends
//!
//! | Backend | Feature  | Requirements |
//! |---------|----------|--------------|
//! | NVML    | `nvidia` | libnvidia-ml.so / nvml.dll |

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[cfg(feature = "nvidia")]
pub mod nvml;

#[cfg(test)]
pub(crate) mod fake;

/// A named call against the telemetry library
///
/// Used to label errors and log lines with the call that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Initialize,
    SystemDriverVersion,
    DeviceCount,
    DeviceHandleByIndex,
    MinorNumber,
    Uuid,
    Name,
    MemoryInfo,
    GraphicsMemoryUsed,
    ComputeMemoryUsed,
    UtilizationRates,
    PowerUsage,
    AveragePowerUsage,
    AverageGpuUtilization,
    Temperature,
    FanSpeed,
    Shutdown,
}

impl Operation {
    /// Per-device metrics in the order the reporter reads them
    pub const DEVICE_METRICS: [Operation; 12] = [
        Operation::MinorNumber,
        Operation::Uuid,
        Operation::Name,
        Operation::MemoryInfo,
        Operation::GraphicsMemoryUsed,
        Operation::ComputeMemoryUsed,
        Operation::UtilizationRates,
        Operation::PowerUsage,
        Operation::AveragePowerUsage,
        Operation::AverageGpuUtilization,
        Operation::Temperature,
        Operation::FanSpeed,
    ];
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Initialize => "Initialize",
            Operation::SystemDriverVersion => "SystemDriverVersion",
            Operation::DeviceCount => "DeviceCount",
            Operation::DeviceHandleByIndex => "DeviceHandleByIndex",
            Operation::MinorNumber => "MinorNumber",
            Operation::Uuid => "UUID",
            Operation::Name => "Name",
            Operation::MemoryInfo => "MemoryInfo",
            Operation::GraphicsMemoryUsed => "GraphicsMemoryUsed",
            Operation::ComputeMemoryUsed => "ComputeMemoryUsed",
            Operation::UtilizationRates => "UtilizationRates",
            Operation::PowerUsage => "PowerUsage",
            Operation::AveragePowerUsage => "AveragePowerUsage",
            Operation::AverageGpuUtilization => "AverageGPUUtilization",
            Operation::Temperature => "Temperature",
            Operation::FanSpeed => "FanSpeed",
            Operation::Shutdown => "Shutdown",
        };
        f.write_str(name)
    }
}

/// How the average metrics collect their samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum SamplingMode {
    /// Block for the whole window, then average the samples taken during it
    #[default]
    Wait,
    /// Average whatever the library already buffered for the last window
    Lookback,
}

impl fmt::Display for SamplingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplingMode::Wait => write!(f, "wait"),
            SamplingMode::Lookback => write!(f, "lookback"),
        }
    }
}

/// Device memory in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryInfo {
    pub total: u64,
    pub used: u64,
}

/// Utilization percentages (0-100) over the library's last sample period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtilizationRates {
    pub gpu: u32,
    pub memory: u32,
}

/// Initialized telemetry library
pub trait Session {
    /// Device handle borrowed from this session
    type Device<'s>: DeviceQuery
    where
        Self: 's;

    /// Installed driver version
    fn driver_version(&self) -> Result<String>;

    /// Number of enumerable devices
    fn device_count(&self) -> Result<u32>;

    /// Handle for the device at `index`
    ///
    /// Fails with [`Error::InvalidIndex`] when `index >= device_count()`.
    fn device_by_index(&self, index: u32) -> Result<Self::Device<'_>>;

    /// Release the library, reporting any failure to do so
    fn shutdown(self) -> Result<()>
    where
        Self: Sized;
}

/// Point-in-time readings from one device
pub trait DeviceQuery {
    /// Enumeration index of this device
    fn index(&self) -> u32;

    /// Device minor number (`/dev/nvidia<minor>`)
    fn minor_number(&self) -> Result<u32>;

    fn uuid(&self) -> Result<String>;

    fn name(&self) -> Result<String>;

    /// Total and used framebuffer memory
    fn memory_info(&self) -> Result<MemoryInfo>;

    /// Memory used by running graphics processes whose pid is in `pids`
    fn graphics_memory_used(&self, pids: &[u32]) -> Result<u64>;

    /// Memory used by running compute processes whose pid is in `pids`
    fn compute_memory_used(&self, pids: &[u32]) -> Result<u64>;

    fn utilization_rates(&self) -> Result<UtilizationRates>;

    /// Current power draw in milliwatts
    fn power_usage(&self) -> Result<u32>;

    /// Mean power draw in milliwatts over `window`
    fn average_power_usage(&self, window: Duration) -> Result<u32>;

    /// Mean GPU utilization percentage over `window`
    fn average_gpu_utilization(&self, window: Duration) -> Result<u32>;

    /// GPU core temperature in Celsius
    fn temperature(&self) -> Result<u32>;

    /// Fan speed as a percentage of maximum
    fn fan_speed(&self) -> Result<u32>;
}

/// Validate a user-supplied device index against the device count
pub fn checked_index(index: i64, count: u32) -> Result<u32> {
    match u32::try_from(index) {
        Ok(i) if i < count => Ok(i),
        _ => Err(Error::InvalidIndex { index, count }),
    }
}

/// Look up the device at `index` once `count` says it exists
///
/// A failure to read the count is reported as a failed handle lookup for
/// `index`.
pub fn lookup_device<T, F>(index: u32, count: Result<u32>, lookup: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    let count = count.map_err(|e| {
        let reason = match e {
            Error::Query { reason, .. } => reason,
            other => other.to_string(),
        };
        Error::device_query(Operation::DeviceHandleByIndex, index, reason)
    })?;

    if index >= count {
        return Err(Error::InvalidIndex {
            index: index.into(),
            count,
        });
    }
    lookup()
}

/// Sum the memory of processes whose pid is in `pids`
///
/// Each item is `(pid, used_bytes)`; `None` means the library could not report
/// usage for that process and counts as zero. An empty `pids` selects every
/// process.
pub fn attributed_memory<I>(processes: I, pids: &[u32]) -> u64
where
    I: IntoIterator<Item = (u32, Option<u64>)>,
{
    processes
        .into_iter()
        .filter(|(pid, _)| pids.is_empty() || pids.contains(pid))
        .filter_map(|(_, used)| used)
        .sum()
}

/// Integer mean of a set of samples, 0 when there are none
pub fn average_samples<I>(samples: I) -> u32
where
    I: IntoIterator<Item = u64>,
{
    let (sum, count) = samples
        .into_iter()
        .fold((0u128, 0u128), |(sum, count), v| (sum + v as u128, count + 1));
    if count == 0 {
        0
    } else {
        u32::try_from(sum / count).unwrap_or(u32::MAX)
    }
}

/// Timestamp (microseconds since the epoch) marking the start of a window
/// that ends at `now_micros`
pub fn window_start_micros(now_micros: i64, window: Duration) -> u64 {
    let window_micros = i64::try_from(window.as_micros()).unwrap_or(i64::MAX);
    u64::try_from(now_micros.saturating_sub(window_micros)).unwrap_or(0)
}
