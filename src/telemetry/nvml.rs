// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2024 NervoSys

//! NVIDIA telemetry backend via NVML
//!
//! Wraps `nvml_wrapper::Nvml` as a [`Session`]. NVML is shut down when the
//! session is dropped; [`NvmlSession::shutdown`] does it explicitly and
//! surfaces the result.

use crate::error::{Error, Result};
use crate::telemetry::{
    attributed_memory, average_samples, lookup_device, window_start_micros, DeviceQuery,
    MemoryInfo, Operation, SamplingMode, Session, UtilizationRates,
};

use log::{debug, info};
use nvml_wrapper::{
    enum_wrappers::device::{Sampling, TemperatureSensor},
    enums::device::{SampleValue, UsedGpuMemory},
    error::NvmlError,
    struct_wrappers::device::ProcessInfo,
    Device as NvmlDevice, Nvml,
};
use std::time::Duration;

/// Initialized NVML library
pub struct NvmlSession {
    nvml: Nvml,
    sampling: SamplingMode,
}

impl NvmlSession {
    /// Initialize NVML
    pub fn init(sampling: SamplingMode) -> Result<Self> {
        let nvml = Nvml::init()
            .map_err(|e| Error::Init(format!("Failed to initialize NVML: {}", e)))?;
        info!("NVML initialized (sampling mode: {})", sampling);
        Ok(Self { nvml, sampling })
    }
}

impl Session for NvmlSession {
    type Device<'s> = NvidiaDevice<'s>;

    fn driver_version(&self) -> Result<String> {
        self.nvml
            .sys_driver_version()
            .map_err(|e| Error::session_query(Operation::SystemDriverVersion, e))
    }

    fn device_count(&self) -> Result<u32> {
        self.nvml
            .device_count()
            .map_err(|e| Error::session_query(Operation::DeviceCount, e))
    }

    fn device_by_index(&self, index: u32) -> Result<NvidiaDevice<'_>> {
        let device = lookup_device(index, self.device_count(), || {
            self.nvml
                .device_by_index(index)
                .map_err(|e| Error::device_query(Operation::DeviceHandleByIndex, index, e))
        })?;
        debug!("Acquired NVML handle for device {}", index);

        Ok(NvidiaDevice {
            index,
            device,
            sampling: self.sampling,
        })
    }

    fn shutdown(self) -> Result<()> {
        self.nvml
            .shutdown()
            .map_err(|e| Error::session_query(Operation::Shutdown, e))?;
        info!("NVML shut down");
        Ok(())
    }
}

/// NVIDIA GPU borrowed from an [`NvmlSession`]
pub struct NvidiaDevice<'s> {
    index: u32,
    device: NvmlDevice<'s>,
    sampling: SamplingMode,
}

impl NvidiaDevice<'_> {
    fn query_err(&self, op: Operation) -> impl FnOnce(NvmlError) -> Error {
        let index = self.index;
        move |e| Error::device_query(op, index, e)
    }

    fn process_memory(
        &self,
        op: Operation,
        processes: std::result::Result<Vec<ProcessInfo>, NvmlError>,
        pids: &[u32],
    ) -> Result<u64> {
        let processes = processes.map_err(self.query_err(op))?;
        debug!(
            "Device {}: {} running process(es) for {}",
            self.index,
            processes.len(),
            op
        );

        Ok(attributed_memory(
            processes.into_iter().map(|p| {
                let used = match p.used_gpu_memory {
                    UsedGpuMemory::Used(bytes) => Some(bytes),
                    UsedGpuMemory::Unavailable => None,
                };
                (p.pid, used)
            }),
            pids,
        ))
    }

    /// Average the samples NVML recorded over `window`
    fn average_over(&self, op: Operation, sampling: Sampling, window: Duration) -> Result<u32> {
        if self.sampling == SamplingMode::Wait {
            debug!("Device {}: sampling {} for {:?}", self.index, op, window);
            std::thread::sleep(window);
        }

        let since = window_start_micros(chrono::Utc::now().timestamp_micros(), window);
        let samples =
            or_empty(self.device.samples(sampling, since)).map_err(self.query_err(op))?;

        Ok(average_samples(
            samples.into_iter().filter_map(|s| sample_value(s.value)),
        ))
    }
}

/// NVML reports an empty sample buffer as "not found"
fn or_empty<T>(
    samples: std::result::Result<Vec<T>, NvmlError>,
) -> std::result::Result<Vec<T>, NvmlError> {
    match samples {
        Err(NvmlError::NotFound) => Ok(Vec::new()),
        other => other,
    }
}

/// Non-negative sample value as an integer; negative readings are dropped
#[allow(unreachable_patterns)]
fn sample_value(value: SampleValue) -> Option<u64> {
    match value {
        SampleValue::U32(v) => Some(v.into()),
        SampleValue::U64(v) => Some(v),
        SampleValue::I64(v) => u64::try_from(v).ok(),
        SampleValue::F64(v) if v >= 0.0 => Some(v as u64),
        _ => None,
    }
}

impl DeviceQuery for NvidiaDevice<'_> {
    fn index(&self) -> u32 {
        self.index
    }

    #[cfg(target_os = "linux")]
    fn minor_number(&self) -> Result<u32> {
        self.device
            .minor_number()
            .map_err(self.query_err(Operation::MinorNumber))
    }

    #[cfg(not(target_os = "linux"))]
    fn minor_number(&self) -> Result<u32> {
        Err(Error::device_query(
            Operation::MinorNumber,
            self.index,
            "not supported on this platform",
        ))
    }

    fn uuid(&self) -> Result<String> {
        self.device.uuid().map_err(self.query_err(Operation::Uuid))
    }

    fn name(&self) -> Result<String> {
        self.device.name().map_err(self.query_err(Operation::Name))
    }

    fn memory_info(&self) -> Result<MemoryInfo> {
        let mem = self
            .device
            .memory_info()
            .map_err(self.query_err(Operation::MemoryInfo))?;

        Ok(MemoryInfo {
            total: mem.total,
            used: mem.used,
        })
    }

    fn graphics_memory_used(&self, pids: &[u32]) -> Result<u64> {
        self.process_memory(
            Operation::GraphicsMemoryUsed,
            self.device.running_graphics_processes(),
            pids,
        )
    }

    fn compute_memory_used(&self, pids: &[u32]) -> Result<u64> {
        self.process_memory(
            Operation::ComputeMemoryUsed,
            self.device.running_compute_processes(),
            pids,
        )
    }

    fn utilization_rates(&self) -> Result<UtilizationRates> {
        let util = self
            .device
            .utilization_rates()
            .map_err(self.query_err(Operation::UtilizationRates))?;

        Ok(UtilizationRates {
            gpu: util.gpu,
            memory: util.memory,
        })
    }

    fn power_usage(&self) -> Result<u32> {
        self.device
            .power_usage()
            .map_err(self.query_err(Operation::PowerUsage))
    }

    fn average_power_usage(&self, window: Duration) -> Result<u32> {
        self.average_over(Operation::AveragePowerUsage, Sampling::Power, window)
    }

    fn average_gpu_utilization(&self, window: Duration) -> Result<u32> {
        self.average_over(
            Operation::AverageGpuUtilization,
            Sampling::GpuUtilization,
            window,
        )
    }

    fn temperature(&self) -> Result<u32> {
        self.device
            .temperature(TemperatureSensor::Gpu)
            .map_err(self.query_err(Operation::Temperature))
    }

    fn fan_speed(&self) -> Result<u32> {
        self.device
            .fan_speed(0)
            .map_err(self.query_err(Operation::FanSpeed))
    }
}
