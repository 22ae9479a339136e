//! Sequential GPU telemetry report
//!
//! [`run`] initializes a [`Session`], reads the driver version and device
//! count, then reads every device's metrics in a fixed order. The first error
//! from any step is printed and ends the run; nothing after it is queried.
//! The session is shut down on every path once it exists.
//!
//! # Examples
//!
//! ```no_run
//! # #[cfg(feature = "nvidia")]
//! # fn main() -> nvreport::Result<()> {
//! use nvreport::{report, Config, NvmlSession, ReportOptions};
//!
//! let config = Config::default();
//! let options = ReportOptions::from(&config);
//! let mut stdout = std::io::stdout().lock();
//! report::run(|| NvmlSession::init(config.sampling.mode), &options, &mut stdout)?;
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "nvidia"))]
//! # fn main() {}
//! ```

use crate::config::{Config, OutputFormat};
use crate::error::{Error, Result};
use crate::telemetry::{checked_index, DeviceQuery, Operation, Session};
use log::{debug, info, warn};
use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::time::{Duration, Instant};

/// What to report and how
#[derive(Debug, Clone, PartialEq)]
pub struct ReportOptions {
    /// Window for the two averaged metrics
    pub window: Duration,
    pub graphics_pids: Vec<u32>,
    pub compute_pids: Vec<u32>,
    /// Report only this device; validated against the device count
    pub device: Option<i64>,
    pub format: OutputFormat,
}

impl From<&Config> for ReportOptions {
    fn from(config: &Config) -> Self {
        Self {
            window: config.sampling.window(),
            graphics_pids: config.processes.graphics_pids.clone(),
            compute_pids: config.processes.compute_pids.clone(),
            device: None,
            format: config.output.format,
        }
    }
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// Result of a complete run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    /// Time spent initializing the session, in microseconds
    pub init_micros: u64,
    pub driver_version: String,
    pub device_count: u32,
    /// Window used for the averaged metrics, in seconds
    pub window_secs: u64,
    pub devices: Vec<DeviceReport>,
}

/// Readings for one device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceReport {
    pub index: u32,
    pub minor_number: u32,
    pub uuid: String,
    pub name: String,
    pub memory_total: u64,
    pub memory_used: u64,
    pub graphics_memory_used: u64,
    pub compute_memory_used: u64,
    pub utilization_gpu: u32,
    pub utilization_memory: u32,
    /// Milliwatts
    pub power_draw: u32,
    /// Milliwatts
    pub average_power_draw: u32,
    pub average_utilization_gpu: u32,
    /// Celsius
    pub temperature: u32,
    /// Percent
    pub fan_speed: u32,
}

/// Initialize a session with `initialize` and write the full report to `out`
///
/// Returns the first error encountered after printing it to `out`.
pub fn run<S, F, W>(initialize: F, options: &ReportOptions, out: &mut W) -> Result<Report>
where
    S: Session,
    F: FnOnce() -> Result<S>,
    W: Write,
{
    let mut reporter = Reporter::new(options, out);

    let start = Instant::now();
    let session = initialize().map_err(|e| reporter.print_error(e))?;
    let init_time = start.elapsed();
    info!("Session initialized in {:?}", init_time);

    let outcome = reporter
        .report(&session, init_time)
        .map_err(|e| reporter.print_error(e));

    if let Err(e) = session.shutdown() {
        warn!("Shutdown failed: {}", e);
    }

    let report = outcome?;
    if options.format == OutputFormat::Json {
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;
        writeln!(reporter.out, "{}", json)?;
    }
    Ok(report)
}

/// Line-oriented text for a failure, naming the call that produced it
pub fn error_line(err: &Error) -> String {
    match err {
        Error::Query {
            op: Operation::DeviceHandleByIndex,
            reason,
            ..
        } => format!("\tDeviceHandleByIndex() error: {}", reason),
        Error::InvalidIndex { .. } => format!("\tDeviceHandleByIndex() error: {}", err),
        Error::Query {
            op,
            device: Some(_),
            reason,
        } => format!("\tdev.{}() error: {}", op, reason),
        Error::Query {
            op,
            device: None,
            reason,
        } => format!("{}() error: {}", op, reason),
        other => other.to_string(),
    }
}

struct Reporter<'a, W: Write> {
    options: &'a ReportOptions,
    out: &'a mut W,
}

impl<'a, W: Write> Reporter<'a, W> {
    fn new(options: &'a ReportOptions, out: &'a mut W) -> Self {
        Self { options, out }
    }

    fn line(&mut self, args: fmt::Arguments<'_>) -> Result<()> {
        if self.options.format == OutputFormat::Text {
            self.out.write_fmt(args)?;
            self.out.write_all(b"\n")?;
        }
        Ok(())
    }

    /// Print `err` and hand it back for propagation
    fn print_error(&mut self, err: Error) -> Error {
        match err.operation() {
            Some(op) => info!("Run halted at {}(): {}", op, err),
            None => info!("Run halted: {}", err),
        }
        if let Err(io) = writeln!(self.out, "{}", error_line(&err)) {
            warn!("Failed to write error line: {}", io);
        }
        err
    }

    fn report<S: Session>(&mut self, session: &S, init_time: Duration) -> Result<Report> {
        self.line(format_args!("Initialize() took {:?}", init_time))?;

        let driver_version = session.driver_version()?;
        self.line(format_args!("SystemDriverVersion(): {}", driver_version))?;

        let device_count = session.device_count()?;
        self.line(format_args!("DeviceCount(): {}", device_count))?;

        let indices = match self.options.device {
            Some(raw) => {
                let index = checked_index(raw, device_count)?;
                index..index + 1
            }
            None => 0..device_count,
        };

        let mut devices = Vec::with_capacity(indices.len());
        for index in indices {
            let device = session.device_by_index(index)?;
            devices.push(self.report_device(&device)?);
        }

        Ok(Report {
            init_micros: u64::try_from(init_time.as_micros()).unwrap_or(u64::MAX),
            driver_version,
            device_count,
            window_secs: self.options.window.as_secs(),
            devices,
        })
    }

    fn report_device<D: DeviceQuery>(&mut self, dev: &D) -> Result<DeviceReport> {
        let window = self.options.window;
        let window_secs = window.as_secs();
        debug!("Reading metrics for device {}", dev.index());

        let minor_number = dev.minor_number()?;
        self.line(format_args!("\tminorNumber: {}", minor_number))?;

        let uuid = dev.uuid()?;
        self.line(format_args!("\tuuid: {}", uuid))?;

        let name = dev.name()?;
        self.line(format_args!("\tname: {}", name))?;

        let memory = dev.memory_info()?;
        self.line(format_args!(
            "\tmemory.total: {}, memory.used: {}",
            memory.total, memory.used
        ))?;

        let graphics_memory_used = dev.graphics_memory_used(&self.options.graphics_pids)?;
        self.line(format_args!("\tgraphics.memory.used: {}", graphics_memory_used))?;

        let compute_memory_used = dev.compute_memory_used(&self.options.compute_pids)?;
        self.line(format_args!("\tcompute.memory.used: {}", compute_memory_used))?;

        let utilization = dev.utilization_rates()?;
        self.line(format_args!(
            "\tutilization.gpu: {}, utilization.memory: {}",
            utilization.gpu, utilization.memory
        ))?;

        let power_draw = dev.power_usage()?;
        self.line(format_args!("\tpower.draw: {}", power_draw))?;

        let average_power_draw = dev.average_power_usage(window)?;
        self.line(format_args!(
            "\taverage power.draw for last {}s: {}",
            window_secs, average_power_draw
        ))?;

        let average_utilization_gpu = dev.average_gpu_utilization(window)?;
        self.line(format_args!(
            "\taverage utilization.gpu for last {}s: {}",
            window_secs, average_utilization_gpu
        ))?;

        let temperature = dev.temperature()?;
        self.line(format_args!("\ttemperature.gpu: {} C", temperature))?;

        let fan_speed = dev.fan_speed()?;
        self.line(format_args!("\tfan.speed: {}%", fan_speed))?;
        self.line(format_args!(""))?;

        Ok(DeviceReport {
            index: dev.index(),
            minor_number,
            uuid,
            name,
            memory_total: memory.total,
            memory_used: memory.used,
            graphics_memory_used,
            compute_memory_used,
            utilization_gpu: utilization.gpu,
            utilization_memory: utilization.memory,
            power_draw,
            average_power_draw,
            average_utilization_gpu,
            temperature,
            fan_speed,
        })
    }
}
