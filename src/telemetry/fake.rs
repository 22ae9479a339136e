//! Scripted in-memory session for tests
//!
//! Records every call in order so tests can assert on what the reporter asked
//! for, and fails whichever operation it was told to fail.

use crate::error::{Error, Result};
use crate::telemetry::{
    lookup_device, DeviceQuery, MemoryInfo, Operation, Session, UtilizationRates,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

/// Shared record of what a fake session was asked to do
#[derive(Debug, Default)]
pub struct CallLog {
    pub inits: usize,
    pub shutdowns: usize,
    pub calls: Vec<(Option<u32>, Operation)>,
    pub windows: Vec<(Operation, Duration)>,
    pub pids: Vec<(Operation, Vec<u32>)>,
}

impl CallLog {
    /// Operations issued against `device`
    pub fn device_calls(&self, device: u32) -> Vec<Operation> {
        self.calls
            .iter()
            .filter(|(d, _)| *d == Some(device))
            .map(|(_, op)| *op)
            .collect()
    }
}

/// Behavior of a fake session
#[derive(Debug, Clone)]
pub struct FakeScript {
    pub device_count: u32,
    pub fail_init: bool,
    /// `(device, op)`; `device` is `None` for session-level calls.
    /// `(Some(i), DeviceCount)` fails the count read while looking up device `i`
    pub failures: Vec<(Option<u32>, Operation)>,
}

impl FakeScript {
    pub fn with_devices(device_count: u32) -> Self {
        Self {
            device_count,
            fail_init: false,
            failures: Vec::new(),
        }
    }

    pub fn failing(mut self, device: Option<u32>, op: Operation) -> Self {
        self.failures.push((device, op));
        self
    }
}

pub struct FakeSession {
    script: FakeScript,
    log: Rc<RefCell<CallLog>>,
}

impl FakeSession {
    /// Initializer closure to hand to the reporter, plus the shared call log
    pub fn initializer(
        script: FakeScript,
    ) -> (impl FnOnce() -> Result<Self>, Rc<RefCell<CallLog>>) {
        let log = Rc::new(RefCell::new(CallLog::default()));
        let shared = Rc::clone(&log);
        let init = move || {
            shared.borrow_mut().inits += 1;
            if script.fail_init {
                return Err(Error::Init("driver not loaded".to_string()));
            }
            Ok(FakeSession { script, log: shared })
        };
        (init, log)
    }

    fn fails(&self, device: Option<u32>, op: Operation) -> bool {
        self.script.failures.contains(&(device, op))
    }

    fn record(&self, device: Option<u32>, op: Operation) -> Result<()> {
        self.log.borrow_mut().calls.push((device, op));
        if self.fails(device, op) {
            return Err(match device {
                Some(d) => Error::device_query(op, d, "injected failure"),
                None => Error::session_query(op, "injected failure"),
            });
        }
        Ok(())
    }
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        self.log.borrow_mut().shutdowns += 1;
    }
}

impl Session for FakeSession {
    type Device<'s> = FakeDevice<'s>;

    fn driver_version(&self) -> Result<String> {
        self.record(None, Operation::SystemDriverVersion)?;
        Ok("550.54.14".to_string())
    }

    fn device_count(&self) -> Result<u32> {
        self.record(None, Operation::DeviceCount)?;
        Ok(self.script.device_count)
    }

    fn device_by_index(&self, index: u32) -> Result<FakeDevice<'_>> {
        let count = if self.fails(Some(index), Operation::DeviceCount) {
            Err(Error::session_query(Operation::DeviceCount, "injected failure"))
        } else {
            Ok(self.script.device_count)
        };

        lookup_device(index, count, || {
            self.record(Some(index), Operation::DeviceHandleByIndex)?;
            Ok(FakeDevice {
                index,
                session: self,
            })
        })
    }

    fn shutdown(self) -> Result<()> {
        if self.fails(None, Operation::Shutdown) {
            return Err(Error::session_query(Operation::Shutdown, "injected failure"));
        }
        Ok(())
    }
}

pub struct FakeDevice<'s> {
    index: u32,
    session: &'s FakeSession,
}

impl FakeDevice<'_> {
    fn record(&self, op: Operation) -> Result<()> {
        self.session.record(Some(self.index), op)
    }

    fn record_window(&self, op: Operation, window: Duration) -> Result<()> {
        self.session.log.borrow_mut().windows.push((op, window));
        self.record(op)
    }

    fn record_pids(&self, op: Operation, pids: &[u32]) -> Result<()> {
        self.session.log.borrow_mut().pids.push((op, pids.to_vec()));
        self.record(op)
    }
}

impl DeviceQuery for FakeDevice<'_> {
    fn index(&self) -> u32 {
        self.index
    }

    fn minor_number(&self) -> Result<u32> {
        self.record(Operation::MinorNumber)?;
        Ok(self.index)
    }

    fn uuid(&self) -> Result<String> {
        self.record(Operation::Uuid)?;
        Ok(format!("GPU-0000000{}-fake", self.index))
    }

    fn name(&self) -> Result<String> {
        self.record(Operation::Name)?;
        Ok("Fake GPU".to_string())
    }

    fn memory_info(&self) -> Result<MemoryInfo> {
        self.record(Operation::MemoryInfo)?;
        Ok(MemoryInfo {
            total: 8_589_934_592,
            used: 1_073_741_824,
        })
    }

    fn graphics_memory_used(&self, pids: &[u32]) -> Result<u64> {
        self.record_pids(Operation::GraphicsMemoryUsed, pids)?;
        Ok(4096)
    }

    fn compute_memory_used(&self, pids: &[u32]) -> Result<u64> {
        self.record_pids(Operation::ComputeMemoryUsed, pids)?;
        Ok(8192)
    }

    fn utilization_rates(&self) -> Result<UtilizationRates> {
        self.record(Operation::UtilizationRates)?;
        Ok(UtilizationRates { gpu: 37, memory: 12 })
    }

    fn power_usage(&self) -> Result<u32> {
        self.record(Operation::PowerUsage)?;
        Ok(75_000)
    }

    fn average_power_usage(&self, window: Duration) -> Result<u32> {
        self.record_window(Operation::AveragePowerUsage, window)?;
        Ok(72_500)
    }

    fn average_gpu_utilization(&self, window: Duration) -> Result<u32> {
        self.record_window(Operation::AverageGpuUtilization, window)?;
        Ok(35)
    }

    fn temperature(&self) -> Result<u32> {
        self.record(Operation::Temperature)?;
        Ok(61)
    }

    fn fan_speed(&self) -> Result<u32> {
        self.record(Operation::FanSpeed)?;
        Ok(40)
    }
}
