//! Resource-based slot supply
//!
//! Instead of a fixed concurrency cap, this supplier throttles slot issuance
//! toward target CPU and memory utilization. Two PID controllers (one per
//! resource) turn the gap between target and measured usage into an output
//! signal; a slot is only granted while both outputs clear their thresholds
//! and memory is not already past its target. A guaranteed minimum keeps the
//! worker from starving when the host is busy, and a ramp throttle spaces out
//! grants so utilization can catch up with already-admitted work.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use sysinfo::{MemoryRefreshKind, RefreshKind, System};
use tracing::warn;

use super::supplier::{
    SlotError, SlotKind, SlotPermit, SlotReleaseReason, SlotReservationContext, SlotSupplier,
};

/// Tuning for the PID controllers steering slot issuance.
#[derive(Debug, Clone)]
pub struct ResourceBasedControllerOptions {
    /// Target fraction of total memory in use, 0.0..=1.0
    pub target_memory_usage: f64,
    /// Target fraction of total CPU in use, 0.0..=1.0
    pub target_cpu_usage: f64,

    pub memory_p_gain: f64,
    pub memory_i_gain: f64,
    pub memory_d_gain: f64,
    /// Minimum memory controller output required to grant a slot
    pub memory_output_threshold: f64,

    pub cpu_p_gain: f64,
    pub cpu_i_gain: f64,
    pub cpu_d_gain: f64,
    /// Minimum CPU controller output required to grant a slot
    pub cpu_output_threshold: f64,
}

impl ResourceBasedControllerOptions {
    pub fn new(target_memory_usage: f64, target_cpu_usage: f64) -> Self {
        Self {
            target_memory_usage,
            target_cpu_usage,
            memory_p_gain: 5.0,
            memory_i_gain: 0.0,
            memory_d_gain: 1.0,
            memory_output_threshold: 0.25,
            cpu_p_gain: 5.0,
            cpu_i_gain: 0.0,
            cpu_d_gain: 1.0,
            cpu_output_threshold: 0.05,
        }
    }
}

/// Per-kind bounds on a resource-based supplier.
#[derive(Debug, Clone)]
pub struct ResourceBasedSlotOptions {
    /// Slots granted unconditionally, regardless of resource pressure
    pub minimum_slots: usize,
    /// Hard cap on outstanding slots
    pub maximum_slots: usize,
    /// Minimum spacing between grants above the minimum, letting utilization
    /// reflect already-admitted work before the next decision
    pub ramp_throttle: Duration,
}

/// Live host utilization readings.
pub trait SystemResourceInfo: Send + Sync {
    /// Fraction of total memory in use, 0.0..=1.0
    fn used_memory_fraction(&self) -> f64;

    /// Fraction of total CPU in use, 0.0..=1.0
    fn used_cpu_fraction(&self) -> f64;
}

/// Host readings via `sysinfo`.
pub struct RealSystemResourceInfo {
    system: Mutex<System>,
}

impl Default for RealSystemResourceInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl RealSystemResourceInfo {
    pub fn new() -> Self {
        let system = System::new_with_specifics(
            RefreshKind::new()
                .with_memory(MemoryRefreshKind::everything())
                .with_cpu(sysinfo::CpuRefreshKind::everything()),
        );
        Self {
            system: Mutex::new(system),
        }
    }
}

impl SystemResourceInfo for RealSystemResourceInfo {
    fn used_memory_fraction(&self) -> f64 {
        let mut system = self.system.lock();
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            return 0.0;
        }
        system.used_memory() as f64 / total as f64
    }

    fn used_cpu_fraction(&self) -> f64 {
        let mut system = self.system.lock();
        system.refresh_cpu_usage();
        f64::from(system.global_cpu_usage()) / 100.0
    }
}

struct Pid {
    p_gain: f64,
    i_gain: f64,
    d_gain: f64,
    setpoint: f64,
    integral: f64,
    last_error: Option<f64>,
    last_sample: Option<Instant>,
}

impl Pid {
    fn new(setpoint: f64, p_gain: f64, i_gain: f64, d_gain: f64) -> Self {
        Self {
            p_gain,
            i_gain,
            d_gain,
            setpoint,
            integral: 0.0,
            last_error: None,
            last_sample: None,
        }
    }

    fn update(&mut self, measured: f64, now: Instant) -> f64 {
        let error = self.setpoint - measured;
        let dt = self
            .last_sample
            .map(|t| now.duration_since(t).as_secs_f64())
            .unwrap_or(0.0);
        if dt > 0.0 {
            self.integral += error * dt;
        }
        let derivative = match self.last_error {
            Some(last) if dt > 0.0 => (error - last) / dt,
            _ => 0.0,
        };
        self.last_error = Some(error);
        self.last_sample = Some(now);
        self.p_gain * error + self.i_gain * self.integral + self.d_gain * derivative
    }
}

/// Shared grant decision for all slot kinds on one worker.
pub struct ResourceBasedController {
    options: ResourceBasedControllerOptions,
    info: Box<dyn SystemResourceInfo>,
    memory_pid: Mutex<Pid>,
    cpu_pid: Mutex<Pid>,
}

impl ResourceBasedController {
    pub fn new(options: ResourceBasedControllerOptions, info: Box<dyn SystemResourceInfo>) -> Self {
        let memory_pid = Mutex::new(Pid::new(
            options.target_memory_usage,
            options.memory_p_gain,
            options.memory_i_gain,
            options.memory_d_gain,
        ));
        let cpu_pid = Mutex::new(Pid::new(
            options.target_cpu_usage,
            options.cpu_p_gain,
            options.cpu_i_gain,
            options.cpu_d_gain,
        ));
        Self {
            options,
            info,
            memory_pid,
            cpu_pid,
        }
    }

    /// Host readings via `sysinfo`.
    pub fn new_with_sysinfo(options: ResourceBasedControllerOptions) -> Self {
        Self::new(options, Box::new(RealSystemResourceInfo::new()))
    }

    /// Whether resource pressure currently allows granting one more slot.
    pub fn can_grant(&self) -> bool {
        let now = Instant::now();
        let memory_used = self.info.used_memory_fraction();
        let cpu_used = self.info.used_cpu_fraction();

        if memory_used >= self.options.target_memory_usage {
            warn!(
                memory_used,
                target = self.options.target_memory_usage,
                "memory usage at or above target, withholding slots"
            );
            return false;
        }

        let memory_output = self.memory_pid.lock().update(memory_used, now);
        let cpu_output = self.cpu_pid.lock().update(cpu_used, now);
        memory_output > self.options.memory_output_threshold
            && cpu_output > self.options.cpu_output_threshold
    }
}

/// Slot supplier throttled by host resource utilization.
pub struct ResourceBasedSlotSupplier {
    kind: SlotKind,
    options: ResourceBasedSlotOptions,
    controller: std::sync::Arc<ResourceBasedController>,
    outstanding: AtomicUsize,
    last_grant: Mutex<Option<Instant>>,
}

impl ResourceBasedSlotSupplier {
    pub fn new(
        kind: SlotKind,
        options: ResourceBasedSlotOptions,
        controller: std::sync::Arc<ResourceBasedController>,
    ) -> Self {
        Self {
            kind,
            options,
            controller,
            outstanding: AtomicUsize::new(0),
            last_grant: Mutex::new(None),
        }
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Reserve one slot if bounds, ramp spacing and resource pressure allow.
    fn try_grant(&self) -> Option<SlotPermit> {
        loop {
            let current = self.outstanding.load(Ordering::Acquire);
            if current >= self.options.maximum_slots {
                return None;
            }
            if current >= self.options.minimum_slots {
                let throttled = self
                    .last_grant
                    .lock()
                    .is_some_and(|t| t.elapsed() < self.options.ramp_throttle);
                if throttled || !self.controller.can_grant() {
                    return None;
                }
            }
            if self
                .outstanding
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                *self.last_grant.lock() = Some(Instant::now());
                return Some(SlotPermit::new(self.kind, None));
            }
        }
    }
}

#[async_trait]
impl SlotSupplier for ResourceBasedSlotSupplier {
    async fn reserve_slot(&self, _ctx: &SlotReservationContext) -> Result<SlotPermit, SlotError> {
        loop {
            if let Some(permit) = self.try_grant() {
                return Ok(permit);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn try_reserve_slot(&self, _ctx: &SlotReservationContext) -> Option<SlotPermit> {
        self.try_grant()
    }

    fn release_slot(&self, permit: SlotPermit, _reason: SlotReleaseReason) {
        drop(permit);
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}
