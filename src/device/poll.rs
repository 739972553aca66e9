//! Poll loop.
//!
//! One tick services the network for a bounded number of iterations,
//! routes the events it produced, and then either detects the ready
//! transition or flushes the pending update queue. [`PollLoop`] repeats
//! ticks on a dedicated thread at the configured interval until the device
//! goes away or the loop is stopped.
//!
//! # Rate Limiting
//!
//! The loop sleeps for whatever remains of the interval after a tick, so a
//! slow tick shortens the following sleep instead of accumulating drift.

use super::DeviceCore;
use crate::network::{PROP_HOST, PROP_INTERFACE, PROP_NAME, PROP_PORT};
use crate::sync::lock;
use crate::types::{DeviceReport, Direction, PropertyValue};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Whether the loop should keep ticking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Stopped,
}

impl DeviceCore {
    /// Run one poll tick
    pub(crate) fn tick(&self) -> TickOutcome {
        let mut reports = Vec::new();
        {
            let mut guard = lock(&self.state);
            let state = &mut *guard;
            if state.torn_down {
                return TickOutcome::Stopped;
            }
            let Some(network) = state.network.as_deref_mut() else {
                return TickOutcome::Stopped;
            };

            for _ in 0..self.config.poll_budget {
                if network.poll(Duration::ZERO) == 0 {
                    break;
                }
            }

            for event in self.events.try_iter() {
                state.route_event(event);
            }

            let Some(network) = state.network.as_deref_mut() else {
                return TickOutcome::Stopped;
            };
            if !state.ready {
                if network.is_ready() {
                    state.ready = true;
                    let name = network
                        .property(PROP_NAME)
                        .and_then(|v| v.as_str().map(str::to_string))
                        .unwrap_or_else(|| self.name.clone());
                    tracing::info!("Joining mapping network as '{}'", name);
                    reports.push(DeviceReport::Name(name));
                    if let Some(iface) = network.property(PROP_INTERFACE) {
                        let iface = iface.as_str().unwrap_or_default().to_string();
                        reports.push(DeviceReport::Interface(iface));
                    }
                    if let Some(host) = network.property(PROP_HOST) {
                        let host = host.as_str().unwrap_or_default().to_string();
                        reports.push(DeviceReport::Address(host));
                    }
                    if let Some(PropertyValue::Int(port)) = network.property(PROP_PORT) {
                        if let Some(port) = port.first().and_then(|p| u16::try_from(*p).ok()) {
                            reports.push(DeviceReport::Port(port));
                        }
                    }
                    let inputs = network.num_signals(Direction::In);
                    let outputs = network.num_signals(Direction::Out);
                    reports.push(DeviceReport::NumInputs(inputs));
                    reports.push(DeviceReport::NumOutputs(outputs));
                    if inputs + outputs == 0 {
                        tracing::info!("Waiting for inputs and outputs...");
                    }
                }
            } else if state.queue.is_pending() {
                state.queue.flush(network);
            }
        }

        // reports leave the device outside its lock
        for report in reports {
            self.report(report);
        }
        TickOutcome::Continue
    }
}

/// Periodic driver of one device
pub struct PollLoop {
    device: Weak<DeviceCore>,
    running: Arc<AtomicBool>,
    interval: Duration,
    last_tick: Instant,
}

impl PollLoop {
    pub(crate) fn new(device: Weak<DeviceCore>, running: Arc<AtomicBool>, interval: Duration) -> Self {
        Self {
            device,
            running,
            interval,
            last_tick: Instant::now(),
        }
    }

    /// Tick until stopped or the device is dropped
    pub fn run(&mut self) {
        tracing::debug!("poll loop started");

        while self.running.load(Ordering::SeqCst) {
            let Some(device) = self.device.upgrade() else {
                break;
            };
            let outcome = device.tick();
            drop(device);
            if outcome == TickOutcome::Stopped {
                break;
            }
            self.rate_limit();
        }

        self.running.store(false, Ordering::SeqCst);
        tracing::debug!("poll loop stopped");
    }

    fn rate_limit(&mut self) {
        if self.interval.is_zero() {
            std::thread::yield_now();
            return;
        }

        let elapsed = self.last_tick.elapsed();
        if elapsed < self.interval {
            std::thread::sleep(self.interval - elapsed);
        }
        self.last_tick = Instant::now();
    }
}

/// Handle to a running [`PollLoop`] thread. Dropping it stops the loop.
pub struct PollHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl PollHandle {
    pub(crate) fn spawn(device: Weak<DeviceCore>, interval: Duration) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let mut poll_loop = PollLoop::new(device, running.clone(), interval);
        let thread = std::thread::Builder::new()
            .name("mapscope-poll".to_string())
            .spawn(move || poll_loop.run())?;
        Ok(Self {
            running,
            thread: Some(thread),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the loop and wait for its thread
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("poll thread panicked");
            }
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
