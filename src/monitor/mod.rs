//! CPU Monitor: background load sampling that gates document dispatch.
//!
//! The monitor owns a sampling task that publishes the latest reading on a
//! `watch` channel. The executor holds a [`CpuSignal`] and waits for it to
//! clear before starting another document. In-flight work is never touched.

use std::time::Duration;

use sysinfo::System;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::types::JobConfig;

/// Source of system-wide CPU utilization samples, in percent.
pub trait CpuSampler: Send + 'static {
    fn sample(&mut self) -> f32;
}

/// Samples global CPU usage through `sysinfo`.
pub struct SysinfoSampler {
    system: System,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        // Usage is computed between refreshes, so prime the first one
        system.refresh_cpu_usage();
        Self { system }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuSampler for SysinfoSampler {
    fn sample(&mut self) -> f32 {
        self.system.refresh_cpu_usage();
        self.system.global_cpu_usage()
    }
}

/// Latest published sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CpuReading {
    /// System CPU utilization in percent
    pub utilization: f32,
    /// Utilization is at or above the limit
    pub throttled: bool,
}

impl CpuReading {
    fn idle() -> Self {
        Self {
            utilization: 0.0,
            throttled: false,
        }
    }
}

/// Read-only view of the monitor's readings.
///
/// Once the monitor stops, the signal reads as permanently clear.
#[derive(Debug, Clone)]
pub struct CpuSignal {
    rx: watch::Receiver<CpuReading>,
}

impl CpuSignal {
    pub fn current(&self) -> CpuReading {
        *self.rx.borrow()
    }

    /// Whether another document may be dispatched now.
    pub fn allows_work(&self) -> bool {
        !self.rx.borrow().throttled || self.rx.has_changed().is_err()
    }

    /// Wait for the next published reading. Returns `false` once the
    /// monitor has stopped.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Wait until utilization drops below the limit or the monitor stops.
    pub async fn wait_for_capacity(&mut self) {
        let _ = self.rx.wait_for(|reading| !reading.throttled).await;
    }
}

/// Background CPU sampler with explicit start/stop.
pub struct CpuMonitor {
    signal: CpuSignal,
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl CpuMonitor {
    /// Spawn the sampling task. Must be called within a tokio runtime.
    pub fn start<S: CpuSampler>(limit: f32, interval: Duration, mut sampler: S) -> Self {
        let (tx, rx) = watch::channel(CpuReading::idle());
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(limit, interval_ms = interval.as_millis() as u64, "CPU monitor started");

            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        let utilization = sampler.sample();
                        let throttled = utilization >= limit;
                        let was_throttled = tx.borrow().throttled;

                        if throttled && !was_throttled {
                            warn!(utilization, limit, "CPU above limit, pausing dispatch");
                        } else if !throttled && was_throttled {
                            info!(utilization, limit, "CPU below limit, resuming dispatch");
                        }

                        tx.send_replace(CpuReading { utilization, throttled });
                    }
                }
            }

            debug!("CPU monitor stopped");
        });

        Self {
            signal: CpuSignal { rx },
            stop_tx,
            task: Some(task),
        }
    }

    /// Monitor backed by `sysinfo`, using the run's limit and interval.
    pub fn from_config(config: &JobConfig) -> Self {
        Self::start(config.cpu_limit, config.cpu_interval(), SysinfoSampler::new())
    }

    /// A monitor whose signal never throttles.
    pub fn disabled() -> Self {
        let (_, rx) = watch::channel(CpuReading::idle());
        let (stop_tx, _) = watch::channel(false);
        Self {
            signal: CpuSignal { rx },
            stop_tx,
            task: None,
        }
    }

    pub fn signal(&self) -> CpuSignal {
        self.signal.clone()
    }

    /// Stop sampling and wait for the task to exit.
    pub async fn stop(&mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "CPU monitor task failed");
                }
            }
        }
    }
}

impl Drop for CpuMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays fixed samples, then repeats the last one.
    struct ScriptedSampler {
        samples: VecDeque<f32>,
        last: f32,
    }

    impl ScriptedSampler {
        fn new(samples: &[f32]) -> Self {
            Self {
                samples: samples.iter().copied().collect(),
                last: 0.0,
            }
        }
    }

    impl CpuSampler for ScriptedSampler {
        fn sample(&mut self) -> f32 {
            if let Some(next) = self.samples.pop_front() {
                self.last = next;
            }
            self.last
        }
    }

    const WAIT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn test_throttles_then_clears() {
        let mut monitor = CpuMonitor::start(
            85.0,
            Duration::from_millis(5),
            ScriptedSampler::new(&[95.0, 97.0, 40.0]),
        );
        let mut signal = monitor.signal();

        tokio::time::timeout(WAIT, async {
            while !signal.current().throttled {
                assert!(signal.changed().await);
            }
        })
        .await
        .unwrap();
        assert!(!signal.allows_work());

        tokio::time::timeout(WAIT, signal.wait_for_capacity())
            .await
            .unwrap();
        assert!(signal.allows_work());
        assert_eq!(signal.current().utilization, 40.0);

        monitor.stop().await;
    }

    #[tokio::test]
    async fn test_stop_releases_waiters() {
        let mut monitor =
            CpuMonitor::start(50.0, Duration::from_millis(5), ScriptedSampler::new(&[99.0]));
        let mut signal = monitor.signal();

        tokio::time::timeout(WAIT, async {
            while !signal.current().throttled {
                signal.changed().await;
            }
        })
        .await
        .unwrap();

        monitor.stop().await;
        assert!(signal.allows_work());
        tokio::time::timeout(WAIT, signal.wait_for_capacity())
            .await
            .unwrap();
        tokio::time::timeout(WAIT, async { while signal.changed().await {} })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_disabled_never_throttles() {
        let monitor = CpuMonitor::disabled();
        let mut signal = monitor.signal();
        assert!(signal.allows_work());
        tokio::time::timeout(WAIT, signal.wait_for_capacity())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_limit_is_inclusive() {
        let mut monitor =
            CpuMonitor::start(85.0, Duration::from_millis(5), ScriptedSampler::new(&[85.0]));
        let mut signal = monitor.signal();

        tokio::time::timeout(WAIT, async {
            while signal.current().utilization == 0.0 {
                signal.changed().await;
            }
        })
        .await
        .unwrap();
        assert!(signal.current().throttled);

        monitor.stop().await;
    }
}
