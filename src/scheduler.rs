// Heartbeat timer
//
// One tokio task drives `Bridge::tick` at the configured period. The tick
// itself blocks on the link, so it runs on the blocking pool. The timer
// stops itself when a tick has nothing to do and is started again by
// commands, connect events and handler outboxes.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::bridge::Bridge;

/// Start/stop switch and period of the heartbeat
#[derive(Debug)]
pub struct TimerHandle {
    running: AtomicBool,
    period_nanos: AtomicU64,
    wake: Notify,
}

impl TimerHandle {
    pub fn new(period: Duration) -> Self {
        Self {
            running: AtomicBool::new(false),
            period_nanos: AtomicU64::new(nanos(period)),
            wake: Notify::new(),
        }
    }

    pub fn start(&self) {
        if !self.running.swap(true, Ordering::SeqCst) {
            debug!("Heartbeat started");
        }
        self.wake.notify_one();
    }

    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("No consumers, heartbeat idle");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn period(&self) -> Duration {
        Duration::from_nanos(self.period_nanos.load(Ordering::SeqCst))
    }

    pub fn set_period(&self, period: Duration) {
        let previous = self.period_nanos.swap(nanos(period), Ordering::SeqCst);
        if previous != nanos(period) {
            info!("Heartbeat period {:?}", period);
        }
    }

    /// Resolve once the timer is running
    pub async fn started(&self) {
        loop {
            let notified = self.wake.notified();
            if self.is_running() {
                return;
            }
            notified.await;
        }
    }
}

fn nanos(period: Duration) -> u64 {
    u64::try_from(period.as_nanos()).unwrap_or(u64::MAX)
}

/// Spawn the heartbeat task for `bridge`. Aborting the task cancels future
/// ticks; a tick already on the blocking pool runs to completion.
pub fn spawn_heartbeat(bridge: Bridge) -> JoinHandle<()> {
    tokio::spawn(async move {
        let timer = bridge.timer();
        let mut last = Instant::now();
        loop {
            if !timer.is_running() {
                timer.started().await;
                // Idle time is not command silence
                last = Instant::now();
            }
            tokio::time::sleep(timer.period()).await;
            if !timer.is_running() {
                continue;
            }

            let now = Instant::now();
            let elapsed = now.duration_since(last);
            last = now;

            let tick_bridge = bridge.clone();
            match tokio::task::spawn_blocking(move || tick_bridge.tick(elapsed)).await {
                Ok(outcome) => debug!("Tick after {:?}: {:?}", elapsed, outcome),
                Err(e) => error!("Heartbeat tick failed: {}", e),
            }
        }
    })
}
