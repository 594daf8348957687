//! Rate gate: a single-permit token channel refilled on a jittered interval.
//!
//! ```text
//!   refill task ──(base + jitter sleep)──▶ tx ──[capacity 1]──▶ acquire()
//! ```
//!
//! `acquire` takes the token or waits until the refill task produces one.
//! The capacity-1 channel means at most one banked permit: a long idle
//! period never builds up a burst. The gate does nothing until `start()`
//! is called; callers waiting on an unstarted gate block.
//!
//! One gate exists per source type, owned by its platform and shared with
//! every session through an `Arc`, so concurrent runs against the same
//! upstream still serialize through a single refill.

use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct RateGateConfig {
    pub base: Duration,
    pub jitter: Duration,
}

impl RateGateConfig {
    pub fn new(base: Duration, jitter: Duration) -> Self {
        Self { base, jitter }
    }
}

pub struct RateGate {
    tx: mpsc::Sender<()>,
    rx: tokio::sync::Mutex<mpsc::Receiver<()>>,
    config: RateGateConfig,
    refill: Mutex<Option<JoinHandle<()>>>,
}

impl RateGate {
    pub fn new(config: RateGateConfig) -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            config,
            refill: Mutex::new(None),
        }
    }

    /// Spawn the refill task. Calling `start` twice is a no-op.
    pub fn start(&self) {
        let mut refill = self.refill.lock().unwrap_or_else(|e| e.into_inner());
        if refill.is_some() {
            return;
        }
        let tx = self.tx.clone();
        let config = self.config.clone();
        *refill = Some(tokio::spawn(async move {
            loop {
                if tx.send(()).await.is_err() {
                    break;
                }
                tokio::time::sleep(next_interval(&config)).await;
            }
        }));
    }

    /// Abort the refill task. Waiters currently blocked in `acquire` stay
    /// blocked until the gate is dropped.
    pub fn stop(&self) {
        if let Some(handle) = self
            .refill
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
    }

    /// Wait for the next permit.
    pub async fn acquire(&self) {
        let mut rx = self.rx.lock().await;
        let _ = rx.recv().await;
    }
}

impl Drop for RateGate {
    fn drop(&mut self) {
        self.stop();
    }
}

fn next_interval(config: &RateGateConfig) -> Duration {
    let jitter_ms = config.jitter.as_millis() as u64;
    if jitter_ms == 0 {
        return config.base;
    }
    let extra = rand::thread_rng().gen_range(0..jitter_ms);
    config.base + Duration::from_millis(extra)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_permit_is_immediate_after_start() {
        let gate = RateGate::new(RateGateConfig::new(Duration::from_secs(10), Duration::ZERO));
        gate.start();
        gate.acquire().await;
    }

    #[tokio::test(start_paused = true)]
    async fn second_permit_waits_for_the_refill_interval() {
        let gate = RateGate::new(RateGateConfig::new(Duration::from_secs(10), Duration::ZERO));
        gate.start();
        gate.acquire().await;

        let early = tokio::time::timeout(Duration::from_secs(5), gate.acquire()).await;
        assert!(early.is_err(), "permit appeared before the interval elapsed");

        let later = tokio::time::timeout(Duration::from_secs(10), gate.acquire()).await;
        assert!(later.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_gate_banks_at_most_one_permit() {
        let gate = RateGate::new(RateGateConfig::new(Duration::from_secs(1), Duration::ZERO));
        gate.start();
        // Let many intervals elapse while nobody is consuming.
        tokio::time::sleep(Duration::from_secs(30)).await;

        gate.acquire().await;
        // Only the single banked permit plus the in-flight refill are
        // available; a third immediate acquire must wait.
        gate.acquire().await;
        let burst = tokio::time::timeout(Duration::from_millis(500), gate.acquire()).await;
        assert!(burst.is_err(), "gate allowed a burst after idling");
    }

    #[tokio::test(start_paused = true)]
    async fn shared_gate_serializes_independent_holders() {
        let gate = std::sync::Arc::new(RateGate::new(RateGateConfig::new(
            Duration::from_secs(10),
            Duration::ZERO,
        )));
        gate.start();

        // Two holders of the same gate draw from one permit stream: once
        // the first consumes the banked permit, the second waits out the
        // full interval instead of getting its own.
        let first = gate.clone();
        first.acquire().await;
        let second = gate.clone();
        let early = tokio::time::timeout(Duration::from_secs(5), second.acquire()).await;
        assert!(early.is_err(), "second holder got a permit from nowhere");
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_gate_produces_no_more_permits() {
        let gate = RateGate::new(RateGateConfig::new(Duration::from_secs(1), Duration::ZERO));
        gate.start();
        gate.acquire().await;
        gate.stop();

        // Drain the at-most-one banked permit, then expect starvation.
        let _ = tokio::time::timeout(Duration::from_secs(2), gate.acquire()).await;
        let starved = tokio::time::timeout(Duration::from_secs(30), gate.acquire()).await;
        assert!(starved.is_err(), "stopped gate still refilling");
    }
}
