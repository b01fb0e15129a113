//! Gallery Shield - DevTools Sentinel
//!
//! Heuristic detector for an open inspector. Two signals are sampled on a
//! fixed interval:
//!
//! - **timing gap**: wall-clock time across a probe statement; a paused
//!   debugger stretches it far beyond normal scheduling jitter
//! - **viewport delta**: outer vs inner window size; a docked inspector panel
//!   eats a large, persistent slice of the inner viewport
//!
//! Neither signal is proof. Resized windows, slow devices, zoom and side bars
//! all produce false positives, and an undocked inspector with no breakpoints
//! produces none of them. A detection is a probabilistic signal for the
//! escalation layer, not a security boundary.
//!
//! ```text
//!   Idle ──arm──► Armed ──positive──► Suspect ──positive × N──► Detected
//!                   ▲                    │
//!                   └─────negative───────┘
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;

use crate::config::SentinelConfig;
use crate::platform::{TimerHandle, TimerRegistry};
use crate::policy::{DetectionSensitivity, ProtectionPolicy};

/// Sentinel state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum SentinelState {
    Idle,
    Armed,
    Suspect { hits: u32 },
    /// Terminal until re-armed by a new mount
    Detected,
}

/// One sample of the environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSample {
    /// Time spent across the probe statement
    pub timing_gap: Duration,
    pub outer_width: u32,
    pub outer_height: u32,
    pub inner_width: u32,
    pub inner_height: u32,
}

impl EnvironmentSample {
    /// Quiet sample for a window of the given size
    pub fn calm(width: u32, height: u32) -> Self {
        Self {
            timing_gap: Duration::ZERO,
            outer_width: width,
            outer_height: height,
            inner_width: width,
            inner_height: height,
        }
    }

    /// Largest outer/inner gap on either axis
    pub fn viewport_delta(&self) -> u32 {
        let dx = self.outer_width.saturating_sub(self.inner_width);
        let dy = self.outer_height.saturating_sub(self.inner_height);
        dx.max(dy)
    }
}

/// Which heuristics fired on a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SignalReading {
    pub timing: bool,
    pub viewport: bool,
}

impl SignalReading {
    pub fn any(&self) -> bool {
        self.timing || self.viewport
    }

    pub fn both(&self) -> bool {
        self.timing && self.viewport
    }
}

/// Source of environment samples, supplied by the host adapter
pub trait EnvironmentProbe: Send + Sync {
    fn sample(&self) -> EnvironmentSample;
}

impl<F> EnvironmentProbe for F
where
    F: Fn() -> EnvironmentSample + Send + Sync,
{
    fn sample(&self) -> EnvironmentSample {
        self()
    }
}

/// Time a probe statement (the host passes its debugger-adjacent no-op here)
pub fn measure_gap<F: FnOnce()>(probe: F) -> Duration {
    let started = Instant::now();
    probe();
    started.elapsed()
}

/// Reported once per arm cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detection {
    pub reading: SignalReading,
    pub sample: EnvironmentSample,
    pub samples_taken: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// STATE MACHINE
// ═══════════════════════════════════════════════════════════════════════════════

/// DevTools detection state machine
#[derive(Debug, Clone)]
pub struct DevToolsSentinel {
    state: SentinelState,
    sensitivity: DetectionSensitivity,
    config: SentinelConfig,
    samples_taken: u64,
}

impl DevToolsSentinel {
    pub fn new(sensitivity: DetectionSensitivity, config: SentinelConfig) -> Self {
        Self {
            state: SentinelState::Idle,
            sensitivity,
            config,
            samples_taken: 0,
        }
    }

    /// Armed sentinel for a policy, or `None` when devtools detection is off
    pub fn for_policy(policy: &ProtectionPolicy, config: &SentinelConfig) -> Option<Self> {
        if !policy.detect_devtools {
            return None;
        }
        let mut sentinel = Self::new(policy.detection_sensitivity, config.clone());
        sentinel.arm();
        Some(sentinel)
    }

    pub fn state(&self) -> SentinelState {
        self.state
    }

    pub fn sensitivity(&self) -> DetectionSensitivity {
        self.sensitivity
    }

    /// Polling interval for this sentinel's sensitivity
    pub fn interval(&self) -> Duration {
        self.config.interval_for(self.sensitivity)
    }

    /// Idle → Armed; a detected sentinel stays detected
    pub fn arm(&mut self) {
        if self.state == SentinelState::Idle {
            self.state = SentinelState::Armed;
        }
    }

    /// Start a fresh arm cycle (new mount or navigation)
    pub fn rearm(&mut self) {
        self.state = SentinelState::Armed;
        self.samples_taken = 0;
    }

    pub fn disarm(&mut self) {
        self.state = SentinelState::Idle;
    }

    /// Apply both heuristics to a sample
    pub fn evaluate(&self, sample: &EnvironmentSample) -> SignalReading {
        SignalReading {
            timing: sample.timing_gap
                >= Duration::from_millis(self.config.timing_gap_threshold_ms),
            viewport: sample.viewport_delta() >= self.config.viewport_delta_threshold_px,
        }
    }

    fn is_positive(&self, reading: &SignalReading) -> bool {
        if self.sensitivity.accepts_single_signal() {
            reading.any()
        } else {
            reading.both()
        }
    }

    /// Feed one sample; returns a detection exactly once per arm cycle
    pub fn observe(&mut self, sample: EnvironmentSample) -> Option<Detection> {
        let hits = match self.state {
            SentinelState::Idle | SentinelState::Detected => return None,
            SentinelState::Armed => 0,
            SentinelState::Suspect { hits } => hits,
        };

        self.samples_taken += 1;
        let reading = self.evaluate(&sample);

        if !self.is_positive(&reading) {
            if hits > 0 {
                log::debug!("Sentinel suspicion cleared after {} hit(s)", hits);
            }
            self.state = SentinelState::Armed;
            return None;
        }

        let hits = hits + 1;
        if hits >= self.config.consecutive_hits {
            self.state = SentinelState::Detected;
            log::warn!(
                "DevTools heuristics positive on {} consecutive samples (timing={}, viewport={})",
                hits,
                reading.timing,
                reading.viewport
            );
            Some(Detection {
                reading,
                sample,
                samples_taken: self.samples_taken,
            })
        } else {
            self.state = SentinelState::Suspect { hits };
            None
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// INTERVAL DRIVER
// ═══════════════════════════════════════════════════════════════════════════════

/// Run a sentinel on its polling interval
///
/// The task ends after the first detection; `on_detect` runs at most once.
/// Dropping the returned handle stops polling.
pub fn spawn_sentinel<F>(
    mut sentinel: DevToolsSentinel,
    probe: Arc<dyn EnvironmentProbe>,
    timers: &TimerRegistry,
    on_detect: F,
) -> TimerHandle
where
    F: FnOnce(Detection) + Send + 'static,
{
    let period = sentinel.interval();
    log::debug!(
        "Sentinel armed ({} sensitivity, every {:?})",
        sentinel.sensitivity().as_str(),
        period
    );

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Some(detection) = sentinel.observe(probe.sample()) {
                on_detect(detection);
                break;
            }
        }
    });

    timers.register(task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn positive_both() -> EnvironmentSample {
        EnvironmentSample {
            timing_gap: Duration::from_millis(400),
            outer_width: 1920,
            outer_height: 1080,
            inner_width: 1400,
            inner_height: 1000,
        }
    }

    fn positive_timing_only() -> EnvironmentSample {
        EnvironmentSample {
            timing_gap: Duration::from_millis(400),
            ..EnvironmentSample::calm(1920, 1080)
        }
    }

    fn armed(sensitivity: DetectionSensitivity) -> DevToolsSentinel {
        let mut sentinel = DevToolsSentinel::new(sensitivity, SentinelConfig::default());
        sentinel.arm();
        sentinel
    }

    #[test]
    fn test_medium_detects_on_two_agreeing_samples() {
        let mut sentinel = armed(DetectionSensitivity::Medium);

        assert!(sentinel.observe(positive_both()).is_none());
        assert_eq!(sentinel.state(), SentinelState::Suspect { hits: 1 });

        let detection = sentinel.observe(positive_both()).expect("detection");
        assert!(detection.reading.both());
        assert_eq!(sentinel.state(), SentinelState::Detected);

        // Terminal: no further callbacks this arm cycle
        assert!(sentinel.observe(positive_both()).is_none());
        assert!(sentinel.observe(positive_both()).is_none());
    }

    #[test]
    fn test_medium_ignores_single_signal() {
        let mut sentinel = armed(DetectionSensitivity::Medium);
        for _ in 0..5 {
            assert!(sentinel.observe(positive_timing_only()).is_none());
        }
        assert_eq!(sentinel.state(), SentinelState::Armed);
    }

    #[test]
    fn test_high_accepts_single_signal() {
        let mut sentinel = armed(DetectionSensitivity::High);
        assert!(sentinel.observe(positive_timing_only()).is_none());
        assert!(sentinel.observe(positive_timing_only()).is_some());
    }

    #[test]
    fn test_negative_sample_returns_to_armed() {
        let mut sentinel = armed(DetectionSensitivity::Medium);
        sentinel.observe(positive_both());
        sentinel.observe(EnvironmentSample::calm(1280, 800));
        assert_eq!(sentinel.state(), SentinelState::Armed);

        // Non-consecutive positives never detect
        assert!(sentinel.observe(positive_both()).is_none());
        sentinel.observe(EnvironmentSample::calm(1280, 800));
        assert!(sentinel.observe(positive_both()).is_none());
    }

    #[test]
    fn test_idle_sentinel_ignores_samples() {
        let mut sentinel = DevToolsSentinel::new(DetectionSensitivity::High, SentinelConfig::default());
        assert!(sentinel.observe(positive_both()).is_none());
        assert_eq!(sentinel.state(), SentinelState::Idle);
    }

    #[test]
    fn test_rearm_starts_new_cycle() {
        let mut sentinel = armed(DetectionSensitivity::Medium);
        sentinel.observe(positive_both());
        sentinel.observe(positive_both());
        assert_eq!(sentinel.state(), SentinelState::Detected);

        sentinel.arm();
        assert_eq!(sentinel.state(), SentinelState::Detected);

        sentinel.rearm();
        sentinel.observe(positive_both());
        assert!(sentinel.observe(positive_both()).is_some());
    }

    #[test]
    fn test_policy_gating() {
        use crate::policy::{derive_policy, ProtectionLevel};
        let config = SentinelConfig::default();
        assert!(DevToolsSentinel::for_policy(&derive_policy(ProtectionLevel::Standard, true), &config).is_none());

        let sentinel =
            DevToolsSentinel::for_policy(&derive_policy(ProtectionLevel::Maximum, true), &config)
                .unwrap();
        assert_eq!(sentinel.state(), SentinelState::Armed);
        assert_eq!(sentinel.interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_measure_gap_is_non_negative() {
        let gap = measure_gap(|| {
            std::hint::black_box((0..1000).sum::<u64>());
        });
        assert!(gap < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_fires_once_and_stops() {
        let timers = TimerRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();

        let handle = spawn_sentinel(
            armed(DetectionSensitivity::Medium),
            Arc::new(positive_both),
            &timers,
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );
        assert_eq!(timers.active(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(handle.is_finished());

        drop(handle);
        assert_eq!(timers.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_quiet_environment_never_fires() {
        let timers = TimerRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();

        let handle = spawn_sentinel(
            armed(DetectionSensitivity::High),
            Arc::new(|| EnvironmentSample::calm(1280, 800)),
            &timers,
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!handle.is_finished());
        drop(handle);
        assert_eq!(timers.active(), 0);
    }
}
