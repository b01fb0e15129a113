//! Gallery Shield - Violation Reporting
//!
//! Detectors and the renderer never decide what a violation means. They emit a
//! [`ViolationEvent`] through a [`ViolationSink`]; everything downstream of the
//! sink is a [`ViolationReporter`].

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::policy::ProtectionLevel;

/// Kinds of attempted exfiltration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    DevtoolsDetected,
    PrintScreenDetected,
    CanvasAccessBlocked,
    KeyboardShortcutBlocked,
    ClipboardCaptureAttempt,
}

impl ViolationKind {
    pub const ALL: [ViolationKind; 5] = [
        ViolationKind::DevtoolsDetected,
        ViolationKind::PrintScreenDetected,
        ViolationKind::CanvasAccessBlocked,
        ViolationKind::KeyboardShortcutBlocked,
        ViolationKind::ClipboardCaptureAttempt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DevtoolsDetected => "devtools_detected",
            Self::PrintScreenDetected => "print_screen_detected",
            Self::CanvasAccessBlocked => "canvas_access_blocked",
            Self::KeyboardShortcutBlocked => "keyboard_shortcut_blocked",
            Self::ClipboardCaptureAttempt => "clipboard_capture_attempt",
        }
    }
}

/// A single violation, consumed once by the escalator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationEvent {
    pub kind: ViolationKind,
    pub photo_id: String,
    pub protection_level: ProtectionLevel,
    pub timestamp: DateTime<Utc>,
    /// Mounted session that raised it, when there is one
    #[serde(default)]
    pub session_id: Option<Uuid>,
}

/// Anything that consumes violation events
pub trait ViolationReporter: Send + Sync {
    fn report(&self, event: &ViolationEvent);
}

impl<F> ViolationReporter for F
where
    F: Fn(&ViolationEvent) + Send + Sync,
{
    fn report(&self, event: &ViolationEvent) {
        self(event)
    }
}

/// Invoke a reporter without letting a panic cross the boundary
pub fn report_isolated(reporter: &dyn ViolationReporter, event: &ViolationEvent) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| reporter.report(event)));
    if outcome.is_err() {
        log::error!(
            "Violation reporter panicked while handling {} for photo {}",
            event.kind.as_str(),
            event.photo_id
        );
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VIOLATION BUS
// ═══════════════════════════════════════════════════════════════════════════════

/// Fan-out of violation events to subscribers, in subscription order
#[derive(Default)]
pub struct ViolationBus {
    subscribers: RwLock<Vec<Arc<dyn ViolationReporter>>>,
}

impl ViolationBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, reporter: Arc<dyn ViolationReporter>) {
        self.subscribers.write().push(reporter);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl ViolationReporter for ViolationBus {
    fn report(&self, event: &ViolationEvent) {
        // Snapshot so a subscriber may subscribe others without deadlocking
        let subscribers: Vec<_> = self.subscribers.read().iter().cloned().collect();
        for subscriber in subscribers {
            report_isolated(subscriber.as_ref(), event);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VIOLATION SINK (PER MOUNTED INSTANCE)
// ═══════════════════════════════════════════════════════════════════════════════

/// Violation emitter bound to one photo and level
///
/// Clones share one liveness flag. Once [`ViolationSink::revoke`] runs, no
/// clone reports again, so work still finishing for an unmounted view stays
/// silent.
#[derive(Clone)]
pub struct ViolationSink {
    photo_id: String,
    level: ProtectionLevel,
    session_id: Option<Uuid>,
    live: Arc<AtomicBool>,
    reporter: Arc<dyn ViolationReporter>,
}

impl ViolationSink {
    pub fn new(
        photo_id: impl Into<String>,
        level: ProtectionLevel,
        reporter: Arc<dyn ViolationReporter>,
    ) -> Self {
        Self {
            photo_id: photo_id.into(),
            level,
            session_id: None,
            live: Arc::new(AtomicBool::new(true)),
            reporter,
        }
    }

    /// Stamp events with the mounted session's id
    pub fn with_session(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn photo_id(&self) -> &str {
        &self.photo_id
    }

    pub fn level(&self) -> ProtectionLevel {
        self.level
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Silence this sink and every clone of it
    pub fn revoke(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    /// Build and report an event; never panics, no-op once revoked
    pub fn emit(&self, kind: ViolationKind) {
        if !self.is_live() {
            log::debug!(
                "Dropped {} for unmounted photo {}",
                kind.as_str(),
                self.photo_id
            );
            return;
        }
        let event = ViolationEvent {
            kind,
            photo_id: self.photo_id.clone(),
            protection_level: self.level,
            timestamp: Utc::now(),
            session_id: self.session_id,
        };
        log::warn!(
            "Protection violation: {} (photo {}, level {})",
            kind.as_str(),
            event.photo_id,
            event.protection_level
        );
        report_isolated(self.reporter.as_ref(), &event);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VIOLATION LOG (ANALYTICS HAND-OFF)
// ═══════════════════════════════════════════════════════════════════════════════

/// Analytics record in the shape the gallery's analytics pipeline expects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsRecord {
    pub violation_type: ViolationKind,
    pub photo_id: String,
    pub protection_level: ProtectionLevel,
    pub timestamp: DateTime<Utc>,
}

impl From<&ViolationEvent> for AnalyticsRecord {
    fn from(event: &ViolationEvent) -> Self {
        Self {
            violation_type: event.kind,
            photo_id: event.photo_id.clone(),
            protection_level: event.protection_level,
            timestamp: event.timestamp,
        }
    }
}

/// In-memory recorder of reported violations
#[derive(Default)]
pub struct ViolationLog {
    records: RwLock<Vec<AnalyticsRecord>>,
}

impl ViolationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AnalyticsRecord> {
        self.records.read().clone()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn kinds(&self) -> Vec<ViolationKind> {
        self.records.read().iter().map(|r| r.violation_type).collect()
    }

    /// Drain all records, e.g. for batching to an analytics endpoint
    pub fn drain(&self) -> Vec<AnalyticsRecord> {
        std::mem::take(&mut *self.records.write())
    }
}

impl ViolationReporter for ViolationLog {
    fn report(&self, event: &ViolationEvent) {
        self.records.write().push(AnalyticsRecord::from(event));
    }
}
