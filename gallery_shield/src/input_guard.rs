//! Gallery Shield - Input Guard
//!
//! Intercepts exfiltration shortcuts and screenshot signals on the document
//! while a protected surface is mounted.
//!
//! Nested surfaces (a lightbox over the grid) share one guard per document.
//! Each surface holds a [`GuardLease`]; the first lease installs the listeners,
//! the last one dropped removes them, so the document never carries more than
//! one listener per event kind. The effective settings are the union of all
//! live leases. A violation is reported to the strictest lease whose settings
//! enable that detector, the most recent one on ties.
//!
//! Print-screen detection is best effort. No web platform API can block or
//! reliably observe an OS-level screenshot; the PrintScreen key and the
//! screenshot chords only catch the common cases. A blur right after a chord
//! is the same capture and is not reported again.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::InputConfig;
use crate::platform::{Disposition, DomEvent, DomEventKind, Document, KeyEvent, ListenerId};
use crate::policy::ProtectionPolicy;
use crate::violation::{ViolationKind, ViolationSink};

/// Listener kinds installed while any lease is live
const GUARDED_EVENTS: [DomEventKind; 7] = [
    DomEventKind::KeyDown,
    DomEventKind::KeyUp,
    DomEventKind::VisibilityChange,
    DomEventKind::Blur,
    DomEventKind::ContextMenu,
    DomEventKind::DragStart,
    DomEventKind::Copy,
];

/// Input-related subset of a protection policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GuardSettings {
    pub block_shortcuts: bool,
    pub detect_print_screen: bool,
}

impl GuardSettings {
    pub fn from_policy(policy: &ProtectionPolicy) -> Self {
        Self {
            block_shortcuts: policy.block_keyboard_shortcuts,
            detect_print_screen: policy.detect_print_screen,
        }
    }

    /// Nothing to guard
    pub fn is_inert(&self) -> bool {
        !self.block_shortcuts && !self.detect_print_screen
    }

    /// Whether these settings enable the detector behind `kind`
    pub fn detects(&self, kind: ViolationKind) -> bool {
        match kind {
            ViolationKind::PrintScreenDetected => self.detect_print_screen,
            ViolationKind::KeyboardShortcutBlocked | ViolationKind::ClipboardCaptureAttempt => {
                self.block_shortcuts
            }
            ViolationKind::DevtoolsDetected | ViolationKind::CanvasAccessBlocked => false,
        }
    }

    pub fn union(self, other: GuardSettings) -> Self {
        Self {
            block_shortcuts: self.block_shortcuts || other.block_shortcuts,
            detect_print_screen: self.detect_print_screen || other.detect_print_screen,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SHORTCUT CLASSIFICATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Browser shortcuts that lead to the media bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShortcutClass {
    SavePage,
    Print,
    DevTools,
    ViewSource,
    Copy,
}

/// Classify a keydown as an exfiltration shortcut
pub fn classify_shortcut(key: &KeyEvent) -> Option<ShortcutClass> {
    let k = key.key_lower();

    if k == "f12" {
        return Some(ShortcutClass::DevTools);
    }
    // Ctrl+Shift+I/J/C on Windows/Linux, Cmd+Alt+I/J/C on macOS
    if (key.ctrl && key.shift) || (key.meta && key.alt) {
        if matches!(k.as_str(), "i" | "j" | "c") {
            return Some(ShortcutClass::DevTools);
        }
    }
    if !key.primary_modifier() {
        return None;
    }
    match k.as_str() {
        "s" => Some(ShortcutClass::SavePage),
        "p" => Some(ShortcutClass::Print),
        "u" => Some(ShortcutClass::ViewSource),
        "c" if !key.shift && !key.alt => Some(ShortcutClass::Copy),
        _ => None,
    }
}

pub fn is_print_screen(key: &KeyEvent) -> bool {
    matches!(key.key.as_str(), "PrintScreen" | "Snapshot" | "PrtSc")
}

/// Cmd+Shift+3/4/5 on macOS, Win+Shift+S on Windows
pub fn is_screenshot_chord(key: &KeyEvent) -> bool {
    key.meta && key.shift && !key.ctrl && matches!(key.key_lower().as_str(), "3" | "4" | "5" | "s")
}

// ═══════════════════════════════════════════════════════════════════════════════
// INPUT GUARD
// ═══════════════════════════════════════════════════════════════════════════════

struct LeaseEntry {
    id: u64,
    settings: GuardSettings,
    sink: ViolationSink,
}

#[derive(Default)]
struct GuardState {
    leases: Vec<LeaseEntry>,
    listeners: Vec<ListenerId>,
    next_lease: u64,
    /// Last screenshot chord, for the chord-then-blur pattern
    last_chord: Option<Instant>,
    /// PrintScreen keydown seen, so the matching keyup is not counted twice
    print_key_down: bool,
}

impl GuardState {
    fn effective(&self) -> GuardSettings {
        self.leases
            .iter()
            .fold(GuardSettings::default(), |acc, lease| acc.union(lease.settings))
    }

    /// Strictest lease that guards against `kind`; later leases win ties
    fn sink_for(&self, kind: ViolationKind) -> Option<ViolationSink> {
        self.leases
            .iter()
            .filter(|lease| lease.settings.detects(kind))
            .max_by_key(|lease| lease.sink.level())
            .map(|lease| lease.sink.clone())
    }
}

/// Shared per-document input guard
pub struct InputGuard {
    document: Arc<Document>,
    blur_window: Duration,
    state: Arc<Mutex<GuardState>>,
}

impl InputGuard {
    pub fn new(document: Arc<Document>, config: &InputConfig) -> Arc<Self> {
        Arc::new(Self {
            document,
            blur_window: Duration::from_millis(config.screenshot_blur_window_ms),
            state: Arc::new(Mutex::new(GuardState::default())),
        })
    }

    pub fn document(&self) -> &Arc<Document> {
        &self.document
    }

    /// Take a lease for a mounted surface; `None` when the settings guard nothing
    pub fn acquire(self: &Arc<Self>, settings: GuardSettings, sink: ViolationSink) -> Option<GuardLease> {
        if settings.is_inert() {
            return None;
        }

        let mut state = self.state.lock();
        let id = state.next_lease;
        state.next_lease += 1;
        state.leases.push(LeaseEntry { id, settings, sink });

        if state.listeners.is_empty() {
            state.listeners = self.install();
            log::debug!("Input guard installed {} listeners", state.listeners.len());
        }

        Some(GuardLease {
            guard: self.clone(),
            id,
        })
    }

    pub fn active_leases(&self) -> usize {
        self.state.lock().leases.len()
    }

    pub fn effective_settings(&self) -> GuardSettings {
        self.state.lock().effective()
    }

    fn release(&self, id: u64) {
        let mut state = self.state.lock();
        state.leases.retain(|lease| lease.id != id);

        if state.leases.is_empty() {
            for listener in state.listeners.drain(..) {
                self.document.remove_listener(listener);
            }
            state.last_chord = None;
            state.print_key_down = false;
            log::debug!("Input guard removed all listeners");
        }
    }

    fn install(&self) -> Vec<ListenerId> {
        GUARDED_EVENTS
            .iter()
            .map(|kind| {
                let state: Weak<Mutex<GuardState>> = Arc::downgrade(&self.state);
                let blur_window = self.blur_window;
                self.document.add_listener(
                    *kind,
                    Arc::new(move |event: &DomEvent| match state.upgrade() {
                        Some(state) => handle_event(&state, blur_window, event),
                        None => Disposition::Continue,
                    }),
                )
            })
            .collect()
    }
}

/// Decide the disposition under the lock, report after releasing it
fn handle_event(state: &Mutex<GuardState>, blur_window: Duration, event: &DomEvent) -> Disposition {
    let (disposition, report) = {
        let mut state = state.lock();
        let settings = state.effective();
        let (disposition, violation) = evaluate(&mut state, settings, blur_window, event);
        let report = violation.and_then(|kind| state.sink_for(kind).map(|sink| (kind, sink)));
        (disposition, report)
    };

    if let Some((kind, sink)) = report {
        sink.emit(kind);
    }
    disposition
}

fn evaluate(
    state: &mut GuardState,
    settings: GuardSettings,
    blur_window: Duration,
    event: &DomEvent,
) -> (Disposition, Option<ViolationKind>) {
    match event {
        DomEvent::KeyDown(key) => {
            if settings.detect_print_screen {
                if is_print_screen(key) {
                    state.print_key_down = true;
                    return (Disposition::PreventDefault, Some(ViolationKind::PrintScreenDetected));
                }
                if is_screenshot_chord(key) {
                    state.last_chord = Some(Instant::now());
                    return (Disposition::PreventDefault, Some(ViolationKind::PrintScreenDetected));
                }
            }
            if settings.block_shortcuts {
                match classify_shortcut(key) {
                    Some(ShortcutClass::Copy) => {
                        return (
                            Disposition::PreventDefault,
                            Some(ViolationKind::ClipboardCaptureAttempt),
                        )
                    }
                    Some(_) => {
                        return (
                            Disposition::PreventDefault,
                            Some(ViolationKind::KeyboardShortcutBlocked),
                        )
                    }
                    None => {}
                }
            }
            (Disposition::Continue, None)
        }
        DomEvent::KeyUp(key) => {
            // Windows delivers PrintScreen on keyup only
            if settings.detect_print_screen && is_print_screen(key) {
                if std::mem::take(&mut state.print_key_down) {
                    return (Disposition::PreventDefault, None);
                }
                return (Disposition::PreventDefault, Some(ViolationKind::PrintScreenDetected));
            }
            (Disposition::Continue, None)
        }
        DomEvent::VisibilityChange { hidden: true } | DomEvent::Blur => {
            // The chord keydown already reported this screenshot
            let recent_chord = state
                .last_chord
                .take()
                .map(|at| at.elapsed() <= blur_window)
                .unwrap_or(false);
            if settings.detect_print_screen && recent_chord {
                log::debug!("Focus lost right after a screenshot chord");
            }
            (Disposition::Continue, None)
        }
        DomEvent::VisibilityChange { hidden: false } => (Disposition::Continue, None),
        DomEvent::ContextMenu | DomEvent::DragStart => {
            if settings.block_shortcuts {
                (Disposition::PreventDefault, None)
            } else {
                (Disposition::Continue, None)
            }
        }
        DomEvent::Copy => {
            if settings.block_shortcuts {
                (Disposition::PreventDefault, Some(ViolationKind::ClipboardCaptureAttempt))
            } else {
                (Disposition::Continue, None)
            }
        }
    }
}

/// Live registration of one protected surface
pub struct GuardLease {
    guard: Arc<InputGuard>,
    id: u64,
}

impl Drop for GuardLease {
    fn drop(&mut self) {
        self.guard.release(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{derive_policy, ProtectionLevel};
    use crate::violation::ViolationLog;

    fn setup() -> (Arc<Document>, Arc<InputGuard>) {
        let doc = Document::new();
        let guard = InputGuard::new(doc.clone(), &InputConfig::default());
        (doc, guard)
    }

    fn sink(photo: &str, log: &Arc<ViolationLog>) -> ViolationSink {
        ViolationSink::new(photo, ProtectionLevel::Maximum, log.clone())
    }

    fn all_on() -> GuardSettings {
        GuardSettings {
            block_shortcuts: true,
            detect_print_screen: true,
        }
    }

    #[test]
    fn test_classify_shortcuts() {
        assert_eq!(classify_shortcut(&KeyEvent::ctrl("s")), Some(ShortcutClass::SavePage));
        assert_eq!(classify_shortcut(&KeyEvent::meta("p")), Some(ShortcutClass::Print));
        assert_eq!(classify_shortcut(&KeyEvent::plain("F12")), Some(ShortcutClass::DevTools));
        assert_eq!(
            classify_shortcut(&KeyEvent::ctrl("I").with_shift()),
            Some(ShortcutClass::DevTools)
        );
        assert_eq!(
            classify_shortcut(&KeyEvent::meta("j").with_alt()),
            Some(ShortcutClass::DevTools)
        );
        assert_eq!(classify_shortcut(&KeyEvent::ctrl("u")), Some(ShortcutClass::ViewSource));
        assert_eq!(classify_shortcut(&KeyEvent::ctrl("c")), Some(ShortcutClass::Copy));
        assert_eq!(classify_shortcut(&KeyEvent::plain("s")), None);
        assert_eq!(classify_shortcut(&KeyEvent::ctrl("ArrowRight")), None);
    }

    #[test]
    fn test_inert_settings_take_no_lease() {
        let (doc, guard) = setup();
        let log = Arc::new(ViolationLog::new());
        let settings = GuardSettings::from_policy(&derive_policy(ProtectionLevel::Basic, true));
        assert!(guard.acquire(settings, sink("p", &log)).is_none());
        assert_eq!(doc.total_listeners(), 0);
    }

    #[test]
    fn test_blocks_save_and_reports() {
        let (doc, guard) = setup();
        let log = Arc::new(ViolationLog::new());
        let _lease = guard.acquire(all_on(), sink("p1", &log)).unwrap();

        let outcome = doc.dispatch(&DomEvent::KeyDown(KeyEvent::ctrl("s")));
        assert!(outcome.default_prevented);
        assert_eq!(log.kinds(), vec![ViolationKind::KeyboardShortcutBlocked]);

        let outcome = doc.dispatch(&DomEvent::KeyDown(KeyEvent::plain("ArrowLeft")));
        assert!(!outcome.default_prevented);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_print_screen_reported_once_per_press() {
        let (doc, guard) = setup();
        let log = Arc::new(ViolationLog::new());
        let _lease = guard.acquire(all_on(), sink("p1", &log)).unwrap();

        doc.dispatch(&DomEvent::KeyDown(KeyEvent::plain("PrintScreen")));
        doc.dispatch(&DomEvent::KeyUp(KeyEvent::plain("PrintScreen")));
        assert_eq!(log.kinds(), vec![ViolationKind::PrintScreenDetected]);

        // Keyup-only delivery
        doc.dispatch(&DomEvent::KeyUp(KeyEvent::plain("PrintScreen")));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_chord_then_blur_counts_as_one_screenshot() {
        let (doc, guard) = setup();
        let log = Arc::new(ViolationLog::new());
        let _lease = guard.acquire(all_on(), sink("p1", &log)).unwrap();

        let outcome = doc.dispatch(&DomEvent::KeyDown(KeyEvent::meta("4").with_shift()));
        assert!(outcome.default_prevented);
        doc.dispatch(&DomEvent::Blur);
        doc.dispatch(&DomEvent::VisibilityChange { hidden: true });
        assert_eq!(log.kinds(), vec![ViolationKind::PrintScreenDetected]);

        // Blur without a preceding chord is ordinary tab switching
        doc.dispatch(&DomEvent::Blur);
        assert_eq!(log.len(), 1);

        doc.dispatch(&DomEvent::KeyDown(KeyEvent::meta("s").with_shift()));
        doc.dispatch(&DomEvent::VisibilityChange { hidden: true });
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_copy_is_clipboard_capture() {
        let (doc, guard) = setup();
        let log = Arc::new(ViolationLog::new());
        let _lease = guard.acquire(all_on(), sink("p1", &log)).unwrap();

        assert!(doc.dispatch(&DomEvent::Copy).default_prevented);
        assert!(doc.dispatch(&DomEvent::ContextMenu).default_prevented);
        assert_eq!(log.kinds(), vec![ViolationKind::ClipboardCaptureAttempt]);
    }

    #[test]
    fn test_nested_leases_share_listeners() {
        let (doc, guard) = setup();
        let grid_log = Arc::new(ViolationLog::new());
        let lightbox_log = Arc::new(ViolationLog::new());

        let grid = guard
            .acquire(
                GuardSettings {
                    block_shortcuts: true,
                    detect_print_screen: false,
                },
                sink("grid", &grid_log),
            )
            .unwrap();
        let installed = doc.total_listeners();
        assert_eq!(installed, GUARDED_EVENTS.len());

        let lightbox = guard.acquire(all_on(), sink("p9", &lightbox_log)).unwrap();
        assert_eq!(doc.total_listeners(), installed);
        assert_eq!(doc.listener_count(DomEventKind::KeyDown), 1);

        // Topmost surface receives the report
        doc.dispatch(&DomEvent::KeyDown(KeyEvent::plain("PrintScreen")));
        assert_eq!(lightbox_log.len(), 1);
        assert!(grid_log.is_empty());

        drop(lightbox);
        assert_eq!(doc.total_listeners(), installed);
        assert!(!guard.effective_settings().detect_print_screen);

        doc.dispatch(&DomEvent::KeyDown(KeyEvent::ctrl("p")));
        assert_eq!(grid_log.kinds(), vec![ViolationKind::KeyboardShortcutBlocked]);

        drop(grid);
        assert_eq!(doc.total_listeners(), 0);
        assert_eq!(guard.active_leases(), 0);
    }

    #[test]
    fn test_strictest_detecting_lease_receives_report() {
        let (doc, guard) = setup();
        let grid_log = Arc::new(ViolationLog::new());
        let lightbox_log = Arc::new(ViolationLog::new());

        let _grid = guard.acquire(all_on(), sink("grid", &grid_log)).unwrap();
        let standard = GuardSettings::from_policy(&derive_policy(ProtectionLevel::Standard, false));
        let _lightbox = guard
            .acquire(
                standard,
                ViolationSink::new("p3", ProtectionLevel::Standard, lightbox_log.clone()),
            )
            .unwrap();

        // Standard does not watch for screenshots; the maximum grid does
        doc.dispatch(&DomEvent::KeyDown(KeyEvent::plain("PrintScreen")));
        let records = grid_log.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].photo_id, "grid");
        assert_eq!(records[0].protection_level, ProtectionLevel::Maximum);
        assert!(lightbox_log.is_empty());

        // Both block shortcuts; the stricter level decides escalation
        doc.dispatch(&DomEvent::KeyDown(KeyEvent::ctrl("s")));
        assert_eq!(grid_log.len(), 2);
        assert!(lightbox_log.is_empty());
    }

    #[test]
    fn test_equal_levels_report_to_topmost_lease() {
        let (doc, guard) = setup();
        let below = Arc::new(ViolationLog::new());
        let above = Arc::new(ViolationLog::new());
        let _first = guard.acquire(all_on(), sink("p1", &below)).unwrap();
        let _second = guard.acquire(all_on(), sink("p2", &above)).unwrap();

        doc.dispatch(&DomEvent::Copy);
        assert!(below.is_empty());
        assert_eq!(above.kinds(), vec![ViolationKind::ClipboardCaptureAttempt]);
    }

    #[test]
    fn test_listener_count_after_repeated_mounts() {
        let (doc, guard) = setup();
        let log = Arc::new(ViolationLog::new());
        for i in 0..50 {
            let lease = guard.acquire(all_on(), sink(&format!("p{}", i), &log));
            assert!(lease.is_some());
        }
        assert_eq!(doc.listener_count(DomEventKind::KeyDown), 0);
        assert_eq!(doc.total_listeners(), 0);
    }
}
