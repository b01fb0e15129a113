//! Gallery Shield - Host Platform Surface
//!
//! The two global resources protected surfaces share with the page: the
//! document-level listener surface and interval timers. Both keep live counts
//! so teardown discipline can be asserted.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

// ═══════════════════════════════════════════════════════════════════════════════
// DOM EVENTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Event kinds a listener can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomEventKind {
    KeyDown,
    KeyUp,
    VisibilityChange,
    Blur,
    ContextMenu,
    DragStart,
    Copy,
}

/// Keyboard event payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEvent {
    /// `KeyboardEvent.key` value, e.g. "s", "F12", "PrintScreen"
    pub key: String,
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub meta: bool,
    #[serde(default)]
    pub shift: bool,
    #[serde(default)]
    pub alt: bool,
}

impl KeyEvent {
    pub fn plain(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ctrl: false,
            meta: false,
            shift: false,
            alt: false,
        }
    }

    pub fn ctrl(key: impl Into<String>) -> Self {
        Self {
            ctrl: true,
            ..Self::plain(key)
        }
    }

    pub fn meta(key: impl Into<String>) -> Self {
        Self {
            meta: true,
            ..Self::plain(key)
        }
    }

    pub fn with_shift(mut self) -> Self {
        self.shift = true;
        self
    }

    pub fn with_alt(mut self) -> Self {
        self.alt = true;
        self
    }

    /// Ctrl on Windows/Linux, Cmd on macOS
    pub fn primary_modifier(&self) -> bool {
        self.ctrl || self.meta
    }

    /// Lowercased key for comparisons
    pub fn key_lower(&self) -> String {
        self.key.to_ascii_lowercase()
    }
}

/// Events delivered to document listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomEvent {
    KeyDown(KeyEvent),
    KeyUp(KeyEvent),
    VisibilityChange { hidden: bool },
    Blur,
    ContextMenu,
    DragStart,
    Copy,
}

impl DomEvent {
    pub fn kind(&self) -> DomEventKind {
        match self {
            DomEvent::KeyDown(_) => DomEventKind::KeyDown,
            DomEvent::KeyUp(_) => DomEventKind::KeyUp,
            DomEvent::VisibilityChange { .. } => DomEventKind::VisibilityChange,
            DomEvent::Blur => DomEventKind::Blur,
            DomEvent::ContextMenu => DomEventKind::ContextMenu,
            DomEvent::DragStart => DomEventKind::DragStart,
            DomEvent::Copy => DomEventKind::Copy,
        }
    }
}

/// What a listener wants done with the event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Continue,
    PreventDefault,
}

/// Outcome of dispatching an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchOutcome {
    pub default_prevented: bool,
    pub listeners_invoked: usize,
}

pub type Listener = Arc<dyn Fn(&DomEvent) -> Disposition + Send + Sync>;

/// Listener registration handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

// ═══════════════════════════════════════════════════════════════════════════════
// DOCUMENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Document-level listener surface
///
/// Listeners run in registration order. The host adapter forwards real browser
/// events into [`Document::dispatch`] and honours `default_prevented`.
#[derive(Default)]
pub struct Document {
    listeners: RwLock<BTreeMap<ListenerId, (DomEventKind, Listener)>>,
    next_id: AtomicU64,
}

impl Document {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_listener(&self, kind: DomEventKind, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().insert(id, (kind, listener));
        id
    }

    /// Returns false if the id was not registered
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.write().remove(&id).is_some()
    }

    pub fn listener_count(&self, kind: DomEventKind) -> usize {
        self.listeners
            .read()
            .values()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    pub fn total_listeners(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn dispatch(&self, event: &DomEvent) -> DispatchOutcome {
        let kind = event.kind();
        // Snapshot so listeners may add or remove listeners while running
        let matching: Vec<Listener> = self
            .listeners
            .read()
            .values()
            .filter(|(k, _)| *k == kind)
            .map(|(_, l)| l.clone())
            .collect();

        let mut outcome = DispatchOutcome::default();
        for listener in matching {
            outcome.listeners_invoked += 1;
            if listener(event) == Disposition::PreventDefault {
                outcome.default_prevented = true;
            }
        }
        outcome
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TIMERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Tracks live interval tasks
#[derive(Clone, Default)]
pub struct TimerRegistry {
    active: Arc<AtomicUsize>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a spawned interval task
    pub fn register(&self, task: JoinHandle<()>) -> TimerHandle {
        self.active.fetch_add(1, Ordering::SeqCst);
        TimerHandle {
            task: Some(task),
            active: self.active.clone(),
        }
    }

    /// Handles not yet cancelled
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// Owned interval task; dropping it aborts the task
pub struct TimerHandle {
    task: Option<JoinHandle<()>>,
    active: Arc<AtomicUsize>,
}

impl TimerHandle {
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map(|t| t.is_finished()).unwrap_or(true)
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
