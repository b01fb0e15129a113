//! Gallery Shield - Violation Escalation
//!
//! Central, auditable mapping from (level, violation) to a response. The
//! decision functions are pure; [`Escalator`] turns decisions into commands
//! for the hosting view.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::EscalationConfig;
use crate::policy::ProtectionLevel;
use crate::violation::{ViolationEvent, ViolationKind, ViolationReporter};

/// Response to a violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Record only
    Log,
    /// Close the current viewer, keep the gallery open
    CloseViewer,
    /// Send the visitor away from the gallery
    Redirect,
}

/// Where the violation happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewContext {
    /// A single-photo surface (lightbox, hero, story slide)
    Viewer,
    /// The gallery grid itself
    Gallery,
}

/// Single-photo escalation table
pub fn decide(level: ProtectionLevel, kind: ViolationKind) -> Action {
    use ViolationKind::*;

    match level {
        ProtectionLevel::Basic | ProtectionLevel::Standard => Action::Log,
        ProtectionLevel::Enhanced => match kind {
            DevtoolsDetected | PrintScreenDetected => Action::CloseViewer,
            CanvasAccessBlocked | KeyboardShortcutBlocked | ClipboardCaptureAttempt => Action::Log,
        },
        ProtectionLevel::Maximum => match kind {
            DevtoolsDetected | PrintScreenDetected | CanvasAccessBlocked => Action::CloseViewer,
            KeyboardShortcutBlocked | ClipboardCaptureAttempt => Action::Log,
        },
    }
}

/// Escalation with gallery-level context
///
/// Devtools detected while browsing the grid under `Maximum` redirects;
/// everything else follows [`decide`].
pub fn decide_in(context: ViewContext, level: ProtectionLevel, kind: ViolationKind) -> Action {
    match (context, level, kind) {
        (ViewContext::Gallery, ProtectionLevel::Maximum, ViolationKind::DevtoolsDetected) => {
            Action::Redirect
        }
        _ => decide(level, kind),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ESCALATOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Instruction for the hosting view
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum HostCommand {
    /// Show a toast, then close the viewer that raised the violation
    CloseViewer {
        notice: String,
        toast_duration_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<Uuid>,
    },
    /// Navigate away without detail
    Redirect { location: String },
}

impl HostCommand {
    /// Session the command targets; `None` applies to whatever is mounted
    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            HostCommand::CloseViewer { session_id, .. } => *session_id,
            HostCommand::Redirect { .. } => None,
        }
    }
}

/// Applies [`decide_in`] to every reported event and forwards the resulting
/// command to the host
pub struct Escalator {
    context: ViewContext,
    config: EscalationConfig,
    commands: mpsc::UnboundedSender<HostCommand>,
}

impl Escalator {
    pub fn new(
        context: ViewContext,
        config: EscalationConfig,
    ) -> (Self, mpsc::UnboundedReceiver<HostCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                context,
                config,
                commands: tx,
            },
            rx,
        )
    }

    /// Command for an action; `Log` yields none
    pub fn command_for(&self, action: Action, session_id: Option<Uuid>) -> Option<HostCommand> {
        match action {
            Action::Log => None,
            Action::CloseViewer => Some(HostCommand::CloseViewer {
                notice: self.config.close_notice.clone(),
                toast_duration_ms: self.config.toast_duration_ms,
                session_id,
            }),
            Action::Redirect => Some(HostCommand::Redirect {
                location: self.config.redirect_location.clone(),
            }),
        }
    }
}

impl ViolationReporter for Escalator {
    fn report(&self, event: &ViolationEvent) {
        let action = decide_in(self.context, event.protection_level, event.kind);
        log::info!(
            "Escalation: {} at {} ({:?}) -> {:?}",
            event.kind.as_str(),
            event.protection_level,
            self.context,
            action
        );

        if let Some(command) = self.command_for(action, event.session_id) {
            // Receiver gone means the host already unmounted
            if self.commands.send(command).is_err() {
                log::debug!("Escalation dropped, host no longer listening");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use ProtectionLevel::*;
    use ViolationKind::*;

    #[test]
    fn test_full_decision_table() {
        let expected: [(ProtectionLevel, [Action; 5]); 4] = [
            (Basic, [Action::Log; 5]),
            (Standard, [Action::Log; 5]),
            (
                Enhanced,
                [Action::CloseViewer, Action::CloseViewer, Action::Log, Action::Log, Action::Log],
            ),
            (
                Maximum,
                [
                    Action::CloseViewer,
                    Action::CloseViewer,
                    Action::CloseViewer,
                    Action::Log,
                    Action::Log,
                ],
            ),
        ];

        for (level, actions) in expected {
            for (kind, action) in ViolationKind::ALL.iter().zip(actions) {
                assert_eq!(decide(level, *kind), action, "{} / {}", level, kind.as_str());
                assert_eq!(decide(level, *kind), decide(level, *kind));
            }
        }
    }

    #[test]
    fn test_named_scenarios() {
        assert_eq!(decide(Maximum, DevtoolsDetected), Action::CloseViewer);
        assert_eq!(decide(Basic, DevtoolsDetected), Action::Log);
    }

    #[test]
    fn test_gallery_context_redirects_only_for_maximum_devtools() {
        assert_eq!(decide_in(ViewContext::Gallery, Maximum, DevtoolsDetected), Action::Redirect);
        assert_eq!(
            decide_in(ViewContext::Viewer, Maximum, DevtoolsDetected),
            Action::CloseViewer
        );
        assert_eq!(
            decide_in(ViewContext::Gallery, Enhanced, DevtoolsDetected),
            Action::CloseViewer
        );
        assert_eq!(
            decide_in(ViewContext::Gallery, Maximum, PrintScreenDetected),
            Action::CloseViewer
        );
    }

    #[test]
    fn test_escalator_emits_commands() {
        let (escalator, mut rx) = Escalator::new(ViewContext::Viewer, EscalationConfig::default());
        let session = Uuid::new_v4();
        let event = |kind, level| ViolationEvent {
            kind,
            photo_id: "p1".into(),
            protection_level: level,
            timestamp: Utc::now(),
            session_id: Some(session),
        };

        escalator.report(&event(KeyboardShortcutBlocked, Maximum));
        assert!(rx.try_recv().is_err());

        escalator.report(&event(DevtoolsDetected, Maximum));
        let command = rx.try_recv().unwrap();
        assert_eq!(command.session_id(), Some(session));
        match command {
            HostCommand::CloseViewer { notice, .. } => assert!(!notice.contains("devtools")),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_escalator_redirect_hides_detail() {
        let (escalator, mut rx) = Escalator::new(ViewContext::Gallery, EscalationConfig::default());
        escalator.report(&ViolationEvent {
            kind: DevtoolsDetected,
            photo_id: "grid".into(),
            protection_level: Maximum,
            timestamp: Utc::now(),
            session_id: Some(Uuid::new_v4()),
        });
        let command = rx.try_recv().unwrap();
        assert_eq!(command, HostCommand::Redirect { location: "/".into() });
        assert_eq!(command.session_id(), None);
    }
}
