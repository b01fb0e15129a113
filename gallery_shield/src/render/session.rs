//! Gallery Shield - Render Session
//!
//! Everything one mounted protected view owns: the in-flight render task, the
//! devtools sentinel timer, the input guard lease and the protection scope.
//! [`RenderSession::teardown`] releases all of them synchronously, so nothing
//! from the previous photo is still armed when the next one mounts.

use std::sync::Arc;

use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{ShieldError, ShieldResult};
use crate::host::ProtectionRuntime;
use crate::input_guard::{GuardLease, GuardSettings};
use crate::platform::TimerHandle;
use crate::render::{RenderRequest, RenderedView, SecureImageRenderer};
use crate::scope::ScopeGuard;
use crate::sentinel::{spawn_sentinel, DevToolsSentinel};
use crate::violation::{ViolationKind, ViolationSink};

/// A mounted protected view
pub struct RenderSession {
    id: Uuid,
    photo_id: String,
    sink: ViolationSink,
    render: Option<JoinHandle<RenderedView>>,
    view: Option<RenderedView>,
    sentinel: Option<TimerHandle>,
    guard: Option<GuardLease>,
    scope: Option<ScopeGuard>,
    torn_down: bool,
}

impl RenderSession {
    /// Arm detectors and start rendering; must run inside a tokio runtime
    pub fn mount(
        renderer: Arc<SecureImageRenderer>,
        request: RenderRequest,
        sink: ViolationSink,
        runtime: &ProtectionRuntime,
    ) -> Self {
        let id = Uuid::new_v4();
        let sink = sink.with_session(id);
        let photo_id = request.media.photo_id.clone();
        let policy = request.policy.clone();

        let scope = runtime.scopes.push(sink.level());
        let guard = runtime
            .input_guard
            .acquire(GuardSettings::from_policy(&policy), sink.clone());

        let sentinel = DevToolsSentinel::for_policy(&policy, &renderer.config().sentinel).map(|sentinel| {
            let sink = sink.clone();
            spawn_sentinel(sentinel, runtime.probe.clone(), &runtime.timers, move |detection| {
                log::debug!(
                    "DevTools heuristics fired after {} samples ({:?})",
                    detection.samples_taken,
                    detection.reading
                );
                sink.emit(ViolationKind::DevtoolsDetected);
            })
        });

        let render = {
            let sink = sink.clone();
            tokio::spawn(async move { renderer.render(&request, &sink).await })
        };

        log::debug!(
            "Mounted session {} for photo {} (sentinel: {}, input guard: {})",
            id,
            photo_id,
            sentinel.is_some(),
            guard.is_some()
        );

        Self {
            id,
            photo_id,
            sink,
            render: Some(render),
            view: None,
            sentinel,
            guard,
            scope: Some(scope),
            torn_down: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn photo_id(&self) -> &str {
        &self.photo_id
    }

    pub fn is_active(&self) -> bool {
        !self.torn_down
    }

    pub fn sentinel_running(&self) -> bool {
        self.sentinel.as_ref().map(|s| !s.is_finished()).unwrap_or(false)
    }

    pub fn holds_input_lease(&self) -> bool {
        self.guard.is_some()
    }

    /// Wait for the render to finish
    pub async fn view(&mut self) -> ShieldResult<&RenderedView> {
        if let Some(task) = self.render.as_mut() {
            let outcome = task.await;
            self.render = None;
            match outcome {
                Ok(view) => self.view = Some(view),
                Err(e) if e.is_cancelled() => return Err(ShieldError::RenderCancelled),
                Err(e) => {
                    log::error!("Render task for photo {} failed: {}", self.photo_id, e);
                    self.view = Some(RenderedView::Placeholder);
                }
            }
        }
        self.view.as_ref().ok_or(ShieldError::RenderCancelled)
    }

    /// Cancel the render, stop detectors and wipe pixels; idempotent
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        // Decode work already on a blocking thread cannot be aborted; a
        // revoked sink keeps it from reporting for this photo
        self.sink.revoke();
        if let Some(task) = self.render.take() {
            task.abort();
        }
        if let Some(mut sentinel) = self.sentinel.take() {
            sentinel.cancel();
        }
        self.guard = None;
        self.scope = None;
        if let Some(mut view) = self.view.take() {
            view.release();
        }

        log::debug!("Tore down session {} for photo {}", self.id, self.photo_id);
    }
}

impl Drop for RenderSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
