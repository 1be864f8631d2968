// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Background attach jobs.
//!
//! A job owns a child cancellation token registered as a teardown listener
//! on the project's session, so stopping the session cancels the attach.
//! The listener is removed again whichever way the job ends.

use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::attacher::{AttachPhase, AttachRequest, DebugAttacher, DebugTarget};
use super::connector::DebugConnector;
use crate::error::AttachError;
use crate::session::EventKind;

/// Handle to an attach request running in the background.
pub struct AttachJob<T> {
    project: String,
    cancel: CancellationToken,
    phase: watch::Receiver<AttachPhase>,
    result: oneshot::Receiver<Result<DebugTarget<T>, AttachError>>,
}

impl<T: Send + 'static> AttachJob<T> {
    /// Starts attaching on the current tokio runtime.
    ///
    /// The job is cancelled by `parent`, by [`Self::cancel`], or by the
    /// project's session closing, whichever comes first.
    pub fn spawn<C>(
        attacher: Arc<DebugAttacher<C>>,
        request: AttachRequest,
        parent: &CancellationToken,
    ) -> Self
    where
        C: DebugConnector<Target = T> + 'static,
    {
        let cancel = parent.child_token();
        let registry = attacher.registry().clone();
        let project = request.project.clone();

        let listener = registry.register_listener(&project, Arc::new(cancel.clone()));
        if registry.is_marked_closed(&project) {
            // Closed before we registered, so the listener will never fire.
            cancel.cancel();
        }

        let (phase_tx, phase) = watch::channel(AttachPhase::Idle);
        let (result_tx, result) = oneshot::channel();
        let token = cancel.clone();

        tokio::spawn(async move {
            let outcome = attacher.run(&request, &token, &phase_tx).await;
            registry.deregister_listener(&request.project, listener);

            match &outcome {
                Ok(target) => {
                    registry.events().send(EventKind::DebuggerAttached {
                        project: target.project.clone(),
                        host: target.host.clone(),
                        port: target.port,
                    });
                }
                Err(e) => {
                    if e.is_cancelled() {
                        info!("Debugger attach for {} cancelled", request.project);
                    } else {
                        warn!("Debugger attach for {} failed: {}", request.project, e);
                    }
                    registry.events().send(EventKind::AttachFailed {
                        project: request.project.clone(),
                        message: e.to_string(),
                        cancelled: e.is_cancelled(),
                    });
                }
            }

            // The handle may have been dropped; nobody is left to tell.
            let _ = result_tx.send(outcome);
        });

        Self {
            project,
            cancel,
            phase,
            result,
        }
    }

    /// Project the job attaches to.
    #[must_use]
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Requests cancellation. Observed within one retry interval.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> AttachPhase {
        *self.phase.borrow()
    }

    /// A receiver that follows phase changes.
    #[must_use]
    pub fn phases(&self) -> watch::Receiver<AttachPhase> {
        self.phase.clone()
    }

    /// Waits for the job to finish.
    ///
    /// # Errors
    ///
    /// Returns the attach error; a job whose task vanished counts as
    /// cancelled.
    pub async fn wait(self) -> Result<DebugTarget<T>, AttachError> {
        self.result.await.unwrap_or(Err(AttachError::Cancelled))
    }
}
