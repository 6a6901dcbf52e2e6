//! Pipeline runtime state and the controller guarding transitions.
//!
//! The pipeline itself belongs to the media engine; the core only holds a
//! [`PipelineHandle`] to it. [`PipelineController`] remembers the last state
//! it asked for and rejects requests that cannot make progress:
//!
//! ```text
//! no handle bound          -> PipelineStateError::NoPipeline
//! same state as last time  -> PipelineStateError::Redundant   (engine not called)
//! engine refuses           -> PipelineStateError::ChangeFailed (state unchanged)
//! ```
//!
//! There is no retry: a failed request is reported and the caller decides
//! whether to re-issue it.

use crate::error::{PipelineStateError, Result};

/// Mirrors the engine's element states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineState {
    #[default]
    Null,
    Ready,
    Paused,
    Playing,
}

/// Engine-side pipeline that can be driven between states.
pub trait PipelineHandle: Send {
    fn set_state(&mut self, state: PipelineState) -> Result<()>;
}

#[derive(Debug)]
pub struct PipelineController<H> {
    handle: Option<H>,
    state: PipelineState,
}

impl<H: PipelineHandle> PipelineController<H> {
    pub fn new() -> Self {
        Self {
            handle: None,
            state: PipelineState::Null,
        }
    }

    /// Bind a freshly constructed pipeline. The recorded state restarts at
    /// [`PipelineState::Null`].
    pub fn bind(&mut self, handle: H) {
        self.handle = Some(handle);
        self.state = PipelineState::Null;
    }

    /// Release the handle, returning it to the caller.
    pub fn unbind(&mut self) -> Option<H> {
        self.state = PipelineState::Null;
        self.handle.take()
    }

    pub fn is_bound(&self) -> bool {
        self.handle.is_some()
    }

    /// The last state successfully requested.
    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn update_state(&mut self, new_state: PipelineState) -> Result<()> {
        let handle = self.handle.as_mut().ok_or(PipelineStateError::NoPipeline)?;

        if self.state == new_state {
            tracing::debug!(state = ?new_state, "pipeline already in requested state");
            return Err(PipelineStateError::Redundant(new_state).into());
        }

        if let Err(e) = handle.set_state(new_state) {
            tracing::warn!(from = ?self.state, to = ?new_state, error = %e, "pipeline state change failed");
            return Err(PipelineStateError::ChangeFailed {
                from: self.state,
                to: new_state,
                reason: e.to_string(),
            }
            .into());
        }

        tracing::debug!(from = ?self.state, to = ?new_state, "pipeline state changed");
        self.state = new_state;
        Ok(())
    }
}

impl<H: PipelineHandle> Default for PipelineController<H> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScreencastError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingPipeline {
        calls: Arc<AtomicUsize>,
        refuse: Option<PipelineState>,
    }

    impl PipelineHandle for CountingPipeline {
        fn set_state(&mut self, state: PipelineState) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.refuse == Some(state) {
                return Err(ScreencastError::Engine("state change failure".into()));
            }
            Ok(())
        }
    }

    fn controller(refuse: Option<PipelineState>) -> (PipelineController<CountingPipeline>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut controller = PipelineController::new();
        controller.bind(CountingPipeline {
            calls: calls.clone(),
            refuse,
        });
        (controller, calls)
    }

    #[test]
    fn redundant_request_skips_engine() {
        let (mut controller, calls) = controller(None);
        controller.update_state(PipelineState::Playing).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let err = controller.update_state(PipelineState::Playing).unwrap_err();
        assert!(matches!(
            err,
            ScreencastError::PipelineState(PipelineStateError::Redundant(PipelineState::Playing))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(controller.state(), PipelineState::Playing);
    }

    #[test]
    fn unbound_controller_rejects_everything() {
        let mut controller: PipelineController<CountingPipeline> = PipelineController::new();
        for state in [
            PipelineState::Null,
            PipelineState::Ready,
            PipelineState::Paused,
            PipelineState::Playing,
        ] {
            assert!(matches!(
                controller.update_state(state),
                Err(ScreencastError::PipelineState(PipelineStateError::NoPipeline))
            ));
        }
    }

    #[test]
    fn failed_change_keeps_state() {
        let (mut controller, calls) = controller(Some(PipelineState::Playing));
        controller.update_state(PipelineState::Ready).unwrap();

        let err = controller.update_state(PipelineState::Playing).unwrap_err();
        assert!(matches!(
            err,
            ScreencastError::PipelineState(PipelineStateError::ChangeFailed { .. })
        ));
        assert_eq!(controller.state(), PipelineState::Ready);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unbind_resets_state() {
        let (mut controller, _) = controller(None);
        controller.update_state(PipelineState::Playing).unwrap();
        assert!(controller.unbind().is_some());
        assert!(!controller.is_bound());
        assert_eq!(controller.state(), PipelineState::Null);
        assert!(controller.update_state(PipelineState::Ready).is_err());
    }
}
