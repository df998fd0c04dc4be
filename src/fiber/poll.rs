//! The poll loop
//!
//! Drives one fiber stack to quiescence: every wait that is ready to run
//! its continuation is advanced, strictly one at a time, until the stack
//! is idle (awaiting external input), finished, or empty. Failures unwind
//! one frame per iteration, mirroring a call stack.

use tokio_util::sync::CancellationToken;

use super::frame::WaitSlot;
use super::stack::FiberStack;
use super::wait::{Need, NextWait, Wait};
use crate::error::{Failure, FiberError};

impl<C> FiberStack<C> {
    /// Advance this fiber until it suspends, finishes, or empties.
    ///
    /// Returns the `Need` of the wait the loop stopped on: `None` for an
    /// empty or brand-new fiber, `Wait` when suspended awaiting external
    /// input, `Done` when the computation finished, `Poll` when the
    /// cancellation token fired before the next continuation was entered
    /// (nothing was mutated; the turn can be retried).
    ///
    /// An error from a continuation pops its frame and is delivered via
    /// `fail` to the wait below; only a failure that unwinds past the
    /// last frame is returned to the caller, unchanged.
    pub fn poll(&mut self, context: &mut C, cancel: &CancellationToken) -> Result<Need, FiberError> {
        loop {
            let need = match self.frames().last() {
                None => return Ok(Need::None),
                Some(frame) => frame.wait.need(),
            };
            match need {
                Need::None | Need::Wait | Need::Done => return Ok(need),
                // a continuation re-entered the loop mid-call
                Need::Call => return Err(FiberError::invalid_need(Need::Poll, Need::Call)),
                Need::Poll => {
                    if cancel.is_cancelled() {
                        return Ok(Need::Poll);
                    }
                    self.poll_top(context, cancel)?;
                }
            }
        }
    }

    /// Run the tail frame's continuation once.
    fn poll_top(&mut self, context: &mut C, cancel: &CancellationToken) -> Result<(), FiberError> {
        // Move the wait out of its slot for the duration of the call; the
        // marker keeps the frame observable as Need::Call and lets the
        // helpers re-arm the slot legally.
        let mut wait = {
            let Some(frame) = self.frames_mut().last_mut() else {
                return Ok(());
            };
            let Some(handle) = frame.wait.wait().map(Wait::handle) else {
                return Ok(());
            };
            match std::mem::replace(&mut frame.wait, WaitSlot::Polling(handle)) {
                WaitSlot::Occupied(wait) => wait,
                other => {
                    frame.wait = other;
                    return Ok(());
                }
            }
        };

        let outcome = match wait.begin_poll() {
            Ok((rest, item)) => rest.call(self, context, item, cancel),
            Err(error) => Err(error),
        };
        wait.finish_poll();
        self.restore_after_poll(wait);

        match outcome {
            Ok(next) => self.validate_next(next),
            Err(error) => self.unwind(error),
        }
    }

    /// Return the retired wait to its slot, unless the continuation
    /// re-armed the frame or popped it.
    fn restore_after_poll(&mut self, wait: Wait<C>) {
        let target = wait.handle();
        let slot = self
            .frames()
            .iter()
            .rposition(|frame| matches!(&frame.wait, WaitSlot::Polling(h) if *h == target));
        if let Some(index) = slot {
            self.frames_mut()[index].wait = WaitSlot::Occupied(wait);
        }
    }

    /// A continuation must hand back either the empty sentinel or the
    /// wait now armed on the tail frame; anything else is a protocol
    /// violation in that continuation.
    fn validate_next(&self, next: NextWait) -> Result<(), FiberError> {
        match next {
            NextWait::Empty => Ok(()),
            NextWait::Pending(handle) => {
                let current = self
                    .frames()
                    .last()
                    .and_then(|frame| frame.wait.wait())
                    .map(Wait::handle);
                if current == Some(handle) {
                    Ok(())
                } else {
                    Err(FiberError::InvalidNext)
                }
            }
        }
    }

    /// Unwind one frame: pop, then deliver the failure to the wait below.
    /// Past the last frame, the original error surfaces unchanged.
    fn unwind(&mut self, error: FiberError) -> Result<(), FiberError> {
        let _ = self.frames_mut().pop();
        let Some(frame) = self.frames_mut().last_mut() else {
            return Err(error);
        };
        match frame.wait.wait_mut() {
            Some(wait) => {
                wait.fail(Failure::from(&error))?;
                Ok(())
            }
            None => Err(error),
        }
    }
}
