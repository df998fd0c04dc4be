//! Fiber stack
//!
//! An ordered sequence of frames forming one logical call stack. Frames
//! are owned by the stack and addressed positionally; push and pop happen
//! only at the tail. All mutation from continuation code goes through the
//! structured helpers (`wait`, `call`, `call_with_return`, `done`,
//! `fail`, `reset`) — there is no other path into the stack.

use std::sync::Arc;

use super::frame::{CurrentWait, Frame, WaitSlot};
use super::wait::{Continuation, Need, NextWait, Wait, WaitHandle};
use crate::error::{Failure, FiberError};
use crate::value::Value;

/// The ordered sequence of frames representing one suspended, resumable
/// computation.
pub struct FiberStack<C> {
    frames: Vec<Frame<C>>,
    next_handle: u64,
}

impl<C> std::fmt::Debug for FiberStack<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FiberStack")
            .field("depth", &self.frames.len())
            .field("next_handle", &self.next_handle)
            .finish()
    }
}

impl<C> FiberStack<C> {
    /// A fresh, empty fiber.
    pub fn new() -> Self {
        Self {
            frames: Vec::new(),
            next_handle: 0,
        }
    }

    pub(crate) fn from_parts(frames: Vec<Frame<C>>, next_handle: u64) -> Self {
        Self {
            frames,
            next_handle,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub(crate) fn frames(&self) -> &[Frame<C>] {
        &self.frames
    }

    pub(crate) fn frames_mut(&mut self) -> &mut Vec<Frame<C>> {
        &mut self.frames
    }

    pub(crate) fn next_handle(&self) -> u64 {
        self.next_handle
    }

    fn alloc_handle(&mut self) -> WaitHandle {
        self.next_handle += 1;
        WaitHandle(self.next_handle)
    }

    /* ===================== Frames ===================== */

    /// Append a new empty frame.
    pub fn push(&mut self) {
        self.frames.push(Frame::new());
    }

    /// Remove the tail frame.
    ///
    /// Popping an empty stack is a continuation-discipline violation and
    /// aborts: there is no frame whose result could justify it.
    pub fn pop(&mut self) {
        if self.frames.pop().is_none() {
            panic!("pop on an empty fiber stack: continuation discipline violated");
        }
    }

    /// Pop until empty, abandoning the fiber.
    pub fn reset(&mut self) {
        self.frames.clear();
    }

    /* ===================== Current wait and mark ===================== */

    /// The tail frame's wait; the empty sentinel on an empty stack.
    pub fn current_wait(&self) -> CurrentWait<'_, C> {
        match self.frames.last() {
            None => CurrentWait::Empty,
            Some(frame) => match &frame.wait {
                WaitSlot::Empty => CurrentWait::Empty,
                WaitSlot::Polling(handle) => CurrentWait::Executing(*handle),
                WaitSlot::Occupied(wait) => CurrentWait::Active(wait),
            },
        }
    }

    /// `Need` of the tail frame's wait; `Need::None` on an empty stack.
    pub fn current_need(&self) -> Need {
        self.frames
            .last()
            .map(|frame| frame.wait.need())
            .unwrap_or(Need::None)
    }

    /// Install `wait` as the tail frame's active wait.
    ///
    /// Legal only over an unset slot, a slot whose wait is out with the
    /// poll loop, or a retired (`Done`) wait; rejected on an empty stack.
    pub fn set_current_wait(&mut self, wait: Wait<C>) -> Result<(), FiberError> {
        let Some(frame) = self.frames.last_mut() else {
            return Err(FiberError::invalid_need(Need::Done, Need::None));
        };
        if !frame.wait.can_accept() {
            return Err(FiberError::invalid_need(Need::Done, frame.wait.need()));
        }
        frame.wait = WaitSlot::Occupied(wait);
        Ok(())
    }

    /// The tail frame's mark wait.
    pub fn current_mark(&self) -> CurrentWait<'_, C> {
        match self.frames.last() {
            None => CurrentWait::Empty,
            Some(frame) => match &frame.mark {
                WaitSlot::Empty => CurrentWait::Empty,
                WaitSlot::Polling(handle) => CurrentWait::Executing(*handle),
                WaitSlot::Occupied(wait) => CurrentWait::Active(wait),
            },
        }
    }

    /// Install `wait` as the tail frame's mark; rejected on an empty
    /// stack. The mark is bookkeeping and may be overwritten freely.
    pub fn set_current_mark(&mut self, wait: Wait<C>) -> Result<(), FiberError> {
        let Some(frame) = self.frames.last_mut() else {
            return Err(FiberError::invalid_need(Need::Done, Need::None));
        };
        frame.mark = WaitSlot::Occupied(wait);
        Ok(())
    }

    /// Mark := restartable copy of the current wait, so the frame can be
    /// re-armed later without rebinding the continuation.
    pub fn save_mark(&mut self) -> Result<(), FiberError> {
        let restarted = {
            let Some(frame) = self.frames.last() else {
                return Err(FiberError::invalid_need(Need::Wait, Need::None));
            };
            match frame.wait.wait() {
                Some(wait) => wait.restart()?,
                None => return Err(FiberError::invalid_need(Need::Wait, frame.wait.need())),
            }
        };
        self.set_current_mark(restarted)
    }

    /// Current wait := restartable copy of the mark. Returns the pending
    /// wait for the continuation to hand back to the poll loop.
    pub fn rearm_from_mark(&mut self) -> Result<NextWait, FiberError> {
        let restarted = {
            let Some(frame) = self.frames.last() else {
                return Err(FiberError::invalid_need(Need::Wait, Need::None));
            };
            match frame.mark.wait() {
                Some(mark) => mark.restart()?,
                None => return Err(FiberError::invalid_need(Need::Wait, frame.mark.need())),
            }
        };
        let handle = restarted.handle();
        self.set_current_wait(restarted)?;
        Ok(NextWait::Pending(handle))
    }

    /* ===================== External input ===================== */

    /// Satisfy the current wait with an item posted from outside the
    /// fiber (the next turn's input).
    pub fn post(&mut self, item: impl Into<Value>) -> Result<(), FiberError> {
        let Some(frame) = self.frames.last_mut() else {
            return Err(FiberError::invalid_need(Need::Wait, Need::None));
        };
        let actual = frame.wait.need();
        match frame.wait.wait_mut() {
            Some(wait) => wait.post(item),
            None => Err(FiberError::invalid_need(Need::Wait, actual)),
        }
    }

    /// Fail the current wait in place, without popping. The continuation
    /// observes the failure on the next poll.
    pub fn post_failure(&mut self, failure: Failure) -> Result<(), FiberError> {
        let Some(frame) = self.frames.last_mut() else {
            return Err(FiberError::invalid_need(Need::Wait, Need::None));
        };
        let actual = frame.wait.need();
        match frame.wait.wait_mut() {
            Some(wait) => wait.fail(failure),
            None => Err(FiberError::invalid_need(Need::Wait, actual)),
        }
    }

    /* ===================== Stack discipline helpers ===================== */

    /// Schedule a continuation on the current frame without pushing: a
    /// sibling step within the same logical scope.
    pub fn wait(&mut self, rest: Arc<dyn Continuation<C>>) -> Result<NextWait, FiberError> {
        let handle = self.alloc_handle();
        let mut wait = Wait::inert(handle);
        wait.arm(rest)?;
        self.set_current_wait(wait)?;
        Ok(NextWait::Pending(handle))
    }

    /// Enter a child scope: push a frame, schedule `rest` there, and
    /// immediately post `item` to it.
    ///
    /// The parent frame's wait is left untouched; a `done` from the child
    /// has nowhere to deliver unless the caller armed the parent first
    /// (see [`FiberStack::call_with_return`]).
    pub fn call(
        &mut self,
        rest: Arc<dyn Continuation<C>>,
        item: impl Into<Value>,
    ) -> Result<NextWait, FiberError> {
        let handle = self.alloc_handle();
        let mut wait = Wait::inert(handle);
        wait.arm(rest)?;
        wait.post(item)?;
        self.push();
        self.set_current_wait(wait)?;
        Ok(NextWait::Empty)
    }

    /// Enter a child scope and register `done_rest` on the current frame
    /// to receive the child's result.
    pub fn call_with_return(
        &mut self,
        rest: Arc<dyn Continuation<C>>,
        item: impl Into<Value>,
        done_rest: Arc<dyn Continuation<C>>,
    ) -> Result<NextWait, FiberError> {
        if self.frames.is_empty() {
            return Err(FiberError::invalid_need(Need::Done, Need::None));
        }
        let handle = self.alloc_handle();
        let mut ret = Wait::inert(handle);
        ret.arm(done_rest)?;
        self.set_current_wait(ret)?;
        self.call(rest, item)
    }

    /// Return a value to the parent scope: pop the current frame and post
    /// `result` to the wait now exposed by the new tail frame.
    pub fn done(&mut self, result: impl Into<Value>) -> Result<NextWait, FiberError> {
        self.pop();
        let Some(frame) = self.frames.last_mut() else {
            // the empty sentinel rejects the post
            return Err(FiberError::invalid_need(Need::Wait, Need::None));
        };
        let actual = frame.wait.need();
        match frame.wait.wait_mut() {
            Some(wait) => {
                wait.post(result)?;
                Ok(NextWait::Empty)
            }
            None => Err(FiberError::invalid_need(Need::Wait, actual)),
        }
    }

    /// Propagate a failure to the parent scope: pop the current frame and
    /// fail the wait now exposed by the new tail frame.
    pub fn fail(&mut self, failure: Failure) -> Result<NextWait, FiberError> {
        self.pop();
        let Some(frame) = self.frames.last_mut() else {
            return Err(FiberError::invalid_need(Need::Wait, Need::None));
        };
        let actual = frame.wait.need();
        match frame.wait.wait_mut() {
            Some(wait) => {
                wait.fail(failure)?;
                Ok(NextWait::Empty)
            }
            None => Err(FiberError::invalid_need(Need::Wait, actual)),
        }
    }
}

impl<C> Default for FiberStack<C> {
    fn default() -> Self {
        Self::new()
    }
}
