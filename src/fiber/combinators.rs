//! Continuation combinators
//!
//! Small wrappers that adapt a continuation to a calling convention:
//! `void_of` absorbs a child's result so the fiber retires cleanly, and
//! `loop_of` re-enters a continuation a fixed number of times with the
//! original item. Both persist structurally through the combinator
//! surrogate provider.

use std::any::Any;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::stack::FiberStack;
use super::wait::{Continuation, Item, NextWait};
use crate::error::FiberError;
use crate::value::{TypeExpect, Value};

/// Run `rest` as a child computation and discard its result, so the
/// enclosing frame finishes once the child returns.
pub fn void_of<C: 'static>(rest: Arc<dyn Continuation<C>>) -> Arc<dyn Continuation<C>> {
    Arc::new(VoidCont { rest })
}

/// Run `rest` `count` times, feeding it the original item on every
/// iteration; the last iteration's result is returned to the parent.
pub fn loop_of<C: 'static>(
    rest: Arc<dyn Continuation<C>>,
    count: u32,
) -> Arc<dyn Continuation<C>> {
    Arc::new(LoopCont {
        rest,
        remaining: count,
    })
}

pub(crate) struct VoidCont<C> {
    pub(crate) rest: Arc<dyn Continuation<C>>,
}

impl<C: 'static> Continuation<C> for VoidCont<C> {
    fn expects(&self) -> TypeExpect {
        self.rest.expects()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn call(
        &self,
        stack: &mut FiberStack<C>,
        _context: &mut C,
        item: Item,
        _cancel: &CancellationToken,
    ) -> Result<NextWait, FiberError> {
        stack.call_with_return(self.rest.clone(), item.into_value()?, Arc::new(VoidDone))
    }
}

/// Receives the child's result on behalf of [`VoidCont`] and drops it; a
/// child failure still propagates.
pub(crate) struct VoidDone;

impl<C: 'static> Continuation<C> for VoidDone {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn call(
        &self,
        _stack: &mut FiberStack<C>,
        _context: &mut C,
        item: Item,
        _cancel: &CancellationToken,
    ) -> Result<NextWait, FiberError> {
        item.into_value()?;
        Ok(NextWait::Empty)
    }
}

pub(crate) struct LoopCont<C> {
    pub(crate) rest: Arc<dyn Continuation<C>>,
    pub(crate) remaining: u32,
}

impl<C: 'static> Continuation<C> for LoopCont<C> {
    fn expects(&self) -> TypeExpect {
        self.rest.expects()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn call(
        &self,
        stack: &mut FiberStack<C>,
        _context: &mut C,
        item: Item,
        _cancel: &CancellationToken,
    ) -> Result<NextWait, FiberError> {
        let item = item.into_value()?;
        if self.remaining == 0 {
            return stack.done(item);
        }
        let step = LoopStep {
            rest: self.rest.clone(),
            remaining: self.remaining - 1,
            item: item.clone(),
        };
        stack.call_with_return(self.rest.clone(), item, Arc::new(step))
    }
}

/// One iteration boundary of [`LoopCont`]: receives the body's result and
/// either re-enters the body with the stored item or returns upward.
pub(crate) struct LoopStep<C> {
    pub(crate) rest: Arc<dyn Continuation<C>>,
    pub(crate) remaining: u32,
    pub(crate) item: Value,
}

impl<C: 'static> Continuation<C> for LoopStep<C> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn call(
        &self,
        stack: &mut FiberStack<C>,
        _context: &mut C,
        item: Item,
        _cancel: &CancellationToken,
    ) -> Result<NextWait, FiberError> {
        let result = item.into_value()?;
        if self.remaining == 0 {
            return stack.done(result);
        }
        let step = LoopStep {
            rest: self.rest.clone(),
            remaining: self.remaining - 1,
            item: self.item.clone(),
        };
        stack.call_with_return(self.rest.clone(), self.item.clone(), Arc::new(step))
    }
}
