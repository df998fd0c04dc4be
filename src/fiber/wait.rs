//! Wait lifecycle
//!
//! A `Wait` is one suspended computation slot: the continuation to run
//! next, the five-state `Need` lifecycle governing which operations are
//! legal, and at most one of a held result or a held failure.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::stack::FiberStack;
use crate::error::{Failure, FiberError};
use crate::value::{TypeExpect, Value};

/* ===================== Need ===================== */

/// Stage of a wait, showing what it needs during its lifecycle.
///
/// Only forward transitions are legal:
/// `None -> Wait` (arm), `Wait -> Poll` (post/fail), `Poll -> Call`
/// (the poll loop enters the continuation), `Call -> Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Need {
    /// The wait is inert; nothing is bound yet.
    None,
    /// Awaiting an item to be posted.
    Wait,
    /// An item or failure has been posted; the wait needs to be polled.
    Poll,
    /// The continuation is executing.
    Call,
    /// The continuation has returned; the wait is retired.
    Done,
}

/* ===================== Handles and next-wait protocol ===================== */

/// Stable identifier of a wait, assigned by the owning stack.
///
/// Handles survive persistence and back the next-wait protocol check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WaitHandle(pub(crate) u64);

impl fmt::Display for WaitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wait#{}", self.0)
    }
}

/// What a continuation returns: the next thing to wait on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextWait {
    /// The current frame's armed wait, named by handle.
    Pending(WaitHandle),
    /// Nothing further on this frame; the poll loop resumes from the
    /// stack as the continuation left it.
    Empty,
}

/* ===================== Items ===================== */

/// What a continuation receives: the posted value or the failure that
/// travelled up from a deeper frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Posted(Value),
    Failed(Failure),
}

impl Item {
    /// Borrow the posted value, or surface the failure as an error.
    pub fn value(&self) -> Result<&Value, FiberError> {
        match self {
            Item::Posted(value) => Ok(value),
            Item::Failed(failure) => Err(FiberError::Failed(failure.clone())),
        }
    }

    /// Take the posted value, or surface the failure as an error.
    pub fn into_value(self) -> Result<Value, FiberError> {
        match self {
            Item::Posted(value) => Ok(value),
            Item::Failed(failure) => Err(FiberError::Failed(failure)),
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Item::Failed(failure) => Some(failure),
            Item::Posted(_) => None,
        }
    }
}

/* ===================== Continuations ===================== */

/// A function bound to a wait, invoked with the posted item or failure,
/// producing the next wait.
///
/// Continuations mutate the stack only through its structured helpers
/// (`wait`, `call`, `call_with_return`, `done`, `fail`). A continuation
/// that observes cancellation should return promptly; the poll loop also
/// checks the token before each dispatch, leaving an unpolled wait in
/// `Poll` so the turn can be retried.
pub trait Continuation<C> {
    /// Declared type of the item this continuation waits for.
    fn expects(&self) -> TypeExpect {
        TypeExpect::Any
    }

    /// Stable name under which this continuation is registered for
    /// persistence, if any. Anonymous continuations cannot be saved.
    fn name(&self) -> Option<&str> {
        None
    }

    fn as_any(&self) -> &dyn Any;

    fn call(
        &self,
        stack: &mut FiberStack<C>,
        context: &mut C,
        item: Item,
        cancel: &CancellationToken,
    ) -> Result<NextWait, FiberError>;
}

type RestFn<C> =
    dyn Fn(&mut FiberStack<C>, &mut C, Item, &CancellationToken) -> Result<NextWait, FiberError>;

/// A continuation backed by a plain function or closure.
pub struct FnContinuation<C> {
    name: Option<String>,
    expects: TypeExpect,
    rest: Box<RestFn<C>>,
}

impl<C: 'static> FnContinuation<C> {
    /// An anonymous continuation. Runs fine, but cannot be persisted.
    pub fn new<F>(expects: TypeExpect, rest: F) -> Self
    where
        F: Fn(&mut FiberStack<C>, &mut C, Item, &CancellationToken) -> Result<NextWait, FiberError>
            + 'static,
    {
        Self {
            name: None,
            expects,
            rest: Box::new(rest),
        }
    }

    /// A continuation carrying a stable name; register the same instance
    /// in a `ContinuationRegistry` to make fibers holding it persistable.
    pub fn named<F>(name: impl Into<String>, expects: TypeExpect, rest: F) -> Self
    where
        F: Fn(&mut FiberStack<C>, &mut C, Item, &CancellationToken) -> Result<NextWait, FiberError>
            + 'static,
    {
        Self {
            name: Some(name.into()),
            expects,
            rest: Box::new(rest),
        }
    }
}

impl<C: 'static> Continuation<C> for FnContinuation<C> {
    fn expects(&self) -> TypeExpect {
        self.expects.clone()
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn call(
        &self,
        stack: &mut FiberStack<C>,
        context: &mut C,
        item: Item,
        cancel: &CancellationToken,
    ) -> Result<NextWait, FiberError> {
        (self.rest)(stack, context, item, cancel)
    }
}

/// Diagnostic label for a continuation, used in capture errors.
pub(crate) fn describe_continuation<C>(continuation: &dyn Continuation<C>) -> String {
    match continuation.name() {
        Some(name) => format!("'{name}'"),
        None => format!("<anonymous> (expects {})", continuation.expects()),
    }
}

/* ===================== Wait ===================== */

/// A single pending continuation plus its lifecycle state and held
/// result or failure.
///
/// Invariant: while in `Poll`, exactly one of the result or the failure
/// is set; in every other state, neither is.
pub struct Wait<C> {
    handle: WaitHandle,
    need: Need,
    expects: TypeExpect,
    rest: Option<Arc<dyn Continuation<C>>>,
    item: Option<Value>,
    fail: Option<Failure>,
}

impl<C> Wait<C> {
    pub(crate) fn inert(handle: WaitHandle) -> Self {
        Self {
            handle,
            need: Need::None,
            expects: TypeExpect::Any,
            rest: None,
            item: None,
            fail: None,
        }
    }

    pub(crate) fn from_parts(
        handle: WaitHandle,
        need: Need,
        expects: TypeExpect,
        rest: Option<Arc<dyn Continuation<C>>>,
        item: Option<Value>,
        fail: Option<Failure>,
    ) -> Self {
        Self {
            handle,
            need,
            expects,
            rest,
            item,
            fail,
        }
    }

    pub fn handle(&self) -> WaitHandle {
        self.handle
    }

    pub fn need(&self) -> Need {
        self.need
    }

    pub fn expects(&self) -> &TypeExpect {
        &self.expects
    }

    /// The held result, while in `Poll` with a posted item.
    pub fn item(&self) -> Option<&Value> {
        self.item.as_ref()
    }

    /// The held failure, while in `Poll` after a `fail`.
    pub fn pending_failure(&self) -> Option<&Failure> {
        self.fail.as_ref()
    }

    pub(crate) fn rest(&self) -> Option<&Arc<dyn Continuation<C>>> {
        self.rest.as_ref()
    }

    /// Bind a continuation. Legal only while inert (`Need::None`).
    pub fn arm(&mut self, rest: Arc<dyn Continuation<C>>) -> Result<(), FiberError> {
        self.ensure(Need::None)?;
        self.expects = rest.expects();
        self.rest = Some(rest);
        self.need = Need::Wait;
        Ok(())
    }

    /// Satisfy this wait with an item. Legal only in `Need::Wait`.
    ///
    /// Static kind match first, then type-tag dispatch for opaque values;
    /// a value that satisfies neither fails the wait with an invalid-type
    /// failure so the continuation observes it.
    pub fn post(&mut self, item: impl Into<Value>) -> Result<(), FiberError> {
        self.ensure(Need::Wait)?;
        let item = item.into();
        if self.expects.admits(&item) {
            self.item = Some(item);
            self.fail = None;
            self.need = Need::Poll;
        } else {
            let error = FiberError::InvalidType {
                expected: self.expects.to_string(),
                posted: item.describe(),
            };
            self.item = None;
            self.fail = Some(Failure::from(&error));
            self.need = Need::Poll;
        }
        Ok(())
    }

    /// Satisfy this wait with a failure. Legal only in `Need::Wait`.
    pub fn fail(&mut self, failure: Failure) -> Result<(), FiberError> {
        self.ensure(Need::Wait)?;
        self.item = None;
        self.fail = Some(failure);
        self.need = Need::Poll;
        Ok(())
    }

    /// A fresh wait referencing the same continuation: same handle, state
    /// reset to `Need::Wait`, no held result or failure. Used to restart
    /// a loop without rebinding the continuation.
    pub fn restart(&self) -> Result<Wait<C>, FiberError> {
        let rest = self
            .rest
            .clone()
            .ok_or(FiberError::invalid_need(Need::Wait, self.need))?;
        let expects = rest.expects();
        Ok(Wait {
            handle: self.handle,
            need: Need::Wait,
            expects,
            rest: Some(rest),
            item: None,
            fail: None,
        })
    }

    /// Enter the continuation: `Poll -> Call`, yielding the continuation
    /// and the held item or failure. The poll loop owns the dance and
    /// retires the wait with [`Wait::finish_poll`] afterwards.
    pub(crate) fn begin_poll(&mut self) -> Result<(Arc<dyn Continuation<C>>, Item), FiberError> {
        self.ensure(Need::Poll)?;
        let item = match (self.item.take(), self.fail.take()) {
            (Some(value), None) => Item::Posted(value),
            (None, Some(failure)) => Item::Failed(failure),
            _ => {
                return Err(FiberError::Failed(Failure::new(
                    "corrupt-wait",
                    format!("{} in Poll holds neither item nor failure", self.handle),
                )))
            }
        };
        let rest = self.rest.clone().ok_or_else(|| {
            FiberError::Failed(Failure::new(
                "corrupt-wait",
                format!("{} in Poll has no continuation bound", self.handle),
            ))
        })?;
        self.need = Need::Call;
        Ok((rest, item))
    }

    /// Retire the wait after its continuation returned, whatever the
    /// outcome: `Call -> Done`.
    pub(crate) fn finish_poll(&mut self) {
        self.need = Need::Done;
    }

    fn ensure(&self, expected: Need) -> Result<(), FiberError> {
        if self.need == expected {
            Ok(())
        } else {
            Err(FiberError::invalid_need(expected, self.need))
        }
    }
}

impl<C> fmt::Debug for Wait<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wait")
            .field("handle", &self.handle)
            .field("need", &self.need)
            .field("expects", &self.expects)
            .field("bound", &self.rest.is_some())
            .field("item", &self.item)
            .field("fail", &self.fail)
            .finish()
    }
}
