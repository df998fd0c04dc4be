//! Test helpers for fiber tests
//!
//! Small continuation builders over a recording context, so tests can
//! assert exactly which continuation ran and what it received.

use std::any::Any;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{Failure, FiberError};
use crate::fiber::wait::{Continuation, FnContinuation, Item, NextWait};
use crate::value::{OpaqueValue, TypeExpect, Value, ValueKind};

/// Context shared by test continuations: a log of who received what.
#[derive(Default)]
pub struct Ctx {
    pub seen: Vec<(String, Item)>,
}

impl Ctx {
    pub fn record(&mut self, label: &str, item: &Item) {
        self.seen.push((label.to_string(), item.clone()));
    }
}

pub fn token() -> CancellationToken {
    CancellationToken::new()
}

pub fn num() -> TypeExpect {
    TypeExpect::Kind(ValueKind::Num)
}

pub fn str_() -> TypeExpect {
    TypeExpect::Kind(ValueKind::Str)
}

pub fn posted(value: impl Into<Value>) -> Item {
    Item::Posted(value.into())
}

/// Records its item and finishes the frame.
pub fn finish(label: &'static str, expects: TypeExpect) -> Arc<dyn Continuation<Ctx>> {
    Arc::new(FnContinuation::new(
        expects,
        move |_stack, ctx: &mut Ctx, item, _cancel| {
            ctx.record(label, &item);
            Ok(NextWait::Empty)
        },
    ))
}

/// Records its item, then returns `result` to the parent frame.
pub fn done_with(
    label: &'static str,
    expects: TypeExpect,
    result: Value,
) -> Arc<dyn Continuation<Ctx>> {
    Arc::new(FnContinuation::new(
        expects,
        move |stack, ctx: &mut Ctx, item, _cancel| {
            ctx.record(label, &item);
            stack.done(result.clone())
        },
    ))
}

/// Records its item, then raises `failure`.
pub fn failing(
    label: &'static str,
    expects: TypeExpect,
    failure: Failure,
) -> Arc<dyn Continuation<Ctx>> {
    Arc::new(FnContinuation::new(
        expects,
        move |_stack, ctx: &mut Ctx, item, _cancel| {
            ctx.record(label, &item);
            Err(FiberError::Failed(failure.clone()))
        },
    ))
}

/// Opaque value with an explicit tag chain, for variance tests.
#[derive(Debug)]
pub struct Badge {
    pub id: u32,
    pub tags: &'static [&'static str],
}

impl OpaqueValue for Badge {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_tags(&self) -> &[&'static str] {
        self.tags
    }
}
