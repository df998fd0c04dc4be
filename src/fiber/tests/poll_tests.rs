//! Poll loop tests
//!
//! These mirror the calling conventions dialog code actually uses: a root
//! call, sibling waits on one frame, child scopes entered with
//! `call_with_return`, and failures unwinding one frame at a time.

use std::sync::Arc;

use super::helpers::{done_with, failing, finish, num, posted, str_, token, Badge, Ctx};
use crate::error::{Failure, FiberError};
use crate::fiber::stack::FiberStack;
use crate::fiber::wait::{FnContinuation, Item, Need, NextWait, WaitHandle};
use crate::value::{TypeExpect, Value};

#[test]
fn polling_an_empty_stack_returns_the_empty_need() {
    let mut stack: FiberStack<Ctx> = FiberStack::new();
    let mut ctx = Ctx::default();

    let need = stack.poll(&mut ctx, &token()).unwrap();
    assert_eq!(need, Need::None);
    assert!(ctx.seen.is_empty());
}

#[test]
fn one_call_runs_to_done() {
    let mut stack: FiberStack<Ctx> = FiberStack::new();
    let mut ctx = Ctx::default();

    stack.call(finish("m", num()), 42).unwrap();
    let need = stack.poll(&mut ctx, &token()).unwrap();

    assert_eq!(need, Need::Done);
    assert_eq!(ctx.seen, vec![("m".to_string(), posted(42))]);
}

#[test]
fn done_without_a_parent_wait_surfaces_invalid_need() {
    let mut stack: FiberStack<Ctx> = FiberStack::new();
    let mut ctx = Ctx::default();

    stack
        .call(done_with("m", num(), Value::from(42)), 1)
        .unwrap();
    let error = stack.poll(&mut ctx, &token()).unwrap_err();
    assert_eq!(error.code(), "invalid-need");
}

#[test]
fn a_call_inside_a_continuation_enters_the_child_scope() {
    let mut stack: FiberStack<Ctx> = FiberStack::new();
    let mut ctx = Ctx::default();

    let two = finish("two", str_());
    let one = Arc::new(FnContinuation::new(
        num(),
        move |stack: &mut FiberStack<Ctx>, ctx: &mut Ctx, item: Item, _cancel| {
            ctx.record("one", &item);
            stack.call(two.clone(), "hello world")
        },
    ));

    stack.call(one, 42).unwrap();
    let need = stack.poll(&mut ctx, &token()).unwrap();

    assert_eq!(need, Need::Done);
    assert_eq!(
        ctx.seen,
        vec![
            ("one".to_string(), posted(42)),
            ("two".to_string(), posted("hello world")),
        ]
    );
}

#[test]
fn call_with_return_routes_the_child_result_back() {
    let mut stack: FiberStack<Ctx> = FiberStack::new();
    let mut ctx = Ctx::default();

    let two = done_with("two", str_(), Value::from(7));
    let one_done = finish("one-done", num());
    let one = Arc::new(FnContinuation::new(
        num(),
        move |stack: &mut FiberStack<Ctx>, ctx: &mut Ctx, item: Item, _cancel| {
            ctx.record("one", &item);
            stack.call_with_return(two.clone(), "hello world", one_done.clone())
        },
    ));

    stack.call(one, 42).unwrap();
    let need = stack.poll(&mut ctx, &token()).unwrap();

    assert_eq!(need, Need::Done);
    assert_eq!(stack.depth(), 1);
    assert_eq!(
        ctx.seen,
        vec![
            ("one".to_string(), posted(42)),
            ("two".to_string(), posted("hello world")),
            ("one-done".to_string(), posted(7)),
        ]
    );
}

#[test]
fn a_child_done_without_a_registered_return_is_invalid_need() {
    let mut stack: FiberStack<Ctx> = FiberStack::new();
    let mut ctx = Ctx::default();

    // `call` (not `call_with_return`): the parent frame keeps its retired
    // wait, so the child's result has no live wait to land in
    let two = done_with("two", str_(), Value::from(7));
    let one = Arc::new(FnContinuation::new(
        num(),
        move |stack: &mut FiberStack<Ctx>, ctx: &mut Ctx, item: Item, _cancel| {
            ctx.record("one", &item);
            stack.call(two.clone(), "hello world")
        },
    ));

    stack.call(one, 42).unwrap();
    let error = stack.poll(&mut ctx, &token()).unwrap_err();
    assert_eq!(error.code(), "invalid-need");
}

#[test]
fn an_uncaught_failure_reaches_the_caller_unchanged() {
    let mut stack: FiberStack<Ctx> = FiberStack::new();
    let mut ctx = Ctx::default();

    stack
        .call(
            failing("m", num(), Failure::new("code-exception", "kaboom")),
            42,
        )
        .unwrap();
    let error = stack.poll(&mut ctx, &token()).unwrap_err();

    assert_eq!(
        error,
        FiberError::Failed(Failure::new("code-exception", "kaboom"))
    );
    assert!(stack.is_empty());
}

#[test]
fn a_child_failure_is_delivered_to_the_return_continuation() {
    let mut stack: FiberStack<Ctx> = FiberStack::new();
    let mut ctx = Ctx::default();

    let two = failing("two", str_(), Failure::new("code-exception", "kaboom"));
    let one_done = finish("one-done", TypeExpect::Any);
    let one = Arc::new(FnContinuation::new(
        num(),
        move |stack: &mut FiberStack<Ctx>, ctx: &mut Ctx, item: Item, _cancel| {
            ctx.record("one", &item);
            stack.call_with_return(two.clone(), "hello world", one_done.clone())
        },
    ));

    stack.call(one, 42).unwrap();
    let need = stack.poll(&mut ctx, &token()).unwrap();

    assert_eq!(need, Need::Done);
    let (label, item) = ctx.seen.last().unwrap();
    assert_eq!(label, "one-done");
    assert_eq!(item.failure().unwrap().code, "code-exception");
}

#[test]
fn failures_unwind_one_frame_per_iteration() {
    let mut stack: FiberStack<Ctx> = FiberStack::new();
    let mut ctx = Ctx::default();

    let three = failing("three", num(), Failure::new("deep", "bottom fell out"));
    // mid-level return continuation re-raises what it observed
    let two_done = Arc::new(FnContinuation::new(
        TypeExpect::Any,
        |_stack: &mut FiberStack<Ctx>, _ctx: &mut Ctx, item: Item, _cancel| {
            item.into_value()?;
            Ok(NextWait::Empty)
        },
    ));
    let two = Arc::new(FnContinuation::new(
        str_(),
        move |stack: &mut FiberStack<Ctx>, ctx: &mut Ctx, item: Item, _cancel| {
            ctx.record("two", &item);
            stack.call_with_return(three.clone(), 3, two_done.clone())
        },
    ));
    let one_done = finish("one-done", TypeExpect::Any);
    let one = Arc::new(FnContinuation::new(
        num(),
        move |stack: &mut FiberStack<Ctx>, ctx: &mut Ctx, item: Item, _cancel| {
            ctx.record("one", &item);
            stack.call_with_return(two.clone(), "go", one_done.clone())
        },
    ));

    stack.call(one, 1).unwrap();
    let need = stack.poll(&mut ctx, &token()).unwrap();

    assert_eq!(need, Need::Done);
    let (label, item) = ctx.seen.last().unwrap();
    assert_eq!(label, "one-done");
    assert_eq!(item.failure().unwrap().code, "deep");
}

#[test]
fn a_mismatched_done_is_observed_as_invalid_type() {
    let mut stack: FiberStack<Ctx> = FiberStack::new();
    let mut ctx = Ctx::default();

    // the child returns a string where the parent registered for a number
    let two = done_with("two", str_(), Value::from("not a number"));
    let one_done = finish("one-done", num());
    let one = Arc::new(FnContinuation::new(
        num(),
        move |stack: &mut FiberStack<Ctx>, ctx: &mut Ctx, item: Item, _cancel| {
            ctx.record("one", &item);
            stack.call_with_return(two.clone(), "go", one_done.clone())
        },
    ));

    stack.call(one, 1).unwrap();
    let need = stack.poll(&mut ctx, &token()).unwrap();

    assert_eq!(need, Need::Done);
    let (label, item) = ctx.seen.last().unwrap();
    assert_eq!(label, "one-done");
    assert_eq!(item.failure().unwrap().code, "invalid-type");
}

#[test]
fn tagged_items_reach_continuations_through_variance() {
    let mut stack: FiberStack<Ctx> = FiberStack::new();
    let mut ctx = Ctx::default();

    let badge = Value::opaque(Badge {
        id: 9,
        tags: &["gold-badge", "badge"],
    });
    stack
        .call(finish("m", TypeExpect::tag("badge")), badge.clone())
        .unwrap();
    let need = stack.poll(&mut ctx, &token()).unwrap();

    assert_eq!(need, Need::Done);
    let (_, item) = &ctx.seen[0];
    let received = item.value().unwrap();
    assert_eq!(received.downcast_opaque::<Badge>().unwrap().id, 9);
}

#[test]
fn the_poll_loop_is_not_reentrant() {
    let mut stack: FiberStack<Ctx> = FiberStack::new();
    let mut ctx = Ctx::default();

    let reentrant = Arc::new(FnContinuation::new(
        num(),
        |stack: &mut FiberStack<Ctx>, ctx: &mut Ctx, _item: Item, cancel| {
            stack.poll(ctx, cancel)?;
            Ok(NextWait::Empty)
        },
    ));

    stack.call(reentrant, 1).unwrap();
    let error = stack.poll(&mut ctx, &token()).unwrap_err();
    assert_eq!(
        error,
        FiberError::InvalidNeed {
            expected: Need::Poll,
            actual: Need::Call
        }
    );
}

#[test]
fn a_fabricated_next_wait_is_invalid_next() {
    let mut stack: FiberStack<Ctx> = FiberStack::new();
    let mut ctx = Ctx::default();

    let rogue = Arc::new(FnContinuation::new(
        num(),
        |_stack: &mut FiberStack<Ctx>, _ctx: &mut Ctx, _item: Item, _cancel| {
            Ok(NextWait::Pending(WaitHandle(999)))
        },
    ));

    stack.call(rogue, 1).unwrap();
    let error = stack.poll(&mut ctx, &token()).unwrap_err();
    assert_eq!(error, FiberError::InvalidNext);
}

#[test]
fn the_wait_a_continuation_arms_becomes_the_current_wait() {
    let mut stack: FiberStack<Ctx> = FiberStack::new();
    let mut ctx = Ctx::default();

    let second = finish("second", str_());
    let second_expects = second.expects();
    let first = Arc::new(FnContinuation::new(
        num(),
        move |stack: &mut FiberStack<Ctx>, ctx: &mut Ctx, item: Item, _cancel| {
            ctx.record("first", &item);
            stack.wait(second.clone())
        },
    ));

    stack.push();
    stack.wait(first).unwrap();
    stack.post(5).unwrap();
    assert_eq!(stack.current_need(), Need::Poll);

    // the fiber suspends on the wait `first` armed
    let need = stack.poll(&mut ctx, &token()).unwrap();
    assert_eq!(need, Need::Wait);
    assert_eq!(ctx.seen, vec![("first".to_string(), posted(5))]);
    assert_eq!(stack.current_wait().wait().unwrap().expects(), &second_expects);

    // next turn: satisfy the new wait
    stack.post("hi").unwrap();
    let need = stack.poll(&mut ctx, &token()).unwrap();
    assert_eq!(need, Need::Done);
    assert_eq!(ctx.seen.last().unwrap().0, "second");
}

#[test]
fn cancellation_leaves_the_pending_wait_pollable() {
    let mut stack: FiberStack<Ctx> = FiberStack::new();
    let mut ctx = Ctx::default();

    stack.call(finish("m", num()), 42).unwrap();

    let cancelled = token();
    cancelled.cancel();
    let need = stack.poll(&mut ctx, &cancelled).unwrap();
    assert_eq!(need, Need::Poll);
    assert!(ctx.seen.is_empty());

    // the same turn can be retried later
    let need = stack.poll(&mut ctx, &token()).unwrap();
    assert_eq!(need, Need::Done);
    assert_eq!(ctx.seen.len(), 1);
}

#[test]
fn rearming_from_the_mark_restarts_the_same_continuation() {
    let mut stack: FiberStack<Ctx> = FiberStack::new();
    let mut ctx = Ctx::default();

    stack.push();
    stack.wait(finish("m", num())).unwrap();
    stack.save_mark().unwrap();

    stack.post(1).unwrap();
    assert_eq!(stack.poll(&mut ctx, &token()).unwrap(), Need::Done);

    // restart the frame from its bookmark and run the same wait again
    let next = stack.rearm_from_mark().unwrap();
    assert!(matches!(next, NextWait::Pending(_)));
    assert_eq!(stack.current_need(), Need::Wait);

    stack.post(2).unwrap();
    assert_eq!(stack.poll(&mut ctx, &token()).unwrap(), Need::Done);
    assert_eq!(
        ctx.seen,
        vec![
            ("m".to_string(), posted(1)),
            ("m".to_string(), posted(2)),
        ]
    );
}
