//! Serialized fiber snapshot
//!
//! The image is the portable form of a fiber stack: a versioned, fully
//! owned tree of plain data, with continuations and opaque values
//! replaced by surrogate records. Encoding walks the live stack through
//! the surrogate registry; decoding rebuilds an equivalent stack, with
//! registered continuations resolved back to the same shared instances.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::store::StoreError;
use super::surrogate::{ContinuationRegistry, SurrogateContext, SurrogateRecord, SurrogateRegistry};
use crate::error::Failure;
use crate::fiber::frame::{Frame, WaitSlot};
use crate::fiber::stack::FiberStack;
use crate::fiber::wait::{Need, Wait, WaitHandle};
use crate::value::{TypeExpect, Value};

/// Snapshot format version; increment on breaking changes.
pub const IMAGE_VERSION: u32 = 1;

/* ===================== Image types ===================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiberImage {
    pub version: u32,
    pub next_handle: u64,
    pub frames: Vec<FrameImage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameImage {
    pub wait: SlotImage,
    pub mark: SlotImage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SlotImage {
    Empty,
    Wait(WaitImage),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitImage {
    pub handle: u64,
    pub need: Need,
    pub expects: TypeExpect,
    pub rest: Option<SurrogateRecord>,
    pub item: Option<ValueImage>,
    pub fail: Option<Failure>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValueImage {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    List(Vec<ValueImage>),
    Obj(HashMap<String, ValueImage>),
    Opaque(SurrogateRecord),
}

/* ===================== Encode ===================== */

pub fn encode_stack<C: 'static>(
    stack: &FiberStack<C>,
    registry: &SurrogateRegistry<C>,
    resolver: &ContinuationRegistry<C>,
) -> Result<FiberImage, StoreError> {
    let ctx = SurrogateContext {
        continuations: resolver,
        registry,
    };
    let frames = stack
        .frames()
        .iter()
        .map(|frame| encode_frame(frame, &ctx))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(FiberImage {
        version: IMAGE_VERSION,
        next_handle: stack.next_handle(),
        frames,
    })
}

fn encode_frame<C: 'static>(
    frame: &Frame<C>,
    ctx: &SurrogateContext<'_, C>,
) -> Result<FrameImage, StoreError> {
    Ok(FrameImage {
        wait: encode_slot(&frame.wait, ctx)?,
        mark: encode_slot(&frame.mark, ctx)?,
    })
}

fn encode_slot<C: 'static>(
    slot: &WaitSlot<C>,
    ctx: &SurrogateContext<'_, C>,
) -> Result<SlotImage, StoreError> {
    match slot {
        WaitSlot::Empty => Ok(SlotImage::Empty),
        WaitSlot::Occupied(wait) => Ok(SlotImage::Wait(encode_wait(wait, ctx)?)),
        WaitSlot::Polling(handle) => Err(StoreError::Encode(format!(
            "{handle} is mid-poll; a fiber is only persisted between turns"
        ))),
    }
}

fn encode_wait<C: 'static>(
    wait: &Wait<C>,
    ctx: &SurrogateContext<'_, C>,
) -> Result<WaitImage, StoreError> {
    if wait.need() == Need::Call {
        return Err(StoreError::Encode(format!(
            "{} is mid-call; a fiber is only persisted between turns",
            wait.handle()
        )));
    }
    let rest = wait
        .rest()
        .map(|rest| {
            ctx.registry
                .encode_continuation(rest.as_ref(), ctx.continuations)
        })
        .transpose()?;
    let item = wait
        .item()
        .map(|item| encode_value_image(item, ctx))
        .transpose()?;
    Ok(WaitImage {
        handle: wait.handle().0,
        need: wait.need(),
        expects: wait.expects().clone(),
        rest,
        item,
        fail: wait.pending_failure().cloned(),
    })
}

pub(crate) fn encode_value_image<C: 'static>(
    value: &Value,
    ctx: &SurrogateContext<'_, C>,
) -> Result<ValueImage, StoreError> {
    Ok(match value {
        Value::Null => ValueImage::Null,
        Value::Bool(v) => ValueImage::Bool(*v),
        Value::Num(v) => ValueImage::Num(*v),
        Value::Str(v) => ValueImage::Str(v.clone()),
        Value::List(items) => ValueImage::List(
            items
                .iter()
                .map(|item| encode_value_image(item, ctx))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Value::Obj(entries) => ValueImage::Obj(
            entries
                .iter()
                .map(|(key, item)| Ok((key.clone(), encode_value_image(item, ctx)?)))
                .collect::<Result<HashMap<_, _>, StoreError>>()?,
        ),
        Value::Opaque(inner) => ValueImage::Opaque(
            ctx.registry
                .encode_opaque(inner.as_ref(), ctx.continuations)?,
        ),
    })
}

/* ===================== Decode ===================== */

pub fn decode_stack<C: 'static>(
    image: FiberImage,
    registry: &SurrogateRegistry<C>,
    resolver: &ContinuationRegistry<C>,
) -> Result<FiberStack<C>, StoreError> {
    if image.version != IMAGE_VERSION {
        return Err(StoreError::Version {
            found: image.version,
            expected: IMAGE_VERSION,
        });
    }
    let ctx = SurrogateContext {
        continuations: resolver,
        registry,
    };
    let frames = image
        .frames
        .iter()
        .map(|frame| decode_frame(frame, &ctx))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(FiberStack::from_parts(frames, image.next_handle))
}

fn decode_frame<C: 'static>(
    image: &FrameImage,
    ctx: &SurrogateContext<'_, C>,
) -> Result<Frame<C>, StoreError> {
    let mut frame = Frame::new();
    frame.wait = decode_slot(&image.wait, ctx)?;
    frame.mark = decode_slot(&image.mark, ctx)?;
    Ok(frame)
}

fn decode_slot<C: 'static>(
    image: &SlotImage,
    ctx: &SurrogateContext<'_, C>,
) -> Result<WaitSlot<C>, StoreError> {
    match image {
        SlotImage::Empty => Ok(WaitSlot::Empty),
        SlotImage::Wait(wait) => Ok(WaitSlot::Occupied(decode_wait(wait, ctx)?)),
    }
}

fn decode_wait<C: 'static>(
    image: &WaitImage,
    ctx: &SurrogateContext<'_, C>,
) -> Result<Wait<C>, StoreError> {
    validate_wait_image(image)?;
    let rest = image
        .rest
        .as_ref()
        .map(|record| ctx.registry.decode_continuation(record, ctx.continuations))
        .transpose()?;
    let item = image
        .item
        .as_ref()
        .map(|value| decode_value_image(value, ctx))
        .transpose()?;
    Ok(Wait::from_parts(
        WaitHandle(image.handle),
        image.need,
        image.expects.clone(),
        rest,
        item,
        image.fail.clone(),
    ))
}

/// A snapshot written by this crate never violates these; a corrupted or
/// hand-rolled one might, and must not produce an unpollable wait.
fn validate_wait_image(image: &WaitImage) -> Result<(), StoreError> {
    let fault = match image.need {
        Need::Call => Some("a wait cannot be persisted mid-call"),
        Need::Wait | Need::Poll | Need::Done if image.rest.is_none() => {
            Some("a bound state requires a continuation record")
        }
        Need::Poll if image.item.is_none() == image.fail.is_none() => {
            Some("Poll requires exactly one of item or failure")
        }
        Need::Wait | Need::None if image.item.is_some() || image.fail.is_some() => {
            Some("only Poll holds an item or failure")
        }
        _ => None,
    };
    match fault {
        Some(fault) => Err(StoreError::Decode(format!(
            "wait#{} is inconsistent: {fault}",
            image.handle
        ))),
        None => Ok(()),
    }
}

pub(crate) fn decode_value_image<C: 'static>(
    image: &ValueImage,
    ctx: &SurrogateContext<'_, C>,
) -> Result<Value, StoreError> {
    Ok(match image {
        ValueImage::Null => Value::Null,
        ValueImage::Bool(v) => Value::Bool(*v),
        ValueImage::Num(v) => Value::Num(*v),
        ValueImage::Str(v) => Value::Str(v.clone()),
        ValueImage::List(items) => Value::List(
            items
                .iter()
                .map(|item| decode_value_image(item, ctx))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        ValueImage::Obj(entries) => Value::Obj(
            entries
                .iter()
                .map(|(key, item)| Ok((key.clone(), decode_value_image(item, ctx)?)))
                .collect::<Result<HashMap<_, _>, StoreError>>()?,
        ),
        ValueImage::Opaque(record) => Value::Opaque(
            ctx.registry
                .decode_opaque(record, ctx.continuations)?,
        ),
    })
}
