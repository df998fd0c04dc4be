//! Test helpers for persistence tests
//!
//! A small conversational host: named continuations shared through a
//! registry, a custom opaque value with its own surrogate provider, and
//! ready-wired codec stores over in-memory bytes.

use std::any::Any;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::fiber::wait::{Continuation, FnContinuation, Item, NextWait};
use crate::persist::store::{CodecStore, MemoryStore, StoreError};
use crate::persist::surrogate::{
    ContinuationRegistry, Decoded, SurrogateContext, SurrogateProvider, SurrogateRecord,
    SurrogateRegistry, SurrogateTarget,
};
use crate::value::{OpaqueValue, TypeExpect, Value, ValueKind};

/// Context shared by test continuations: a log of who received what.
#[derive(Default)]
pub struct Ctx {
    pub seen: Vec<(String, Item)>,
}

pub fn token() -> CancellationToken {
    CancellationToken::new()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("cadence_core=debug")
        .try_init();
}

/// A named continuation that records its item and finishes the frame.
pub fn named_finish(name: &'static str, expects: TypeExpect) -> Arc<dyn Continuation<Ctx>> {
    Arc::new(FnContinuation::named(
        name,
        expects,
        move |_stack, ctx: &mut Ctx, item, _cancel| {
            ctx.seen.push((name.to_string(), item));
            Ok(NextWait::Empty)
        },
    ))
}

/// A named continuation that records its item and returns `result`.
pub fn named_done(
    name: &'static str,
    expects: TypeExpect,
    result: Value,
) -> Arc<dyn Continuation<Ctx>> {
    Arc::new(FnContinuation::named(
        name,
        expects,
        move |stack, ctx: &mut Ctx, item, _cancel| {
            ctx.seen.push((name.to_string(), item));
            stack.done(result.clone())
        },
    ))
}

/// A two-step exchange: `greet` records a string, then suspends on
/// `follow_up`. Both are registered so the fiber persists mid-exchange.
pub fn greeting_host() -> (ContinuationRegistry<Ctx>, Arc<dyn Continuation<Ctx>>) {
    let follow_up = named_finish("ask-age", TypeExpect::Kind(ValueKind::Num));
    let armed = follow_up.clone();
    let greet: Arc<dyn Continuation<Ctx>> = Arc::new(FnContinuation::named(
        "greet",
        TypeExpect::Kind(ValueKind::Str),
        move |stack, ctx: &mut Ctx, item, _cancel| {
            ctx.seen.push(("greet".to_string(), item));
            stack.wait(armed.clone())
        },
    ));

    let mut resolver = ContinuationRegistry::new();
    resolver.register("greet", greet.clone());
    resolver.register("ask-age", follow_up);
    (resolver, greet)
}

/// An opaque host object persisted by its own provider.
#[derive(Debug, PartialEq)]
pub struct Badge {
    pub id: u32,
}

impl Badge {
    pub const TAG: &'static str = "badge";
}

impl OpaqueValue for Badge {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_tags(&self) -> &[&'static str] {
        &[Self::TAG]
    }
}

pub struct BadgeSurrogate {
    key: &'static str,
    priority: i32,
}

impl BadgeSurrogate {
    pub fn new(priority: i32) -> Self {
        Self {
            key: "badge",
            priority,
        }
    }

    /// Same behavior under a different record key, for priority tests.
    pub fn keyed(key: &'static str, priority: i32) -> Self {
        Self { key, priority }
    }
}

impl SurrogateProvider<Ctx> for BadgeSurrogate {
    fn key(&self) -> &'static str {
        self.key
    }

    fn handles(
        &self,
        target: SurrogateTarget<'_, Ctx>,
        _ctx: &SurrogateContext<'_, Ctx>,
    ) -> Option<i32> {
        match target {
            SurrogateTarget::Value(value) => {
                value.as_any().is::<Badge>().then_some(self.priority)
            }
            SurrogateTarget::Continuation(_) => None,
        }
    }

    fn encode(
        &self,
        target: SurrogateTarget<'_, Ctx>,
        _ctx: &SurrogateContext<'_, Ctx>,
    ) -> Result<SurrogateRecord, StoreError> {
        let SurrogateTarget::Value(value) = target else {
            return Err(StoreError::Encode("badge provider encodes values".into()));
        };
        let badge = value
            .as_any()
            .downcast_ref::<Badge>()
            .ok_or_else(|| StoreError::Encode("not a badge".into()))?;
        Ok(SurrogateRecord {
            provider: self.key.to_string(),
            payload: badge.id.to_string(),
        })
    }

    fn decode(
        &self,
        record: &SurrogateRecord,
        _ctx: &SurrogateContext<'_, Ctx>,
    ) -> Result<Decoded<Ctx>, StoreError> {
        let id = record
            .payload
            .parse()
            .map_err(|_| StoreError::Decode("bad badge id".into()))?;
        Ok(Decoded::Value(Arc::new(Badge { id })))
    }
}

/// A codec store over in-memory bytes with the standard provider set
/// plus the badge provider.
pub fn store_with(resolver: ContinuationRegistry<Ctx>) -> CodecStore<Ctx, MemoryStore> {
    let registry = SurrogateRegistry::standard().with_provider(BadgeSurrogate::new(10));
    CodecStore::new(MemoryStore::new(), registry, resolver)
}
