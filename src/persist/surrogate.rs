//! Surrogate registry
//!
//! Persisting a fiber means persisting its continuation graph, and parts
//! of that graph the native encoder cannot carry: bound continuations,
//! host objects posted as opaque values. A surrogate provider recognizes
//! such a target and encodes it as a self-describing record; at load time
//! the record is dispatched back to the provider that wrote it.
//!
//! Selection is prioritized: every provider is asked whether it handles a
//! target, and the unique highest-priority "yes" wins. Ties and no-match
//! fall through to the default path — native encoding for plain values,
//! and for continuations the catch-all capture provider, which fails the
//! save with a diagnosable error instead of a generic crash.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::image::{decode_value_image, encode_value_image, ValueImage};
use super::store::StoreError;
use crate::fiber::combinators::{LoopCont, LoopStep, VoidCont, VoidDone};
use crate::fiber::wait::{describe_continuation, Continuation};
use crate::value::{JsonBlob, OpaqueValue};

/* ===================== Records and targets ===================== */

/// A self-describing encoded stand-in for a value the native encoder
/// cannot carry. `provider` names the provider that wrote it and decodes
/// it again; `payload` is that provider's own text format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurrogateRecord {
    pub provider: String,
    pub payload: String,
}

/// What a provider is asked to encode.
pub enum SurrogateTarget<'a, C> {
    Continuation(&'a dyn Continuation<C>),
    Value(&'a dyn OpaqueValue),
}

impl<'a, C> Clone for SurrogateTarget<'a, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, C> Copy for SurrogateTarget<'a, C> {}

/// What a provider hands back at load time.
pub enum Decoded<C> {
    Continuation(Arc<dyn Continuation<C>>),
    Value(Arc<dyn OpaqueValue>),
}

/// Ambient state threaded through encode and decode: the continuation
/// resolver and the registry itself, for providers that recurse.
pub struct SurrogateContext<'a, C> {
    pub continuations: &'a ContinuationRegistry<C>,
    pub registry: &'a SurrogateRegistry<C>,
}

/* ===================== Continuation registry ===================== */

/// Named continuations shared between the engine and the persistence
/// layer: the same instance a fiber was built from is resolved again at
/// load time, so continuations persist by identity, not by value.
pub struct ContinuationRegistry<C> {
    by_name: HashMap<String, Arc<dyn Continuation<C>>>,
}

impl<C> ContinuationRegistry<C> {
    pub fn new() -> Self {
        Self {
            by_name: HashMap::new(),
        }
    }

    /// Register `continuation` under `name`. The name must match what the
    /// continuation itself reports, or the encoder will not find it.
    pub fn register(&mut self, name: impl Into<String>, continuation: Arc<dyn Continuation<C>>) {
        self.by_name.insert(name.into(), continuation);
    }

    pub fn can_resolve(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Continuation<C>>> {
        self.by_name.get(name).cloned()
    }
}

impl<C> Default for ContinuationRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

/* ===================== Provider contract ===================== */

pub trait SurrogateProvider<C> {
    /// Key stored in encoded records, used to dispatch decode.
    fn key(&self) -> &'static str;

    /// Whether this provider handles `target`, and at what priority.
    fn handles(&self, target: SurrogateTarget<'_, C>, ctx: &SurrogateContext<'_, C>)
        -> Option<i32>;

    fn encode(
        &self,
        target: SurrogateTarget<'_, C>,
        ctx: &SurrogateContext<'_, C>,
    ) -> Result<SurrogateRecord, StoreError>;

    fn decode(
        &self,
        record: &SurrogateRecord,
        ctx: &SurrogateContext<'_, C>,
    ) -> Result<Decoded<C>, StoreError>;
}

/* ===================== Registry ===================== */

pub struct SurrogateRegistry<C> {
    providers: Vec<Box<dyn SurrogateProvider<C>>>,
}

impl<C: 'static> SurrogateRegistry<C> {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    /// The stock provider set: registered continuations by name, the
    /// engine combinators structurally, JSON blobs as text, and the
    /// catch-all capture provider at the bottom.
    pub fn standard() -> Self {
        Self::new()
            .with_provider(NamedContinuationSurrogate::new(30))
            .with_provider(CombinatorSurrogate::new(20))
            .with_provider(JsonBlobSurrogate::new(20))
            .with_provider(ClosureCaptureSurrogate::new(0))
    }

    pub fn with_provider(mut self, provider: impl SurrogateProvider<C> + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    /// The unique highest-priority provider claiming `target`; ties and
    /// no-match fall through to the default path.
    fn select(
        &self,
        target: SurrogateTarget<'_, C>,
        ctx: &SurrogateContext<'_, C>,
    ) -> Option<&dyn SurrogateProvider<C>> {
        let mut best: Option<(i32, &dyn SurrogateProvider<C>)> = None;
        let mut tied = false;
        for provider in &self.providers {
            let Some(priority) = provider.handles(target, ctx) else {
                continue;
            };
            match best {
                Some((top, _)) if priority > top => {
                    best = Some((priority, provider.as_ref()));
                    tied = false;
                }
                Some((top, _)) if priority == top => tied = true,
                Some(_) => {}
                None => best = Some((priority, provider.as_ref())),
            }
        }
        if tied {
            None
        } else {
            best.map(|(_, provider)| provider)
        }
    }

    fn by_key(&self, key: &str) -> Option<&dyn SurrogateProvider<C>> {
        self.providers
            .iter()
            .map(|provider| provider.as_ref())
            .find(|provider| provider.key() == key)
    }

    pub fn encode_continuation(
        &self,
        continuation: &dyn Continuation<C>,
        resolver: &ContinuationRegistry<C>,
    ) -> Result<SurrogateRecord, StoreError> {
        let ctx = SurrogateContext {
            continuations: resolver,
            registry: self,
        };
        let target = SurrogateTarget::Continuation(continuation);
        match self.select(target, &ctx) {
            Some(provider) => provider.encode(target, &ctx),
            None => Err(StoreError::Encode(format!(
                "no surrogate provider for continuation {}",
                describe_continuation(continuation)
            ))),
        }
    }

    pub fn decode_continuation(
        &self,
        record: &SurrogateRecord,
        resolver: &ContinuationRegistry<C>,
    ) -> Result<Arc<dyn Continuation<C>>, StoreError> {
        let ctx = SurrogateContext {
            continuations: resolver,
            registry: self,
        };
        let provider = self.by_key(&record.provider).ok_or_else(|| {
            StoreError::Decode(format!("unknown surrogate provider '{}'", record.provider))
        })?;
        match provider.decode(record, &ctx)? {
            Decoded::Continuation(continuation) => Ok(continuation),
            Decoded::Value(_) => Err(StoreError::Decode(format!(
                "provider '{}' decoded a value where a continuation was expected",
                record.provider
            ))),
        }
    }

    pub fn encode_opaque(
        &self,
        value: &dyn OpaqueValue,
        resolver: &ContinuationRegistry<C>,
    ) -> Result<SurrogateRecord, StoreError> {
        let ctx = SurrogateContext {
            continuations: resolver,
            registry: self,
        };
        let target = SurrogateTarget::Value(value);
        match self.select(target, &ctx) {
            Some(provider) => provider.encode(target, &ctx),
            None => Err(StoreError::Encode(format!(
                "no surrogate provider for opaque value [{}]",
                value.type_tags().join(",")
            ))),
        }
    }

    pub fn decode_opaque(
        &self,
        record: &SurrogateRecord,
        resolver: &ContinuationRegistry<C>,
    ) -> Result<Arc<dyn OpaqueValue>, StoreError> {
        let ctx = SurrogateContext {
            continuations: resolver,
            registry: self,
        };
        let provider = self.by_key(&record.provider).ok_or_else(|| {
            StoreError::Decode(format!("unknown surrogate provider '{}'", record.provider))
        })?;
        match provider.decode(record, &ctx)? {
            Decoded::Value(value) => Ok(value),
            Decoded::Continuation(_) => Err(StoreError::Decode(format!(
                "provider '{}' decoded a continuation where a value was expected",
                record.provider
            ))),
        }
    }
}

impl<C: 'static> Default for SurrogateRegistry<C> {
    fn default() -> Self {
        Self::standard()
    }
}

/* ===================== Stock providers ===================== */

/// Persists a registered continuation by name and resolves the shared
/// instance again at load time.
pub struct NamedContinuationSurrogate {
    priority: i32,
}

impl NamedContinuationSurrogate {
    pub const KEY: &'static str = "named-continuation";

    pub fn new(priority: i32) -> Self {
        Self { priority }
    }
}

impl<C: 'static> SurrogateProvider<C> for NamedContinuationSurrogate {
    fn key(&self) -> &'static str {
        Self::KEY
    }

    fn handles(
        &self,
        target: SurrogateTarget<'_, C>,
        ctx: &SurrogateContext<'_, C>,
    ) -> Option<i32> {
        match target {
            SurrogateTarget::Continuation(continuation) => continuation
                .name()
                .filter(|name| ctx.continuations.can_resolve(name))
                .map(|_| self.priority),
            SurrogateTarget::Value(_) => None,
        }
    }

    fn encode(
        &self,
        target: SurrogateTarget<'_, C>,
        _ctx: &SurrogateContext<'_, C>,
    ) -> Result<SurrogateRecord, StoreError> {
        let SurrogateTarget::Continuation(continuation) = target else {
            return Err(StoreError::Encode(
                "named-continuation provider only encodes continuations".to_string(),
            ));
        };
        let name = continuation.name().ok_or_else(|| {
            StoreError::Encode("continuation lost its name between handles and encode".to_string())
        })?;
        Ok(SurrogateRecord {
            provider: Self::KEY.to_string(),
            payload: name.to_string(),
        })
    }

    fn decode(
        &self,
        record: &SurrogateRecord,
        ctx: &SurrogateContext<'_, C>,
    ) -> Result<Decoded<C>, StoreError> {
        ctx.continuations
            .resolve(&record.payload)
            .map(Decoded::Continuation)
            .ok_or_else(|| {
                StoreError::Decode(format!(
                    "continuation '{}' is not registered in this host",
                    record.payload
                ))
            })
    }
}

/// Structural encoding for the engine combinators, recursing through the
/// registry for the wrapped continuation.
pub struct CombinatorSurrogate {
    priority: i32,
}

impl CombinatorSurrogate {
    pub const KEY: &'static str = "combinator";

    pub fn new(priority: i32) -> Self {
        Self { priority }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
enum CombinatorPayload {
    Void {
        rest: SurrogateRecord,
    },
    VoidDone,
    Loop {
        remaining: u32,
        rest: SurrogateRecord,
    },
    LoopStep {
        remaining: u32,
        item: ValueImage,
        rest: SurrogateRecord,
    },
}

impl<C: 'static> SurrogateProvider<C> for CombinatorSurrogate {
    fn key(&self) -> &'static str {
        Self::KEY
    }

    fn handles(
        &self,
        target: SurrogateTarget<'_, C>,
        _ctx: &SurrogateContext<'_, C>,
    ) -> Option<i32> {
        let SurrogateTarget::Continuation(continuation) = target else {
            return None;
        };
        let any = continuation.as_any();
        let known = any.is::<VoidCont<C>>()
            || any.is::<VoidDone>()
            || any.is::<LoopCont<C>>()
            || any.is::<LoopStep<C>>();
        known.then_some(self.priority)
    }

    fn encode(
        &self,
        target: SurrogateTarget<'_, C>,
        ctx: &SurrogateContext<'_, C>,
    ) -> Result<SurrogateRecord, StoreError> {
        let SurrogateTarget::Continuation(continuation) = target else {
            return Err(StoreError::Encode(
                "combinator provider only encodes continuations".to_string(),
            ));
        };
        let any = continuation.as_any();
        let payload = if let Some(void) = any.downcast_ref::<VoidCont<C>>() {
            CombinatorPayload::Void {
                rest: ctx
                    .registry
                    .encode_continuation(void.rest.as_ref(), ctx.continuations)?,
            }
        } else if any.is::<VoidDone>() {
            CombinatorPayload::VoidDone
        } else if let Some(looped) = any.downcast_ref::<LoopCont<C>>() {
            CombinatorPayload::Loop {
                remaining: looped.remaining,
                rest: ctx
                    .registry
                    .encode_continuation(looped.rest.as_ref(), ctx.continuations)?,
            }
        } else if let Some(step) = any.downcast_ref::<LoopStep<C>>() {
            CombinatorPayload::LoopStep {
                remaining: step.remaining,
                item: encode_value_image(&step.item, ctx)?,
                rest: ctx
                    .registry
                    .encode_continuation(step.rest.as_ref(), ctx.continuations)?,
            }
        } else {
            return Err(StoreError::Encode(
                "combinator provider asked to encode an unknown continuation".to_string(),
            ));
        };
        let payload = serde_json::to_string(&payload)
            .map_err(|error| StoreError::Encode(error.to_string()))?;
        Ok(SurrogateRecord {
            provider: Self::KEY.to_string(),
            payload,
        })
    }

    fn decode(
        &self,
        record: &SurrogateRecord,
        ctx: &SurrogateContext<'_, C>,
    ) -> Result<Decoded<C>, StoreError> {
        let payload: CombinatorPayload = serde_json::from_str(&record.payload)
            .map_err(|error| StoreError::Decode(error.to_string()))?;
        let continuation: Arc<dyn Continuation<C>> = match payload {
            CombinatorPayload::Void { rest } => Arc::new(VoidCont {
                rest: ctx.registry.decode_continuation(&rest, ctx.continuations)?,
            }),
            CombinatorPayload::VoidDone => Arc::new(VoidDone),
            CombinatorPayload::Loop { remaining, rest } => Arc::new(LoopCont {
                rest: ctx.registry.decode_continuation(&rest, ctx.continuations)?,
                remaining,
            }),
            CombinatorPayload::LoopStep {
                remaining,
                item,
                rest,
            } => Arc::new(LoopStep {
                rest: ctx.registry.decode_continuation(&rest, ctx.continuations)?,
                remaining,
                item: decode_value_image(&item, ctx)?,
            }),
        };
        Ok(Decoded::Continuation(continuation))
    }
}

/// Encodes a [`JsonBlob`] opaque value as compact JSON text.
pub struct JsonBlobSurrogate {
    priority: i32,
}

impl JsonBlobSurrogate {
    pub const KEY: &'static str = "json-blob";

    pub fn new(priority: i32) -> Self {
        Self { priority }
    }
}

impl<C: 'static> SurrogateProvider<C> for JsonBlobSurrogate {
    fn key(&self) -> &'static str {
        Self::KEY
    }

    fn handles(
        &self,
        target: SurrogateTarget<'_, C>,
        _ctx: &SurrogateContext<'_, C>,
    ) -> Option<i32> {
        match target {
            SurrogateTarget::Value(value) => {
                value.as_any().is::<JsonBlob>().then_some(self.priority)
            }
            SurrogateTarget::Continuation(_) => None,
        }
    }

    fn encode(
        &self,
        target: SurrogateTarget<'_, C>,
        _ctx: &SurrogateContext<'_, C>,
    ) -> Result<SurrogateRecord, StoreError> {
        let SurrogateTarget::Value(value) = target else {
            return Err(StoreError::Encode(
                "json-blob provider only encodes values".to_string(),
            ));
        };
        let blob = value.as_any().downcast_ref::<JsonBlob>().ok_or_else(|| {
            StoreError::Encode("json-blob provider asked to encode a foreign value".to_string())
        })?;
        Ok(SurrogateRecord {
            provider: Self::KEY.to_string(),
            payload: blob.0.to_string(),
        })
    }

    fn decode(
        &self,
        record: &SurrogateRecord,
        _ctx: &SurrogateContext<'_, C>,
    ) -> Result<Decoded<C>, StoreError> {
        let value = serde_json::from_str(&record.payload)
            .map_err(|error| StoreError::Decode(error.to_string()))?;
        Ok(Decoded::Value(Arc::new(JsonBlob(value))))
    }
}

/// Catch-all for continuations nothing else claims: saving one is a
/// capture error naming the instance, so an unserializable closure is
/// diagnosable instead of a generic serialization crash.
pub struct ClosureCaptureSurrogate {
    priority: i32,
}

impl ClosureCaptureSurrogate {
    pub const KEY: &'static str = "closure-capture";

    pub fn new(priority: i32) -> Self {
        Self { priority }
    }
}

impl<C: 'static> SurrogateProvider<C> for ClosureCaptureSurrogate {
    fn key(&self) -> &'static str {
        Self::KEY
    }

    fn handles(
        &self,
        target: SurrogateTarget<'_, C>,
        _ctx: &SurrogateContext<'_, C>,
    ) -> Option<i32> {
        match target {
            SurrogateTarget::Continuation(_) => Some(self.priority),
            SurrogateTarget::Value(_) => None,
        }
    }

    fn encode(
        &self,
        target: SurrogateTarget<'_, C>,
        _ctx: &SurrogateContext<'_, C>,
    ) -> Result<SurrogateRecord, StoreError> {
        let SurrogateTarget::Continuation(continuation) = target else {
            return Err(StoreError::Encode(
                "capture provider only inspects continuations".to_string(),
            ));
        };
        Err(StoreError::Fiber(crate::error::FiberError::ClosureCapture {
            name: describe_continuation(continuation),
        }))
    }

    fn decode(
        &self,
        _record: &SurrogateRecord,
        _ctx: &SurrogateContext<'_, C>,
    ) -> Result<Decoded<C>, StoreError> {
        Err(StoreError::Decode(
            "closure-capture records are never written".to_string(),
        ))
    }
}
