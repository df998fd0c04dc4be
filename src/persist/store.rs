//! Fiber persistence
//!
//! Persistence is layered: an opaque byte store owned by the host (keyed
//! by conversation or task identity at that layer), a codec store that
//! snapshots a fiber through the surrogate registry and packs it with
//! bincode + zstd, and a resilient wrapper that degrades corrupted
//! snapshots to "no prior state" so a bad blob never takes the host down.

use tracing::{debug, warn};

use super::image::{decode_stack, encode_stack, FiberImage};
use super::surrogate::{ContinuationRegistry, SurrogateRegistry};
use crate::error::FiberError;
use crate::fiber::stack::FiberStack;

/// zstd level 3 is a good balance of speed and size for snapshot-sized
/// payloads.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/* ===================== Errors ===================== */

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("fiber snapshot encoding failed: {0}")]
    Encode(String),

    #[error("fiber snapshot decoding failed: {0}")]
    Decode(String),

    #[error("compression failed: {0}")]
    Compress(String),

    #[error("decompression failed: {0}")]
    Decompress(String),

    #[error("unsupported fiber snapshot version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },

    #[error("backing store failure: {0}")]
    Backend(String),

    #[error(transparent)]
    Fiber(#[from] FiberError),
}

/* ===================== Byte store contract ===================== */

/// The opaque byte-oriented store a host supplies. Keying (per
/// conversation, per task) and locking live on the host's side of this
/// contract.
pub trait ByteStore {
    /// Overwrite any prior content with `bytes`.
    fn save(&mut self, bytes: &[u8]) -> Result<(), StoreError>;

    /// The stored bytes, or `None` if nothing has been saved.
    fn try_load(&self) -> Result<Option<Vec<u8>>, StoreError>;

    /// Clear the backing store.
    fn reset(&mut self) -> Result<(), StoreError>;

    fn flush(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// In-memory byte store for tests and single-process hosts.
pub struct MemoryStore {
    bytes: Option<Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self { bytes: None }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteStore for MemoryStore {
    fn save(&mut self, bytes: &[u8]) -> Result<(), StoreError> {
        self.bytes = Some(bytes.to_vec());
        Ok(())
    }

    fn try_load(&self) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.bytes.clone())
    }

    fn reset(&mut self) -> Result<(), StoreError> {
        self.bytes = None;
        Ok(())
    }
}

/* ===================== Fiber store ===================== */

/// Persistence adapter for fiber stacks.
pub trait FiberStore<C> {
    /// Snapshot `stack` over any prior content.
    fn save(&mut self, stack: &FiberStack<C>) -> Result<(), StoreError>;

    /// The persisted fiber, or `None` if the store is empty.
    fn try_load(&self) -> Result<Option<FiberStack<C>>, StoreError>;

    fn reset(&mut self) -> Result<(), StoreError>;
}

/// Serializes fibers through the surrogate registry and packs the image
/// with bincode + zstd into the backing byte store.
pub struct CodecStore<C, S> {
    backing: S,
    registry: SurrogateRegistry<C>,
    resolver: ContinuationRegistry<C>,
    level: i32,
}

impl<C: 'static, S: ByteStore> CodecStore<C, S> {
    pub fn new(
        backing: S,
        registry: SurrogateRegistry<C>,
        resolver: ContinuationRegistry<C>,
    ) -> Self {
        Self {
            backing,
            registry,
            resolver,
            level: DEFAULT_COMPRESSION_LEVEL,
        }
    }

    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    pub fn backing_mut(&mut self) -> &mut S {
        &mut self.backing
    }
}

impl<C: 'static, S: ByteStore> FiberStore<C> for CodecStore<C, S> {
    fn save(&mut self, stack: &FiberStack<C>) -> Result<(), StoreError> {
        let image = encode_stack(stack, &self.registry, &self.resolver)?;
        let serialized =
            bincode::serialize(&image).map_err(|error| StoreError::Encode(error.to_string()))?;
        let compressed = zstd::encode_all(&serialized[..], self.level)
            .map_err(|error| StoreError::Compress(error.to_string()))?;
        debug!(
            frames = image.frames.len(),
            bytes = serialized.len(),
            compressed = compressed.len(),
            "fiber snapshot written"
        );
        self.backing.save(&compressed)?;
        self.backing.flush()
    }

    fn try_load(&self) -> Result<Option<FiberStack<C>>, StoreError> {
        let Some(compressed) = self.backing.try_load()? else {
            return Ok(None);
        };
        let serialized = zstd::decode_all(&compressed[..])
            .map_err(|error| StoreError::Decompress(error.to_string()))?;
        let image: FiberImage = bincode::deserialize(&serialized)
            .map_err(|error| StoreError::Decode(error.to_string()))?;
        debug!(
            frames = image.frames.len(),
            bytes = serialized.len(),
            "fiber snapshot read"
        );
        let stack = decode_stack(image, &self.registry, &self.resolver)?;
        Ok(Some(stack))
    }

    fn reset(&mut self) -> Result<(), StoreError> {
        self.backing.reset()
    }
}

/// Degrades load failures to "no prior state": a corrupted snapshot is
/// logged and the fiber restarts clean instead of crashing the host.
/// Save failures still surface — a capture error must reach the caller.
pub struct ErrorResilientStore<S> {
    inner: S,
}

impl<S> ErrorResilientStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<C, S: FiberStore<C>> FiberStore<C> for ErrorResilientStore<S> {
    fn save(&mut self, stack: &FiberStack<C>) -> Result<(), StoreError> {
        self.inner.save(stack)
    }

    fn try_load(&self) -> Result<Option<FiberStack<C>>, StoreError> {
        match self.inner.try_load() {
            Ok(found) => Ok(found),
            Err(error) => {
                warn!(%error, "discarding unreadable fiber snapshot");
                Ok(None)
            }
        }
    }

    fn reset(&mut self) -> Result<(), StoreError> {
        self.inner.reset()
    }
}
