//! # Persistence — snapshot and restore a fiber
//!
//! Between turns a fiber is inert; this module turns it into bytes and
//! back. Continuations and host values the native encoder cannot carry
//! go through the prioritized surrogate registry; the resulting image is
//! versioned, bincode-encoded, and zstd-compressed into an opaque byte
//! store owned by the host.

pub mod image;
pub mod store;
pub mod surrogate;

#[cfg(test)]
mod tests;

// Re-export commonly used items
pub use image::{FiberImage, ValueImage, IMAGE_VERSION};
pub use store::{
    ByteStore, CodecStore, ErrorResilientStore, FiberStore, MemoryStore, StoreError,
    DEFAULT_COMPRESSION_LEVEL,
};
pub use surrogate::{
    ClosureCaptureSurrogate, CombinatorSurrogate, ContinuationRegistry, Decoded,
    JsonBlobSurrogate, NamedContinuationSurrogate, SurrogateContext, SurrogateProvider,
    SurrogateRecord, SurrogateRegistry, SurrogateTarget,
};
