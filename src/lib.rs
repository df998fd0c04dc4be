pub mod error;
pub mod fiber;
pub mod persist;
pub mod value;

// Re-export main types
pub use error::{Failure, FiberError};
pub use fiber::{
    loop_of, void_of, Continuation, CurrentWait, FiberStack, FnContinuation, Item, Need, NextWait,
    Wait, WaitHandle,
};
pub use persist::{
    ByteStore, CodecStore, ContinuationRegistry, ErrorResilientStore, FiberStore, MemoryStore,
    StoreError, SurrogateProvider, SurrogateRecord, SurrogateRegistry,
};
pub use value::{JsonBlob, OpaqueValue, TypeExpect, Value, ValueKind};

// The cancellation signal threaded through every poll
pub use tokio_util::sync::CancellationToken;
