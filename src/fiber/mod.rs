//! # Fiber engine — resumable continuation stack
//!
//! A hand-rolled coroutine runtime: a stack of frames, each owning one
//! suspended continuation (`Wait`), driven by a poll loop that advances
//! every ready wait until the fiber suspends awaiting external input or
//! finishes. Between suspensions the whole stack is inert and can be
//! persisted byte-for-byte (see [`crate::persist`]) and reconstructed
//! after a process restart.
//!
//! ## Core principles
//!
//! 1. **Stack-driven execution**: all state lives in owned frames, no
//!    recursion into the host call stack
//! 2. **Explicit lifecycle**: the five-state `Need` machine decides which
//!    operations are legal on a wait; violations fail loudly
//! 3. **Structured mutation**: continuation code reaches the stack only
//!    through `wait`/`call`/`done`/`fail`
//! 4. **Pure engine**: no I/O, no async — runs until suspend or complete

pub mod combinators;
pub mod frame;
pub mod poll;
pub mod stack;
pub mod wait;

#[cfg(test)]
mod tests;

// Re-export commonly used items
pub use combinators::{loop_of, void_of};
pub use frame::{CurrentWait, Frame};
pub use stack::FiberStack;
pub use wait::{Continuation, FnContinuation, Item, Need, NextWait, Wait, WaitHandle};
