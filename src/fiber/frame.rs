//! Stack frames
//!
//! One frame per call-stack slot: an active wait (the computation running
//! in this slot) and a mark wait (a restartable bookmark). Frames are
//! opaque containers; they know nothing about their neighbors.

use super::wait::{Need, Wait, WaitHandle};

/// Holder for a frame's wait: explicitly empty, occupied, or temporarily
/// out with the poll loop. There is no null wait; "no wait here" is a
/// checked case.
pub(crate) enum WaitSlot<C> {
    Empty,
    Occupied(Wait<C>),
    /// The wait was moved out for polling; the handle records whose.
    Polling(WaitHandle),
}

impl<C> WaitSlot<C> {
    pub(crate) fn need(&self) -> Need {
        match self {
            WaitSlot::Empty => Need::None,
            WaitSlot::Occupied(wait) => wait.need(),
            WaitSlot::Polling(_) => Need::Call,
        }
    }

    pub(crate) fn wait(&self) -> Option<&Wait<C>> {
        match self {
            WaitSlot::Occupied(wait) => Some(wait),
            _ => None,
        }
    }

    pub(crate) fn wait_mut(&mut self) -> Option<&mut Wait<C>> {
        match self {
            WaitSlot::Occupied(wait) => Some(wait),
            _ => None,
        }
    }

    /// Whether installing a new wait here is legal: only over an unset
    /// slot, a slot whose wait is out with the poll loop, or a retired
    /// (`Done`) wait.
    pub(crate) fn can_accept(&self) -> bool {
        match self {
            WaitSlot::Empty | WaitSlot::Polling(_) => true,
            WaitSlot::Occupied(wait) => wait.need() == Need::Done,
        }
    }
}

/// One call-stack slot.
pub struct Frame<C> {
    pub(crate) wait: WaitSlot<C>,
    pub(crate) mark: WaitSlot<C>,
}

impl<C> Frame<C> {
    pub(crate) fn new() -> Self {
        Self {
            wait: WaitSlot::Empty,
            mark: WaitSlot::Empty,
        }
    }
}

/// View of a frame's wait from outside the engine.
///
/// The empty case is an enum variant rather than a sentinel instance, so
/// "no current wait" is checked at compile time.
#[derive(Debug)]
pub enum CurrentWait<'a, C> {
    /// Empty stack, or an unarmed frame.
    Empty,
    /// The wait is executing its continuation.
    Executing(WaitHandle),
    /// The tail frame's wait.
    Active(&'a Wait<C>),
}

impl<'a, C> CurrentWait<'a, C> {
    pub fn need(&self) -> Need {
        match self {
            CurrentWait::Empty => Need::None,
            CurrentWait::Executing(_) => Need::Call,
            CurrentWait::Active(wait) => wait.need(),
        }
    }

    pub fn wait(&self) -> Option<&'a Wait<C>> {
        match self {
            CurrentWait::Active(wait) => Some(wait),
            _ => None,
        }
    }
}
