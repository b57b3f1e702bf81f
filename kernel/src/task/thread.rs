use core::fmt;

use super::context::Context;
use crate::mm::Page;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Ready,
    Running,
}

/// Handle de uma thread: índice na tabela + geração do slot.
///
/// Deleting a thread bumps its slot's generation, so every copy of the old
/// handle becomes stale and is rejected instead of reaching a reused slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId {
    index: u32,
    generation: u32,
}

impl ThreadId {
    pub(crate) const fn new(index: usize, generation: u32) -> Self {
        Self {
            index: index as u32,
            generation,
        }
    }

    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Packed form stored in a context's identity slot.
    pub fn to_raw(self) -> u64 {
        ((self.index as u64) << 32) | self.generation as u64
    }

    pub fn from_raw(raw: u64) -> Self {
        Self {
            index: (raw >> 32) as u32,
            generation: raw as u32,
        }
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}.{}}}", self.index, self.generation)
    }
}

/// Thread control block. Lives in the thread pool at a fixed address for its
/// whole life, so `context` can be handed to the switch code by pointer.
pub(crate) struct Thread {
    pub name: &'static str,
    pub state: ThreadState,
    pub context: Context,
    /// `None` only for the adopted boot thread, which keeps running on the
    /// stack it was found on.
    pub stack: Option<Page>,
    pub csnest: u32,
}
