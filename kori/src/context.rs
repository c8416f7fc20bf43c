//! Execution contexts.
//!
//! An execution context is the unit of object ownership.
//! Each worker thread is its own context, with the same id as the worker.
//! Any other thread that touches objects is given a fresh context id
//! the first time it needs one.

use std::{
    cell::Cell,
    fmt,
    sync::atomic::{AtomicU64, Ordering::SeqCst},
};

/// Identifies an execution context.
///
/// Context ids share their number space with worker ids.
/// They are never reused within a process.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ContextId(pub (crate) u64);

/// Source of context and worker ids.
static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local!
{
    static CURRENT: Cell<Option<ContextId>> = Cell::new(None);
}

/// Allocate the next id from a process-wide counter.
///
/// The two topmost values are never handed out,
/// so that they can be used as markers in packed words.
pub (crate) fn allocate_id(counter: &AtomicU64, what: &str) -> u64
{
    const LIMIT: u64 = u64::MAX - 2;
    counter.fetch_update(SeqCst, SeqCst, |n| (n < LIMIT).then(|| n + 1))
        .unwrap_or_else(|_| panic!("Process ran out of {what} ids"))
}

impl ContextId
{
    /// Allocate a context id that was never used before.
    pub (crate) fn allocate() -> Self
    {
        Self(allocate_id(&NEXT_CONTEXT_ID, "context"))
    }

    /// The context of the calling thread.
    ///
    /// If the calling thread has no context yet, it is assigned one.
    pub fn current() -> Self
    {
        CURRENT.with(|current| {
            match current.get() {
                Some(id) => id,
                None => {
                    let id = Self::allocate();
                    current.set(Some(id));
                    id
                },
            }
        })
    }

    /// The numeric value of the id.
    pub fn get(self) -> u64
    {
        self.0
    }

    /// Make the calling thread run as the given context.
    ///
    /// Called once by each worker thread before it runs any job.
    pub (crate) fn enter(self)
    {
        CURRENT.with(|current| {
            debug_assert!(current.get().is_none(), "Thread already has a context");
            current.set(Some(self));
        });
    }
}

impl fmt::Debug for ContextId
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        write!(f, "ContextId({})", self.0)
    }
}

impl fmt::Display for ContextId
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        fmt::Display::fmt(&self.0, f)
    }
}
