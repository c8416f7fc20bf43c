//! Objects and the heaps that own them.
//!
//! Each execution context has a private heap.
//! The heap does not own memory itself;
//! objects are reference counted and freed when unreachable.
//! What the heap does own is the right to access its objects.
//! That right is recorded in the mutability tag of every object
//! and mirrored by the heap's registry of the objects it owns,
//! which transfers update when moving objects between heaps.

pub use self::{bound::*, object::*};

use {
    crate::context::ContextId,
    std::{
        cell::{Cell, RefCell},
        collections::HashMap,
        sync::Weak,
    },
};

mod borrow_cell;
mod bound;
mod object;

/// Registry size below which dead entries are not pruned.
const MIN_PRUNE_THRESHOLD: usize = 64;

/// Private heap of an execution context.
///
/// There is exactly one heap per thread.
/// Use [`Heap::with_current`] to access it.
pub struct Heap
{
    context: ContextId,

    /// Objects allocated on or attached to this heap.
    ///
    /// Entries are weak, so the registry does not keep objects alive
    /// and does not count as a reference when checking isolation.
    objects: RefCell<HashMap<ObjectId, Weak<Object>>>,

    /// Registry size at which dead entries are next pruned.
    prune_threshold: Cell<usize>,
}

thread_local!
{
    static CURRENT_HEAP: Heap = Heap::new(ContextId::current());
}

impl Heap
{
    fn new(context: ContextId) -> Self
    {
        Self{
            context,
            objects: RefCell::new(HashMap::new()),
            prune_threshold: Cell::new(MIN_PRUNE_THRESHOLD),
        }
    }

    /// Call a function with the heap of the calling context.
    pub fn with_current<F, R>(f: F) -> R
        where F: FnOnce(&Heap) -> R
    {
        CURRENT_HEAP.with(f)
    }

    /// The context that owns this heap.
    pub fn context(&self) -> ContextId
    {
        self.context
    }

    /// Whether the object is exclusively owned by this heap.
    pub fn contains(&self, object: &ObjectRef) -> bool
    {
        object.owner() == Some(self.context)
            && self.objects.borrow().contains_key(&object.id())
    }

    /// Number of live objects exclusively owned by this heap.
    pub fn len(&self) -> usize
    {
        let objects = self.objects.borrow();
        objects.values()
            .filter_map(ObjectRef::upgrade)
            .filter(|object| object.owner() == Some(self.context))
            .count()
    }

    /// Whether the heap owns no live objects.
    pub fn is_empty(&self) -> bool
    {
        self.len() == 0
    }

    /// Record that the object now belongs to this heap.
    pub (crate) fn register(&self, object: &ObjectRef)
    {
        let mut objects = self.objects.borrow_mut();
        objects.insert(object.id(), object.downgrade());

        // Keep the registry proportional to the number of live objects.
        if objects.len() >= self.prune_threshold.get() {
            objects.retain(|_, weak| weak.strong_count() != 0);
            let threshold = (objects.len() * 2).max(MIN_PRUNE_THRESHOLD);
            self.prune_threshold.set(threshold);
        }
    }

    /// Record that the object no longer belongs to this heap.
    pub (crate) fn unregister(&self, object: &ObjectRef)
    {
        let mut objects = self.objects.borrow_mut();
        objects.remove(&object.id());
    }
}
