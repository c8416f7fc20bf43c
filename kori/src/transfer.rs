//! Moving object graphs between heaps.
//!
//! A value that references objects cannot simply be sent
//! to another context, because the objects would still be exclusive
//! to the sending context. Instead the value is [detached][`detach`]
//! into a [`TransferRecord`], which is sent, and then [attached][`attach`]
//! on the receiving context.
//!
//! # Isolation
//!
//! Moving a graph is only sound if the sending context
//! cannot reach the graph anymore afterwards.
//! Detaching verifies this by accounting for every handle
//! to every object in the graph: each must be either an edge
//! from within the graph or part of the value being detached.
//! A handle kept anywhere else, including a local variable
//! in the sending context, makes the graph non-isolated.
//!
//! Objects are reference counted without cycle collection,
//! so an unreachable cycle that points into the graph
//! also makes the graph non-isolated.

use {
    crate::{
        context::ContextId,
        error::{Error, Result},
        frozen,
        heap::{Heap, ObjectId, ObjectRef, Tag, Value, WorkerBoundRef},
    },
    std::{collections::{HashMap, VecDeque}, sync::Arc},
    tracing::trace,
};

/// How an object graph crosses between contexts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransferMode
{
    /// Transfer exclusive ownership.
    ///
    /// The graph must be isolated; see the [module docs][`self`].
    /// Frozen parts of the graph are shared rather than moved.
    Move,

    /// Share an already frozen graph.
    ///
    /// Nothing changes ownership.
    Share,
}

/// Values that can be detached and attached.
///
/// Implementations enumerate the objects the value references directly.
/// Objects reachable through those are found by walking the heap.
pub trait Transferable: Send + 'static
{
    /// Call the function with every directly referenced object.
    ///
    /// An object referenced multiple times must be reported
    /// once per reference.
    fn for_each_object(&self, f: &mut dyn FnMut(&ObjectRef));
}

/// Object graph in flight between two heaps.
///
/// While in flight, moved objects are owned by nobody,
/// so neither the sending nor the receiving context can access them.
/// Dropping a record without attaching it discards the graph.
pub struct TransferRecord<T>
{
    value: T,

    /// How the graph was detached.
    mode: TransferMode,

    /// Moved objects, which attaching hands to the receiving heap.
    nodes: Vec<ObjectRef>,
}

impl<T> TransferRecord<T>
{
    /// How the graph was detached.
    ///
    /// This is [`TransferMode::Share`] whenever nothing had to move,
    /// even if [`TransferMode::Move`] was requested.
    pub fn mode(&self) -> TransferMode
    {
        self.mode
    }

    /// Number of objects that change owner.
    pub fn moved_objects(&self) -> usize
    {
        self.nodes.len()
    }

    /// Attach the graph to the heap of the calling context.
    ///
    /// See [`attach`].
    pub fn attach(self) -> T
    {
        attach(self)
    }

    /// A record that moves nothing.
    fn shared(value: T) -> Self
    {
        Self{value, mode: TransferMode::Share, nodes: Vec::new()}
    }
}

/// Detach the graph reachable from a value from the calling context.
///
/// With [`TransferMode::Share`] every referenced object must be frozen.
/// With [`TransferMode::Move`] the unfrozen part of the graph must be
/// owned by the calling context, not mutably borrowed, and isolated;
/// it is then removed from the calling context's heap.
/// A value without unfrozen objects is always shared,
/// regardless of the requested mode.
///
/// Fails with [`Error::InvalidTransferState`] if the graph cannot be
/// transferred in the requested mode, or with
/// [`Error::IllegalCrossWorkerAccess`] if part of it is owned elsewhere.
/// On failure, nothing changes.
pub fn detach<T>(value: T, mode: TransferMode) -> Result<TransferRecord<T>>
    where T: Transferable
{
    // How many handles to each object the value itself holds.
    let mut handles_in_value = HashMap::<ObjectId, usize>::new();
    let mut queue = VecDeque::new();
    value.for_each_object(&mut |object| {
        *handles_in_value.entry(object.id()).or_default() += 1;
        queue.push_back(object.clone());
    });

    if queue.iter().all(ObjectRef::is_frozen) {
        return Ok(TransferRecord::shared(value));
    }

    if mode == TransferMode::Share {
        return Err(reject("Shared object graph is not frozen"));
    }

    // Walk the unfrozen part of the graph and count the edges inside it.
    let mut walked = HashMap::<ObjectId, ObjectRef>::new();
    let mut handles_in_graph = HashMap::<ObjectId, usize>::new();
    while let Some(object) = queue.pop_front() {
        if object.is_frozen() || walked.contains_key(&object.id()) {
            continue;
        }

        frozen::check_same_worker_access(&object)?;

        if object.is_mutably_borrowed() {
            return Err(reject("Object graph is being mutated"));
        }

        let fields = object.try_fields()?;
        for child in fields.iter().filter_map(Value::as_object) {
            if !child.is_frozen() {
                *handles_in_graph.entry(child.id()).or_default() += 1;
                queue.push_back(child.clone());
            }
        }
        drop(fields);

        walked.insert(object.id(), object);
    }

    // Every handle must be accounted for.
    // The extra one is the handle in walked.
    for (id, object) in &walked {
        let expected = 1
            + handles_in_value.get(id).copied().unwrap_or(0)
            + handles_in_graph.get(id).copied().unwrap_or(0);
        if object.handle_count() != expected {
            return Err(reject("Object graph is still referenced from its heap"));
        }
    }

    let nodes: Vec<ObjectRef> = walked.into_values().collect();
    Heap::with_current(|heap| {
        for node in &nodes {
            node.set_tag(Tag::Detached);
            heap.unregister(node);
        }
    });

    Ok(TransferRecord{value, mode: TransferMode::Move, nodes})
}

/// Attach a detached graph to the heap of the calling context.
///
/// Moved objects become exclusive to the calling context.
/// Shared objects stay frozen and are usable as they are.
pub fn attach<T>(record: TransferRecord<T>) -> T
{
    let context = ContextId::current();
    Heap::with_current(|heap| {
        for node in &record.nodes {
            node.set_tag(Tag::Exclusive(context));
            heap.register(node);
        }
    });
    record.value
}

fn reject(reason: &'static str) -> Error
{
    trace!(reason, "Transfer rejected");
    Error::InvalidTransferState(reason)
}

/* -------------------------------------------------------------------------- */
/*                         Transferable implementations                       */
/* -------------------------------------------------------------------------- */

macro_rules! transferable_without_objects
{
    ($($type:ty),* $(,)?) => {
        $(
            impl Transferable for $type
            {
                fn for_each_object(&self, _: &mut dyn FnMut(&ObjectRef))
                {
                }
            }
        )*
    };
}

transferable_without_objects!(
    (), bool, char, f64, i32, i64, u32, u64, usize,
    String, Arc<str>, WorkerBoundRef,
);

impl Transferable for ObjectRef
{
    fn for_each_object(&self, f: &mut dyn FnMut(&ObjectRef))
    {
        f(self);
    }
}

impl Transferable for Value
{
    fn for_each_object(&self, f: &mut dyn FnMut(&ObjectRef))
    {
        if let Self::Ref(object) = self {
            f(object);
        }
    }
}

impl<T> Transferable for Option<T>
    where T: Transferable
{
    fn for_each_object(&self, f: &mut dyn FnMut(&ObjectRef))
    {
        if let Some(value) = self {
            value.for_each_object(f);
        }
    }
}

impl<T> Transferable for Vec<T>
    where T: Transferable
{
    fn for_each_object(&self, f: &mut dyn FnMut(&ObjectRef))
    {
        for value in self {
            value.for_each_object(f);
        }
    }
}

impl<A, B> Transferable for (A, B)
    where A: Transferable, B: Transferable
{
    fn for_each_object(&self, f: &mut dyn FnMut(&ObjectRef))
    {
        self.0.for_each_object(f);
        self.1.for_each_object(f);
    }
}
