//! Frozen-state protocol.
//!
//! Every object is either exclusive to one context or frozen.
//! Freezing is transitive and irreversible:
//! freezing an object freezes everything reachable from it,
//! and a frozen object never becomes exclusive again.
//! Frozen objects can be read by any context without synchronization,
//! because nobody can mutate them anymore.
//!
//! The checks in this module are the only place where these rules
//! are enforced; object accessors and transfers call into them.
//! The frozen check always comes first, so that accessing
//! a frozen object is never reported as a cross-worker access.

use {
    crate::{
        context::ContextId,
        error::{Error, Result},
        heap::{Flags, ObjectRef, Tag, Value},
    },
    std::collections::{HashSet, VecDeque},
    tracing::trace,
};

/// Freeze an object and everything reachable from it.
///
/// Freezing happens in two phases.
/// First the reachable graph is collected and every object is checked;
/// then all collected objects are tagged frozen.
/// Hence a failed freeze leaves every object as it was.
///
/// Already frozen objects are not traversed, since whatever
/// they reach is frozen as well. Bound references are not traversed.
///
/// Fails with [`Error::FreezingConflict`] if an object in the graph
/// is mutably borrowed or was marked by [`ensure_never_frozen`],
/// and with [`Error::IllegalCrossWorkerAccess`] if an object in the graph
/// is not owned by the calling context.
pub fn freeze(target: &ObjectRef) -> Result<()>
{
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from([target.clone()]);
    let mut collected = Vec::new();

    while let Some(object) = queue.pop_front() {
        if object.is_frozen() || !visited.insert(object.id()) {
            continue;
        }

        check_same_worker_access(&object)?;

        if object.flags().contains(Flags::NEVER_FROZEN)
            || object.is_mutably_borrowed() {
            let error = Error::FreezingConflict{
                target: target.describe(),
                blocker: object.describe(),
            };
            trace!(%error, "Freezing failed");
            return Err(error);
        }

        let fields = object.try_fields()?;
        queue.extend(fields.iter().filter_map(Value::as_object).cloned());
        drop(fields);

        collected.push(object);
    }

    for object in &collected {
        object.set_tag(Tag::Frozen);
    }

    Ok(())
}

/// Whether the value can be read from any context.
///
/// Always safe to call, regardless of ownership.
pub fn is_frozen(value: &Value) -> bool
{
    value.is_frozen()
}

/// Make every future attempt to freeze a graph containing the object fail.
///
/// The object will be reported as the blocker.
/// Fails with [`Error::FreezingConflict`] if the object is already frozen.
pub fn ensure_never_frozen(object: &ObjectRef) -> Result<()>
{
    if object.is_frozen() {
        return Err(Error::FreezingConflict{
            target: object.describe(),
            blocker: object.describe(),
        });
    }
    check_same_worker_access(object)?;
    object.insert_flags(Flags::NEVER_FROZEN);
    Ok(())
}

/// Check that the object may be mutated.
///
/// Fails with [`Error::InvalidMutability`] if the object is frozen.
/// This does not check ownership; see [`check_same_worker_access`].
pub fn check_mutation_allowed(object: &ObjectRef) -> Result<()>
{
    if object.is_frozen() {
        return Err(Error::InvalidMutability(object.describe()));
    }
    Ok(())
}

/// Check that the calling context may access the object.
///
/// Frozen objects may be accessed from anywhere.
/// Exclusive objects may only be accessed by their owner.
/// Detached objects may not be accessed at all until attached.
/// Fails with [`Error::IllegalCrossWorkerAccess`] otherwise.
pub fn check_same_worker_access(object: &ObjectRef) -> Result<()>
{
    match object.tag() {
        Tag::Frozen => Ok(()),
        Tag::Exclusive(owner) if owner == ContextId::current() => Ok(()),
        Tag::Exclusive(..) | Tag::Detached =>
            Err(Error::IllegalCrossWorkerAccess(object.describe())),
    }
}

/// Check that a value may be stored into an object of the calling context.
///
/// References must be accessible from the calling context.
pub fn check_value_access(value: &Value) -> Result<()>
{
    match value {
        Value::Ref(object) => check_same_worker_access(object),
        _ => Ok(()),
    }
}

/// Check that the value may be shared between contexts as is.
///
/// Fails with [`Error::NotFrozen`] for references to unfrozen objects.
pub fn check_if_frozen(value: &Value) -> Result<()>
{
    match value {
        Value::Ref(object) if !object.is_frozen() =>
            Err(Error::NotFrozen(object.describe())),
        _ => Ok(()),
    }
}
