use {
    super::ObjectRef,
    crate::{context::ContextId, error::{Error, Result}, frozen},
};

/// Reference that only resolves on the context that created it.
///
/// A bound reference may be stored in objects that are frozen
/// or transferred to other workers. Freezing and transferring do not
/// look through it, so the target stays exclusive to its owner.
/// Other contexts can carry the reference around and hand it back,
/// but cannot get at the target.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkerBoundRef
{
    owner: ContextId,
    target: ObjectRef,
}

impl WorkerBoundRef
{
    /// Bind a reference to the calling context.
    ///
    /// The target must be accessible from the calling context.
    pub fn new(target: ObjectRef) -> Result<Self>
    {
        frozen::check_same_worker_access(&target)?;
        Ok(Self{owner: ContextId::current(), target})
    }

    /// The context the reference is bound to.
    pub fn owner(&self) -> ContextId
    {
        self.owner
    }

    /// Resolve the reference.
    ///
    /// Fails unless called on the owning context.
    pub fn get(&self) -> Result<ObjectRef>
    {
        self.get_or_none()
            .ok_or_else(|| Error::IllegalCrossWorkerAccess(self.target.describe()))
    }

    /// Resolve the reference, or return [`None`] on other contexts.
    pub fn get_or_none(&self) -> Option<ObjectRef>
    {
        (ContextId::current() == self.owner).then(|| self.target.clone())
    }
}
