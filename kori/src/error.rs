use {
    crate::{describe::Description, worker::WorkerId},
    std::io,
    thiserror::Error,
};

/// Result of a runtime operation.
pub type Result<T> =
    std::result::Result<T, Error>;

/// Protocol violation or failure reported by the runtime.
///
/// Every error is reported at the point of the offending call,
/// except for [`UncaughtJobFailure`][`Self::UncaughtJobFailure`],
/// which is reported when the result of the failed job is consumed.
#[derive(Debug, Error)]
pub enum Error
{
    /// Worker threads cannot be created here.
    #[error("Workers are not supported: {0}")]
    UnsupportedPlatform(#[source] io::Error),

    /// The operation is not allowed in the current state.
    ///
    /// Examples are submitting to a terminated worker,
    /// consuming a future twice, or detaching an object graph
    /// that is still referenced from outside the graph.
    #[error("Illegal transfer state: {0}")]
    InvalidTransferState(&'static str),

    /// Freezing failed because an object in the graph cannot be frozen.
    ///
    /// The blocker is either mutably borrowed at the moment
    /// or was marked to never be frozen.
    #[error("freezing of {target} has failed, first blocker is {blocker}")]
    FreezingConflict
    {
        /// The object on which freezing was requested.
        target: Description,

        /// The first object found that prevented freezing.
        blocker: Description,
    },

    /// Mutation of a frozen object was attempted.
    #[error("mutation attempt of frozen {0}")]
    InvalidMutability(Description),

    /// An object was accessed from a context that does not own it.
    #[error("illegal attempt to access non-shared {0} from other thread")]
    IllegalCrossWorkerAccess(Description),

    /// A value had to be frozen to be shared, but was not.
    #[error("{0} must be frozen")]
    NotFrozen(Description),

    /// A field index was not less than the number of fields.
    #[error("field {index} of {object} is out of bounds, length is {len}")]
    FieldOutOfBounds
    {
        /// The object whose field was accessed.
        object: Description,

        /// The offending index.
        index: usize,

        /// The number of fields of the object.
        len: usize,
    },

    /// Fields of an object were borrowed while already borrowed incompatibly.
    #[error("{0} is already borrowed")]
    BorrowConflict(Description),

    /// A job failed with an error or a panic.
    #[error("Uncaught failure in job on worker {worker}: {cause}")]
    UncaughtJobFailure
    {
        /// The worker on which the job ran.
        worker: WorkerId,

        /// What the job failed with.
        cause: anyhow::Error,
    },
}

impl Error
{
    /// Whether this is an [`InvalidTransferState`][`Self::InvalidTransferState`].
    pub fn is_invalid_transfer_state(&self) -> bool
    {
        matches!(self, Self::InvalidTransferState(..))
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn messages()
    {
        let point = Description{type_name: "Point", identity_hash: 0x1f};
        let lock = Description{type_name: "Lock", identity_hash: 0x2e};

        let error = Error::InvalidMutability(point.clone());
        assert_eq!(error.to_string(), "mutation attempt of frozen Point@1f");

        let error = Error::IllegalCrossWorkerAccess(point.clone());
        assert_eq!(
            error.to_string(),
            "illegal attempt to access non-shared Point@1f from other thread",
        );

        let error = Error::FreezingConflict{target: point, blocker: lock};
        assert_eq!(
            error.to_string(),
            "freezing of Point@1f has failed, first blocker is Lock@2e",
        );
    }
}
