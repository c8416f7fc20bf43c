//! Isolated workers that exchange object graphs without data races.
//!
//! Every object lives on the heap of exactly one execution context,
//! which is either a [worker][`Worker`] or an ordinary thread.
//! Only that context may read or mutate the object.
//! There are two ways for an object to become visible elsewhere:
//!
//!  - [Freezing][`frozen::freeze`] makes an object and everything
//!    reachable from it immutable, after which any context may read it.
//!  - [Transferring][`transfer`] detaches an isolated object graph
//!    from its heap and attaches it to the heap of another context.
//!
//! Jobs submitted to a worker run one at a time on the worker's thread.
//! Their results travel back to the caller through a [`Future`].

#![warn(missing_docs)]

pub use self::{
    context::ContextId,
    describe::Description,
    error::{Error, Result},
    future::{
        Future,
        FutureId,
        FutureState,
        version_token,
        wait_for_multiple_futures,
        wait_for_version_change,
    },
    heap::{
        Fields,
        Heap,
        MutationGuard,
        ObjectId,
        ObjectRef,
        Value,
        WorkerBoundRef,
    },
    shared::AtomicReference,
    transfer::{TransferMode, TransferRecord, Transferable, attach, detach},
    worker::{Config, Worker, WorkerId, WorkerState},
};

pub mod frozen;
pub mod transfer;

mod context;
mod describe;
mod error;
mod future;
mod heap;
mod shared;
mod worker;
