//! Results of jobs that run on workers.

pub use self::version::{version_token, wait_for_version_change};

use {
    crate::{
        context::allocate_id,
        error::{Error, Result},
        transfer::TransferRecord,
    },
    std::{
        fmt,
        mem::replace,
        sync::{Arc, Condvar, Mutex, MutexGuard, atomic::AtomicU64},
        time::{Duration, Instant},
    },
};

mod version;

/// Uniquely identifies a future within the process.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct FutureId(pub u64);

static NEXT_FUTURE_ID: AtomicU64 = AtomicU64::new(1);

/// State of a future.
///
/// A future goes through these states in order, never skipping one.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FutureState
{
    /// The job is waiting in the queue of the worker.
    Scheduled,

    /// The worker is running the job.
    Computing,

    /// The result is available.
    Ready,

    /// The result was taken.
    Consumed,
}

/// Eventual result of a job submitted to a worker.
///
/// The result can be [consumed][`Self::consume`] exactly once.
pub struct Future<T>
{
    inner: Arc<Inner<T>>,
}

/// Completing side of a future, held by the job.
///
/// If dropped before completing, for instance because
/// the job was discarded, the future becomes ready with
/// [`Error::InvalidTransferState`], so that consumers never hang.
pub (crate) struct Completer<T>
{
    inner: Arc<Inner<T>>,
    completed: bool,
}

struct Inner<T>
{
    id: FutureId,
    slot: Mutex<Slot<T>>,
    ready: Condvar,

    /// States entered so far, in order.
    #[cfg(test)]
    history: Mutex<Vec<FutureState>>,
}

enum Slot<T>
{
    Scheduled,
    Computing,
    Ready(Result<TransferRecord<T>>),
    Consumed,
}

impl<T> Inner<T>
{
    /// Move the slot to its next state and tell observers.
    fn enter(&self, mut slot: MutexGuard<Slot<T>>, next: Slot<T>)
    {
        #[cfg(test)]
        self.history.lock().unwrap().push(next.state());
        *slot = next;
        drop(slot);
        version::bump();
    }
}

impl<T> Slot<T>
{
    fn state(&self) -> FutureState
    {
        match self {
            Self::Scheduled => FutureState::Scheduled,
            Self::Computing => FutureState::Computing,
            Self::Ready(..) => FutureState::Ready,
            Self::Consumed  => FutureState::Consumed,
        }
    }
}

/* -------------------------------------------------------------------------- */
/*                                  Consuming                                 */
/* -------------------------------------------------------------------------- */

impl<T> Future<T>
{
    /// Create a scheduled future along with the means to complete it.
    pub (crate) fn new() -> (Self, Completer<T>)
    {
        let inner = Arc::new(Inner{
            id: FutureId(allocate_id(&NEXT_FUTURE_ID, "future")),
            slot: Mutex::new(Slot::Scheduled),
            ready: Condvar::new(),
            #[cfg(test)]
            history: Mutex::new(vec![FutureState::Scheduled]),
        });
        let completer = Completer{inner: inner.clone(), completed: false};
        (Self{inner}, completer)
    }

    /// Process-wide identity of the future.
    pub fn id(&self) -> FutureId
    {
        self.inner.id
    }

    /// Current state of the future.
    ///
    /// The state may change as soon as this method returns,
    /// but only ever forwards.
    pub fn state(&self) -> FutureState
    {
        self.inner.slot.lock().unwrap().state()
    }

    /// Wait for the result and take it.
    ///
    /// The result is attached to the heap of the calling context.
    /// If the job failed, its failure is returned instead.
    /// Fails with [`Error::InvalidTransferState`]
    /// if the result was already consumed.
    pub fn consume(&self) -> Result<T>
    {
        let slot = self.inner.slot.lock().unwrap();
        let slot = self.inner.ready.wait_while(slot, is_pending).unwrap();
        self.take(slot)
    }

    /// Like [`consume`][`Self::consume`], but wait no longer than the timeout.
    ///
    /// Returns [`None`] if the result did not become available in time.
    pub fn consume_timeout(&self, timeout: Duration) -> Result<Option<T>>
    {
        let deadline = match Instant::now().checked_add(timeout) {
            Some(deadline) => deadline,
            None => return self.consume().map(Some),
        };

        let mut slot = self.inner.slot.lock().unwrap();
        while is_pending(&mut *slot) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            slot = self.inner.ready.wait_timeout(slot, remaining).unwrap().0;
        }
        self.take(slot).map(Some)
    }

    /// Consume the future by value.
    pub fn result(self) -> Result<T>
    {
        self.consume()
    }

    fn take(&self, mut slot: MutexGuard<Slot<T>>) -> Result<T>
    {
        let record = match replace(&mut *slot, Slot::Consumed) {
            Slot::Ready(record) => record,
            Slot::Consumed =>
                return Err(Error::InvalidTransferState("Future was already consumed")),
            Slot::Scheduled | Slot::Computing =>
                unreachable!("Future taken while pending"),
        };
        self.inner.enter(slot, Slot::Consumed);
        Ok(record?.attach())
    }

    /// States the future has entered so far, in order.
    #[cfg(test)]
    pub (crate) fn history(&self) -> Vec<FutureState>
    {
        self.inner.history.lock().unwrap().clone()
    }
}

fn is_pending<T>(slot: &mut Slot<T>) -> bool
{
    matches!(slot, Slot::Scheduled | Slot::Computing)
}

impl<T> fmt::Debug for Future<T>
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        f.debug_struct("Future")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Wait until at least one of the futures is ready.
///
/// Returns the indices of all futures that are ready,
/// or an empty list if none became ready before the timeout.
pub fn wait_for_multiple_futures<T>(futures: &[Future<T>], timeout: Duration)
    -> Vec<usize>
{
    let deadline = Instant::now().checked_add(timeout);
    loop {
        // The token must be taken before looking at the futures,
        // or a transition in between would go unnoticed.
        let token = version_token();

        let ready: Vec<usize> = futures.iter()
            .enumerate()
            .filter(|(_, future)| future.state() == FutureState::Ready)
            .map(|(index, _)| index)
            .collect();
        if !ready.is_empty() {
            return ready;
        }

        let remaining = match deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => Duration::MAX,
        };
        if remaining.is_zero() || !wait_for_version_change(token, remaining) {
            return Vec::new();
        }
    }
}

/* -------------------------------------------------------------------------- */
/*                                 Completing                                 */
/* -------------------------------------------------------------------------- */

impl<T> Completer<T>
{
    /// Mark the job as running.
    pub (crate) fn start(&self)
    {
        let slot = self.inner.slot.lock().unwrap();
        debug_assert!(matches!(*slot, Slot::Scheduled));
        self.inner.enter(slot, Slot::Computing);
    }

    /// Store the result and wake up consumers.
    pub (crate) fn complete(mut self, result: Result<TransferRecord<T>>)
    {
        self.resolve(result);
    }

    /// Store the result, passing through Computing
    /// if the job never started.
    fn resolve(&mut self, result: Result<TransferRecord<T>>)
    {
        let mut slot = self.inner.slot.lock().unwrap();
        if matches!(*slot, Slot::Scheduled) {
            self.inner.enter(slot, Slot::Computing);
            slot = self.inner.slot.lock().unwrap();
        }
        debug_assert!(is_pending(&mut *slot));
        self.inner.enter(slot, Slot::Ready(result));
        self.completed = true;
        self.inner.ready.notify_all();
    }
}

impl<T> Drop for Completer<T>
{
    fn drop(&mut self)
    {
        if !self.completed {
            let error = Error::InvalidTransferState("Job was discarded");
            self.resolve(Err(error));
        }
    }
}

#[cfg(test)]
mod tests
{
    use {
        super::*,
        crate::transfer::{TransferMode, detach},
        std::thread,
    };

    fn ok<T>(value: T) -> Result<TransferRecord<T>>
        where T: crate::transfer::Transferable
    {
        detach(value, TransferMode::Move)
    }

    #[test]
    fn goes_through_states_in_order()
    {
        let (future, completer) = Future::<i64>::new();
        assert_eq!(future.state(), FutureState::Scheduled);
        completer.start();
        assert_eq!(future.state(), FutureState::Computing);
        completer.complete(ok(42));
        assert_eq!(future.state(), FutureState::Ready);
        assert_eq!(future.consume().unwrap(), 42);
        assert_eq!(future.state(), FutureState::Consumed);
    }

    #[test]
    fn second_consume_fails()
    {
        let (future, completer) = Future::<i64>::new();
        completer.complete(ok(1));
        future.consume().unwrap();
        let error = future.consume().unwrap_err();
        assert!(error.is_invalid_transfer_state());
    }

    #[test]
    fn consume_blocks_until_ready()
    {
        let (future, completer) = Future::<i64>::new();
        let worker = thread::spawn(move || {
            completer.start();
            thread::sleep(Duration::from_millis(20));
            completer.complete(ok(7));
        });
        assert_eq!(future.consume().unwrap(), 7);
        worker.join().unwrap();
    }

    #[test]
    fn consume_timeout_reports_timeout()
    {
        let (future, completer) = Future::<i64>::new();
        let result = future.consume_timeout(Duration::from_millis(10)).unwrap();
        assert!(result.is_none());
        assert_eq!(future.state(), FutureState::Scheduled);

        completer.complete(ok(3));
        let result = future.consume_timeout(Duration::from_millis(10)).unwrap();
        assert_eq!(result, Some(3));
    }

    #[test]
    fn dropped_completer_fails_future()
    {
        let (future, completer) = Future::<i64>::new();
        drop(completer);
        assert!(future.consume().unwrap_err().is_invalid_transfer_state());
        assert_eq!(future.history(), [
            FutureState::Scheduled,
            FutureState::Computing,
            FutureState::Ready,
            FutureState::Consumed,
        ]);
    }

    #[test]
    fn completing_unstarted_job_passes_through_computing()
    {
        let (future, completer) = Future::<i64>::new();
        completer.complete(ok(5));
        assert_eq!(future.state(), FutureState::Ready);
        assert_eq!(future.history(), [
            FutureState::Scheduled,
            FutureState::Computing,
            FutureState::Ready,
        ]);
    }

    #[test]
    fn failures_are_reraised()
    {
        let (future, completer) = Future::<i64>::new();
        completer.complete(Err(Error::InvalidTransferState("test")));
        assert!(future.consume().unwrap_err().is_invalid_transfer_state());
        assert_eq!(future.state(), FutureState::Consumed);
    }

    #[test]
    fn transitions_bump_version()
    {
        let (_future, completer) = Future::<i64>::new();
        let token = version_token();
        completer.start();
        assert!(version_token() > token);
    }

    #[test]
    fn wait_for_multiple_finds_ready()
    {
        let (first, _first_completer) = Future::<i64>::new();
        let (second, second_completer) = Future::<i64>::new();
        let futures = [first, second];

        let none = wait_for_multiple_futures(&futures, Duration::from_millis(10));
        assert!(none.is_empty());

        let completing = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            second_completer.complete(ok(2));
        });
        let ready = wait_for_multiple_futures(&futures, Duration::from_secs(10));
        assert_eq!(ready, vec![1]);
        assert_eq!(futures[1].consume().unwrap(), 2);
        completing.join().unwrap();
    }
}
