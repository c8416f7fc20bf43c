//! Workers and their job loops.
//!
//! Each worker is backed by one thread, which runs
//! the jobs submitted to the worker one at a time, in submission order.
//! Since no two jobs of a worker run at once, objects exclusive to
//! the worker can be accessed by its jobs without synchronization.
//!
//! A worker keeps running until termination is requested,
//! even if all handles to it are dropped.

pub use self::config::Config;

use {
    self::queue::{Job, Outcome, Queue, Task},
    crate::{
        context::ContextId,
        error::{Error, Result},
        future::Future,
        transfer::{TransferMode, Transferable, detach},
    },
    anyhow::anyhow,
    std::{
        any::Any,
        cell::RefCell,
        fmt,
        io,
        panic::{AssertUnwindSafe, catch_unwind},
        sync::{Arc, Condvar, Mutex, MutexGuard},
        thread,
        time::{Duration, Instant},
    },
    tracing::{debug, debug_span, error, warn},
};

mod config;
mod queue;

/// Uniquely identifies a worker within the process.
///
/// The id of a worker is also the id of its [execution context][`ContextId`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct WorkerId(u64);

impl WorkerId
{
    /// The numeric value of the id.
    pub fn get(self) -> u64
    {
        self.0
    }

    /// The execution context of the worker.
    pub fn context(self) -> ContextId
    {
        ContextId(self.0)
    }
}

impl fmt::Display for WorkerId
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Lifecycle state of a worker.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WorkerState
{
    /// The worker accepts jobs.
    Running,

    /// The worker no longer accepts jobs,
    /// but its thread may still be running jobs.
    TerminationRequested,

    /// The thread of the worker has exited its job loop.
    Terminated,
}

thread_local!
{
    static CURRENT: RefCell<Option<Worker>> = RefCell::new(None);
}

/// Handle to a worker.
///
/// Handles are cheap to clone and can be sent to other threads.
#[derive(Clone)]
pub struct Worker
{
    shared: Arc<Shared>,
}

/// State shared between the handles and the thread of a worker.
struct Shared
{
    id: WorkerId,
    name: Option<String>,
    report_errors: bool,
    queue: Mutex<Queue>,

    /// Notified when a job is queued.
    wakeup: Condvar,

    /// Notified when the job loop has exited.
    exited: Condvar,
}

/* -------------------------------------------------------------------------- */
/*                                  Lifecycle                                 */
/* -------------------------------------------------------------------------- */

impl Worker
{
    /// Start a new worker with its own thread.
    ///
    /// Fails with [`Error::UnsupportedPlatform`]
    /// if the thread cannot be created.
    pub fn start(config: Config) -> Result<Self>
    {
        if cfg!(all(target_family = "wasm", not(target_feature = "atomics"))) {
            let error = io::Error::new(io::ErrorKind::Unsupported, "no threads");
            return Err(Error::UnsupportedPlatform(error));
        }

        let Config{name, report_errors, stack_size} = config;
        let id = WorkerId(ContextId::allocate().get());
        let shared = Shared{
            id,
            name,
            report_errors,
            queue: Mutex::new(Queue::new()),
            wakeup: Condvar::new(),
            exited: Condvar::new(),
        };
        let worker = Self{shared: Arc::new(shared)};

        let mut builder = thread::Builder::new();
        if let Some(name) = &worker.shared.name {
            builder = builder.name(name.clone());
        }
        if let Some(stack_size) = stack_size {
            builder = builder.stack_size(stack_size);
        }

        let thread_worker = worker.clone();
        builder.spawn(move || thread_worker.run())
            .map_err(Error::UnsupportedPlatform)?;

        debug!(worker = %id, name = ?worker.shared.name, "Started worker");
        Ok(worker)
    }

    /// The worker whose thread calls this, if any.
    pub fn current() -> Option<Self>
    {
        CURRENT.with(|current| current.borrow().clone())
    }

    /// Process-wide identity of the worker.
    pub fn id(&self) -> WorkerId
    {
        self.shared.id
    }

    /// The name the worker was started with.
    pub fn name(&self) -> Option<&str>
    {
        self.shared.name.as_deref()
    }

    /// Current lifecycle state of the worker.
    pub fn state(&self) -> WorkerState
    {
        self.shared.lock().state
    }

    /// Stop accepting jobs and let the worker exit.
    ///
    /// If `process_scheduled_jobs` is set, the worker first runs
    /// all jobs already queued, as well as delayed jobs that are due.
    /// Otherwise queued jobs are discarded, and their futures fail with
    /// [`Error::InvalidTransferState`]. Either way, delayed jobs that
    /// are not yet due are discarded, and a job that is running
    /// runs to completion.
    ///
    /// The returned future becomes ready once the worker has exited.
    /// Requesting termination again is allowed,
    /// and may upgrade a draining termination to a discarding one.
    pub fn request_termination(&self, process_scheduled_jobs: bool) -> Future<()>
    {
        let (future, completer) = Future::new();

        let mut queue = self.shared.lock();
        if queue.state == WorkerState::Terminated {
            drop(queue);
            completer.start();
            completer.complete(detach((), TransferMode::Share));
            return future;
        }
        queue.add_termination(completer);
        let discarded = self.shared.terminate(&mut queue, process_scheduled_jobs);
        drop(queue);
        drop(discarded);

        debug!(worker = %self.id(), process_scheduled_jobs, "Requested termination");
        future
    }

    /// Wait until the worker has exited its job loop.
    ///
    /// Returns immediately if the worker has already terminated.
    /// Fails with [`Error::InvalidTransferState`]
    /// if called from the worker itself.
    pub fn wait_termination(&self) -> Result<()>
    {
        self.check_other_thread()?;
        let queue = self.shared.lock();
        let _queue = self.shared.exited
            .wait_while(queue, |queue| queue.state != WorkerState::Terminated)
            .unwrap();
        Ok(())
    }

    /// Like [`wait_termination`][`Self::wait_termination`],
    /// but wait no longer than the timeout.
    ///
    /// Returns whether the worker has terminated.
    pub fn wait_termination_timeout(&self, timeout: Duration) -> Result<bool>
    {
        let deadline = match Instant::now().checked_add(timeout) {
            Some(deadline) => deadline,
            None => return self.wait_termination().map(|()| true),
        };

        self.check_other_thread()?;
        let mut queue = self.shared.lock();
        while queue.state != WorkerState::Terminated {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            queue = self.shared.exited.wait_timeout(queue, remaining).unwrap().0;
        }
        Ok(true)
    }

    fn is_current(&self) -> bool
    {
        CURRENT.with(|current| {
            current.borrow().as_ref().map(Self::id) == Some(self.id())
        })
    }

    fn check_own_thread(&self) -> Result<()>
    {
        if self.is_current() {
            Ok(())
        } else {
            Err(Error::InvalidTransferState(
                "Worker queue can only be processed by the worker itself"))
        }
    }

    fn check_other_thread(&self) -> Result<()>
    {
        if self.is_current() {
            Err(Error::InvalidTransferState(
                "Worker cannot wait for its own termination"))
        } else {
            Ok(())
        }
    }

    /// Body of the worker thread.
    fn run(self)
    {
        let span = debug_span!("worker", id = %self.id(), name = ?self.shared.name);
        let _entered = span.enter();

        self.id().context().enter();
        CURRENT.with(|current| *current.borrow_mut() = Some(self.clone()));

        loop {
            let job = self.shared.wait_ready(None, Queue::is_ready)
                .and_then(|mut queue| queue.pop_front());
            match job {
                Some(Job::Run(task)) => self.shared.run_task(task),
                Some(Job::Terminate) | None => break,
            }
        }

        CURRENT.with(|current| current.borrow_mut().take());
        self.shared.exit();
    }
}

impl PartialEq for Worker
{
    fn eq(&self, other: &Self) -> bool
    {
        self.id() == other.id()
    }
}

impl Eq for Worker
{
}

impl fmt::Debug for Worker
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        f.debug_struct("Worker")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .finish_non_exhaustive()
    }
}

/* -------------------------------------------------------------------------- */
/*                                    Jobs                                    */
/* -------------------------------------------------------------------------- */

impl Worker
{
    /// Submit a job to the worker.
    ///
    /// The producer runs on the worker thread.
    /// Its result is detached from the worker in the given mode
    /// and attached to the context that consumes the returned future.
    /// If the producer fails or panics, consuming the future fails with
    /// [`Error::UncaughtJobFailure`]; if detaching fails,
    /// consuming the future fails with the error from [`detach`].
    ///
    /// Fails with [`Error::InvalidTransferState`]
    /// if termination of the worker was requested.
    pub fn execute<T, F>(&self, mode: TransferMode, producer: F)
        -> Result<Future<T>>
        where T: Transferable
            , F: FnOnce() -> anyhow::Result<T> + Send + 'static
    {
        let (future, completer) = Future::new();
        let task: Task = Box::new(move |shared: &Shared| {
            completer.start();
            let detached = run_guarded(move || {
                let value = producer()?;
                Ok(detach(value, mode))
            });
            match detached {
                Ok(record) => {
                    completer.complete(record);
                    Outcome::Done
                },
                Err(cause) => {
                    completer.complete(Err(shared.uncaught(cause)));
                    Outcome::Failed
                },
            }
        });

        let mut queue = self.shared.lock();
        self.shared.check_running(&queue)?;
        queue.promote(Instant::now());
        queue.push_back(Job::Run(task));
        self.shared.wakeup.notify_one();
        Ok(future)
    }

    /// Run an operation on the worker once the delay has elapsed.
    ///
    /// Delayed operations run in order of due time,
    /// after the jobs that were queued before they became due.
    /// There is no way to observe their results;
    /// a failing operation is treated like a failing job.
    ///
    /// Fails with [`Error::InvalidTransferState`]
    /// if termination of the worker was requested.
    pub fn execute_after<F>(&self, delay: Duration, operation: F) -> Result<()>
        where F: FnOnce() -> anyhow::Result<()> + Send + 'static
    {
        let due = Instant::now().checked_add(delay)
            .ok_or(Error::InvalidTransferState("Delay is out of range"))?;
        let task: Task = Box::new(move |shared: &Shared| {
            match run_guarded(operation) {
                Ok(()) => Outcome::Done,
                Err(cause) => {
                    shared.uncaught(cause);
                    Outcome::Failed
                },
            }
        });

        let mut queue = self.shared.lock();
        self.shared.check_running(&queue)?;
        queue.push_delayed(due, task);
        self.shared.wakeup.notify_one();
        Ok(())
    }

    /// Run the jobs that are ready, without waiting for more.
    ///
    /// Returns whether any job ran.
    /// Must be called from the worker itself, typically from within a job;
    /// otherwise fails with [`Error::InvalidTransferState`].
    pub fn process_queue(&self) -> Result<bool>
    {
        self.check_own_thread()?;
        Ok(self.shared.process_ready())
    }

    /// Block the worker until a job is ready or the timeout elapses.
    ///
    /// A pending termination does not count as a ready job.
    /// If `process` is set, the jobs that are ready are run afterwards,
    /// and the result is whether any job ran.
    /// Otherwise the result is whether a job is ready.
    /// Must be called from the worker itself;
    /// otherwise fails with [`Error::InvalidTransferState`].
    pub fn park(&self, timeout: Duration, process: bool) -> Result<bool>
    {
        self.check_own_thread()?;
        let deadline = Instant::now().checked_add(timeout);
        let ready = self.shared.wait_ready(deadline, Queue::is_runnable).is_some();
        if process && ready {
            Ok(self.shared.process_ready())
        } else {
            Ok(ready)
        }
    }
}

/// Run a job body, turning a panic into an error.
fn run_guarded<T, F>(body: F) -> anyhow::Result<T>
    where F: FnOnce() -> anyhow::Result<T>
{
    catch_unwind(AssertUnwindSafe(body))
        .unwrap_or_else(|payload| Err(panic_failure(payload)))
}

fn panic_failure(payload: Box<dyn Any + Send>) -> anyhow::Error
{
    let message = payload.downcast_ref::<&str>().map(|message| message.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| String::from("non-string payload"));
    anyhow!("Job panicked: {message}")
}

/* -------------------------------------------------------------------------- */
/*                                  Job loop                                  */
/* -------------------------------------------------------------------------- */

impl Shared
{
    fn lock(&self) -> MutexGuard<Queue>
    {
        self.queue.lock().unwrap()
    }

    fn check_running(&self, queue: &Queue) -> Result<()>
    {
        match queue.state {
            WorkerState::Running => Ok(()),
            WorkerState::TerminationRequested | WorkerState::Terminated =>
                Err(Error::InvalidTransferState("Worker is terminated")),
        }
    }

    /// Wait until the queue is ready, or forever if there is no deadline.
    ///
    /// Returns the locked queue once `ready` holds for it,
    /// or [`None`] if the deadline passed first.
    fn wait_ready(&self, deadline: Option<Instant>, ready: fn(&Queue) -> bool)
        -> Option<MutexGuard<Queue>>
    {
        let mut queue = self.lock();
        loop {
            let now = Instant::now();
            queue.promote(now);
            if ready(&*queue) {
                return Some(queue);
            }
            if deadline.map_or(false, |deadline| deadline <= now) {
                return None;
            }

            let wake = match (queue.next_due(), deadline) {
                (Some(due), Some(deadline)) => Some(due.min(deadline)),
                (due, deadline) => due.or(deadline),
            };
            queue = match wake {
                None => self.wakeup.wait(queue).unwrap(),
                Some(wake) => {
                    let timeout = wake.saturating_duration_since(now);
                    self.wakeup.wait_timeout(queue, timeout).unwrap().0
                },
            };
        }
    }

    /// Run the jobs that are ready, stopping at a termination marker.
    fn process_ready(&self) -> bool
    {
        let mut processed = false;
        loop {
            let job = {
                let mut queue = self.lock();
                queue.promote(Instant::now());
                queue.pop_front()
            };
            match job {
                None => return processed,
                Some(Job::Terminate) => {
                    // Leave the marker for the job loop.
                    self.lock().push_front(Job::Terminate);
                    return processed;
                },
                Some(Job::Run(task)) => {
                    self.run_task(task);
                    processed = true;
                },
            }
        }
    }

    fn run_task(&self, task: Task)
    {
        if task(self) == Outcome::Failed && !self.report_errors {
            error!(worker = %self.id, "Terminating worker after uncaught failure");
            let discarded = self.terminate(&mut self.lock(), false);
            drop(discarded);
        }
    }

    /// Log a failed job and wrap its cause.
    fn uncaught(&self, cause: anyhow::Error) -> Error
    {
        let chain = format!("{cause:#}");
        if self.report_errors {
            warn!(worker = %self.id, cause = %chain, "Uncaught failure in job");
        } else {
            error!(worker = %self.id, cause = %chain, "Uncaught failure in job");
        }
        Error::UncaughtJobFailure{worker: self.id, cause}
    }

    /// Make the job loop exit.
    ///
    /// Returns the jobs that were discarded,
    /// which must be dropped after unlocking the queue.
    fn terminate(&self, queue: &mut Queue, process_scheduled_jobs: bool)
        -> Vec<Job>
    {
        let first_request = queue.state == WorkerState::Running;
        queue.state = WorkerState::TerminationRequested;

        let discarded = if process_scheduled_jobs {
            if first_request {
                queue.promote(Instant::now());
                queue.push_back(Job::Terminate);
            }
            Vec::new()
        } else {
            let discarded = queue.drain();
            queue.push_front(Job::Terminate);
            discarded
        };

        self.wakeup.notify_one();
        discarded
    }

    /// Mark the worker terminated and resolve termination futures.
    fn exit(&self)
    {
        let (discarded, terminations) = {
            let mut queue = self.lock();
            queue.state = WorkerState::Terminated;
            (queue.drain(), queue.take_terminations())
        };
        self.exited.notify_all();

        if !discarded.is_empty() {
            debug!(jobs = discarded.len(), "Discarding remaining jobs");
        }
        drop(discarded);

        for completer in terminations {
            completer.start();
            completer.complete(detach((), TransferMode::Share));
        }
        debug!("Worker terminated");
    }

    #[cfg(test)]
    fn for_tests() -> Self
    {
        Self{
            id: WorkerId(0),
            name: None,
            report_errors: true,
            queue: Mutex::new(Queue::new()),
            wakeup: Condvar::new(),
            exited: Condvar::new(),
        }
    }
}

#[cfg(test)]
mod tests
{
    use {
        super::*,
        crate::{
            future::FutureState,
            heap::{Heap, ObjectRef, Value},
        },
        anyhow::bail,
        proptest::proptest,
        std::sync::{
            atomic::{AtomicUsize, Ordering::SeqCst},
            mpsc,
        },
    };

    fn start() -> Worker
    {
        Worker::start(Config::default()).unwrap()
    }

    fn stop(worker: &Worker)
    {
        worker.request_termination(true);
        worker.wait_termination().unwrap();
    }

    #[test]
    fn runs_job()
    {
        let worker = start();
        let future = worker.execute(TransferMode::Move, || Ok(42_i64)).unwrap();
        assert_eq!(future.consume().unwrap(), 42);
        stop(&worker);
    }

    #[test]
    fn names_thread()
    {
        let worker = Worker::start(Config::named("alpha")).unwrap();
        assert_eq!(worker.name(), Some("alpha"));
        let future = worker.execute(TransferMode::Move, || {
            Ok(thread::current().name().map(str::to_owned))
        }).unwrap();
        assert_eq!(future.consume().unwrap().as_deref(), Some("alpha"));
        stop(&worker);
    }

    #[test]
    fn current_is_set_inside_jobs_only()
    {
        assert!(Worker::current().is_none());
        let worker = start();
        let future = worker.execute(TransferMode::Move, || {
            Ok(Worker::current().map(|current| current.id().get()))
        }).unwrap();
        assert_eq!(future.consume().unwrap(), Some(worker.id().get()));
        stop(&worker);
    }

    #[test]
    fn failure_reaches_consumer()
    {
        let worker = start();
        let future = worker.execute(TransferMode::Move, || -> anyhow::Result<i64> {
            bail!("boom")
        }).unwrap();
        let error = future.consume().unwrap_err();
        assert!(matches!(
            error,
            Error::UncaughtJobFailure{worker: id, ..} if id == worker.id()
        ));

        // The worker survives the failure.
        let future = worker.execute(TransferMode::Move, || Ok(1_i64)).unwrap();
        assert_eq!(future.consume().unwrap(), 1);
        stop(&worker);
    }

    #[test]
    fn panic_reaches_consumer()
    {
        let worker = start();
        let future = worker.execute(TransferMode::Move, || -> anyhow::Result<i64> {
            panic!("boom")
        }).unwrap();
        let error = future.consume().unwrap_err();
        assert!(error.to_string().ends_with("Job panicked: boom"), "{error}");
        stop(&worker);
    }

    #[test]
    fn unreported_failure_terminates_worker()
    {
        let config = Config{report_errors: false, ..Config::default()};
        let worker = Worker::start(config).unwrap();

        let (sender, receiver) = mpsc::channel::<()>();
        let failing = worker.execute(TransferMode::Move, move || -> anyhow::Result<()> {
            receiver.recv()?;
            bail!("fatal")
        }).unwrap();
        let queued = worker.execute(TransferMode::Move, || Ok(())).unwrap();
        sender.send(()).unwrap();

        assert!(matches!(failing.consume(), Err(Error::UncaughtJobFailure{..})));
        assert!(queued.consume().unwrap_err().is_invalid_transfer_state());
        worker.wait_termination().unwrap();
        assert_eq!(worker.state(), WorkerState::Terminated);
    }

    #[test]
    fn frozen_object_is_immutable_on_other_worker()
    {
        let shared = ObjectRef::new("X", [Value::Int(1)]).unwrap();
        shared.freeze().unwrap();

        let worker = start();
        let future = worker.execute(TransferMode::Move, move || {
            Ok(matches!(
                shared.set(0, Value::Int(2)),
                Err(Error::InvalidMutability(..)),
            ))
        }).unwrap();
        assert!(future.consume().unwrap());
        stop(&worker);
    }

    #[test]
    fn exclusive_object_is_inaccessible_on_other_worker()
    {
        let object = ObjectRef::new("X", [Value::Int(1)]).unwrap();
        let worker = start();
        let future = worker.execute(TransferMode::Move, move || {
            Ok(matches!(object.get(0), Err(Error::IllegalCrossWorkerAccess(..))))
        }).unwrap();
        assert!(future.consume().unwrap());
        stop(&worker);
    }

    #[test]
    fn moved_result_belongs_to_consumer()
    {
        let worker = start();
        let future = worker.execute(TransferMode::Move, || {
            let leaf = ObjectRef::new("Leaf", [Value::Int(1)])?;
            let root = ObjectRef::new("Root", [Value::Ref(leaf)])?;
            Ok(root)
        }).unwrap();

        let root = future.consume().unwrap();
        let leaf = root.get(0).unwrap().as_object().cloned().unwrap();
        assert_eq!(root.owner(), Some(ContextId::current()));
        assert_eq!(leaf.owner(), Some(ContextId::current()));
        assert!(Heap::with_current(|heap| heap.contains(&leaf)));
        leaf.set(0, Value::Int(2)).unwrap();
        stop(&worker);
    }

    #[test]
    fn moved_argument_belongs_to_worker()
    {
        let object = ObjectRef::new("Box", [Value::Int(1)]).unwrap();
        let record = detach(object, TransferMode::Move).unwrap();

        let worker = start();
        let future = worker.execute(TransferMode::Move, move || {
            let object = record.attach();
            object.set(0, Value::Int(2))?;
            Ok(object)
        }).unwrap();

        let object = future.consume().unwrap();
        assert_eq!(object.get(0).unwrap().as_int(), Some(2));
        stop(&worker);
    }

    #[test]
    fn shared_result_must_be_frozen()
    {
        let worker = start();
        let future = worker.execute(TransferMode::Share, || {
            Ok(ObjectRef::new("Loose", [Value::Undef])?)
        }).unwrap();
        assert!(future.consume().unwrap_err().is_invalid_transfer_state());
        stop(&worker);
    }

    #[test]
    fn termination_drains_queue()
    {
        let worker = start();
        let (sender, receiver) = mpsc::channel::<()>();
        let gate = worker.execute(TransferMode::Move, move || {
            receiver.recv()?;
            Ok(())
        }).unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        let futures: Vec<_> = (0 .. 3)
            .map(|_| {
                let counter = counter.clone();
                worker.execute(TransferMode::Move, move || {
                    counter.fetch_add(1, SeqCst);
                    Ok(())
                }).unwrap()
            })
            .collect();

        let terminated = worker.request_termination(true);
        assert_eq!(worker.state(), WorkerState::TerminationRequested);
        let late = worker.execute(TransferMode::Move, || Ok(()));
        assert!(late.unwrap_err().is_invalid_transfer_state());

        sender.send(()).unwrap();
        worker.wait_termination().unwrap();
        assert_eq!(counter.load(SeqCst), 3);
        gate.consume().unwrap();
        for future in futures {
            future.consume().unwrap();
        }
        terminated.consume().unwrap();
    }

    #[test]
    fn termination_discards_queue()
    {
        let worker = start();
        let (sender, receiver) = mpsc::channel::<()>();
        let _gate = worker.execute(TransferMode::Move, move || {
            receiver.recv()?;
            Ok(())
        }).unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        let futures: Vec<_> = (0 .. 3)
            .map(|_| {
                let counter = counter.clone();
                worker.execute(TransferMode::Move, move || {
                    counter.fetch_add(1, SeqCst);
                    Ok(())
                }).unwrap()
            })
            .collect();

        let terminated = worker.request_termination(false);

        // The gate job may have been discarded before it started.
        let _ = sender.send(());
        terminated.consume().unwrap();
        assert_eq!(worker.state(), WorkerState::Terminated);
        assert_eq!(counter.load(SeqCst), 0);
        for future in futures {
            assert!(future.consume().unwrap_err().is_invalid_transfer_state());
            assert_eq!(future.history(), [
                FutureState::Scheduled,
                FutureState::Computing,
                FutureState::Ready,
                FutureState::Consumed,
            ]);
        }
    }

    #[test]
    fn terminated_worker_terminates_again()
    {
        let worker = start();
        stop(&worker);
        worker.wait_termination().unwrap();
        assert!(worker.wait_termination_timeout(Duration::ZERO).unwrap());
        worker.request_termination(false).consume().unwrap();
    }

    #[test]
    fn wait_termination_times_out()
    {
        let worker = start();
        assert!(!worker.wait_termination_timeout(Duration::from_millis(10)).unwrap());
        stop(&worker);
    }

    #[test]
    fn worker_cannot_wait_for_itself()
    {
        let worker = start();
        let future = worker.execute(TransferMode::Move, || {
            let current = Worker::current().unwrap();
            Ok(current.wait_termination().unwrap_err().is_invalid_transfer_state())
        }).unwrap();
        assert!(future.consume().unwrap());
        stop(&worker);
    }

    #[test]
    fn queue_is_processed_only_by_worker()
    {
        let worker = start();
        assert!(worker.process_queue().unwrap_err().is_invalid_transfer_state());
        assert!(worker.park(Duration::ZERO, true).unwrap_err().is_invalid_transfer_state());
        stop(&worker);
    }

    #[test]
    fn process_queue_runs_nested_jobs()
    {
        let worker = start();
        let future = worker.execute(TransferMode::Move, || {
            let current = Worker::current().unwrap();
            let inner = current.execute(TransferMode::Move, || Ok(5_i64))?;
            let processed = current.process_queue()?;
            Ok((processed, inner.consume()?))
        }).unwrap();
        assert_eq!(future.consume().unwrap(), (true, 5));
        stop(&worker);
    }

    #[test]
    fn park_wakes_up_for_delayed_job()
    {
        let worker = start();
        let future = worker.execute(TransferMode::Move, || {
            let current = Worker::current().unwrap();
            let idle = current.park(Duration::from_millis(10), false)?;
            current.execute_after(Duration::from_millis(20), || Ok(()))?;
            let processed = current.park(Duration::from_secs(10), true)?;
            Ok((idle, processed))
        }).unwrap();
        assert_eq!(future.consume().unwrap(), (false, true));
        stop(&worker);
    }

    #[test]
    fn park_ignores_pending_termination()
    {
        let worker = start();
        let future = worker.execute(TransferMode::Move, || {
            let current = Worker::current().unwrap();
            drop(current.request_termination(true));

            let started = Instant::now();
            let woke = current.park(Duration::from_millis(50), false)?;
            let processed = current.park(Duration::from_millis(50), true)?;
            Ok((woke, processed, started.elapsed() >= Duration::from_millis(100)))
        }).unwrap();
        assert_eq!(future.consume().unwrap(), (false, false, true));
        worker.wait_termination().unwrap();
    }

    #[test]
    fn panic_while_detaching_result_reaches_consumer()
    {
        struct Exploding;

        impl Transferable for Exploding
        {
            fn for_each_object(&self, _f: &mut dyn FnMut(&ObjectRef))
            {
                panic!("cannot enumerate");
            }
        }

        let worker = start();
        let future = worker.execute(TransferMode::Move, || Ok(Exploding)).unwrap();
        let error = future.consume().map(drop).unwrap_err();
        assert!(matches!(error, Error::UncaughtJobFailure{..}), "{error}");

        // The worker survives and still terminates.
        let future = worker.execute(TransferMode::Move, || Ok(1_i64)).unwrap();
        assert_eq!(future.consume().unwrap(), 1);
        stop(&worker);
    }

    #[test]
    fn delayed_jobs_run_when_due()
    {
        let worker = start();
        let log = Arc::new(Mutex::new(Vec::new()));
        let push = |label: u32| {
            let log = log.clone();
            move || -> anyhow::Result<()> {
                log.lock().unwrap().push(label);
                Ok(())
            }
        };

        worker.execute_after(Duration::from_millis(60), push(2)).unwrap();
        worker.execute_after(Duration::from_millis(20), push(1)).unwrap();
        worker.execute(TransferMode::Move, push(0)).unwrap();

        let (sender, receiver) = mpsc::channel();
        worker.execute_after(Duration::from_millis(100), move || {
            sender.send(())?;
            Ok(())
        }).unwrap();
        receiver.recv_timeout(Duration::from_secs(10)).unwrap();

        assert_eq!(*log.lock().unwrap(), [0, 1, 2]);
        stop(&worker);
    }

    #[test]
    fn wait_for_multiple_futures_finds_finished_job()
    {
        let worker = start();
        let helper = start();
        let (sender, receiver) = mpsc::channel::<()>();
        let slow = worker.execute(TransferMode::Move, move || {
            receiver.recv()?;
            Ok(1_i64)
        }).unwrap();
        let fast = helper.execute(TransferMode::Move, || Ok(2_i64)).unwrap();

        let futures = [slow, fast];
        let ready = crate::future::wait_for_multiple_futures(
            &futures,
            Duration::from_secs(10),
        );
        assert_eq!(ready, [1]);

        sender.send(()).unwrap();
        stop(&worker);
        stop(&helper);
    }

    proptest!
    {
        #![proptest_config(proptest::test_runner::Config::with_cases(32))]

        #[test]
        fn jobs_run_in_submission_order(count in 1usize .. 40)
        {
            let worker = start();
            let log = Arc::new(Mutex::new(Vec::new()));
            for index in 0 .. count {
                let log = log.clone();
                worker.execute(TransferMode::Move, move || {
                    log.lock().unwrap().push(index);
                    Ok(())
                }).unwrap();
            }
            stop(&worker);
            let expected: Vec<usize> = (0 .. count).collect();
            assert_eq!(*log.lock().unwrap(), expected);
        }
    }
}
