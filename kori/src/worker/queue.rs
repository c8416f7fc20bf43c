use {
    super::{Shared, WorkerState},
    crate::future::Completer,
    std::{
        cmp::{Ordering, Reverse},
        collections::{BinaryHeap, VecDeque},
        mem::take,
        time::Instant,
    },
};

/// Body of a job, run on the worker thread.
pub (super) type Task = Box<dyn FnOnce(&Shared) -> Outcome + Send>;

/// How a task ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub (super) enum Outcome
{
    Done,
    Failed,
}

pub (super) enum Job
{
    Run(Task),

    /// Makes the worker loop exit when popped.
    Terminate,
}

/// Task that becomes runnable at a point in time.
struct Delayed
{
    due: Instant,

    /// Orders tasks that are due at the same time by submission.
    seq: u64,

    task: Task,
}

impl PartialEq for Delayed
{
    fn eq(&self, other: &Self) -> bool
    {
        (self.due, self.seq) == (other.due, other.seq)
    }
}

impl Eq for Delayed
{
}

impl PartialOrd for Delayed
{
    fn partial_cmp(&self, other: &Self) -> Option<Ordering>
    {
        Some(self.cmp(other))
    }
}

impl Ord for Delayed
{
    fn cmp(&self, other: &Self) -> Ordering
    {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

/// Jobs of a worker along with its lifecycle state.
///
/// Delayed tasks are promoted to the back of the immediate queue
/// once they are due, in order of due time.
pub (super) struct Queue
{
    pub (super) state: WorkerState,
    immediate: VecDeque<Job>,
    delayed: BinaryHeap<Reverse<Delayed>>,
    next_seq: u64,

    /// Futures returned by termination requests.
    terminations: Vec<Completer<()>>,
}

impl Queue
{
    pub (super) fn new() -> Self
    {
        Self{
            state: WorkerState::Running,
            immediate: VecDeque::new(),
            delayed: BinaryHeap::new(),
            next_seq: 0,
            terminations: Vec::new(),
        }
    }

    pub (super) fn push_back(&mut self, job: Job)
    {
        self.immediate.push_back(job);
    }

    pub (super) fn push_front(&mut self, job: Job)
    {
        self.immediate.push_front(job);
    }

    pub (super) fn push_delayed(&mut self, due: Instant, task: Task)
    {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.delayed.push(Reverse(Delayed{due, seq, task}));
    }

    /// Move delayed tasks that are due to the immediate queue.
    pub (super) fn promote(&mut self, now: Instant)
    {
        while self.delayed.peek().map_or(false, |Reverse(d)| d.due <= now) {
            if let Some(Reverse(delayed)) = self.delayed.pop() {
                self.immediate.push_back(Job::Run(delayed.task));
            }
        }
    }

    /// Whether a job or a termination marker is at the front.
    pub (super) fn is_ready(&self) -> bool
    {
        !self.immediate.is_empty()
    }

    /// Whether a job other than a termination marker is at the front.
    pub (super) fn is_runnable(&self) -> bool
    {
        matches!(self.immediate.front(), Some(Job::Run(..)))
    }

    pub (super) fn pop_front(&mut self) -> Option<Job>
    {
        self.immediate.pop_front()
    }

    /// When the earliest delayed task becomes due.
    pub (super) fn next_due(&self) -> Option<Instant>
    {
        self.delayed.peek().map(|Reverse(delayed)| delayed.due)
    }

    /// Remove all jobs, immediate and delayed.
    ///
    /// The jobs should be dropped without holding the lock,
    /// as dropping a job resolves its future.
    pub (super) fn drain(&mut self) -> Vec<Job>
    {
        let mut jobs: Vec<Job> = take(&mut self.immediate).into();
        jobs.extend(
            take(&mut self.delayed)
                .into_iter()
                .map(|Reverse(delayed)| Job::Run(delayed.task))
        );
        jobs
    }

    pub (super) fn add_termination(&mut self, completer: Completer<()>)
    {
        self.terminations.push(completer);
    }

    pub (super) fn take_terminations(&mut self) -> Vec<Completer<()>>
    {
        take(&mut self.terminations)
    }
}
