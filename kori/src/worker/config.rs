/// Settings for starting a worker.
#[derive(Clone, Debug)]
pub struct Config
{
    /// Name of the worker, used for the thread name and in logs.
    pub name: Option<String>,

    /// Whether failures of jobs are reported to their futures.
    ///
    /// If not, a failing job terminates the worker,
    /// discarding all jobs still queued.
    /// The future of the failing job still receives the failure.
    pub report_errors: bool,

    /// Stack size of the worker thread in bytes.
    ///
    /// If absent, the platform default is used.
    pub stack_size: Option<usize>,
}

impl Config
{
    /// Default settings with the given name.
    pub fn named(name: impl Into<String>) -> Self
    {
        Self{name: Some(name.into()), ..Self::default()}
    }
}

impl Default for Config
{
    fn default() -> Self
    {
        Self{name: None, report_errors: true, stack_size: None}
    }
}
