use std::{
    sync::{Condvar, Mutex, atomic::{AtomicU64, Ordering::SeqCst}},
    time::{Duration, Instant},
};

/// Bumped on every state transition of every future.
static VERSION: AtomicU64 = AtomicU64::new(0);

/// Guards waiting on [`CHANGED`], so that no bump goes unnoticed.
static LOCK: Mutex<()> = Mutex::new(());

/// Notified on every bump.
static CHANGED: Condvar = Condvar::new();

/// Current value of the global future version token.
///
/// The token changes whenever any future changes state.
/// Take the token before inspecting futures,
/// then pass it to [`wait_for_version_change`].
pub fn version_token() -> u64
{
    VERSION.load(SeqCst)
}

/// Wait until the version token differs from the given token.
///
/// Returns `true` if a change was observed,
/// or `false` if the timeout elapsed first.
/// A change says nothing about which future changed state;
/// the caller is expected to inspect its futures again.
pub fn wait_for_version_change(token: u64, timeout: Duration) -> bool
{
    let deadline = Instant::now().checked_add(timeout);
    let mut guard = LOCK.lock().unwrap();
    while VERSION.load(SeqCst) == token {
        guard = match deadline {
            None => CHANGED.wait(guard).unwrap(),
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return false;
                }
                CHANGED.wait_timeout(guard, remaining).unwrap().0
            },
        };
    }
    true
}

/// Advance the version token and wake all waiters.
pub (super) fn bump()
{
    let _guard = LOCK.lock().unwrap();
    VERSION.fetch_add(1, SeqCst);
    CHANGED.notify_all();
}
