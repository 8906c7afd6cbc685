use std::thread::{self, JoinHandle};

use anyhow::Result;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Background task \"{0}\" output still incomplete after retry")]
    StillIncomplete(String),
}

/// A long-latency auxiliary task running on its own thread.
///
/// The pattern is start-once, join-once: the task is started as early as
/// possible, and the main sequence blocks on it only at the point its
/// output is first required. There is no aliveness polling; the join is
/// the single synchronisation point, so the task's output is never read
/// while it may still be writing.
pub struct BackgroundTask {
    name: String,
    handle: JoinHandle<Result<()>>,
}

impl BackgroundTask {
    /// Launch `f` on a new thread and return immediately.
    pub fn spawn<F>(name: &str, f: F) -> Self
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        log::info!("starting background task \"{name}\"");
        Self {
            name: name.to_owned(),
            handle: thread::spawn(f),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Block until the task finishes. A task that failed or panicked is
    /// reported but not fatal here; whether its work actually got done is
    /// decided by the caller's completeness predicate.
    pub fn join(self) {
        match self.handle.join() {
            Ok(Ok(())) => log::info!("background task \"{}\" finished", self.name),
            Ok(Err(e)) => log::warn!("background task \"{}\" failed: {e:#}", self.name),
            Err(_) => log::warn!("background task \"{}\" panicked", self.name),
        }
    }
}

/// Reconcile a background task with the point its output is needed.
///
/// Joins the task if one was started, then evaluates `complete()`; if the
/// output is still missing, `run` is invoked synchronously once as a
/// retry. A second failure is fatal. When no task was started and the
/// output is already present, `run` is never invoked at all.
pub fn ensure_complete<R, P>(task: Option<BackgroundTask>, mut run: R, complete: P) -> Result<()>
where
    R: FnMut() -> Result<()>,
    P: Fn() -> bool,
{
    let name = match task {
        Some(task) => {
            if !task.is_finished() {
                log::warn!("waiting for background task \"{}\" to finish...", task.name());
            }
            let name = task.name().to_owned();
            task.join();
            name
        }
        None => String::from("unstarted task"),
    };

    if complete() {
        return Ok(());
    }
    log::warn!("retrying {name} synchronously");
    run()?;
    if complete() {
        Ok(())
    } else {
        Err(Error::StillIncomplete(name).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_already_complete_never_runs_task() -> Result<()> {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        ensure_complete(
            None,
            move || {
                calls2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            || true,
        )?;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[test]
    fn test_join_then_successful_retry() -> Result<()> {
        let done = Arc::new(AtomicUsize::new(0));

        // the background attempt fails outright:
        let task = BackgroundTask::spawn("download", || anyhow::bail!("network down"));

        let done2 = Arc::clone(&done);
        let done3 = Arc::clone(&done);
        ensure_complete(
            Some(task),
            move || {
                done2.store(1, Ordering::SeqCst);
                Ok(())
            },
            move || done3.load(Ordering::SeqCst) == 1,
        )?;
        assert_eq!(done.load(Ordering::SeqCst), 1, "retry ran exactly once");
        Ok(())
    }

    #[test]
    fn test_failure_after_retry_is_fatal() {
        let err = ensure_complete(None, || Ok(()), || false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::StillIncomplete(_))
        ));
    }

    #[test]
    fn test_join_waits_for_slow_task() -> Result<()> {
        let flag = Arc::new(AtomicUsize::new(0));
        let flag2 = Arc::clone(&flag);
        let task = BackgroundTask::spawn("slow", move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            flag2.store(1, Ordering::SeqCst);
            Ok(())
        });

        let flag3 = Arc::clone(&flag);
        ensure_complete(
            Some(task),
            || panic!("retry must not be needed"),
            move || flag3.load(Ordering::SeqCst) == 1,
        )?;
        Ok(())
    }
}
