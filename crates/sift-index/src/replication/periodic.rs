//! Background pulling on a fixed interval.

use std::{
    io,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam::channel::{RecvTimeoutError, Sender, bounded};
use tracing::debug;

/// Runs a task on a named thread every `interval` until dropped.
pub struct PeriodicTask {
    /// Dropping the sender wakes the thread and ends its loop.
    stop: Option<Sender<()>>,
    /// The worker thread.
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Starts the thread. The first run happens one interval after the start.
    pub fn start(
        name: impl Into<String>,
        interval: Duration,
        task: impl Fn() + Send + 'static,
    ) -> io::Result<Self> {
        let name = name.into();
        let (stop, stopped) = bounded::<()>(0);
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => task(),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!(thread = %name, "periodic task stopped");
        })?;
        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    /// Stops the thread and waits for a run in progress to finish.
    pub fn stop(&mut self) {
        self.stop.take();
        let Some(handle) = self.handle.take() else {
            return;
        };
        // The task itself may drop the last owner of this value.
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            debug!("periodic task panicked");
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod test {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[test]
    fn runs_until_stopped() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let mut task = PeriodicTask::start("test-periodic", Duration::from_millis(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        while runs.load(Ordering::SeqCst) < 2 {
            thread::sleep(Duration::from_millis(5));
        }
        task.stop();
        let after_stop = runs.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(runs.load(Ordering::SeqCst), after_stop);
    }
}
