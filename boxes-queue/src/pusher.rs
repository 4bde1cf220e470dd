use std::{
    fmt::{self, Display},
    io, mem,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use parking_lot::{Condvar, Mutex};
use tracing::{error, trace};

/// ```
/// use boxes_queue::PusherOptions;
/// use std::time::Duration;
///
/// assert_eq!(PusherOptions::default().flush_interval, Duration::from_millis(200));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PusherOptions {
    pub flush_interval: Duration,
}

impl Default for PusherOptions {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(200),
        }
    }
}

struct Shared<M> {
    buffer: Mutex<Vec<M>>,
    stopping: Mutex<bool>,
    wake: Condvar,
}

/// Buffers messages in memory and hands them to a flush function in batches from a background
/// thread
///
/// Each flush takes the whole buffer, swapping in an empty one, so a message is flushed at most
/// once. A failed batch goes to the error handler and is not retried here.
pub struct BatchPusher<M> {
    name: String,
    shared: Arc<Shared<M>>,
    handle: Option<JoinHandle<()>>,
}

impl<M: Send + 'static> BatchPusher<M> {
    /// Start a pusher whose failed flushes are passed to `on_error` with the size of the batch
    pub fn spawn<F, E, H>(
        name: impl Into<String>,
        options: PusherOptions,
        flush: F,
        on_error: H,
    ) -> io::Result<Self>
    where
        F: FnMut(Vec<M>) -> Result<(), E> + Send + 'static,
        E: 'static,
        H: FnMut(E, usize) + Send + 'static,
    {
        let name = name.into();
        let shared = Arc::new(Shared {
            buffer: Mutex::new(Vec::new()),
            stopping: Mutex::new(false),
            wake: Condvar::new(),
        });

        let handle = thread::Builder::new().name(name.clone()).spawn({
            let shared = shared.clone();
            move || flush_loop(&shared, options, flush, on_error)
        })?;

        Ok(Self {
            name,
            shared,
            handle: Some(handle),
        })
    }

    /// Start a pusher that logs failed flushes and carries on
    pub fn spawn_logging<F, E>(
        name: impl Into<String>,
        options: PusherOptions,
        flush: F,
    ) -> io::Result<Self>
    where
        F: FnMut(Vec<M>) -> Result<(), E> + Send + 'static,
        E: Display + 'static,
    {
        let name = name.into();
        let pusher = name.clone();

        Self::spawn(name, options, flush, move |error: E, messages| {
            error!(pusher = %pusher, %error, messages, "Dropped a batch that failed to flush");
        })
    }
}

impl<M> BatchPusher<M> {
    pub fn push(&self, message: M) {
        self.shared.buffer.lock().push(message);
    }

    pub fn extend(&self, messages: impl IntoIterator<Item = M>) {
        self.shared.buffer.lock().extend(messages);
    }

    /// Messages buffered but not yet handed to the flush function
    pub fn pending(&self) -> usize {
        self.shared.buffer.lock().len()
    }

    /// Flush whatever is buffered and stop the background thread
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        *self.shared.stopping.lock() = true;
        self.shared.wake.notify_all();

        if handle.join().is_err() {
            error!(pusher = %self.name, "Pusher thread panicked");
        }
    }
}

impl<M> Drop for BatchPusher<M> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<M> fmt::Debug for BatchPusher<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchPusher")
            .field("name", &self.name)
            .field("pending", &self.pending())
            .finish()
    }
}

fn flush_loop<M, F, E, H>(shared: &Shared<M>, options: PusherOptions, mut flush: F, mut on_error: H)
where
    F: FnMut(Vec<M>) -> Result<(), E>,
    H: FnMut(E, usize),
{
    loop {
        let stopping = {
            let mut stopping = shared.stopping.lock();
            if !*stopping {
                shared.wake.wait_for(&mut stopping, options.flush_interval);
            }
            *stopping
        };

        let batch = mem::take(&mut *shared.buffer.lock());

        if !batch.is_empty() {
            let size = batch.len();
            trace!(size, "Flushing batch");

            if let Err(error) = flush(batch) {
                on_error(error, size);
            }
        }

        if stopping {
            return;
        }
    }
}
