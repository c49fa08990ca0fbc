//! Fixed-size worker pool.
//!
//! A set of named OS threads pulls connection-handling tasks off a
//! shared unbounded queue. Submission never blocks the caller: when
//! every worker is busy the task waits in the queue until one frees
//! up, so no task is ever dropped.

use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::{debug, trace};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Pool of worker threads fed by a shared task queue.
pub struct ThreadPool {
    workers: Vec<Worker>,
    sender: Option<Sender<Task>>,
}

struct Worker {
    handle: Option<thread::JoinHandle<()>>,
}

impl ThreadPool {
    /// Create a pool with `size` worker threads.
    ///
    /// `size` must be at least 1.
    pub fn new(size: usize) -> io::Result<Self> {
        assert!(size > 0, "pool size must be at least 1");

        let (sender, receiver) = mpsc::channel::<Task>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            workers.push(Worker::spawn(id, Arc::clone(&receiver))?);
        }

        Ok(Self {
            workers,
            sender: Some(sender),
        })
    }

    /// Submit a task to the pool.
    ///
    /// Returns immediately; the task runs as soon as a worker is free.
    pub fn execute<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(sender) = &self.sender {
            // Send only fails once the queue is closed, which join()
            // does after the last submission.
            let _ = sender.send(Box::new(task));
        }
    }

    /// Close the queue and wait for every worker to finish.
    ///
    /// Tasks already queued still run to completion before the
    /// workers exit.
    pub fn join(&mut self) {
        drop(self.sender.take());

        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.join();
    }
}

impl Worker {
    fn spawn(id: usize, receiver: Arc<Mutex<Receiver<Task>>>) -> io::Result<Self> {
        let handle = thread::Builder::new()
            .name(format!("worker-{id}"))
            .spawn(move || loop {
                let task = match receiver.lock() {
                    Ok(guard) => guard.recv(),
                    // Lock poisoned by a panicking sibling; exit.
                    Err(_) => break,
                };

                match task {
                    Ok(task) => {
                        trace!(worker = id, "Running task");
                        task();
                    }
                    Err(_) => {
                        debug!(worker = id, "Queue closed, worker exiting");
                        break;
                    }
                }
            })?;

        Ok(Self {
            handle: Some(handle),
        })
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("workers", &self.workers.len())
            .finish()
    }
}
