//! Bounded worker pool backing the batch executor.
//!
//! Workers are OS threads that pull boxed jobs from a shared channel. Jobs
//! carry owned data only; nothing mutable is shared between workers.

use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::error::{Error, Result};

/// A job to be executed by the pool.
type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed-size pool of worker threads.
pub struct WorkerPool {
    workers: Vec<Worker>,
    sender: Option<Sender<Job>>,
}

impl WorkerPool {
    /// Spawn a pool with `num_workers` threads.
    ///
    /// Fails with [`Error::BatchProcessing`] when `num_workers` is zero or a
    /// thread cannot be spawned. Threads already started are joined before
    /// returning the error.
    pub fn new(num_workers: usize) -> Result<Self> {
        if num_workers == 0 {
            return Err(Error::BatchProcessing {
                reason: String::from("worker pool needs at least one worker"),
                source: io::Error::from(io::ErrorKind::InvalidInput),
            });
        }

        let (sender, receiver) = mpsc::channel();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut pool = WorkerPool {
            workers: Vec::with_capacity(num_workers),
            sender: Some(sender),
        };
        for id in 0..num_workers {
            let worker = Worker::spawn(id, Arc::clone(&receiver)).map_err(|source| {
                Error::BatchProcessing {
                    reason: format!("could not spawn worker {id}"),
                    source,
                }
            })?;
            pool.workers.push(worker);
        }

        Ok(pool)
    }

    /// Queue a job for the next idle worker.
    pub fn execute<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.as_ref().ok_or_else(closed_error)?;
        sender.send(Box::new(f)).map_err(|_| closed_error())
    }

    /// Number of worker threads.
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }
}

fn closed_error() -> Error {
    Error::BatchProcessing {
        reason: String::from("worker pool is no longer accepting jobs"),
        source: io::Error::from(io::ErrorKind::BrokenPipe),
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel lets idle workers fall out of their loop.
        drop(self.sender.take());

        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

struct Worker {
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(id: usize, receiver: Arc<Mutex<Receiver<Job>>>) -> io::Result<Self> {
        let thread = thread::Builder::new()
            .name(format!("mm-worker-{id}"))
            .spawn(move || {
                loop {
                    let job = {
                        let Ok(lock) = receiver.lock() else {
                            break;
                        };
                        lock.recv()
                    };

                    match job {
                        Ok(job) => job(),
                        Err(_) => break,
                    }
                }
            })?;

        Ok(Worker {
            thread: Some(thread),
        })
    }
}

/// Number of CPUs available to this process.
pub fn available_parallelism() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
