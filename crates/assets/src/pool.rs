use crossbeam::channel::{Receiver, Sender, unbounded};
use std::thread;

use orrery_common::LogContext;

use crate::AssetError;

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Job(Job),
    Shutdown,
}

struct Worker {
    id: usize,
    handle: Option<thread::JoinHandle<()>>,
}

impl Worker {
    fn new(id: usize, receiver: Receiver<Message>, log: Option<LogContext>) -> Self {
        let handle = thread::Builder::new()
            .name(format!("orrery-loader-{id}"))
            .spawn(move || {
                let run = || {
                    while let Ok(message) = receiver.recv() {
                        match message {
                            Message::Job(job) => job(),
                            Message::Shutdown => break,
                        }
                    }
                };
                match log {
                    Some(log) => log.in_scope(run),
                    None => run(),
                }
            })
            .ok();
        Self { id, handle }
    }
}

/// Worker threads for decoding assets and recording their uploads.
///
/// Jobs are picked up in FIFO order; [`LoadPool::run_all`] is the join
/// barrier and returns results in submission order regardless of which
/// worker finished first.
pub struct LoadPool {
    sender: Sender<Message>,
    workers: Vec<Worker>,
}

impl LoadPool {
    /// Pool with `threads` workers (at least one). Workers log through `log`
    /// when given.
    pub fn new(threads: usize, log: Option<LogContext>) -> Self {
        let threads = threads.max(1);
        let (sender, receiver) = unbounded();
        let workers = (0..threads)
            .map(|id| Worker::new(id, receiver.clone(), log.clone()))
            .collect();
        tracing::debug!(threads, "loading pool started");
        Self { sender, workers }
    }

    /// One worker per available hardware thread.
    pub fn with_available_parallelism(log: Option<LogContext>) -> Self {
        let threads = thread::available_parallelism().map_or(1, |n| n.get());
        Self::new(threads, log)
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Run every job and wait for all of them.
    pub fn run_all<T, F>(&self, jobs: Vec<F>) -> Result<Vec<T>, AssetError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let count = jobs.len();
        let (tx, rx) = unbounded::<(usize, T)>();
        for (index, job) in jobs.into_iter().enumerate() {
            let tx = tx.clone();
            let job: Job = Box::new(move || {
                let _ = tx.send((index, job()));
            });
            self.sender
                .send(Message::Job(job))
                .map_err(|_| AssetError::WorkerLost)?;
        }
        drop(tx);

        let mut results: Vec<Option<T>> = (0..count).map(|_| None).collect();
        for _ in 0..count {
            let (index, value) = rx.recv().map_err(|_| AssetError::WorkerLost)?;
            results[index] = Some(value);
        }
        results
            .into_iter()
            .map(|r| r.ok_or(AssetError::WorkerLost))
            .collect()
    }
}

impl Drop for LoadPool {
    fn drop(&mut self) {
        for _ in &self.workers {
            let _ = self.sender.send(Message::Shutdown);
        }
        for worker in &mut self.workers {
            let Some(handle) = worker.handle.take() else {
                continue;
            };
            if handle.join().is_err() {
                tracing::warn!(worker = worker.id, "loading worker panicked");
            }
        }
    }
}
