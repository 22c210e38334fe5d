use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use rusqlite::Connection;

use crate::store::{ChangeSet, Store, StoreError, Table};

/// A read that can be re-run whenever one of its tables changes. Results are
/// compared by value, so a write that leaves the result unchanged is silent.
pub trait Query: Send + Sync + 'static {
    type Output: Clone + PartialEq + Send + 'static;

    fn tables(&self) -> &[Table];

    fn run(&self, conn: &Connection) -> Result<Self::Output, StoreError>;
}

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// An execution context that results are handed to, e.g. a UI queue.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, job: Job);
}

/// Jobs wait until the owner drains them with `run_pending`.
#[derive(Default)]
pub struct QueueScheduler {
    jobs: Mutex<VecDeque<Job>>,
}

impl QueueScheduler {
    pub fn pending(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Runs every queued job on the calling thread and returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let job = self.jobs.lock().pop_front();
            let Some(job) = job else {
                return ran;
            };
            job();
            ran += 1;
        }
    }
}

impl Scheduler for QueueScheduler {
    fn schedule(&self, job: Job) {
        self.jobs.lock().push_back(job);
    }
}

#[derive(Clone)]
pub enum Delivery {
    /// The current value reaches the sink before `subscribe` returns; later
    /// values arrive from the subscription's worker thread.
    Immediate,
    /// Every value, the first included, goes through the scheduler.
    Scheduled(Arc<dyn Scheduler>),
}

type Sink<T> = Arc<Mutex<Box<dyn FnMut(Result<T, StoreError>) + Send>>>;

fn call_sink<T>(sink: &Sink<T>, value: Result<T, StoreError>) {
    let mut guard = sink.lock();
    (*guard)(value);
}

/// A live query. Dropping it cancels delivery; other subscriptions to the
/// same query are unaffected.
pub struct Subscription {
    store: Arc<Store>,
    feed_id: u64,
    cancelled: Arc<AtomicBool>,
}

impl Subscription {
    pub fn cancel(self) {}

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        // Disconnects the worker's receiver, which ends its loop.
        self.store.changes().unsubscribe(self.feed_id);
    }
}

pub fn subscribe<Q, F>(
    store: Arc<Store>,
    query: Q,
    delivery: Delivery,
    sink: F,
) -> Result<Subscription, StoreError>
where
    Q: Query,
    F: FnMut(Result<Q::Output, StoreError>) + Send + 'static,
{
    // Registered before the first read so no commit can slip between them.
    let (feed_id, changes) = store.changes().subscribe();
    let cancelled = Arc::new(AtomicBool::new(false));
    let boxed: Box<dyn FnMut(Result<Q::Output, StoreError>) + Send> = Box::new(sink);
    let sink: Sink<Q::Output> = Arc::new(Mutex::new(boxed));

    let initial = match delivery {
        Delivery::Immediate => match store.read(|conn| query.run(conn)) {
            Ok(value) => {
                call_sink(&sink, Ok(value.clone()));
                Some(value)
            }
            Err(err) => {
                store.changes().unsubscribe(feed_id);
                return Err(err);
            }
        },
        Delivery::Scheduled(_) => None,
    };

    let worker = Worker {
        store: Arc::clone(&store),
        query,
        delivery,
        sink,
        cancelled: Arc::clone(&cancelled),
        last: initial,
    };
    let spawned = thread::Builder::new()
        .name("fedicache-query".to_string())
        .spawn(move || worker.run(changes));
    if let Err(err) = spawned {
        store.changes().unsubscribe(feed_id);
        return Err(StoreError::Io(err));
    }

    Ok(Subscription {
        store,
        feed_id,
        cancelled,
    })
}

/// Convenience over `subscribe` with immediate delivery into a channel.
pub fn subscribe_channel<Q: Query>(
    store: Arc<Store>,
    query: Q,
) -> Result<(Subscription, Receiver<Result<Q::Output, StoreError>>), StoreError> {
    let (tx, rx) = mpsc::channel();
    let subscription = subscribe(store, query, Delivery::Immediate, move |value| {
        let _ = tx.send(value);
    })?;
    Ok((subscription, rx))
}

struct Worker<Q: Query> {
    store: Arc<Store>,
    query: Q,
    delivery: Delivery,
    sink: Sink<Q::Output>,
    cancelled: Arc<AtomicBool>,
    last: Option<Q::Output>,
}

impl<Q: Query> Worker<Q> {
    fn run(mut self, changes: Receiver<ChangeSet>) {
        if self.last.is_none() {
            self.refresh();
        }
        while let Ok(change) = changes.recv() {
            // Coalesce a burst of commits into one re-read.
            let mut relevant = change.touches(self.query.tables());
            while let Ok(more) = changes.try_recv() {
                relevant |= more.touches(self.query.tables());
            }
            if self.cancelled.load(Ordering::SeqCst) {
                break;
            }
            if relevant {
                self.refresh();
            }
        }
        tracing::debug!("query subscription finished");
    }

    fn refresh(&mut self) {
        match self.store.read(|conn| self.query.run(conn)) {
            Ok(value) => {
                if self.last.as_ref() == Some(&value) {
                    return;
                }
                self.last = Some(value.clone());
                self.deliver(Ok(value));
            }
            Err(err) => {
                tracing::warn!(error = %err, "live query failed");
                self.deliver(Err(err));
            }
        }
    }

    fn deliver(&self, value: Result<Q::Output, StoreError>) {
        match &self.delivery {
            Delivery::Immediate => {
                if !self.cancelled.load(Ordering::SeqCst) {
                    call_sink(&self.sink, value);
                }
            }
            Delivery::Scheduled(scheduler) => {
                let sink = Arc::clone(&self.sink);
                let cancelled = Arc::clone(&self.cancelled);
                scheduler.schedule(Box::new(move || {
                    if !cancelled.load(Ordering::SeqCst) {
                        call_sink(&sink, value);
                    }
                }));
            }
        }
    }
}
