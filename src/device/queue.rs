//! A dedicated worker thread with a serial job lane and a blocking
//! submission primitive.
//!
//! Every context-owning thread in the crate is a `WorkQueue`: jobs submitted
//! with `run_sync` execute on the owning thread in submission order, and the
//! caller blocks until its job finishes. A job submitted from the owning
//! thread itself executes inline, so a resource operation that is already on
//! the right thread never self-deadlocks.

use std::any::Any;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{channel, Sender};
use std::sync::{Condvar, Mutex};
use std::thread::{self, JoinHandle, ThreadId};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Job),
    Shutdown,
}

pub struct WorkQueue {
    label: &'static str,
    owner: ThreadId,
    tx: Mutex<Sender<Message>>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl WorkQueue {
    /// Spawns the owning thread. `label` names it in logs and diagnostics.
    pub fn new(label: &'static str) -> WorkQueue {
        let (tx, rx) = channel::<Message>();
        let (id_tx, id_rx) = channel();

        let join = thread::Builder::new()
            .name(label.into())
            .spawn(move || {
                id_tx.send(thread::current().id()).unwrap();

                while let Ok(msg) = rx.recv() {
                    match msg {
                        Message::Run(job) => job(),
                        Message::Shutdown => break,
                    }
                }
            })
            .expect("failed to spawn worker thread");

        let owner = id_rx.recv().unwrap();
        WorkQueue {
            label,
            owner,
            tx: Mutex::new(tx),
            join: Mutex::new(Some(join)),
        }
    }

    /// Returns true when the calling thread is the queue's owning thread.
    #[inline]
    pub fn is_owner(&self) -> bool {
        thread::current().id() == self.owner
    }

    /// Executes `f` on the owning thread and blocks the caller until it
    /// completes, handing back its return value. Called from the owning
    /// thread itself, `f` runs inline without a hop.
    ///
    /// The closure does not need to be `'static`: the caller blocks for the
    /// whole execution, so borrows in `f` stay alive. A panic inside `f` is
    /// caught on the owning thread and resumed on the caller.
    pub fn run_sync<F, T>(&self, f: F) -> T
    where
        F: FnOnce() -> T + Send,
        T: Send,
    {
        if self.is_owner() {
            return f();
        }

        let result: Mutex<Option<thread::Result<T>>> = Mutex::new(None);
        let latch = Latch::new();

        {
            let slot = &result;
            let signal = &latch;
            let job: Box<dyn FnOnce() + Send> = Box::new(move || {
                let v = panic::catch_unwind(AssertUnwindSafe(f));
                *slot.lock().unwrap() = Some(v);
                signal.set();
            });

            // Erase the lifetime; sound because we block on the latch below
            // before any borrow in `f` can expire.
            let job: Job = unsafe { mem::transmute(job) };
            self.tx
                .lock()
                .unwrap()
                .send(Message::Run(job))
                .unwrap_or_else(|_| panic!("worker thread '{}' is gone", self.label));
        }

        latch.wait();

        let v = result.into_inner().unwrap().unwrap();
        match v {
            Ok(v) => v,
            Err(cause) => resume_unwinding(cause),
        }
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        if self.tx.lock().unwrap().send(Message::Shutdown).is_ok() {
            if let Some(join) = self.join.lock().unwrap().take() {
                if join.join().is_err() {
                    error!("worker thread '{}' panicked during shutdown", self.label);
                }
            }
        }
    }
}

/// A one-shot signal: starts unset, `set()` once, `wait()` blocks until set.
struct Latch {
    m: Mutex<bool>,
    v: Condvar,
}

impl Latch {
    fn new() -> Latch {
        Latch {
            m: Mutex::new(false),
            v: Condvar::new(),
        }
    }

    fn set(&self) {
        let mut guard = self.m.lock().unwrap();
        *guard = true;
        self.v.notify_all();
    }

    fn wait(&self) {
        let mut guard = self.m.lock().unwrap();
        while !*guard {
            guard = self.v.wait(guard).unwrap();
        }
    }
}

fn resume_unwinding(payload: Box<dyn Any + Send>) -> ! {
    panic::resume_unwind(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn runs_on_owning_thread() {
        let queue = WorkQueue::new("test");
        let outer = thread::current().id();

        let inner = queue.run_sync(|| thread::current().id());
        assert_ne!(inner, outer);
    }

    #[test]
    fn returns_borrowed_results() {
        let queue = WorkQueue::new("test");
        let mut count = 0;
        queue.run_sync(|| count += 1);
        queue.run_sync(|| count += 1);
        assert_eq!(count, 2);
    }

    #[test]
    fn inline_when_submitted_from_owner() {
        let queue = WorkQueue::new("test");
        let id = queue.run_sync(|| {
            // A nested submission from the owning thread must execute
            // inline instead of deadlocking on itself.
            assert!(queue.is_owner());
            queue.run_sync(|| thread::current().id())
        });
        assert_eq!(queue.run_sync(|| thread::current().id()), id);
    }

    #[test]
    fn keeps_submission_order() {
        let queue = WorkQueue::new("test");
        let counter = AtomicUsize::new(0);
        for i in 0..64 {
            queue.run_sync(|| {
                assert_eq!(counter.fetch_add(1, Ordering::SeqCst), i);
            });
        }
    }

    #[test]
    fn propagates_panics() {
        let queue = WorkQueue::new("test");
        let caught = panic::catch_unwind(AssertUnwindSafe(|| {
            queue.run_sync(|| panic!("boom"));
        }));
        assert!(caught.is_err());

        // The worker survives the panic and keeps serving jobs.
        assert_eq!(queue.run_sync(|| 42), 42);
    }
}
