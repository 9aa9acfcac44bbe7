//! Serial task queue standing in for the platform main looper.
//!
//! A `Looper` owns one worker thread draining a channel of posted tasks.
//! Each `Handler` posts onto that looper with its own generation counter,
//! so `remove_callbacks_and_messages` cancels only that handler's pending
//! work.

use crate::error::{TResult, TrackerError};
use crossbeam::channel::{self, Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

type Task = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run {
        generation: Arc<AtomicU64>,
        stamp: u64,
        task: Task,
    },
    Quit,
}

struct LooperShared {
    tx: Sender<Message>,
    /// Held by the worker while a task runs
    busy: Arc<Mutex<()>>,
    thread_id: ThreadId,
}

pub struct Looper {
    shared: Arc<LooperShared>,
    join: Option<JoinHandle<()>>,
}

impl Looper {
    pub fn spawn(name: &str) -> TResult<Self> {
        let (tx, rx) = channel::unbounded::<Message>();
        let busy = Arc::new(Mutex::new(()));
        let worker_busy = Arc::clone(&busy);

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_loop(rx, worker_busy))
            .map_err(|e| TrackerError::Internal(format!("Failed to spawn looper: {}", e)))?;

        let shared = Arc::new(LooperShared {
            tx,
            busy,
            thread_id: join.thread().id(),
        });

        Ok(Looper {
            shared,
            join: Some(join),
        })
    }

    /// New handler with its own cancellation scope
    pub fn handler(&self) -> Handler {
        Handler {
            looper: Arc::clone(&self.shared),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn is_looper_thread(&self) -> bool {
        thread::current().id() == self.shared.thread_id
    }

    pub fn quit(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.shared.tx.send(Message::Quit);
        if let Some(join) = self.join.take() {
            if thread::current().id() != self.shared.thread_id {
                let _ = join.join();
            }
        }
    }
}

impl Drop for Looper {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_loop(rx: Receiver<Message>, busy: Arc<Mutex<()>>) {
    for message in rx.iter() {
        match message {
            Message::Quit => break,
            Message::Run {
                generation,
                stamp,
                task,
            } => {
                let _guard = busy.lock().unwrap_or_else(PoisonError::into_inner);
                if generation.load(Ordering::SeqCst) == stamp {
                    task();
                }
            }
        }
    }
    log::debug!("Looper {:?} exiting", thread::current().name());
}

/// Posting handle onto a looper. Clones share the same cancellation scope.
#[derive(Clone)]
pub struct Handler {
    looper: Arc<LooperShared>,
    generation: Arc<AtomicU64>,
}

impl Handler {
    /// Queue `task` behind everything already posted. Returns false once the looper has quit.
    pub fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let stamp = self.generation.load(Ordering::SeqCst);
        self.looper
            .tx
            .send(Message::Run {
                generation: Arc::clone(&self.generation),
                stamp,
                task: Box::new(task),
            })
            .is_ok()
    }

    /// Drop every task this handler has posted that has not started yet.
    ///
    /// Off the looper thread this also waits for the task currently
    /// running, so nothing posted earlier is still executing on return.
    pub fn remove_callbacks_and_messages(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if !self.is_looper_thread() {
            drop(self.looper.busy.lock().unwrap_or_else(PoisonError::into_inner));
        }
    }

    pub fn is_looper_thread(&self) -> bool {
        thread::current().id() == self.looper.thread_id
    }

    /// Block until every task queued before this call has run or been dropped
    pub fn flush(&self, timeout: Duration) -> bool {
        if self.is_looper_thread() {
            return true;
        }
        let (tx, rx) = channel::bounded::<()>(1);
        let marker = Message::Run {
            generation: Arc::new(AtomicU64::new(0)),
            stamp: 0,
            task: Box::new(move || {
                let _ = tx.send(());
            }),
        };
        if self.looper.tx.send(marker).is_err() {
            return false;
        }
        rx.recv_timeout(timeout).is_ok()
    }
}
