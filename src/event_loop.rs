//! C11 — the pluggable UI-thread event loop.
//!
//! Grounded on `event-loop.hpp`'s five-operation interface and on the
//! persistent-thread + `mpsc` command-channel pattern used for the LV2 UI
//! thread elsewhere in this codebase (`ensure_gtk_thread`, `GTK_CMD_TX`),
//! generalized away from GTK into a plain task queue.

use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};

pub type MainThreadTask = Box<dyn FnOnce() + Send>;

/// The five operations the core treats as an interface; any host may
/// supply its own implementation (a GUI toolkit's main loop, for
/// instance) instead of [`ThreadEventLoop`].
pub trait EventLoop: Send + Sync {
    /// Establishes thread affinity: the calling thread becomes "the UI
    /// thread" for the lifetime of this event loop.
    fn initialize_on_ui_thread(&self);
    fn running_on_main_thread(&self) -> bool;
    /// Synchronous: runs `task` inline if already on the UI thread,
    /// otherwise posts it and blocks until it completes.
    fn run_task_on_main_thread(&self, task: MainThreadTask);
    /// Asynchronous: posts `task` and returns immediately.
    fn enqueue_task_on_main_thread(&self, task: MainThreadTask);
    /// Runs the loop, consuming posted tasks, until [`EventLoop::stop`].
    fn start(&self);
    fn stop(&self);
}

enum QueuedTask {
    Async(MainThreadTask),
    Sync(MainThreadTask, Sender<()>),
    Shutdown,
}

/// Default implementation: a single persistent thread draining an
/// `mpsc` channel, the same shape as a GTK-toolkit command thread minus
/// the toolkit dependency itself.
#[derive(Default)]
pub struct ThreadEventLoop {
    main_thread_id: RwLock<Option<ThreadId>>,
    sender: Mutex<Option<Sender<QueuedTask>>>,
    receiver: Mutex<Option<Receiver<QueuedTask>>>,
    running: AtomicBool,
}

impl ThreadEventLoop {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventLoop for ThreadEventLoop {
    fn initialize_on_ui_thread(&self) {
        *self.main_thread_id.write().unwrap() = Some(thread::current().id());
        let (tx, rx) = channel();
        *self.sender.lock().unwrap() = Some(tx);
        *self.receiver.lock().unwrap() = Some(rx);
    }

    fn running_on_main_thread(&self) -> bool {
        self.main_thread_id
            .read()
            .unwrap()
            .is_some_and(|id| id == thread::current().id())
    }

    fn run_task_on_main_thread(&self, task: MainThreadTask) {
        if self.running_on_main_thread() {
            task();
            return;
        }
        let sender = self.sender.lock().unwrap().clone();
        match sender {
            Some(tx) => {
                let (done_tx, done_rx) = channel();
                if tx.send(QueuedTask::Sync(task, done_tx)).is_ok() {
                    let _ = done_rx.recv();
                }
            }
            // No loop has been initialized; there is no UI thread to hop
            // to, so run inline rather than hang forever.
            None => task(),
        }
    }

    fn enqueue_task_on_main_thread(&self, task: MainThreadTask) {
        if let Some(tx) = self.sender.lock().unwrap().as_ref() {
            let _ = tx.send(QueuedTask::Async(task));
        }
    }

    fn start(&self) {
        let receiver = self.receiver.lock().unwrap().take();
        let Some(receiver) = receiver else {
            log::warn!("ThreadEventLoop::start called before initialize_on_ui_thread");
            return;
        };
        self.running.store(true, Ordering::SeqCst);
        while self.running.load(Ordering::SeqCst) {
            match receiver.recv() {
                Ok(QueuedTask::Async(task)) => task(),
                Ok(QueuedTask::Sync(task, done)) => {
                    task();
                    let _ = done.send(());
                }
                Ok(QueuedTask::Shutdown) | Err(_) => break,
            }
        }
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(tx) = self.sender.lock().unwrap().as_ref() {
            let _ = tx.send(QueuedTask::Shutdown);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn run_task_on_main_thread_executes_inline_when_already_on_it() {
        let event_loop = ThreadEventLoop::new();
        event_loop.initialize_on_ui_thread();

        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();
        event_loop.run_task_on_main_thread(Box::new(move || {
            ran_clone.store(true, Ordering::SeqCst);
        }));

        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn enqueued_and_synchronous_tasks_run_on_the_loop_thread() {
        let event_loop = Arc::new(ThreadEventLoop::new());
        let el = event_loop.clone();
        let ui_thread_id = Arc::new(Mutex::new(None));
        let ui_thread_id_setter = ui_thread_id.clone();

        let handle = thread::spawn(move || {
            el.initialize_on_ui_thread();
            *ui_thread_id_setter.lock().unwrap() = Some(thread::current().id());
            el.start();
        });

        // Give the loop thread a moment to call initialize_on_ui_thread.
        while ui_thread_id.lock().unwrap().is_none() {
            thread::yield_now();
        }

        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        event_loop.enqueue_task_on_main_thread(Box::new(move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        }));

        let seen_thread = Arc::new(Mutex::new(None));
        let seen_thread_setter = seen_thread.clone();
        event_loop.run_task_on_main_thread(Box::new(move || {
            *seen_thread_setter.lock().unwrap() = Some(thread::current().id());
        }));

        assert_eq!(*seen_thread.lock().unwrap(), *ui_thread_id.lock().unwrap());

        event_loop.stop();
        handle.join().unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
