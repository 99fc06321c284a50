// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Deferred work on behalf of the component callbacks.
//!
//! Callbacks run on the component's threads and must not block on a round trip to
//! the component. Whatever they cannot do inline is queued as a [`Command`] and
//! executed in order by one worker thread per core.

use std::{
    fmt,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
};

use tracing::{debug, error, warn};

use crate::{Result, buffer::OmxBuffer, queue::AsyncQueue};

/// Work item for the command worker.
pub enum Command {
    /// Disable a port; the output port is cleaned afterwards.
    PortDisable(u32),
    /// Enable a port and allocate its buffers.
    PortEnable(u32),
    /// Free one buffer header of a port.
    FreeBuffer(u32, OmxBuffer),
    /// Force the component into Pause.
    Pause,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::PortDisable(port) => write!(f, "PortDisable({port})"),
            Command::PortEnable(port) => write!(f, "PortEnable({port})"),
            Command::FreeBuffer(port, buffer) => write!(f, "FreeBuffer({port}, {:p})", buffer.as_ptr()),
            Command::Pause => f.write_str("Pause"),
        }
    }
}

/// FIFO of commands and the worker consuming it.
pub struct CommandQueue {
    queue: Arc<AsyncQueue<Command>>,
    finished: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandQueue {
    pub fn new() -> Self {
        CommandQueue {
            queue: Arc::new(AsyncQueue::new()),
            finished: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    /// Spawns the worker, which runs `handler` for every command in push order.
    ///
    /// Does nothing if a worker is already running.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn start<F>(&self, name: &str, mut handler: F) -> Result<()>
    where
        F: FnMut(Command) + Send + 'static,
    {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.is_some() {
            return Ok(());
        }
        self.finished.store(false, Ordering::SeqCst);
        self.queue.enable();
        let queue = self.queue.clone();
        let finished = self.finished.clone();
        let handle = thread::Builder::new()
            .name(format!("{name}:cmd"))
            .spawn(move || {
                debug!("Command worker started");
                while let Some(command) = queue.pop() {
                    if finished.load(Ordering::SeqCst) {
                        break;
                    }
                    debug!(?command, "Running command");
                    handler(command);
                }
                debug!("Command worker stopped");
            })?;
        *worker = Some(handle);
        Ok(())
    }

    pub fn push(&self, command: Command) {
        if self.finished.load(Ordering::SeqCst) {
            warn!(?command, "Command queue finished, dropping command");
            return;
        }
        self.queue.push(command);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Stops consuming commands and joins the worker.
    ///
    /// Commands still queued are dropped. Safe to call from the worker itself, in
    /// which case the join is skipped.
    pub fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
        self.queue.disable();
        let handle = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(handle) = handle else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            error!("Command worker panicked");
        }
        let dropped = self.queue.drain().len();
        if dropped > 0 {
            debug!(dropped, "Dropped pending commands");
        }
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::mpsc, time::Duration};

    use super::*;

    #[test]
    fn commands_run_in_push_order() {
        let commands = CommandQueue::new();
        let (tx, rx) = mpsc::channel();
        commands
            .start("test", move |command| {
                let label = match command {
                    Command::PortDisable(port) => format!("disable {port}"),
                    Command::PortEnable(port) => format!("enable {port}"),
                    Command::FreeBuffer(port, _) => format!("free {port}"),
                    Command::Pause => "pause".to_string(),
                };
                tx.send(label).unwrap();
            })
            .unwrap();

        commands.push(Command::PortDisable(1));
        commands.push(Command::PortEnable(1));
        commands.push(Command::Pause);

        let received: Vec<String> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(1)).unwrap())
            .collect();
        assert_eq!(received, ["disable 1", "enable 1", "pause"]);
        commands.finish();
        assert!(commands.is_finished());
    }

    #[test]
    fn finish_drops_later_commands() {
        let commands = CommandQueue::new();
        commands.start("test", |_| {}).unwrap();
        commands.finish();
        commands.push(Command::Pause);
        assert!(commands.is_empty());
    }
}
