//! Bounded command queue between the dispatch tasks and the session worker
//!
//! Every entry is tagged with the drain epoch it was pushed in. A drain bumps
//! the epoch, so a push that was still waiting for a slot when the queue was
//! drained lands as a stale entry and is skipped by `pop`.

use crate::command::Command;
use crate::{SwitchError, config};
use core::cell::Cell;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, with_timeout};

#[derive(Debug, Clone, Copy)]
struct Entry {
    epoch: u32,
    command: Command,
}

pub struct CommandQueue {
    channel: Channel<CriticalSectionRawMutex, Entry, { config::COMMAND_QUEUE_DEPTH }>,
    epoch: critical_section::Mutex<Cell<u32>>,
}

impl CommandQueue {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
            epoch: critical_section::Mutex::new(Cell::new(0)),
        }
    }

    fn epoch(&self) -> u32 {
        critical_section::with(|cs| self.epoch.borrow(cs).get())
    }

    /// Append `command`, waiting up to `wait` for a free slot.
    ///
    /// Fails with `SendTimeout` when the queue was drained while waiting; the
    /// command is then never delivered.
    pub async fn push(&self, command: Command, wait: Duration) -> Result<(), SwitchError> {
        let epoch = self.epoch();
        with_timeout(wait, self.channel.send(Entry { epoch, command }))
            .await
            .map_err(|_| SwitchError::QueueFullOrTimeout)?;

        if self.epoch() != epoch {
            log::warn!("[TCP] Connection lost while queueing {:?}, dropped", command);
            return Err(SwitchError::SendTimeout);
        }
        Ok(())
    }

    /// Next command in FIFO order, waiting as long as it takes
    pub async fn pop(&self) -> Command {
        loop {
            let entry = self.channel.receive().await;
            if entry.epoch == self.epoch() {
                return entry.command;
            }
            log::debug!("[TCP] Skipping stale {:?}", entry.command);
        }
    }

    /// Discard every queued command, returning how many were dropped
    pub fn drain(&self) -> usize {
        critical_section::with(|cs| {
            let epoch = self.epoch.borrow(cs);
            epoch.set(epoch.get().wrapping_add(1));
        });

        let mut dropped = 0;
        while self.channel.try_receive().is_ok() {
            dropped += 1;
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        config::COMMAND_QUEUE_DEPTH
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}
