//! Matchmaking queues.
//!
//! One FIFO queue per mode. A new arrival is paired with the oldest live
//! entry of its mode, otherwise it waits. AI matches skip the queues.

use crate::client_manager::{ClientHandle, ClientId};
use crate::config::ServerConfig;
use crate::game::{MatchSetup, Seat};
use log::debug;
use shared::protocol::QueueMode;
use shared::Difficulty;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub handle: ClientHandle,
    pub name: String,
}

impl QueueEntry {
    pub fn new(handle: ClientHandle, name: impl Into<String>) -> Self {
        QueueEntry {
            handle,
            name: name.into(),
        }
    }

    pub fn id(&self) -> ClientId {
        self.handle.id()
    }

    fn into_seat(self) -> Seat {
        Seat::human(self.name, self.handle)
    }
}

#[derive(Debug)]
pub enum QueueOutcome {
    Waiting,
    /// `player1` is the earlier arrival.
    Paired {
        player1: QueueEntry,
        player2: QueueEntry,
    },
}

#[derive(Debug, Default)]
pub struct Matchmaker {
    normal: VecDeque<QueueEntry>,
    custom: VecDeque<QueueEntry>,
}

impl Matchmaker {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue_mut(&mut self, mode: QueueMode) -> &mut VecDeque<QueueEntry> {
        match mode {
            QueueMode::Normal => &mut self.normal,
            QueueMode::Custom => &mut self.custom,
        }
    }

    /// Pairs `entry` with the oldest live waiting entry of `mode`, or
    /// queues it. Any earlier queue entry of the same client is dropped
    /// first.
    pub fn add_to_queue(&mut self, mode: QueueMode, entry: QueueEntry) -> QueueOutcome {
        self.remove_from_queue(entry.id());
        let queue = self.queue_mut(mode);

        while let Some(front) = queue.front() {
            if !front.handle.is_closed() {
                break;
            }
            debug!("Discarding closed client {} from {:?} queue", front.id(), mode);
            queue.pop_front();
        }

        match queue.pop_front() {
            Some(waiting) => QueueOutcome::Paired {
                player1: waiting,
                player2: entry,
            },
            None => {
                queue.push_back(entry);
                QueueOutcome::Waiting
            }
        }
    }

    /// Puts an entry back at the head of its queue, e.g. when its partner
    /// vanished before the match could start.
    pub fn requeue_front(&mut self, mode: QueueMode, entry: QueueEntry) {
        self.remove_from_queue(entry.id());
        self.queue_mut(mode).push_front(entry);
    }

    /// Removes a client from whichever queue holds it. Safe to call for
    /// clients that are not queued.
    pub fn remove_from_queue(&mut self, client_id: ClientId) -> bool {
        let before = self.normal.len() + self.custom.len();
        self.normal.retain(|e| e.id() != client_id);
        self.custom.retain(|e| e.id() != client_id);
        before != self.normal.len() + self.custom.len()
    }

    pub fn contains(&self, client_id: ClientId) -> bool {
        self.normal
            .iter()
            .chain(self.custom.iter())
            .any(|e| e.id() == client_id)
    }

    pub fn queued(&self, mode: QueueMode) -> usize {
        match mode {
            QueueMode::Normal => self.normal.len(),
            QueueMode::Custom => self.custom.len(),
        }
    }
}

pub fn pair_setup(
    player1: QueueEntry,
    player2: QueueEntry,
    mode: QueueMode,
    config: &ServerConfig,
) -> MatchSetup {
    MatchSetup::classic(
        vec![player1.into_seat(), player2.into_seat()],
        mode.is_custom(),
        config,
    )
}

/// A human against a bot; the human always plays `player1`.
pub fn ai_match_setup(
    entry: QueueEntry,
    difficulty: Difficulty,
    custom: bool,
    config: &ServerConfig,
) -> MatchSetup {
    MatchSetup::classic(vec![entry.into_seat(), Seat::bot(difficulty)], custom, config)
}
