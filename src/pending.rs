//! # Pending Work Queue
//!
//! Negotiation intents that arrived before the local stream was ready.
//!
//! At most one entry exists per peer. A newer intent for the same peer
//! overwrites the old one in place and keeps its queue position, so a flush
//! replays peers in the order they first appeared. Remote candidates for a
//! parked offer stay with the entry and are handed to the session created at
//! flush time.

use std::mem;

use crate::types::{IceCandidate, ParticipantId, SessionDescription};

/// What to do for a peer once media is ready
#[derive(Debug, Clone, PartialEq)]
pub enum DeferredIntent {
    /// Create an offerer session
    InitiateOffer,
    /// Create an answerer session and accept this offer
    RespondToOffer(SessionDescription),
}

/// One parked peer
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry {
    /// Remote participant
    pub peer_id: ParticipantId,
    /// Latest intent
    pub intent: DeferredIntent,
    /// Remote candidates received while parked, in arrival order
    pub early_candidates: Vec<IceCandidate>,
}

/// Ordered, per-peer deduplicated queue of deferred intents
#[derive(Debug, Default)]
pub struct PendingWorkQueue {
    entries: Vec<PendingEntry>,
}

impl PendingWorkQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Park an intent; returns `true` if the peer was not queued yet
    pub fn defer(&mut self, peer_id: ParticipantId, intent: DeferredIntent) -> bool {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.peer_id == peer_id) {
            entry.intent = intent;
            return false;
        }
        self.entries.push(PendingEntry {
            peer_id,
            intent,
            early_candidates: Vec::new(),
        });
        true
    }

    /// Keep a remote candidate with a parked peer; `false` if not parked
    pub fn buffer_candidate(&mut self, peer_id: &ParticipantId, candidate: IceCandidate) -> bool {
        match self.entries.iter_mut().find(|e| &e.peer_id == peer_id) {
            Some(entry) => {
                entry.early_candidates.push(candidate);
                true
            }
            None => false,
        }
    }

    /// Remove a peer's entry
    pub fn remove(&mut self, peer_id: &ParticipantId) -> Option<PendingEntry> {
        let index = self.entries.iter().position(|e| &e.peer_id == peer_id)?;
        Some(self.entries.remove(index))
    }

    /// Whether a peer is parked
    pub fn contains(&self, peer_id: &ParticipantId) -> bool {
        self.entries.iter().any(|e| &e.peer_id == peer_id)
    }

    /// Intent parked for a peer
    pub fn intent(&self, peer_id: &ParticipantId) -> Option<&DeferredIntent> {
        self.entries
            .iter()
            .find(|e| &e.peer_id == peer_id)
            .map(|e| &e.intent)
    }

    /// Number of parked peers
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is parked
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Take every entry in insertion order, leaving the queue empty
    pub fn drain(&mut self) -> Vec<PendingEntry> {
        mem::take(&mut self.entries)
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
