// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Loop prevention and duplicate suppression.
//!
//! Every event is emitted fresh exactly once, by the context where it
//! happened. Recipients apply it and stay leaves: they never send a success
//! notification back toward the sender. The one allowed forward is the
//! frame relaying a fresh popup sign-in to the host, and that relay keeps
//! the event id with `provenanceFresh = false`, so the host can drop
//! whichever copy (broadcast or relay) arrives second.

use std::collections::{HashSet, VecDeque};

use uuid::Uuid;

use crate::protocol::{Envelope, Message};
use crate::transport::ContextKind;

/// Default number of recent event ids remembered per context.
pub const DEFAULT_DEDUPE_WINDOW: usize = 128;

/// Bounded memory of recently seen event ids.
#[derive(Debug)]
pub struct SeenEvents {
    capacity: usize,
    order: VecDeque<Uuid>,
    ids: HashSet<Uuid>,
}

impl SeenEvents {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { capacity, order: VecDeque::with_capacity(capacity), ids: HashSet::new() }
    }

    /// Record `id`; returns false if it was already seen.
    pub fn first_sighting(&mut self, id: Uuid) -> bool {
        if !self.ids.insert(id) {
            return false;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.ids.remove(&old);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for SeenEvents {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUPE_WINDOW)
    }
}

/// Whether `receiver` should forward an inbound envelope to the host.
///
/// Only a fresh sign-in reaching the frame is forwarded; everything else
/// terminates at its recipient.
pub fn should_relay_to_host(receiver: ContextKind, envelope: &Envelope) -> bool {
    receiver == ContextKind::Frame
        && envelope.provenance_fresh
        && matches!(envelope.message, Message::AuthSuccess { .. })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenGrant;

    #[test]
    fn second_sighting_is_rejected() {
        let mut seen = SeenEvents::new(4);
        let id = Uuid::new_v4();
        assert!(seen.first_sighting(id));
        assert!(!seen.first_sighting(id));
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn window_evicts_oldest() {
        let mut seen = SeenEvents::new(2);
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            assert!(seen.first_sighting(*id));
        }
        assert_eq!(seen.len(), 2);
        // Oldest fell out of the window and counts as new again.
        assert!(seen.first_sighting(ids[0]));
        assert!(!seen.first_sighting(ids[2]));
    }

    #[test]
    fn only_fresh_sign_in_at_frame_is_relayed() {
        let grant = TokenGrant::new("t1", None, 60);
        let fresh = Envelope::fresh(Message::auth_success(&grant));
        assert!(should_relay_to_host(ContextKind::Frame, &fresh));
        assert!(!should_relay_to_host(ContextKind::Frame, &fresh.relayed()));
        assert!(!should_relay_to_host(ContextKind::Host, &fresh));
        assert!(!should_relay_to_host(
            ContextKind::Frame,
            &Envelope::fresh(Message::OnboardingComplete)
        ));
    }
}
