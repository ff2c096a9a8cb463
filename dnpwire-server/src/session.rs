//! Session management.

use dnpwire_protocol::{AppControl, Crob};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Controls armed by a select, waiting for the matching operate.
#[derive(Debug, Clone)]
pub struct Selection {
    seq: u8,
    points: Vec<(u16, Crob)>,
    at: Instant,
}

impl Selection {
    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.at.elapsed() > timeout
    }

    /// Whether an operate with application sequence `seq` may execute
    /// `crob` on `index`. The operate must directly follow the select and
    /// repeat the block exactly, status aside.
    pub fn arms(&self, seq: u8, index: u16, crob: &Crob) -> bool {
        let expected = self.seq.wrapping_add(1) & AppControl::SEQ_MASK;
        let crob = crob.with_status(Crob::STATUS_SUCCESS);
        seq == expected
            && self
                .points
                .iter()
                .any(|(i, c)| *i == index && c.with_status(Crob::STATUS_SUCCESS) == crob)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// One connected master.
pub struct Session {
    /// Unique session ID.
    pub id: String,

    /// Remote address.
    pub remote_addr: SocketAddr,

    selection: Option<Selection>,

    request_count: u64,

    created_at: Instant,

    last_activity: Instant,
}

impl Session {
    pub fn new(remote_addr: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            remote_addr,
            selection: None,
            request_count: 0,
            created_at: Instant::now(),
            last_activity: Instant::now(),
        }
    }

    /// Records a request.
    pub fn touch(&mut self) {
        self.request_count += 1;
        self.last_activity = Instant::now();
    }

    pub fn request_count(&self) -> u64 {
        self.request_count
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn idle_duration(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Arms `points`, replacing any earlier selection.
    pub fn select(&mut self, seq: u8, points: Vec<(u16, Crob)>) {
        self.selection = if points.is_empty() {
            None
        } else {
            Some(Selection {
                seq,
                points,
                at: Instant::now(),
            })
        };
    }

    /// Removes the pending selection. Any request consumes it.
    pub fn take_selection(&mut self) -> Option<Selection> {
        self.selection.take()
    }

    pub fn has_selection(&self) -> bool {
        self.selection.is_some()
    }
}
