//! The attendance broadcast hub.
//!
//! One process-scoped room. Connections register with [`AttendanceHub::connect`],
//! become room members with [`AttendanceHub::join`] and receive every punch
//! published afterwards, their own included. Nothing is persisted; a bounded
//! ring of recent broadcasts is kept only to answer explicit catch-up requests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use derive_more::Display;
use tokio::sync::broadcast;

use crate::model::attendance::{AttendanceEvent, ConnectionId, Envelope, PunchIn, PunchOut};

pub type Subscription = broadcast::Receiver<Arc<Envelope>>;

#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum HubError {
    #[display(fmt = "attendance hub is closed")]
    Closed,
    #[display(fmt = "unknown connection {}", _0)]
    UnknownConnection(ConnectionId),
}

impl std::error::Error for HubError {}

#[derive(Debug)]
struct Connection {
    connected_at: Instant,
    joined: bool,
}

#[derive(Debug)]
struct HubState {
    /// `None` once the hub has been shut down.
    sender: Option<broadcast::Sender<Arc<Envelope>>>,
    connections: HashMap<ConnectionId, Connection>,
    last_seq: u64,
    recent: VecDeque<Arc<Envelope>>,
}

#[derive(Debug)]
pub struct AttendanceHub {
    state: Mutex<HubState>,
    replay_capacity: usize,
}

impl AttendanceHub {
    /// `channel_capacity` bounds how far a member may fall behind before it
    /// starts skipping events; `replay_capacity` bounds the catch-up ring.
    pub fn new(channel_capacity: usize, replay_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(channel_capacity.max(1));

        Self {
            state: Mutex::new(HubState {
                sender: Some(sender),
                connections: HashMap::new(),
                last_seq: 0,
                recent: VecDeque::with_capacity(replay_capacity),
            }),
            replay_capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn connect(&self) -> Result<ConnectionId, HubError> {
        let mut state = self.lock();
        if state.sender.is_none() {
            return Err(HubError::Closed);
        }

        let id = ConnectionId::new();
        state.connections.insert(
            id,
            Connection {
                connected_at: Instant::now(),
                joined: false,
            },
        );
        tracing::info!(
            connection = %id,
            connections = state.connections.len(),
            "Connection registered"
        );
        Ok(id)
    }

    /// Adds the connection to the room. Events published before this call
    /// are not delivered.
    pub fn join(&self, id: ConnectionId) -> Result<Subscription, HubError> {
        let mut state = self.lock();

        let receiver = match &state.sender {
            Some(sender) => sender.subscribe(),
            None => return Err(HubError::Closed),
        };

        let connection = state
            .connections
            .get_mut(&id)
            .ok_or(HubError::UnknownConnection(id))?;
        connection.joined = true;

        let members = state.connections.values().filter(|c| c.joined).count();
        tracing::info!(connection = %id, members, "Joined attendance room");
        Ok(receiver)
    }

    pub fn punch_in(
        &self,
        origin: Option<ConnectionId>,
        punch: PunchIn,
    ) -> Result<u64, HubError> {
        self.publish(origin, AttendanceEvent::PunchIn(punch))
    }

    pub fn punch_out(
        &self,
        origin: Option<ConnectionId>,
        punch: PunchOut,
    ) -> Result<u64, HubError> {
        self.publish(origin, AttendanceEvent::PunchOut(punch))
    }

    /// Assigns the next sequence number and fans the event out. Sequence
    /// assignment and send happen under one lock, so every member sees
    /// events in sequence order.
    pub fn publish(
        &self,
        origin: Option<ConnectionId>,
        event: AttendanceEvent,
    ) -> Result<u64, HubError> {
        let mut state = self.lock();
        let state = &mut *state;

        let Some(sender) = &state.sender else {
            return Err(HubError::Closed);
        };

        state.last_seq += 1;
        let seq = state.last_seq;

        tracing::debug!(
            seq,
            origin = ?origin.map(|o| o.to_string()),
            kind = ?event.kind(),
            employee_id = event.employee_id(),
            date = event.date(),
            "Broadcasting attendance event"
        );

        let envelope = Arc::new(Envelope {
            seq,
            origin,
            data: event,
        });

        if sender.send(Arc::clone(&envelope)).is_err() {
            tracing::debug!(seq, "No room members to receive attendance event");
        }

        if self.replay_capacity > 0 {
            if state.recent.len() == self.replay_capacity {
                state.recent.pop_front();
            }
            state.recent.push_back(envelope);
        }

        Ok(seq)
    }

    /// Removes the connection from the registry and the room. Returns
    /// whether it was registered. No event is emitted on its behalf.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        let mut state = self.lock();
        match state.connections.remove(&id) {
            Some(connection) => {
                tracing::info!(
                    connection = %id,
                    was_member = connection.joined,
                    connected_for_ms = connection.connected_at.elapsed().as_millis() as u64,
                    "Connection removed"
                );
                true
            }
            None => false,
        }
    }

    /// Retained broadcasts with `seq > after_seq`, oldest first.
    pub fn catch_up(&self, after_seq: u64) -> Vec<Envelope> {
        self.lock()
            .recent
            .iter()
            .filter(|e| e.seq > after_seq)
            .map(|e| Envelope::clone(e))
            .collect()
    }

    pub fn members(&self) -> usize {
        self.lock().connections.values().filter(|c| c.joined).count()
    }

    pub fn connections(&self) -> usize {
        self.lock().connections.len()
    }

    pub fn last_seq(&self) -> u64 {
        self.lock().last_seq
    }

    pub fn is_closed(&self) -> bool {
        self.lock().sender.is_none()
    }

    /// Closes the room. Members drain what was already sent and then see
    /// end-of-stream; later calls fail with [`HubError::Closed`].
    pub fn shutdown(&self) {
        let mut state = self.lock();
        if state.sender.take().is_some() {
            let dropped = state.connections.len();
            state.connections.clear();
            state.recent.clear();
            tracing::info!(connections = dropped, "Attendance hub shut down");
        }
    }
}
