use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 64;

/// Events pushed to workroom sockets.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkroomEvent {
    MessageCreated {
        message: serde_json::Value,
    },
    Finalised {
        role: String,
        client_finalised: bool,
        worker_finalised: bool,
        locked: bool,
    },
}

/// Fan-out of workroom events to connected sockets, one channel per workroom.
#[derive(Default)]
pub struct WorkroomHub {
    channels: Mutex<HashMap<Uuid, broadcast::Sender<WorkroomEvent>>>,
}

impl WorkroomHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, workroom_id: Uuid) -> broadcast::Receiver<WorkroomEvent> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(workroom_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Returns how many sockets received the event.
    pub fn publish(&self, workroom_id: Uuid, event: WorkroomEvent) -> usize {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let Some(sender) = channels.get(&workroom_id) else {
            return 0;
        };
        match sender.send(event) {
            Ok(delivered) => delivered,
            Err(_) => {
                channels.remove(&workroom_id);
                0
            }
        }
    }

    /// Drops the channel of a workroom once its last socket went away.
    pub fn release(&self, workroom_id: Uuid) {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        if channels
            .get(&workroom_id)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            channels.remove(&workroom_id);
        }
    }
}
