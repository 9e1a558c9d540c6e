// src/events.rs

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Дискретные события сессии для потребителей (перерисовка, журнал)
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEventKind {
    SignedIn { identity_id: String },
    SignedOut,
    OrganizationChanged { organization_id: String },
    MembersChanged { organization_id: String },
}

#[derive(Serialize, Clone, Debug)]
pub struct SessionEvent {
    pub id: Uuid,
    pub kind: SessionEventKind,
    pub timestamp: DateTime<Utc>,
}

pub struct EventHub {
    sender: broadcast::Sender<SessionEvent>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, kind: SessionEventKind) {
        let event = SessionEvent {
            id: Uuid::new_v4(),
            kind,
            timestamp: Utc::now(),
        };
        let _ = self.sender.send(event); // нет получателей, не ошибка
    }
}
