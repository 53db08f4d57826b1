//! Scripted in-memory session used by the unit tests.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::{
    error::{PanelError, Result},
    models::{ChatId, MessageMedia},
    session::{EventSink, SessionEvent, SessionFactory, WaSession},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text {
        to: String,
        text: String,
    },
    Media {
        to: String,
        mimetype: String,
        caption: Option<String>,
        filename: Option<String>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct Behavior {
    /// Normalized numbers that have a WhatsApp account.
    pub registered: Vec<String>,
    pub fail_init: bool,
    pub fail_destroy: bool,
    pub fail_lookup: bool,
    pub fail_media: bool,
    /// After each text send, notify the first and wait on the second.
    pub pause_after_text: Option<(Arc<Notify>, Arc<Notify>)>,
}

pub struct MockSession {
    behavior: Behavior,
    events: Option<EventSink>,
    sent: Mutex<Vec<Sent>>,
    destroyed: AtomicBool,
}

impl MockSession {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            events: None,
            sent: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn emit(&self, event: SessionEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(PanelError::SessionClosed);
        }
        Ok(())
    }

    fn transport_error(&self, what: &str) -> PanelError {
        PanelError::BridgeStatus {
            status: 502,
            body: format!("{what} failed"),
        }
    }
}

#[async_trait]
impl WaSession for MockSession {
    async fn initialize(&self) -> Result<()> {
        if self.behavior.fail_init {
            return Err(self.transport_error("browser launch"));
        }
        Ok(())
    }

    async fn is_registered_user(&self, chat_id: &ChatId) -> Result<bool> {
        self.ensure_open()?;
        if self.behavior.fail_lookup {
            return Err(self.transport_error("lookup"));
        }
        Ok(self
            .behavior
            .registered
            .iter()
            .any(|n| ChatId::from_number(n) == *chat_id))
    }

    async fn send_text(&self, chat_id: &ChatId, text: &str) -> Result<()> {
        self.ensure_open()?;
        self.sent.lock().unwrap().push(Sent::Text {
            to: chat_id.to_string(),
            text: text.to_string(),
        });
        if let Some((sent, resume)) = &self.behavior.pause_after_text {
            sent.notify_one();
            resume.notified().await;
        }
        Ok(())
    }

    async fn send_media(
        &self,
        chat_id: &ChatId,
        media: &MessageMedia,
        caption: Option<&str>,
    ) -> Result<()> {
        self.ensure_open()?;
        if self.behavior.fail_media {
            return Err(self.transport_error("upload"));
        }
        self.sent.lock().unwrap().push(Sent::Media {
            to: chat_id.to_string(),
            mimetype: media.mimetype.to_string(),
            caption: caption.map(str::to_string),
            filename: media.filename.clone(),
        });
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.destroyed.store(true, Ordering::SeqCst);
        if self.behavior.fail_destroy {
            return Err(self.transport_error("destroy"));
        }
        Ok(())
    }
}

/// Hands out [`MockSession`]s and remembers every one it built.
pub struct MockFactory {
    behavior: Behavior,
    sessions: Mutex<Vec<Arc<MockSession>>>,
}

impl MockFactory {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn latest(&self) -> Arc<MockSession> {
        self.sessions
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no session created yet")
    }

    pub fn count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn live_count(&self) -> usize {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| !s.is_destroyed())
            .count()
    }
}

impl SessionFactory for MockFactory {
    fn create(&self, events: EventSink) -> Arc<dyn WaSession> {
        let session = Arc::new(MockSession {
            events: Some(events),
            ..MockSession::new(self.behavior.clone())
        });
        self.sessions.lock().unwrap().push(session.clone());
        session
    }
}
