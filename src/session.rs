//! Ownership of the single WhatsApp session and its connection status.
//!
//! Lifecycle events from the live handle arrive on one channel and are applied
//! by a single task. Each handle is stamped with a generation number so that
//! events or init failures from a handle that has since been torn down cannot
//! move the status of its replacement.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
};

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    Mutex,
};

use crate::{
    error::{PanelError, Result},
    models::{ChatId, ConnectionStatus, MessageMedia},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Qr(String),
    Loading { percent: u8, message: String },
    Authenticated,
    AuthFailure(String),
    Ready,
    Disconnected(String),
}

type Envelope = (u64, SessionEvent);

/// Handed to a session at construction; everything it emits is tagged with
/// the generation it was created for.
#[derive(Clone)]
pub struct EventSink {
    generation: u64,
    tx: UnboundedSender<Envelope>,
}

impl EventSink {
    pub fn emit(&self, event: SessionEvent) {
        if let Err(e) = self.tx.send((self.generation, event)) {
            debug!("lifecycle task is gone, dropping {:?}", e.0 .1);
        }
    }

    /// A sink nobody listens to.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        let (tx, _) = unbounded_channel();
        Self { generation: 0, tx }
    }
}

/// The messaging capability behind one session.
#[async_trait]
pub trait WaSession: Send + Sync {
    /// Starts bring-up. Progress is reported through the session's
    /// [`EventSink`], not through the return value.
    async fn initialize(&self) -> Result<()>;

    async fn is_registered_user(&self, chat_id: &ChatId) -> Result<bool>;

    async fn send_text(&self, chat_id: &ChatId, text: &str) -> Result<()>;

    async fn send_media(
        &self,
        chat_id: &ChatId,
        media: &MessageMedia,
        caption: Option<&str>,
    ) -> Result<()>;

    async fn destroy(&self) -> Result<()>;
}

/// Builds fresh sessions. `create` must be cheap; the real work belongs in
/// [`WaSession::initialize`].
pub trait SessionFactory: Send + Sync {
    fn create(&self, events: EventSink) -> Arc<dyn WaSession>;
}

#[derive(Default)]
struct SessionState {
    status: ConnectionStatus,
    qr_code: Option<String>,
    handle: Option<Arc<dyn WaSession>>,
    generation: u64,
}

/// Outcome of a teardown. `clean` is false when destroying the handle or
/// wiping the auth directory failed and the errors were swallowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeardownReport {
    pub status: ConnectionStatus,
    pub clean: bool,
}

struct Inner {
    state: Mutex<SessionState>,
    teardown: Mutex<()>,
    factory: Arc<dyn SessionFactory>,
    auth_dir: PathBuf,
    events_tx: UnboundedSender<Envelope>,
    events_rx: Mutex<Option<UnboundedReceiver<Envelope>>>,
    started: AtomicBool,
}

#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(factory: Arc<dyn SessionFactory>, auth_dir: impl Into<PathBuf>) -> Self {
        let (events_tx, events_rx) = unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SessionState::default()),
                teardown: Mutex::new(()),
                factory,
                auth_dir: auth_dir.into(),
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Spawns the lifecycle task and begins the first bring-up.
    pub async fn start(&self) {
        if let Some(rx) = self.inner.events_rx.lock().await.take() {
            tokio::spawn(run_events(Arc::downgrade(&self.inner), rx));
            self.inner.started.store(true, Ordering::SeqCst);
        }
        self.begin_initialize().await;
    }

    /// Current status and pairing payload. A manager left in `disconnected`
    /// by a failed bring-up is restarted here.
    pub async fn status(&self) -> (ConnectionStatus, Option<String>) {
        let idle = {
            let state = self.inner.state.lock().await;
            state.status == ConnectionStatus::Disconnected && state.handle.is_none()
        };
        if idle && self.inner.started.load(Ordering::SeqCst) {
            self.begin_initialize().await;
        }

        let state = self.inner.state.lock().await;
        (state.status, state.qr_code.clone())
    }

    /// The live handle, if one exists.
    pub async fn session(&self) -> Option<Arc<dyn WaSession>> {
        self.inner.state.lock().await.handle.clone()
    }

    /// Tears down the current session and starts a new pairing cycle. Never
    /// fails; problems during teardown are reported through `clean`.
    pub async fn disconnect(&self) -> TeardownReport {
        self.teardown("disconnect requested", None).await
    }

    /// Releases the handle on process exit. Auth artifacts are kept so the
    /// next start can resume the session.
    pub async fn shutdown(&self) {
        let handle = {
            let mut state = self.inner.state.lock().await;
            state.generation += 1;
            state.status = ConnectionStatus::Disconnected;
            state.qr_code = None;
            state.handle.take()
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.destroy().await {
                warn!("could not close WhatsApp session on shutdown: {e}");
            }
        }
    }

    async fn begin_initialize(&self) {
        let (generation, handle) = {
            let mut state = self.inner.state.lock().await;
            if state.handle.is_some() || state.status == ConnectionStatus::Disconnecting {
                return;
            }
            state.generation += 1;
            let sink = EventSink {
                generation: state.generation,
                tx: self.inner.events_tx.clone(),
            };
            let handle = self.inner.factory.create(sink);
            state.status = ConnectionStatus::Initializing;
            state.qr_code = None;
            state.handle = Some(handle.clone());
            (state.generation, handle)
        };

        info!("initializing WhatsApp session #{generation}");
        let manager = self.clone();
        tokio::spawn(async move {
            if let Err(e) = handle.initialize().await {
                manager.on_init_failure(generation, e).await;
            }
        });
    }

    // No automatic retry here; the next status poll or disconnect restarts.
    async fn on_init_failure(&self, generation: u64, err: PanelError) {
        let handle = {
            let mut state = self.inner.state.lock().await;
            if state.generation != generation {
                debug!("ignoring init failure of stale session #{generation}: {err}");
                return;
            }
            state.generation += 1;
            state.status = ConnectionStatus::Disconnected;
            state.qr_code = None;
            state.handle.take()
        };

        error!("WhatsApp session #{generation} failed to initialize: {err}");
        if let Some(handle) = handle {
            if let Err(e) = handle.destroy().await {
                debug!("destroying failed session #{generation}: {e}");
            }
        }
    }

    async fn apply_event(&self, generation: u64, event: SessionEvent) {
        let mut state = self.inner.state.lock().await;
        if generation != state.generation || state.handle.is_none() {
            debug!("ignoring {event:?} from stale session #{generation}");
            return;
        }

        match event {
            SessionEvent::Qr(code) => {
                info!("QR code generated! Scan with WhatsApp");
                if let Some(art) = render_qr(&code) {
                    info!("\n{art}");
                }
                state.status = ConnectionStatus::WaitingForQr;
                state.qr_code = Some(code);
            }
            SessionEvent::Loading { percent, message } => {
                debug!("loading {percent}% {message}");
                state.status = ConnectionStatus::Connecting(percent.min(100));
            }
            SessionEvent::Authenticated => {
                info!("WhatsApp authenticated successfully!");
                state.status = ConnectionStatus::Authenticating;
            }
            SessionEvent::AuthFailure(reason) => {
                warn!("WhatsApp authentication failed: {reason}");
            }
            SessionEvent::Ready => {
                info!("WhatsApp client is ready!");
                state.status = ConnectionStatus::Connected;
                state.qr_code = None;
            }
            SessionEvent::Disconnected(reason) => {
                drop(state);
                warn!("WhatsApp disconnected: {reason}");
                self.teardown(&reason, Some(generation)).await;
            }
        }
    }

    /// `expected` limits the teardown to a specific generation; a drop that
    /// was queued behind another teardown must not take down the replacement.
    async fn teardown(&self, reason: &str, expected: Option<u64>) -> TeardownReport {
        let _serial = self.inner.teardown.lock().await;

        let handle = {
            let mut state = self.inner.state.lock().await;
            if expected.is_some_and(|g| g != state.generation) {
                return TeardownReport {
                    status: state.status,
                    clean: true,
                };
            }
            state.generation += 1;
            state.status = ConnectionStatus::Disconnecting;
            state.qr_code = None;
            state.handle.take()
        };

        info!("tearing down WhatsApp session ({reason})");
        let mut clean = true;

        if let Some(handle) = handle {
            if let Err(e) = handle.destroy().await {
                warn!("error while destroying WhatsApp session: {e}");
                clean = false;
            }
        }

        if let Err(e) = remove_auth_dir(&self.inner.auth_dir).await {
            warn!(
                "could not remove auth artifacts at {:?}: {e}",
                self.inner.auth_dir
            );
            clean = false;
        }

        self.inner.state.lock().await.status = ConnectionStatus::Disconnected;
        self.begin_initialize().await;

        TeardownReport {
            status: self.inner.state.lock().await.status,
            clean,
        }
    }
}

async fn run_events(inner: Weak<Inner>, mut rx: UnboundedReceiver<Envelope>) {
    while let Some((generation, event)) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        SessionManager { inner }.apply_event(generation, event).await;
    }
    debug!("lifecycle task stopped");
}

async fn remove_auth_dir(dir: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn render_qr(payload: &str) -> Option<String> {
    use qrcode::render::unicode::Dense1x2;

    let code = qrcode::QrCode::new(payload.as_bytes()).ok()?;
    Some(
        code.render::<Dense1x2>()
            .dark_color(Dense1x2::Light)
            .light_color(Dense1x2::Dark)
            .build(),
    )
}
