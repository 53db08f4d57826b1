//! [`WaSession`] backed by a WhatsApp Web gateway reachable over HTTP.
//!
//! The gateway owns the browser and the protocol; we drive one named session
//! on it and poll its state to produce lifecycle events.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use tokio::{sync::Mutex, task::JoinHandle};

use crate::{
    config::Config,
    error::{PanelError, Result},
    models::{ChatId, MessageMedia},
    session::{EventSink, SessionEvent, SessionFactory, WaSession},
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_POLL_FAILURES: u32 = 10;

pub struct BridgeFactory {
    client: reqwest::Client,
    endpoint: String,
    poll_interval: Duration,
}

impl BridgeFactory {
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/sessions/{}",
                config.bridge_url.trim_end_matches('/'),
                config.session_name
            ),
            poll_interval: config.bridge_poll_interval(),
        })
    }
}

impl SessionFactory for BridgeFactory {
    fn create(&self, events: EventSink) -> Arc<dyn WaSession> {
        Arc::new(BridgeSession {
            client: self.client.clone(),
            endpoint: self.endpoint.clone(),
            poll_interval: self.poll_interval,
            events,
            poller: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }
}

pub struct BridgeSession {
    client: reqwest::Client,
    endpoint: String,
    poll_interval: Duration,
    events: EventSink,
    poller: Mutex<Option<JoinHandle<()>>>,
    /// Set by `destroy`. The gateway reuses the session name for the next
    /// handle, so a closed one must stop talking to it.
    closed: AtomicBool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum BridgeState {
    Starting,
    ScanQrCode,
    Loading,
    Authenticated,
    Ready,
    AuthFailure,
    Disconnected,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
struct StateSnapshot {
    state: BridgeState,
    #[serde(default)]
    qr: Option<String>,
    #[serde(default)]
    percent: Option<u8>,
    #[serde(default)]
    message: Option<String>,
}

impl StateSnapshot {
    fn same_phase(&self, other: &StateSnapshot) -> bool {
        self.state == other.state && self.qr == other.qr && self.percent == other.percent
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest<'a> {
    chat_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TextMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MediaMessage<'a> {
    chat_id: &'a str,
    mimetype: String,
    data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    filename: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    caption: Option<&'a str>,
}

#[derive(Deserialize)]
struct RegisteredResponse {
    registered: bool,
}

impl BridgeSession {
    async fn post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PanelError::SessionClosed);
        }
        self.post_unchecked(path, body).await
    }

    async fn post_unchecked<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response> {
        let url = format!("{}/{path}", self.endpoint);
        trace!("POST {url}");
        let response = self.client.post(&url).json(body).send().await?;
        check_status(response).await
    }
}

#[async_trait]
impl WaSession for BridgeSession {
    async fn initialize(&self) -> Result<()> {
        self.post("start", &serde_json::json!({})).await?;

        let handle = tokio::spawn(poll_state(
            self.client.clone(),
            format!("{}/state", self.endpoint),
            self.poll_interval,
            self.events.clone(),
        ));
        if let Some(previous) = self.poller.lock().await.replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    async fn is_registered_user(&self, chat_id: &ChatId) -> Result<bool> {
        let response = self
            .post(
                "check-number",
                &ChatRequest {
                    chat_id: chat_id.as_str(),
                },
            )
            .await?;
        let body: RegisteredResponse = response.json().await?;
        Ok(body.registered)
    }

    async fn send_text(&self, chat_id: &ChatId, text: &str) -> Result<()> {
        self.post(
            "messages/text",
            &TextMessage {
                chat_id: chat_id.as_str(),
                text,
            },
        )
        .await?;
        Ok(())
    }

    async fn send_media(
        &self,
        chat_id: &ChatId,
        media: &MessageMedia,
        caption: Option<&str>,
    ) -> Result<()> {
        self.post(
            "messages/media",
            &MediaMessage {
                chat_id: chat_id.as_str(),
                mimetype: media.mimetype.to_string(),
                data: STANDARD.encode(&media.data),
                filename: media.filename.as_deref(),
                caption,
            },
        )
        .await?;
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(poller) = self.poller.lock().await.take() {
            poller.abort();
        }
        self.post_unchecked("stop", &serde_json::json!({})).await?;
        Ok(())
    }
}

impl Drop for BridgeSession {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.get_mut().take() {
            poller.abort();
        }
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(PanelError::BridgeStatus {
        status: status.as_u16(),
        body,
    })
}

async fn fetch_state(client: &reqwest::Client, url: &str) -> Result<StateSnapshot> {
    let response = check_status(client.get(url).send().await?).await?;
    Ok(response.json().await?)
}

// free function so the poller does not keep the session alive
async fn poll_state(
    client: reqwest::Client,
    url: String,
    interval: Duration,
    events: EventSink,
) {
    let mut last: Option<StateSnapshot> = None;
    let mut failures = 0;
    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;
        let snapshot = match fetch_state(&client, &url).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                failures += 1;
                debug!("state poll failed ({failures}/{MAX_POLL_FAILURES}): {e}");
                if failures >= MAX_POLL_FAILURES {
                    warn!("gateway stopped answering state polls");
                    events.emit(SessionEvent::Disconnected("gateway unreachable".into()));
                    return;
                }
                continue;
            }
        };
        failures = 0;

        if let Some(event) = translate(last.as_ref(), &snapshot) {
            events.emit(event);
        }
        last = Some(snapshot);
    }
}

/// Turns a change in gateway state into a lifecycle event. Repeated
/// snapshots of the same phase produce nothing.
fn translate(last: Option<&StateSnapshot>, next: &StateSnapshot) -> Option<SessionEvent> {
    if last.is_some_and(|last| last.same_phase(next)) {
        return None;
    }

    match next.state {
        BridgeState::ScanQrCode => next.qr.clone().map(SessionEvent::Qr),
        BridgeState::Loading => Some(SessionEvent::Loading {
            percent: next.percent.unwrap_or(0),
            message: next.message.clone().unwrap_or_default(),
        }),
        BridgeState::Authenticated => Some(SessionEvent::Authenticated),
        BridgeState::Ready => Some(SessionEvent::Ready),
        BridgeState::AuthFailure => Some(SessionEvent::AuthFailure(
            next.message
                .clone()
                .unwrap_or_else(|| "authentication failed".into()),
        )),
        // a gateway that has not picked up the start call yet also says
        // DISCONNECTED, so only a transition into it counts as a drop
        BridgeState::Disconnected => last.map(|_| {
            SessionEvent::Disconnected(
                next.message
                    .clone()
                    .unwrap_or_else(|| "session closed".into()),
            )
        }),
        BridgeState::Starting | BridgeState::Unknown => None,
    }
}
