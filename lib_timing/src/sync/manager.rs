use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use http::Uri;
use serde_json::{json, Value};
use tokio::sync::{broadcast, Notify};
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};
use url::Url;

use crate::sync::decode;
use crate::sync::errors::TransportError;
use crate::sync::hub::BroadcastHub;
use crate::sync::negotiate::{NegotiatedSession, Negotiator};
use crate::sync::reduce;
use crate::sync::subscription;

/// Runtime settings for the upstream connection.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Base URL for the HTTP negotiation endpoint.
    pub negotiate_url: String,
    /// Base URL for the streaming endpoint.
    pub stream_url: String,
    /// Fixed pause between reconnect attempts.
    pub retry_delay: Duration,
    /// Silence on the socket longer than this is treated as a dead
    /// connection and torn down through the retry path.
    pub inactivity_timeout: Duration,
    /// Skip negotiation and use a canned session (test mode).
    pub testing: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            negotiate_url: "https://livetiming.formula1.com/signalr".to_string(),
            stream_url: "wss://livetiming.formula1.com/signalr".to_string(),
            retry_delay: Duration::from_secs(1),
            inactivity_timeout: Duration::from_secs(60),
            testing: false,
        }
    }
}

/// Where the manager currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Negotiating,
    Connecting,
    Subscribed,
    Retrying,
    Closing,
}

/// How one live session ended, decided inside the consume loop.
enum SessionEnd {
    /// Transport-level failure or silence; take the retry path.
    Transport,
    /// Explicit deactivation; settle in Idle.
    Deactivated,
    /// Process shutdown; leave the run loop entirely.
    Shutdown,
}

/// Owner of the single upstream session and of the live state.
///
/// The lifecycle is an explicit state machine,
/// `Idle -> Negotiating -> Connecting -> Subscribed -> Closing -> Idle`,
/// with every failure routed through `Retrying` back to `Negotiating`.
/// All mutation of the live state happens on the consume loop; the hub
/// only ever sees immutable references at publish time.
pub struct ConnectionManager {
    config: FeedConfig,
    negotiator: Negotiator,
    hub: Arc<BroadcastHub>,
    active: AtomicBool,
    phase: Mutex<SyncPhase>,
    wake: Notify,
}

impl ConnectionManager {
    pub fn new(config: FeedConfig, hub: Arc<BroadcastHub>) -> Self {
        let negotiator = Negotiator::new(config.negotiate_url.clone(), config.testing);
        Self {
            config,
            negotiator,
            hub,
            active: AtomicBool::new(false),
            phase: Mutex::new(SyncPhase::Idle),
            wake: Notify::new(),
        }
    }

    /// Marks the manager active and wakes the run loop.
    ///
    /// Only the first caller wins: while a session is already connecting
    /// or live, further activations are a no-op, which is what keeps the
    /// at-most-one-upstream-connection invariant.
    pub fn activate(&self) -> bool {
        if self.active.swap(true, Ordering::SeqCst) {
            return false;
        }
        log::info!("upstream manager activated");
        self.wake.notify_one();
        true
    }

    /// Clears the active flag and wakes the run loop so it can close the
    /// session (or abandon a retry pause) and settle in Idle.
    pub fn deactivate(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            log::info!("upstream manager deactivated");
        }
        self.wake.notify_one();
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> SyncPhase {
        *self.phase.lock().expect("phase lock poisoned")
    }

    fn set_phase(&self, next: SyncPhase) {
        let mut phase = self.phase.lock().expect("phase lock poisoned");
        if *phase != next {
            log::debug!("sync phase {:?} -> {:?}", *phase, next);
            *phase = next;
        }
    }

    /// The manager's whole life: wait for activation, negotiate, connect,
    /// subscribe, consume, and loop back through the retry pause on any
    /// failure. Returns only on process shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        loop {
            if !self.is_active() {
                self.set_phase(SyncPhase::Idle);
                tokio::select! {
                    _ = shutdown.recv() => return,
                    _ = self.wake.notified() => {}
                }
                continue;
            }

            self.set_phase(SyncPhase::Negotiating);
            let session = match self.negotiator.negotiate().await {
                Ok(session) => session,
                Err(err) => {
                    log::error!("negotiation failed: {}", err);
                    if !self.retry_pause(&mut shutdown).await {
                        return;
                    }
                    continue;
                }
            };

            self.set_phase(SyncPhase::Connecting);
            let request = match build_connect_request(&self.config.stream_url, &session) {
                Ok(request) => request,
                Err(err) => {
                    log::error!("failed to build connect request: {}", err);
                    if !self.retry_pause(&mut shutdown).await {
                        return;
                    }
                    continue;
                }
            };

            let ws_stream = match connect_async(request).await {
                Ok((ws_stream, _)) => ws_stream,
                Err(err) => {
                    log::error!("upstream connect failed: {}", err);
                    if !self.retry_pause(&mut shutdown).await {
                        return;
                    }
                    continue;
                }
            };
            log::info!("connected to upstream feed");

            let (mut write, mut read) = ws_stream.split();

            // Subscribe to the full topic set before anything else; the
            // recap that answers it re-seeds the state.
            let subscribe = subscription::subscribe_frame();
            if let Err(err) = write.send(WsMessage::Text(subscribe.into())).await {
                log::error!("failed to send subscribe request: {}", err);
                if !self.retry_pause(&mut shutdown).await {
                    return;
                }
                continue;
            }

            self.set_phase(SyncPhase::Subscribed);
            log::info!("subscribed to upstream feed");

            // A reconnect starts from scratch: the recap re-seeds the
            // state instead of merging over a stale one.
            let mut state = json!({});
            let mut last_activity = Instant::now();

            let end = loop {
                tokio::select! {
                    _ = shutdown.recv() => break SessionEnd::Shutdown,
                    _ = self.wake.notified() => {
                        if !self.is_active() {
                            break SessionEnd::Deactivated;
                        }
                    }
                    message = read.next() => {
                        match message {
                            Some(Ok(WsMessage::Text(text))) => {
                                last_activity = Instant::now();
                                self.ingest_frame(&mut state, text.as_str());
                            }
                            Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => {
                                // Heartbeats count as activity so quiet
                                // sessions are not torn down.
                                last_activity = Instant::now();
                            }
                            Some(Ok(WsMessage::Close(_))) | None => {
                                log::warn!("upstream closed the stream");
                                break SessionEnd::Transport;
                            }
                            Some(Err(err)) => {
                                log::error!("upstream read error: {}", err);
                                break SessionEnd::Transport;
                            }
                            Some(Ok(_)) => {}
                        }
                    }
                    _ = sleep(Duration::from_secs(1)) => {
                        if last_activity.elapsed() > self.config.inactivity_timeout {
                            log::warn!(
                                "no upstream traffic for {}s; reconnecting",
                                self.config.inactivity_timeout.as_secs()
                            );
                            break SessionEnd::Transport;
                        }
                    }
                }
            };

            match end {
                SessionEnd::Transport => {
                    if !self.retry_pause(&mut shutdown).await {
                        return;
                    }
                }
                SessionEnd::Deactivated => {
                    self.set_phase(SyncPhase::Closing);
                    let _ = write.close().await;
                    self.hub.clear();
                    log::info!("upstream session closed");
                }
                SessionEnd::Shutdown => {
                    self.set_phase(SyncPhase::Closing);
                    let _ = write.close().await;
                    self.hub.clear();
                    self.set_phase(SyncPhase::Idle);
                    log::info!("upstream manager shut down");
                    return;
                }
            }
        }
    }

    /// Decode, merge and publish one inbound frame. Frames are processed
    /// atomically: no awaits between decode, reduce and publish.
    fn ingest_frame(&self, state: &mut Value, frame: &str) {
        match decode::decode(frame) {
            Ok(Some(batch)) => {
                reduce::apply(state, batch);
                self.hub.publish(state);
            }
            Ok(None) => {}
            Err(err) => log::warn!("undecodable frame: {}", err),
        }
    }

    /// Fixed-delay retry pause, cancellable by deactivation or shutdown.
    /// Returns false only when the process is shutting down; after a
    /// deactivation the main loop settles in Idle by itself.
    async fn retry_pause(&self, shutdown: &mut broadcast::Receiver<()>) -> bool {
        self.set_phase(SyncPhase::Retrying);
        let deadline = sleep(self.config.retry_delay);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = shutdown.recv() => return false,
                _ = self.wake.notified() => {
                    if !self.is_active() {
                        return true;
                    }
                    // Spurious wake while still active: wait out the
                    // rest of the backoff.
                }
                _ = &mut deadline => return true,
            }
        }
    }
}

/// Builds the streaming connect request: token and hub spec on the query
/// string, session cookie and the upstream-required identification
/// headers on the request.
fn build_connect_request(
    stream_url: &str,
    session: &NegotiatedSession,
) -> Result<http::Request<()>, TransportError> {
    let mut url = Url::parse(&format!("{}/connect", stream_url))?;
    url.query_pairs_mut()
        .append_pair("clientProtocol", "1.5")
        .append_pair("transport", "webSockets")
        .append_pair("connectionToken", &session.token)
        .append_pair("connectionData", subscription::HUB_SPEC);

    let uri: Uri = url.as_str().parse().map_err(http::Error::from)?;
    let host = uri
        .authority()
        .map(|authority| authority.as_str().to_string())
        .ok_or(TransportError::MissingHost)?;

    let request = http::Request::builder()
        .method("GET")
        .uri(uri)
        .header("Host", host)
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Sec-WebSocket-Version", "13")
        .header("Sec-WebSocket-Key", generate_key())
        .header("User-Agent", "BestHTTP")
        .header("Accept-Encoding", "gzip,identity")
        .header("Cookie", session.cookie.as_str())
        .body(())?;

    Ok(request)
}
