//! Session lifecycle: applies driver events to the shared state, reconnects
//! after disconnects and gates sends on readiness.

use std::{
    sync::{Arc, Mutex, RwLock},
    time::Duration,
};

use {
    tokio::{sync::Semaphore, task::JoinHandle},
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
    wagate_config::WhatsAppConfig,
};

use crate::{
    backoff::BackoffPolicy,
    destination,
    driver::{EventStream, SessionDriver},
    error::{Error, Result},
    qr,
    types::{ConnectionState, MediaFile, OutboundPayload, SessionEvent, SessionSnapshot},
};

const DEFAULT_AUTH_FAILURE: &str = "authentication failed";

/// Send and rendering knobs for a [`SessionManager`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub send_timeout: Duration,
    pub max_concurrent_sends: usize,
    pub qr_size: u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(30),
            max_concurrent_sends: 4,
            qr_size: 256,
        }
    }
}

impl SessionOptions {
    pub fn from_config(config: &WhatsAppConfig) -> Self {
        Self {
            send_timeout: Duration::from_secs(config.send_timeout_secs.max(1)),
            max_concurrent_sends: config.max_concurrent_sends.max(1),
            qr_size: config.qr_size,
        }
    }
}

#[derive(Debug)]
struct SessionInner {
    state: ConnectionState,
    challenge: Option<String>,
    last_error: Option<String>,
    reconnect_attempts: u32,
    loading_percent: Option<u8>,
    wa_state: Option<String>,
}

impl SessionInner {
    fn new() -> Self {
        Self {
            state: ConnectionState::Initializing,
            challenge: None,
            last_error: None,
            reconnect_attempts: 0,
            loading_percent: None,
            wa_state: None,
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            ready: self.state == ConnectionState::Ready,
            has_challenge: self.challenge.is_some(),
            last_error: self.last_error.clone(),
            reconnect_attempts: self.reconnect_attempts,
            loading_percent: self.loading_percent,
            wa_state: self.wa_state.clone(),
        }
    }

    /// Move to `state`; the challenge only survives in `awaiting_challenge`.
    fn enter(&mut self, state: ConnectionState) {
        self.state = state;
        if state != ConnectionState::AwaitingChallenge {
            self.challenge = None;
        }
    }

    /// Apply one driver event. Returns `true` when the event ends the current
    /// connection.
    fn apply(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::Challenge(qr) => {
                self.enter(ConnectionState::AwaitingChallenge);
                self.challenge = Some(qr);
            },
            SessionEvent::Authenticated => self.enter(ConnectionState::Authenticated),
            SessionEvent::Ready => {
                self.enter(ConnectionState::Ready);
                self.reconnect_attempts = 0;
                self.loading_percent = None;
            },
            SessionEvent::AuthFailure(message) => {
                self.enter(ConnectionState::Failed);
                self.last_error = Some(
                    message
                        .filter(|m| !m.trim().is_empty())
                        .unwrap_or_else(|| DEFAULT_AUTH_FAILURE.to_string()),
                );
            },
            SessionEvent::Disconnected(reason) => {
                self.enter(ConnectionState::Disconnected);
                if !reason.trim().is_empty() {
                    self.last_error = Some(reason);
                }
                return true;
            },
            SessionEvent::Error(message) => self.last_error = Some(message),
            SessionEvent::Loading { percent } => self.loading_percent = Some(percent.min(100)),
            SessionEvent::StateChanged(state) => self.wa_state = Some(state),
        }
        false
    }
}

/// Owns the single WhatsApp session of this process.
pub struct SessionManager {
    driver: Arc<dyn SessionDriver>,
    backoff: Arc<dyn BackoffPolicy>,
    options: SessionOptions,
    inner: RwLock<SessionInner>,
    send_permits: Semaphore,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(
        driver: Arc<dyn SessionDriver>,
        backoff: Arc<dyn BackoffPolicy>,
        options: SessionOptions,
    ) -> Self {
        let permits = options.max_concurrent_sends.max(1);
        Self {
            driver,
            backoff,
            options,
            inner: RwLock::new(SessionInner::new()),
            send_permits: Semaphore::new(permits),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Spawn the connection loop. Calling it again while running is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.is_some() {
            return;
        }
        let manager = Arc::clone(self);
        *task = Some(tokio::spawn(async move { manager.run().await }));
    }

    pub fn current_status(&self) -> SessionSnapshot {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .snapshot()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).state
    }

    /// PNG of the pending QR challenge, rendered on every call.
    pub fn current_challenge_image(&self) -> Result<Vec<u8>> {
        let challenge = {
            let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
            match (&inner.state, &inner.challenge) {
                (ConnectionState::AwaitingChallenge, Some(qr)) => qr.clone(),
                _ => return Err(Error::NotAvailable),
            }
        };
        qr::render_png(&challenge, self.options.qr_size)
    }

    /// Fail with [`Error::NotReady`] unless the session is ready.
    pub fn ensure_ready(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Ready => Ok(()),
            state => Err(Error::not_ready(state)),
        }
    }

    pub async fn send_text(&self, destination: &str, body: &str) -> Result<()> {
        self.ensure_ready()?;
        let chat_id = destination::chat_id(destination)?;
        self.deliver(&chat_id, OutboundPayload::Text(body.to_string()))
            .await
    }

    /// Send `file` as a document, with `caption` attached.
    pub async fn send_media(&self, destination: &str, file: MediaFile, caption: &str) -> Result<()> {
        self.ensure_ready()?;
        let chat_id = destination::chat_id(destination)?;
        self.deliver(&chat_id, OutboundPayload::Media {
            file,
            caption: caption.to_string(),
        })
        .await
    }

    /// Stop reconnecting, drain the loop and terminate the driver.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.send_permits.close();

        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(error = %e, "session loop ended abnormally");
        }

        if let Err(e) = self.driver.terminate().await {
            warn!(error = %e, "failed to terminate WhatsApp driver");
        }
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .enter(ConnectionState::Disconnected);
        info!("WhatsApp session shut down");
    }

    async fn deliver(&self, chat_id: &str, payload: OutboundPayload) -> Result<()> {
        let _permit = self
            .send_permits
            .acquire()
            .await
            .map_err(|_| Error::delivery("session is shutting down"))?;

        let send = self.driver.send_message(chat_id, payload);
        match tokio::time::timeout(self.options.send_timeout, send).await {
            Ok(Ok(())) => {
                debug!(chat_id, "message delivered");
                Ok(())
            },
            Ok(Err(e)) => {
                warn!(chat_id, error = %e, "message delivery failed");
                match e {
                    Error::Delivery { .. } => Err(e),
                    other => Err(Error::delivery(other)),
                }
            },
            Err(_) => {
                warn!(chat_id, timeout_secs = self.options.send_timeout.as_secs(), "send timed out");
                Err(Error::delivery(format!(
                    "send timed out after {}s",
                    self.options.send_timeout.as_secs()
                )))
            },
        }
    }

    /// Log and apply one event under the write lock.
    fn apply(&self, event: SessionEvent) -> bool {
        match &event {
            SessionEvent::Challenge(_) => info!("QR challenge received, waiting for scan"),
            SessionEvent::Authenticated => info!("WhatsApp session authenticated"),
            SessionEvent::Ready => info!("WhatsApp client is ready"),
            SessionEvent::AuthFailure(message) => warn!(?message, "WhatsApp authentication failed"),
            SessionEvent::Disconnected(reason) => warn!(reason, "WhatsApp session disconnected"),
            SessionEvent::Error(message) => warn!(message, "WhatsApp client error"),
            SessionEvent::Loading { percent } => debug!(percent, "WhatsApp loading"),
            SessionEvent::StateChanged(state) => info!(state, "WhatsApp client state changed"),
        }
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .apply(event)
    }

    async fn run(self: Arc<Self>) {
        loop {
            self.inner
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .enter(ConnectionState::Initializing);
            info!("connecting WhatsApp session");

            let connected = tokio::select! {
                _ = self.cancel.cancelled() => return,
                connected = self.driver.connect() => connected,
            };
            match connected {
                Ok(events) => {
                    if !self.pump(events).await {
                        return;
                    }
                },
                Err(e) => {
                    self.apply(SessionEvent::Disconnected(format!("connect failed: {e}")));
                },
            }

            if !self.wait_before_reconnect().await {
                return;
            }
        }
    }

    /// Feed events until the connection ends. Returns `false` on shutdown.
    async fn pump(&self, mut events: EventStream) -> bool {
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => return false,
                event = events.recv() => event,
            };
            let event =
                event.unwrap_or_else(|| SessionEvent::Disconnected("event stream closed".into()));
            if self.apply(event) {
                return true;
            }
        }
    }

    /// Count the attempt and sleep for the backoff delay. Returns `false` when
    /// the retry ceiling is hit or the manager shuts down.
    async fn wait_before_reconnect(&self) -> bool {
        let attempt = {
            let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
            inner.reconnect_attempts = inner.reconnect_attempts.saturating_add(1);
            inner.reconnect_attempts
        };

        if let Some(max) = self.backoff.max_attempts()
            && attempt > max
        {
            let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
            let last = inner.last_error.as_deref().unwrap_or("unknown error");
            let message = format!("giving up after {max} reconnect attempts: {last}");
            error!(attempts = max, "{message}");
            inner.enter(ConnectionState::Failed);
            inner.last_error = Some(message);
            return false;
        }

        let delay = self.backoff.next_delay(attempt);
        info!(
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "reconnecting WhatsApp session after delay"
        );
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    use crate::{backoff::FixedBackoff, testing::FakeDriver};

    fn manager_with(
        driver: Arc<FakeDriver>,
        max_attempts: Option<u32>,
        options: SessionOptions,
    ) -> Arc<SessionManager> {
        Arc::new(SessionManager::new(
            driver,
            Arc::new(FixedBackoff {
                delay: Duration::from_secs(5),
                max_attempts,
            }),
            options,
        ))
    }

    fn idle_manager() -> (Arc<SessionManager>, Arc<FakeDriver>) {
        let driver = Arc::new(FakeDriver::new());
        let manager = manager_with(Arc::clone(&driver), None, SessionOptions::default());
        (manager, driver)
    }

    async fn wait_for_state(manager: &SessionManager, state: ConnectionState) {
        tokio::time::timeout(Duration::from_secs(60), async {
            while manager.state() != state {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("state not reached");
    }

    async fn started_ready() -> (Arc<SessionManager>, Arc<FakeDriver>) {
        let (manager, driver) = idle_manager();
        manager.start();
        driver.wait_for_connects(1).await;
        assert!(driver.emit(SessionEvent::Ready).await);
        wait_for_state(&manager, ConnectionState::Ready).await;
        (manager, driver)
    }

    fn media(name: &str) -> MediaFile {
        MediaFile {
            bytes: b"col\n1\n".to_vec(),
            mime_type: "text/csv".into(),
            filename: name.into(),
        }
    }

    #[test]
    fn challenge_then_ready_clears_challenge() {
        let mut inner = SessionInner::new();
        inner.apply(SessionEvent::Challenge("1@2,ABC".into()));
        let snap = inner.snapshot();
        assert_eq!(snap.state, ConnectionState::AwaitingChallenge);
        assert!(snap.has_challenge);
        assert!(!snap.ready);

        inner.apply(SessionEvent::Authenticated);
        assert!(!inner.snapshot().has_challenge);

        inner.reconnect_attempts = 3;
        inner.apply(SessionEvent::Ready);
        let snap = inner.snapshot();
        assert!(snap.ready);
        assert!(!snap.has_challenge);
        assert_eq!(snap.reconnect_attempts, 0);
    }

    #[test]
    fn auth_failure_uses_default_message() {
        let mut inner = SessionInner::new();
        inner.apply(SessionEvent::Challenge("qr".into()));
        inner.apply(SessionEvent::AuthFailure(None));
        let snap = inner.snapshot();
        assert_eq!(snap.state, ConnectionState::Failed);
        assert_eq!(snap.last_error.as_deref(), Some(DEFAULT_AUTH_FAILURE));
        assert!(!snap.has_challenge);

        inner.apply(SessionEvent::AuthFailure(Some("bad session".into())));
        assert_eq!(inner.snapshot().last_error.as_deref(), Some("bad session"));
    }

    #[test]
    fn disconnect_ends_connection_and_keeps_previous_error_on_empty_reason() {
        let mut inner = SessionInner::new();
        inner.apply(SessionEvent::Ready);
        inner.apply(SessionEvent::Error("socket hiccup".into()));
        assert_eq!(inner.snapshot().state, ConnectionState::Ready);

        assert!(inner.apply(SessionEvent::Disconnected(String::new())));
        let snap = inner.snapshot();
        assert_eq!(snap.state, ConnectionState::Disconnected);
        assert!(!snap.ready);
        assert_eq!(snap.last_error.as_deref(), Some("socket hiccup"));

        assert!(inner.apply(SessionEvent::Disconnected("NAVIGATION".into())));
        assert_eq!(inner.snapshot().last_error.as_deref(), Some("NAVIGATION"));
    }

    #[test]
    fn loading_is_recorded_without_transition() {
        let mut inner = SessionInner::new();
        assert!(!inner.apply(SessionEvent::Loading { percent: 150 }));
        let snap = inner.snapshot();
        assert_eq!(snap.state, ConnectionState::Initializing);
        assert_eq!(snap.loading_percent, Some(100));
    }

    #[test]
    fn client_state_change_is_recorded_without_transition() {
        let mut inner = SessionInner::new();
        inner.apply(SessionEvent::Ready);
        assert!(!inner.apply(SessionEvent::StateChanged("CONFLICT".into())));
        let snap = inner.snapshot();
        assert_eq!(snap.state, ConnectionState::Ready);
        assert!(snap.ready);
        assert_eq!(snap.wa_state.as_deref(), Some("CONFLICT"));

        inner.apply(SessionEvent::StateChanged("CONNECTED".into()));
        assert_eq!(inner.snapshot().wa_state.as_deref(), Some("CONNECTED"));
    }

    #[test]
    fn status_is_idempotent() {
        let (manager, _driver) = idle_manager();
        manager.apply(SessionEvent::Challenge("qr".into()));
        assert_eq!(manager.current_status(), manager.current_status());
    }

    #[rstest]
    #[case(ConnectionState::Initializing)]
    #[case(ConnectionState::AwaitingChallenge)]
    #[case(ConnectionState::Authenticated)]
    #[case(ConnectionState::Failed)]
    #[case(ConnectionState::Disconnected)]
    #[tokio::test]
    async fn sends_require_ready(#[case] state: ConnectionState) {
        let (manager, driver) = idle_manager();
        manager.inner.write().unwrap().enter(state);

        let err = manager.send_text("15551234567", "hi").await.unwrap_err();
        assert!(matches!(err, Error::NotReady { state: s } if s == state));
        let err = manager
            .send_media("15551234567", media("a.csv"), "")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotReady { .. }));
        assert!(driver.sent().is_empty());
    }

    #[test]
    fn challenge_image_only_while_awaiting() {
        let (manager, _driver) = idle_manager();
        assert!(matches!(
            manager.current_challenge_image(),
            Err(Error::NotAvailable)
        ));

        manager.apply(SessionEvent::Challenge("1@2,ABC".into()));
        let png = manager.current_challenge_image().unwrap();
        assert!(!png.is_empty());

        manager.apply(SessionEvent::Ready);
        assert!(matches!(
            manager.current_challenge_image(),
            Err(Error::NotAvailable)
        ));
    }

    #[tokio::test]
    async fn send_text_normalizes_destination() {
        let (manager, driver) = started_ready().await;
        manager.send_text("+1 (555) 123-4567", "hello").await.unwrap();

        let sent = driver.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].chat_id, "15551234567@c.us");
        assert_eq!(sent[0].payload, OutboundPayload::Text("hello".into()));

        let err = manager.send_text("call me", "hello").await.unwrap_err();
        assert!(matches!(err, Error::DestinationInvalid { .. }));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn driver_rejection_is_delivery_error() {
        let (manager, driver) = started_ready().await;
        driver.set_fail_sends(true);
        let err = manager
            .send_media("15551234567", media("a.csv"), "cap")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Delivery { .. }));
        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn slow_send_times_out() {
        let driver = Arc::new(FakeDriver::new());
        let manager = manager_with(Arc::clone(&driver), None, SessionOptions {
            send_timeout: Duration::from_secs(1),
            ..SessionOptions::default()
        });
        manager.start();
        driver.wait_for_connects(1).await;
        driver.emit(SessionEvent::Ready).await;
        wait_for_state(&manager, ConnectionState::Ready).await;

        driver.set_send_delay(Some(Duration::from_secs(60)));
        let err = manager.send_text("15551234567", "hi").await.unwrap_err();
        assert!(matches!(err, Error::Delivery { message } if message.contains("timed out")));
        assert!(driver.sent().is_empty());
        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_disconnect() {
        let (manager, driver) = started_ready().await;

        driver
            .emit(SessionEvent::Disconnected("NAVIGATION".into()))
            .await;
        wait_for_state(&manager, ConnectionState::Disconnected).await;
        let snap = manager.current_status();
        assert!(!snap.ready);
        assert_eq!(snap.last_error.as_deref(), Some("NAVIGATION"));

        driver.wait_for_connects(2).await;
        wait_for_state(&manager, ConnectionState::Initializing).await;
        assert_eq!(manager.current_status().reconnect_attempts, 1);

        driver.emit(SessionEvent::Ready).await;
        wait_for_state(&manager, ConnectionState::Ready).await;
        assert_eq!(manager.current_status().reconnect_attempts, 0);
        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn closed_event_stream_counts_as_disconnect() {
        let (manager, driver) = started_ready().await;
        driver.drop_connection();
        driver.wait_for_connects(2).await;
        assert_eq!(
            manager.current_status().last_error.as_deref(),
            Some("event stream closed")
        );
        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn retry_ceiling_escalates_to_failed() {
        let driver = Arc::new(FakeDriver::new());
        driver.set_fail_connect(true);
        let manager = manager_with(Arc::clone(&driver), Some(2), SessionOptions::default());
        manager.start();

        wait_for_state(&manager, ConnectionState::Failed).await;
        // Initial connect plus two retries.
        assert_eq!(driver.connect_count(), 3);
        let snap = manager.current_status();
        assert!(!snap.ready);
        assert!(
            snap.last_error
                .as_deref()
                .unwrap()
                .starts_with("giving up after 2 reconnect attempts")
        );

        // The loop has stopped: no further connects.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(driver.connect_count(), 3);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_terminates_driver_and_rejects_sends() {
        let (manager, driver) = started_ready().await;
        manager.shutdown().await;
        assert!(driver.is_terminated());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(matches!(
            manager.send_text("15551234567", "hi").await,
            Err(Error::NotReady { .. })
        ));
    }
}
