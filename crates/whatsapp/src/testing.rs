//! In-memory [`SessionDriver`] for tests.

use std::{
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Duration,
};

use {async_trait::async_trait, tokio::sync::mpsc};

use crate::{
    driver::{EventStream, SessionDriver},
    error::{Error, Result},
    types::{OutboundPayload, SessionEvent},
};

/// A message the fake driver accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub chat_id: String,
    pub payload: OutboundPayload,
}

/// Scriptable driver: tests push events with [`FakeDriver::emit`] and
/// inspect what was sent.
#[derive(Default)]
pub struct FakeDriver {
    events: Mutex<Option<mpsc::Sender<SessionEvent>>>,
    sent: Mutex<Vec<SentMessage>>,
    connects: AtomicU32,
    fail_connect: AtomicBool,
    fail_sends: AtomicBool,
    terminated: AtomicBool,
    send_delay: Mutex<Option<Duration>>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push an event into the current connection. Returns `false` when no
    /// connection is open.
    pub async fn emit(&self, event: SessionEvent) -> bool {
        let tx = self
            .events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Close the current event stream, as if the client crashed.
    pub fn drop_connection(&self) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Delay every send by `delay` before acknowledging it.
    pub fn set_send_delay(&self, delay: Option<Duration>) {
        *self.send_delay.lock().unwrap_or_else(|e| e.into_inner()) = delay;
    }

    /// Poll until at least `n` connections were attempted.
    pub async fn wait_for_connects(&self, n: u32) {
        while self.connect_count() < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl SessionDriver for FakeDriver {
    async fn connect(&self) -> Result<EventStream> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::driver(
                "connect",
                std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "fake refused"),
            ));
        }
        let (tx, rx) = mpsc::channel(64);
        *self.events.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        Ok(rx)
    }

    async fn send_message(&self, chat_id: &str, payload: OutboundPayload) -> Result<()> {
        let delay = *self.send_delay.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::delivery("fake send rejected"));
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SentMessage {
                chat_id: chat_id.to_string(),
                payload,
            });
        Ok(())
    }

    async fn terminate(&self) -> Result<()> {
        self.terminated.store(true, Ordering::SeqCst);
        self.drop_connection();
        Ok(())
    }
}
