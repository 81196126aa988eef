//! WhatsApp Web session management and message dispatch.
//!
//! A [`SessionManager`] owns the one session of the process and talks to
//! WhatsApp Web through a [`SessionDriver`]; in production that is the
//! [`SidecarDriver`], a WebSocket link to a Node.js sidecar.

pub mod backoff;
pub mod destination;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod process;
pub mod qr;
pub mod session;
pub mod sidecar;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;

pub use {
    backoff::{BackoffPolicy, ExponentialBackoff, FixedBackoff},
    dispatch::DispatchService,
    driver::{EventStream, SessionDriver},
    error::{Error, Result},
    process::{SidecarProcess, SidecarProcessConfig, find_sidecar_dir, start_sidecar},
    session::{SessionManager, SessionOptions},
    sidecar::{DEFAULT_SIDECAR_URL, SidecarDriver},
    types::{ConnectionState, MediaFile, OutboundPayload, SessionEvent, SessionSnapshot},
};
