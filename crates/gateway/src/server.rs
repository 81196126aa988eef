use std::{net::SocketAddr, sync::Arc};

use {
    anyhow::Context,
    axum::{
        Router,
        extract::DefaultBodyLimit,
        routing::{delete, get, post},
    },
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{info, warn},
    wagate_attachments::{AttachmentStore, StoreOptions},
    wagate_config::{ThrottleConfig, WagateConfig},
    wagate_whatsapp::{
        SessionManager, SessionOptions, SidecarDriver, SidecarProcessConfig, backoff,
        start_sidecar,
    },
};

use crate::{
    request_throttle::{RequestThrottle, throttle_gate},
    routes,
    state::GatewayState,
};

/// Both mount points of the legacy service.
const MOUNT_POINTS: [&str; 2] = ["/wa", "/sec-server/wa"];

/// Headroom for multipart framing and several files in one request.
const FILES_PER_REQUEST: usize = 4;
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<GatewayState>,
    pub request_throttle: RequestThrottle,
}

// ── Router ───────────────────────────────────────────────────────────────────

fn wa_routes(body_limit: usize) -> Router<AppState> {
    Router::new()
        .route("/status", get(routes::status))
        .route("/qr", get(routes::qr))
        .route("/upload", post(routes::upload))
        .route("/files", get(routes::list_files))
        .route("/files/{id}", delete(routes::delete_file))
        .route("/send", post(routes::send_text))
        .route("/send-files", post(routes::send_files))
        .route("/send-file", post(routes::send_file))
        .layer(DefaultBodyLimit::max(body_limit))
}

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>, throttle: &ThrottleConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let body_limit = state
        .max_file_bytes
        .saturating_mul(FILES_PER_REQUEST)
        .saturating_add(MULTIPART_OVERHEAD);

    let app_state = AppState {
        gateway: state,
        request_throttle: RequestThrottle::from_config(throttle),
    };

    let mut router = Router::new().route("/health", get(routes::health));
    for mount in MOUNT_POINTS {
        router = router.nest(mount, wa_routes(body_limit));
    }
    if throttle.enabled {
        router = router.layer(axum::middleware::from_fn_with_state(
            app_state.clone(),
            throttle_gate,
        ));
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Open the attachment store, start the WhatsApp session and serve HTTP until
/// Ctrl-C / SIGTERM.
pub async fn start_gateway(config: WagateConfig) -> anyhow::Result<()> {
    let attachments = AttachmentStore::open(&config.attachments.dir, StoreOptions {
        max_file_bytes: config.attachments.max_file_bytes,
        persist_index: config.attachments.persist_index,
    })
    .await
    .with_context(|| {
        format!(
            "failed to open attachment store at {}",
            config.attachments.dir.display()
        )
    })?;

    let mut sidecar = if config.whatsapp.auto_start_sidecar {
        let process_config = SidecarProcessConfig::from_config(&config.whatsapp)?;
        Some(start_sidecar(&process_config).await?)
    } else {
        None
    };

    let session = Arc::new(SessionManager::new(
        Arc::new(SidecarDriver::from_config(&config.whatsapp)),
        backoff::from_config(&config.whatsapp.reconnect),
        SessionOptions::from_config(&config.whatsapp),
    ));
    session.start();

    let state = GatewayState::new(Arc::clone(&session), Arc::new(attachments), &config);
    let app = build_gateway_app(state, &config.throttle);

    let listener = tokio::net::TcpListener::bind((config.server.bind.as_str(), config.server.port))
        .await
        .with_context(|| {
            format!(
                "failed to bind {}:{}",
                config.server.bind, config.server.port
            )
        })?;
    let addr = listener.local_addr()?;
    info!(%addr, client_id = %config.whatsapp.client_id, "wagate gateway listening");

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    session.shutdown().await;
    if let Some(process) = sidecar.as_mut()
        && process.is_running()
    {
        process.stop().await;
    }
    served.context("gateway server failed")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}
