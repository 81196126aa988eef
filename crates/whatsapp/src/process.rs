//! Supervision of the Node.js WhatsApp Web sidecar process.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use {
    anyhow::{Context, Result, bail},
    tokio::{
        io::{AsyncBufReadExt, AsyncRead, BufReader},
        process::{Child, Command},
    },
    tokio_tungstenite::tungstenite::http::Uri,
    tracing::{info, warn},
    wagate_config::WhatsAppConfig,
};

/// Directory name of the sidecar package relative to the install or checkout.
const SIDECAR_REL_DIR: &str = "sidecar/whatsapp-web";
const SIDECAR_DIR_ENV: &str = "WAGATE_SIDECAR_DIR";
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings handed to the sidecar through its environment.
#[derive(Debug, Clone)]
pub struct SidecarProcessConfig {
    pub sidecar_dir: PathBuf,
    pub port: u16,
    pub client_id: String,
    pub auth_dir: PathBuf,
}

impl SidecarProcessConfig {
    /// Derive process settings from `[whatsapp]`, locating the sidecar
    /// directory if it is not configured.
    pub fn from_config(config: &WhatsAppConfig) -> Result<Self> {
        let port = port_from_url(&config.sidecar_url)
            .with_context(|| format!("sidecar_url has no usable port: {}", config.sidecar_url))?;
        Ok(Self {
            sidecar_dir: find_sidecar_dir(config.sidecar_dir.as_deref())?,
            port,
            client_id: config.client_id.clone(),
            auth_dir: config.data_path.clone(),
        })
    }
}

/// A running sidecar. Killed when dropped.
pub struct SidecarProcess {
    child: Child,
}

impl SidecarProcess {
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// SIGTERM, then SIGKILL if the process has not exited in time.
    pub async fn stop(&mut self) {
        info!("stopping WhatsApp sidecar process");

        #[cfg(unix)]
        {
            use nix::{
                sys::signal::{Signal, kill},
                unistd::Pid,
            };

            if let Some(pid) = self.child.id().and_then(|pid| i32::try_from(pid).ok()) {
                let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);
            }
        }

        #[cfg(not(unix))]
        {
            let _ = self.child.start_kill();
        }

        match tokio::time::timeout(STOP_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => info!(?status, "WhatsApp sidecar process exited"),
            Ok(Err(e)) => warn!(error = %e, "error waiting for sidecar process"),
            Err(_) => {
                warn!("sidecar process did not exit gracefully, killing");
                let _ = self.child.kill().await;
            },
        }
    }
}

/// Port component of a `ws://host:port` URL.
pub fn port_from_url(url: &str) -> Option<u16> {
    url.parse::<Uri>().ok()?.port_u16()
}

/// Locate the sidecar package.
///
/// Order: explicit path, `WAGATE_SIDECAR_DIR`, next to the executable, then
/// relative to the working directory.
pub fn find_sidecar_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if is_sidecar_dir(path) {
            return Ok(path.to_path_buf());
        }
        bail!("no package.json in sidecar directory {}", path.display());
    }

    if let Ok(dir) = std::env::var(SIDECAR_DIR_ENV) {
        let path = PathBuf::from(&dir);
        if is_sidecar_dir(&path) {
            return Ok(path);
        }
        warn!(path = %dir, "{SIDECAR_DIR_ENV} set but package.json not found");
    }

    let mut candidates = Vec::new();
    if let Ok(exe) = std::env::current_exe()
        && let Some(exe_dir) = exe.parent()
    {
        candidates.push(exe_dir.join("..").join(SIDECAR_REL_DIR));
        candidates.push(exe_dir.join("../..").join(SIDECAR_REL_DIR));
    }
    candidates.extend(
        ["", "..", "../.."]
            .iter()
            .map(|prefix| Path::new(prefix).join(SIDECAR_REL_DIR)),
    );

    candidates
        .into_iter()
        .find(|path| is_sidecar_dir(path))
        .map(|path| path.canonicalize().unwrap_or(path))
        .with_context(|| {
            format!("WhatsApp sidecar not found; set {SIDECAR_DIR_ENV} or whatsapp.sidecar_dir")
        })
}

fn is_sidecar_dir(path: &Path) -> bool {
    path.join("package.json").is_file()
}

/// Build the sidecar if needed and start it.
pub async fn start_sidecar(config: &SidecarProcessConfig) -> Result<SidecarProcess> {
    let dir = &config.sidecar_dir;
    if !dir.join("dist/index.js").exists() {
        info!(path = %dir.display(), "building WhatsApp sidecar");
        if !dir.join("node_modules").exists() {
            run_npm(dir, &["install"]).await?;
        }
        run_npm(dir, &["run", "build"]).await?;
    }

    info!(path = %dir.display(), port = config.port, "starting WhatsApp sidecar process");
    let mut child = Command::new("node")
        .arg("dist/index.js")
        .current_dir(dir)
        .env("WA_SIDECAR_PORT", config.port.to_string())
        .env("WA_CLIENT_ID", &config.client_id)
        .env("WA_DATA_PATH", &config.auth_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .context("failed to spawn sidecar process")?;

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_output(stdout, false));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_output(stderr, true));
    }

    // Give it a moment to fail fast on a broken install.
    tokio::time::sleep(Duration::from_millis(500)).await;
    if let Some(status) = child
        .try_wait()
        .context("failed to check sidecar process status")?
    {
        bail!("sidecar process exited immediately with status: {status}");
    }

    info!(port = config.port, "WhatsApp sidecar process started");
    Ok(SidecarProcess { child })
}

/// Forward sidecar output into tracing line by line. Stderr lines are
/// warnings; blank lines are dropped. Returns the number of lines forwarded.
async fn forward_output(stream: impl AsyncRead + Unpin, is_stderr: bool) -> usize {
    let mut lines = BufReader::new(stream).lines();
    let mut forwarded = 0;
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        if is_stderr {
            warn!(target: "whatsapp_sidecar", "{line}");
        } else {
            info!(target: "whatsapp_sidecar", "{line}");
        }
        forwarded += 1;
    }
    forwarded
}

async fn run_npm(dir: &Path, args: &[&str]) -> Result<()> {
    let command = format!("npm {}", args.join(" "));
    info!(path = %dir.display(), command, "running npm for sidecar");
    let output = Command::new("npm")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .with_context(|| format!("failed to run {command}"))?;
    if !output.status.success() {
        bail!(
            "{command} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(())
}
