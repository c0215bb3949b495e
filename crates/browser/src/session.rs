//! Browser lifecycle for a single probe session.
//!
//! Launches a dedicated Chrome process with an isolated profile, connects the
//! CDP client to the page target, and collects console errors and (optionally)
//! screencast frames for the lifetime of the run.

use crate::cdp::CdpClient;
use base64::Engine;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use webprobe_core::{Error, Result};

/// Launch parameters for a probe browser.
pub struct LaunchOptions {
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Profile directory; created if absent, isolated per session.
    pub user_data_dir: PathBuf,
    /// When set, screencast frames are written here as numbered PNGs.
    pub video_dir: Option<PathBuf>,
}

/// A running Chrome instance with its CDP connection.
pub struct Browser {
    chrome_process: Child,
    pub cdp: CdpClient,
    console_errors: Arc<Mutex<Vec<String>>>,
    video_task: Option<tokio::task::JoinHandle<()>>,
}

impl Browser {
    /// Launch Chrome, wait for the debugging endpoint, and connect to the
    /// first page target.
    pub async fn launch(opts: &LaunchOptions) -> Result<Browser> {
        let browser_path = find_browser_binary()
            .ok_or_else(|| Error::Browser("no Chrome or Chromium binary found".to_string()))?;

        std::fs::create_dir_all(&opts.user_data_dir)?;

        let debug_port = find_free_port().await?;
        let args = build_browser_args(debug_port, opts);

        info!(
            port = debug_port,
            headless = opts.headless,
            browser = %browser_path,
            "Launching browser"
        );

        let child = Command::new(&browser_path)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Browser(format!("failed to launch {browser_path}: {e}")))?;

        wait_for_cdp_ready(debug_port, 15).await?;
        let page_ws_url = get_page_ws_url(debug_port).await?;
        let cdp = CdpClient::connect(&page_ws_url).await?;

        cdp.enable_domain("Page").await?;
        cdp.enable_domain("Runtime").await?;
        cdp.enable_domain("DOM").await?;
        cdp.enable_domain("Network").await?;
        cdp.enable_domain("Log").await?;

        cdp.set_viewport(opts.viewport_width, opts.viewport_height)
            .await?;

        let console_errors = Arc::new(Mutex::new(Vec::new()));
        spawn_console_collector(&cdp, console_errors.clone()).await;
        spawn_dialog_handler(&cdp).await;

        let video_task = match &opts.video_dir {
            Some(dir) => Some(
                spawn_screencast_writer(&cdp, dir.clone(), opts.viewport_width, opts.viewport_height)
                    .await?,
            ),
            None => None,
        };

        info!(ws_url = %page_ws_url, "CDP connection established (page target)");

        Ok(Browser {
            chrome_process: child,
            cdp,
            console_errors,
            video_task,
        })
    }

    /// Take and clear the console errors accumulated since the last call.
    pub async fn drain_console_errors(&self) -> Vec<String> {
        let mut buf = self.console_errors.lock().await;
        std::mem::take(&mut *buf)
    }

    /// Close the browser. Graceful CDP close first, then kill.
    pub async fn close(&mut self) {
        if let Some(task) = self.video_task.take() {
            let _ = self.cdp.stop_screencast().await;
            task.abort();
        }
        if let Err(e) = self.cdp.send_command("Browser.close", serde_json::json!({})).await {
            debug!("CDP Browser.close failed (may already be closed): {}", e);
        }
        let _ = self.chrome_process.kill().await;
    }
}

impl Drop for Browser {
    fn drop(&mut self) {
        // Best-effort kill on drop.
        let _ = self.chrome_process.start_kill();
    }
}

/// Collect page console errors and uncaught exceptions into a shared buffer.
async fn spawn_console_collector(cdp: &CdpClient, buffer: Arc<Mutex<Vec<String>>>) {
    let mut log_rx = cdp.subscribe_event("Log.entryAdded").await;
    let mut exc_rx = cdp.subscribe_event("Runtime.exceptionThrown").await;

    let log_buf = buffer.clone();
    tokio::spawn(async move {
        while let Some(params) = log_rx.recv().await {
            let entry = &params["entry"];
            if entry["level"].as_str() == Some("error") {
                if let Some(text) = entry["text"].as_str() {
                    log_buf.lock().await.push(text.to_string());
                }
            }
        }
    });

    tokio::spawn(async move {
        while let Some(params) = exc_rx.recv().await {
            let detail = &params["exceptionDetails"];
            let text = detail["exception"]["description"]
                .as_str()
                .or_else(|| detail["text"].as_str())
                .unwrap_or("uncaught exception");
            buffer.lock().await.push(text.to_string());
        }
    });
}

/// Auto-accept native JS dialogs so they never wedge the CDP connection.
/// In-page dialogs (modals, drawers) stay visible and are surfaced by the
/// perception pass instead.
async fn spawn_dialog_handler(cdp: &CdpClient) {
    let mut dialog_rx = cdp.subscribe_event("Page.javascriptDialogOpening").await;
    let cmd_tx = cdp.background_sender();
    tokio::spawn(async move {
        while let Some(params) = dialog_rx.recv().await {
            let message = params["message"].as_str().unwrap_or_default().to_string();
            warn!(message = %message, "Auto-accepting native JS dialog");
            let _ = cmd_tx
                .send((
                    "Page.handleJavaScriptDialog".to_string(),
                    serde_json::json!({"accept": true}),
                ))
                .await;
        }
    });
}

/// Consume screencast frames, ack each one, and write them as numbered PNGs.
async fn spawn_screencast_writer(
    cdp: &CdpClient,
    dir: PathBuf,
    max_width: u32,
    max_height: u32,
) -> Result<tokio::task::JoinHandle<()>> {
    std::fs::create_dir_all(&dir)?;
    let mut frame_rx = cdp.subscribe_event("Page.screencastFrame").await;
    let ack_tx = cdp.background_sender();
    cdp.start_screencast(max_width, max_height).await?;

    Ok(tokio::spawn(async move {
        let mut seq: u64 = 0;
        while let Some(params) = frame_rx.recv().await {
            if let Some(session_id) = params["sessionId"].as_i64() {
                let _ = ack_tx
                    .send((
                        "Page.screencastFrameAck".to_string(),
                        serde_json::json!({"sessionId": session_id}),
                    ))
                    .await;
            }
            if let Some(data) = params["data"].as_str() {
                if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(data) {
                    let path = dir.join(format!("frame-{seq:06}.png"));
                    if let Err(e) = tokio::fs::write(&path, bytes).await {
                        warn!("failed to write screencast frame: {}", e);
                        break;
                    }
                    seq += 1;
                }
            }
        }
    }))
}

/// Chrome flags for an isolated automation profile.
fn build_browser_args(debug_port: u16, opts: &LaunchOptions) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", debug_port),
        format!("--user-data-dir={}", opts.user_data_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-extensions".to_string(),
        "--disable-sync".to_string(),
        "--disable-translate".to_string(),
        "--metrics-recording-only".to_string(),
        "--password-store=basic".to_string(),
    ];
    if opts.headless {
        args.push("--headless=new".to_string());
    }
    args.push(format!(
        "--window-size={},{}",
        opts.viewport_width, opts.viewport_height
    ));
    args.push("about:blank".to_string());
    args
}

/// Find a Chrome/Chromium binary on the system.
pub fn find_browser_binary() -> Option<String> {
    let candidates = if cfg!(target_os = "macos") {
        vec![
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
        ]
    } else if cfg!(target_os = "linux") {
        vec![
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
        ]
    } else {
        vec![
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    };

    for candidate in candidates {
        if Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
        if !candidate.contains('/') && !candidate.contains('\\') && which::which(candidate).is_ok()
        {
            return Some(candidate.to_string());
        }
    }
    None
}

/// Find a free TCP port.
async fn find_free_port() -> Result<u16> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| Error::Browser(format!("failed to bind to find free port: {e}")))?;
    let port = listener
        .local_addr()
        .map_err(|e| Error::Browser(format!("failed to get local addr: {e}")))?
        .port();
    drop(listener);
    Ok(port)
}

/// Poll /json/version until CDP responds, up to `timeout_secs`.
async fn wait_for_cdp_ready(port: u16, timeout_secs: u64) -> Result<String> {
    let start = std::time::Instant::now();
    let timeout = std::time::Duration::from_secs(timeout_secs);
    let url = format!("http://127.0.0.1:{port}/json/version");

    loop {
        if start.elapsed() > timeout {
            return Err(Error::Timeout(format!(
                "Chrome CDP not ready after {timeout_secs}s on port {port}"
            )));
        }

        if let Ok(resp) = reqwest::get(&url).await {
            if let Ok(body) = resp.json::<Value>().await {
                if let Some(ws_url) = body.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                    return Ok(ws_url.to_string());
                }
            }
        }

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }
}

/// Chrome exposes /json/list with all targets; pick the first page.
/// Retries since the page target may not appear immediately.
async fn get_page_ws_url(port: u16) -> Result<String> {
    let url = format!("http://127.0.0.1:{port}/json/list");

    for attempt in 0..10 {
        if attempt > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        }

        let resp = match reqwest::get(&url).await {
            Ok(r) => r,
            Err(_) => continue,
        };
        let targets: Vec<Value> = match resp.json().await {
            Ok(t) => t,
            Err(_) => continue,
        };

        for target in &targets {
            if target.get("type").and_then(|v| v.as_str()) == Some("page") {
                if let Some(ws_url) = target.get("webSocketDebuggerUrl").and_then(|v| v.as_str())
                {
                    return Ok(ws_url.to_string());
                }
            }
        }
    }

    Err(Error::Browser("no page target found after retries".to_string()))
}
