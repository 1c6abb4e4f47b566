//! Browser process launch and CDP discovery.

use crate::cdp::CdpClient;
use chatpilot_core::{BrowserConfig, Error, Paths, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

const TEMP_PROFILE_PREFIX: &str = "chatpilot_profile_";
const CDP_READY_TIMEOUT_SECS: u64 = 15;

/// Supported Chromium-family browser engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserEngine {
    Chrome,
    Edge,
    Chromium,
}

impl FromStr for BrowserEngine {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "chrome" | "google-chrome" => Ok(Self::Chrome),
            "edge" | "msedge" => Ok(Self::Edge),
            "chromium" => Ok(Self::Chromium),
            other => Err(Error::Config(format!("unsupported browser engine: {}", other))),
        }
    }
}

impl BrowserEngine {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Chrome => "chrome",
            Self::Edge => "edge",
            Self::Chromium => "chromium",
        }
    }
}

/// Where the browser keeps its user data.
#[derive(Debug)]
pub struct ProfileDir {
    pub path: PathBuf,
    /// Set for throwaway profiles; dropping it deletes the directory.
    temp: Option<TempDir>,
}

impl ProfileDir {
    pub fn resolve(config: &BrowserConfig, paths: &Paths) -> Result<Self> {
        match config.profile_dir.as_deref() {
            Some(raw) if !raw.trim().is_empty() => Ok(Self {
                path: paths.resolve_profile(raw.trim()),
                temp: None,
            }),
            _ => {
                let temp = tempfile::Builder::new()
                    .prefix(TEMP_PROFILE_PREFIX)
                    .tempdir()?;
                Ok(Self {
                    path: temp.path().to_path_buf(),
                    temp: Some(temp),
                })
            }
        }
    }

    pub fn is_temporary(&self) -> bool {
        self.temp.is_some()
    }

    fn cleanup(&mut self) {
        let Some(temp) = self.temp.take() else {
            return;
        };
        match temp.close() {
            Ok(()) => debug!(path = %self.path.display(), "Removed temporary profile"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove temporary profile"),
        }
    }
}

/// A running browser process with its remote debugging port.
pub struct BrowserProcess {
    pub engine: BrowserEngine,
    pub debug_port: u16,
    pub profile: ProfileDir,
    child: Option<Child>,
}

impl BrowserProcess {
    /// Kill the process (if still running) and remove a throwaway profile.
    pub async fn shutdown(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                debug!("Browser process kill failed (may already be gone): {}", e);
            }
        }
        self.profile.cleanup();
    }
}

// The profile field drops after this runs, removing a throwaway profile.
impl Drop for BrowserProcess {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
    }
}

/// Launch a browser according to `config` and connect to its first page target.
pub async fn launch(config: &BrowserConfig, paths: &Paths) -> Result<(BrowserProcess, CdpClient)> {
    let engine: BrowserEngine = config.engine.parse()?;
    let browser_path = find_browser_binary(engine)
        .ok_or_else(|| Error::Driver(format!("{} not found. Please install it.", engine.name())))?;

    let profile = ProfileDir::resolve(config, paths)?;
    std::fs::create_dir_all(&profile.path)?;

    let debug_port = find_free_port().await?;
    let args = build_browser_args(debug_port, &profile.path, config.headless);

    info!(
        port = debug_port,
        headless = config.headless,
        browser = engine.name(),
        profile = %profile.path.display(),
        "Launching browser"
    );

    let child = Command::new(&browser_path)
        .args(&args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::Driver(format!("Failed to launch {}: {}", engine.name(), e)))?;

    let mut process = BrowserProcess {
        engine,
        debug_port,
        profile,
        child: Some(child),
    };

    let cdp = match connect_page(debug_port).await {
        Ok(cdp) => cdp,
        Err(e) => {
            process.shutdown().await;
            return Err(e);
        }
    };
    Ok((process, cdp))
}

async fn connect_page(debug_port: u16) -> Result<CdpClient> {
    wait_for_cdp_ready(debug_port, CDP_READY_TIMEOUT_SECS).await?;
    let page_ws_url = get_page_ws_url(debug_port).await?;
    let cdp = CdpClient::connect(&page_ws_url).await?;
    cdp.enable_domain("Page").await?;
    cdp.enable_domain("Runtime").await?;
    info!(ws_url = %page_ws_url, "CDP connection established (page target)");
    Ok(cdp)
}

fn build_browser_args(debug_port: u16, user_data_dir: &Path, headless: bool) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", debug_port),
        format!("--user-data-dir={}", user_data_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-sync".to_string(),
        "--disable-translate".to_string(),
        "--password-store=basic".to_string(),
    ];
    if headless {
        args.push("--headless=new".to_string());
    }
    args.push("--window-size=1280,900".to_string());
    args.push("about:blank".to_string());
    args
}

/// Find a browser binary on the system for the given engine.
pub fn find_browser_binary(engine: BrowserEngine) -> Option<String> {
    let candidates: Vec<&str> = match engine {
        BrowserEngine::Chrome => {
            if cfg!(target_os = "macos") {
                vec!["/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"]
            } else if cfg!(target_os = "linux") {
                vec!["google-chrome", "google-chrome-stable", "/usr/bin/google-chrome"]
            } else {
                vec![
                    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
                    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
                ]
            }
        }
        BrowserEngine::Edge => {
            if cfg!(target_os = "macos") {
                vec!["/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge"]
            } else if cfg!(target_os = "linux") {
                vec!["microsoft-edge", "microsoft-edge-stable"]
            } else {
                vec![r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe"]
            }
        }
        BrowserEngine::Chromium => {
            if cfg!(target_os = "macos") {
                vec!["/Applications/Chromium.app/Contents/MacOS/Chromium"]
            } else {
                vec!["chromium", "chromium-browser", "/usr/bin/chromium"]
            }
        }
    };

    candidates.into_iter().find_map(|candidate| {
        if Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
        let bare = !candidate.contains('/') && !candidate.contains('\\');
        (bare && which::which(candidate).is_ok()).then(|| candidate.to_string())
    })
}

async fn find_free_port() -> Result<u16> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

/// Poll `/json/version` until the debugging endpoint answers.
async fn wait_for_cdp_ready(port: u16, timeout_secs: u64) -> Result<String> {
    let start = std::time::Instant::now();
    let timeout = Duration::from_secs(timeout_secs);
    let url = format!("http://127.0.0.1:{}/json/version", port);

    loop {
        if start.elapsed() > timeout {
            return Err(Error::Driver(format!(
                "Browser CDP not ready after {}s on port {}",
                timeout_secs, port
            )));
        }

        if let Ok(resp) = reqwest::get(&url).await {
            if let Ok(body) = resp.json::<Value>().await {
                if let Some(ws_url) = body.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                    return Ok(ws_url.to_string());
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

async fn get_page_ws_url(port: u16) -> Result<String> {
    let url = format!("http://127.0.0.1:{}/json/list", port);

    for attempt in 0..10 {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        let Ok(resp) = reqwest::get(&url).await else {
            continue;
        };
        let Ok(targets) = resp.json::<Vec<Value>>().await else {
            continue;
        };
        if let Some(ws_url) = first_page_ws_url(&targets) {
            return Ok(ws_url);
        }
    }

    Err(Error::Driver("No page target found after retries".to_string()))
}

fn first_page_ws_url(targets: &[Value]) -> Option<String> {
    targets
        .iter()
        .filter(|t| t.get("type").and_then(|v| v.as_str()) == Some("page"))
        .find_map(|t| t.get("webSocketDebuggerUrl").and_then(|v| v.as_str()))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_engine_parse() {
        assert_eq!("Chrome".parse::<BrowserEngine>().unwrap(), BrowserEngine::Chrome);
        assert_eq!("msedge".parse::<BrowserEngine>().unwrap(), BrowserEngine::Edge);
        assert!("firefox".parse::<BrowserEngine>().is_err());
    }

    #[test]
    fn test_browser_args_headless() {
        let args = build_browser_args(9333, Path::new("/tmp/p"), true);
        assert!(args.contains(&"--remote-debugging-port=9333".to_string()));
        assert!(args.contains(&"--user-data-dir=/tmp/p".to_string()));
        assert!(args.contains(&"--headless=new".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("about:blank"));

        let headed = build_browser_args(9333, Path::new("/tmp/p"), false);
        assert!(!headed.iter().any(|a| a.starts_with("--headless")));
    }

    #[test]
    fn test_profile_resolution() {
        let base = TempDir::new().unwrap();
        let paths = Paths::with_base(base.path().to_path_buf());
        let mut cfg = BrowserConfig::default();

        let temp = ProfileDir::resolve(&cfg, &paths).unwrap();
        assert!(temp.is_temporary());
        assert!(temp.path.is_dir());
        assert!(temp
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(TEMP_PROFILE_PREFIX)));

        cfg.profile_dir = Some("chromedata".to_string());
        let persistent = ProfileDir::resolve(&cfg, &paths).unwrap();
        assert!(!persistent.is_temporary());
        assert_eq!(persistent.path, base.path().join("chromedata"));
    }

    #[test]
    fn test_temporary_profile_cleanup() {
        let base = TempDir::new().unwrap();
        let paths = Paths::with_base(base.path().to_path_buf());
        let mut profile = ProfileDir::resolve(&BrowserConfig::default(), &paths).unwrap();
        let path = profile.path.clone();
        std::fs::create_dir_all(path.join("Default")).unwrap();
        profile.cleanup();
        assert!(!path.exists());
        // Second cleanup is a no-op.
        profile.cleanup();
    }

    #[test]
    fn test_persistent_profile_survives_cleanup() {
        let base = TempDir::new().unwrap();
        let paths = Paths::with_base(base.path().to_path_buf());
        let cfg = BrowserConfig {
            profile_dir: Some("chromedata".to_string()),
            ..Default::default()
        };
        let mut profile = ProfileDir::resolve(&cfg, &paths).unwrap();
        std::fs::create_dir_all(&profile.path).unwrap();
        profile.cleanup();
        assert!(profile.path.is_dir());
    }

    #[test]
    fn test_dropped_process_removes_temporary_profile() {
        let base = TempDir::new().unwrap();
        let paths = Paths::with_base(base.path().to_path_buf());
        let profile = ProfileDir::resolve(&BrowserConfig::default(), &paths).unwrap();
        let path = profile.path.clone();
        std::fs::create_dir_all(path.join("Default")).unwrap();

        let process = BrowserProcess {
            engine: BrowserEngine::Chrome,
            debug_port: 0,
            profile,
            child: None,
        };
        drop(process);
        assert!(!path.exists());
    }

    #[test]
    fn test_first_page_ws_url_skips_workers() {
        let targets = vec![
            json!({"type": "service_worker", "webSocketDebuggerUrl": "ws://a"}),
            json!({"type": "page", "webSocketDebuggerUrl": "ws://b"}),
        ];
        assert_eq!(first_page_ws_url(&targets).as_deref(), Some("ws://b"));
        assert_eq!(first_page_ws_url(&[]), None);
    }
}
