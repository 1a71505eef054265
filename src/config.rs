use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{info, warn};

const WATCH_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    #[serde(skip_serializing)]
    pub version: String,
    pub exclude_namespaces: Vec<String>,
    pub settings: Settings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub polling_interval: u64,
    pub scaling_enabled: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            exclude_namespaces: vec![
                "kube-system".to_string(),
                "kube-public".to_string(),
                "kube-node-lease".to_string(),
            ],
            settings: Settings::default(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            polling_interval: 5_000,
            scaling_enabled: true,
        }
    }
}

impl AppConfig {
    pub fn is_excluded(&self, namespace: &str) -> bool {
        self.exclude_namespaces
            .iter()
            .any(|excluded| excluded.eq_ignore_ascii_case(namespace))
    }
}

/// Shared read accessor over the active configuration. Writers replace the
/// whole snapshot; readers never observe a partially applied reload.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Arc<AppConfig>>>,
}

impl ConfigHandle {
    pub fn new(config: AppConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    pub fn snapshot(&self) -> Arc<AppConfig> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn store(&self, config: AppConfig) {
        let config = Arc::new(config);
        match self.inner.write() {
            Ok(mut guard) => *guard = config,
            Err(poisoned) => *poisoned.into_inner() = config,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigWatcher {
    path: Option<PathBuf>,
    modified: Option<SystemTime>,
}

impl ConfigWatcher {
    pub fn discover(explicit: Option<PathBuf>) -> Self {
        Self {
            path: explicit.or_else(discover_config_path),
            modified: None,
        }
    }

    pub fn load_current(&mut self) -> AppConfig {
        let Some(path) = self.path.clone() else {
            warn!("no configuration file found, using defaults");
            return AppConfig::default();
        };

        self.modified = fs::metadata(&path)
            .ok()
            .and_then(|meta| meta.modified().ok());

        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(error) => {
                warn!(
                    "failed to read config {}: {error}, using defaults",
                    path.display()
                );
                return AppConfig::default();
            }
        };

        match serde_yaml::from_str::<AppConfig>(&raw) {
            Ok(config) => config,
            Err(error) => {
                warn!(
                    "failed to parse config {}: {error}, using defaults",
                    path.display()
                );
                AppConfig::default()
            }
        }
    }

    pub fn reload_if_changed(&mut self) -> Option<AppConfig> {
        let Some(current_path) = self.path.clone() else {
            self.path = discover_config_path();
            if self.path.is_some() {
                return Some(self.load_current());
            }
            return None;
        };

        if !current_path.exists() {
            self.path = discover_config_path();
            self.modified = None;
            return Some(self.load_current());
        }

        let modified = fs::metadata(&current_path)
            .ok()
            .and_then(|meta| meta.modified().ok());
        if modified != self.modified {
            return Some(self.load_current());
        }

        None
    }
}

pub fn spawn_watcher(handle: ConfigHandle, mut watcher: ConfigWatcher) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(WATCH_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Some(config) = watcher.reload_if_changed() {
                info!(
                    "configuration reloaded, excluding namespaces: {}",
                    config.exclude_namespaces.join(", ")
                );
                handle.store(config);
            }
        }
    })
}

fn discover_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("PORTSIDE_CONFIG")
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path));
    }

    let cwd_candidates = [
        PathBuf::from("config/namespaces.yaml"),
        PathBuf::from("portside.yaml"),
        PathBuf::from(".portside.yaml"),
    ];
    for candidate in cwd_candidates {
        if candidate.exists() {
            return Some(candidate);
        }
    }

    if let Ok(home) = std::env::var("HOME") {
        let candidate = PathBuf::from(&home).join(".config/portside/config.yaml");
        if candidate.exists() {
            return Some(candidate);
        }
    }

    None
}
