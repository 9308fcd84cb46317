//! Client configuration loading and management.
//!
//! The expected YAML structure is:
//! ```yaml
//! data_dir: "/var/lib/synecdoche"
//! gui_rpc:
//!   port: 31416
//!   allow_remote_gui_rpc: false
//! host:
//!   ncpus: 4
//!   ram_bytes: 8589934592
//! preferences:
//!   work_buf_min_days: 0.1
//!   work_buf_additional_days: 0.25
//!   cpu_usage_limit: 100.0
//! log_flags:
//!   rr_simulation: true
//! ```
//!
//! Every section is optional; missing values fall back to the defaults below.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Default TCP port of the GUI RPC server.
pub const DEFAULT_GUI_RPC_PORT: u16 = 31416;

/// Name of the GUI RPC password file inside the data directory.
pub const GUI_RPC_PASSWD_FILE: &str = "gui_rpc_auth.cfg";

/// Name of the GUI RPC host allow-list inside the data directory.
pub const REMOTEHOST_FILE_NAME: &str = "remote_hosts.cfg";

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Lower bound for [`ClientConfig::overall_cpu_frac`].
///
/// A zero fraction would give every project a zero processing rate.
const MIN_CPU_FRAC: f64 = 0.01;

// ── Public data structures ────────────────────────────────────────────────────

/// GUI RPC server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GuiRpcConfig {
    pub port: u16,
    /// Accept connections from any host, not only loopback and the
    /// allow-list.
    pub allow_remote_gui_rpc: bool,
    /// Password file is group-readable (mode 0660) for sandboxed installs.
    pub sandbox_group: bool,
}

impl Default for GuiRpcConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_GUI_RPC_PORT,
            allow_remote_gui_rpc: false,
            sandbox_group: false,
        }
    }
}

/// Measured host characteristics.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HostInfo {
    pub ncpus: usize,
    pub ram_bytes: f64,
}

impl Default for HostInfo {
    fn default() -> Self {
        Self {
            ncpus: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            ram_bytes: 1024.0 * 1024.0 * 1024.0,
        }
    }
}

/// User computing preferences.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// Keep at least this much work queued, in days.
    pub work_buf_min_days: f64,
    /// Extra work to queue beyond the minimum, in days.
    pub work_buf_additional_days: f64,
    /// Percentage of CPU time computation may use.
    pub cpu_usage_limit: f64,
    /// Fraction of RAM jobs may use while the user is active.
    pub ram_max_used_busy_frac: f64,
    /// Fraction of time the client is running at all.
    pub on_frac: f64,
    /// Fraction of running time computation is allowed.
    pub active_frac: f64,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            work_buf_min_days: 0.1,
            work_buf_additional_days: 0.25,
            cpu_usage_limit: 100.0,
            ram_max_used_busy_frac: 0.5,
            on_frac: 1.0,
            active_frac: 1.0,
        }
    }
}

/// Debug flags that gate verbose tracing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogFlags {
    pub rr_simulation: bool,
}

/// Complete client configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub data_dir: PathBuf,
    pub gui_rpc: GuiRpcConfig,
    pub host: HostInfo,
    pub preferences: Preferences,
    pub log_flags: LogFlags,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            gui_rpc: GuiRpcConfig::default(),
            host: HostInfo::default(),
            preferences: Preferences::default(),
            log_flags: LogFlags::default(),
        }
    }
}

impl ClientConfig {
    /// Simulation horizon: the total work buffer, in seconds.
    pub fn work_buf_total(&self) -> f64 {
        let days = self.preferences.work_buf_min_days + self.preferences.work_buf_additional_days;
        days.max(0.0) * SECONDS_PER_DAY
    }

    /// Fraction of each CPU actually usable for computation.
    pub fn overall_cpu_frac(&self) -> f64 {
        let prefs = &self.preferences;
        let limit = (prefs.cpu_usage_limit / 100.0).clamp(0.0, 1.0);
        let limit = if limit == 0.0 { 1.0 } else { limit };
        let x = limit * prefs.on_frac.clamp(0.0, 1.0) * prefs.active_frac.clamp(0.0, 1.0);
        x.clamp(MIN_CPU_FRAC, 1.0)
    }

    /// RAM jobs are allowed to occupy, in bytes.
    pub fn available_ram(&self) -> f64 {
        self.host.ram_bytes * self.preferences.ram_max_used_busy_frac
    }

    pub fn password_file(&self) -> PathBuf {
        self.data_dir.join(GUI_RPC_PASSWD_FILE)
    }

    pub fn remote_hosts_file(&self) -> PathBuf {
        self.data_dir.join(REMOTEHOST_FILE_NAME)
    }
}

// ── ClientConfigManager ───────────────────────────────────────────────────────

/// Loads and holds the client configuration from a YAML file.
#[derive(Debug, Default)]
pub struct ClientConfigManager {
    config: ClientConfig,

    /// Set to `true` after a successful [`load_from_file`](Self::load_from_file).
    loaded: bool,
}

impl ClientConfigManager {
    /// Creates a manager holding the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `path` and replaces the current configuration.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or if the YAML is
    /// structurally invalid.  On error the previous configuration is reset to
    /// the defaults.
    pub fn load_from_file(&mut self, path: &Path) -> Result<()> {
        info!("Loading client configuration from: {}", path.display());

        self.config = ClientConfig::default();
        self.loaded = false;

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;

        // An empty document deserialises as unit, not as an empty map.
        let config: ClientConfig = if content.trim().is_empty() {
            ClientConfig::default()
        } else {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?
        };

        debug!(
            "  data_dir: {} | port: {} | remote: {}",
            config.data_dir.display(),
            config.gui_rpc.port,
            config.gui_rpc.allow_remote_gui_rpc,
        );
        info!(
            ncpus = config.host.ncpus,
            work_buf_s = config.work_buf_total(),
            cpu_frac = config.overall_cpu_frac(),
            rr_sim_log = config.log_flags.rr_simulation,
            "Client configuration loaded"
        );

        self.config = config;
        self.loaded = true;
        Ok(())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ClientConfig {
        &mut self.config
    }

    pub fn into_config(self) -> ClientConfig {
        self.config
    }

    /// Returns `true` after a successful call to [`load_from_file`](Self::load_from_file).
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Helper: write a YAML string to a temp file and return it.
    fn yaml_tempfile(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    // ── Defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn default_config_has_expected_values() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.gui_rpc.port, DEFAULT_GUI_RPC_PORT);
        assert!(!cfg.gui_rpc.allow_remote_gui_rpc);
        assert!(cfg.host.ncpus >= 1);
        assert!(!cfg.log_flags.rr_simulation);
        assert_eq!(cfg.password_file(), PathBuf::from("./gui_rpc_auth.cfg"));
        assert_eq!(cfg.remote_hosts_file(), PathBuf::from("./remote_hosts.cfg"));
    }

    // ── Derived values ────────────────────────────────────────────────────────

    #[test]
    fn work_buf_total_sums_min_and_additional() {
        let mut cfg = ClientConfig::default();
        cfg.preferences.work_buf_min_days = 1.0;
        cfg.preferences.work_buf_additional_days = 0.5;
        assert_eq!(cfg.work_buf_total(), 1.5 * 86_400.0);
    }

    #[test]
    fn overall_cpu_frac_combines_limits() {
        let mut cfg = ClientConfig::default();
        cfg.preferences.cpu_usage_limit = 50.0;
        cfg.preferences.on_frac = 0.5;
        cfg.preferences.active_frac = 1.0;
        assert!((cfg.overall_cpu_frac() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn overall_cpu_frac_never_reaches_zero() {
        let mut cfg = ClientConfig::default();
        cfg.preferences.on_frac = 0.0;
        assert_eq!(cfg.overall_cpu_frac(), MIN_CPU_FRAC);
    }

    #[test]
    fn available_ram_applies_busy_fraction() {
        let mut cfg = ClientConfig::default();
        cfg.host.ram_bytes = 1000.0;
        cfg.preferences.ram_max_used_busy_frac = 0.25;
        assert_eq!(cfg.available_ram(), 250.0);
    }

    // ── ClientConfigManager: load_from_file ───────────────────────────────────

    #[test]
    fn load_full_yaml() {
        let yaml = r#"
data_dir: "/tmp/synecdoche"
gui_rpc:
  port: 40000
  allow_remote_gui_rpc: true
host:
  ncpus: 8
  ram_bytes: 4096
preferences:
  work_buf_min_days: 0.5
  work_buf_additional_days: 0.5
log_flags:
  rr_simulation: true
"#;
        let f = yaml_tempfile(yaml);
        let mut mgr = ClientConfigManager::new();
        mgr.load_from_file(f.path()).unwrap();

        assert!(mgr.is_loaded());
        let cfg = mgr.config();
        assert_eq!(cfg.data_dir, PathBuf::from("/tmp/synecdoche"));
        assert_eq!(cfg.gui_rpc.port, 40000);
        assert!(cfg.gui_rpc.allow_remote_gui_rpc);
        assert_eq!(cfg.host.ncpus, 8);
        assert_eq!(cfg.work_buf_total(), 86_400.0);
        assert!(cfg.log_flags.rr_simulation);
        // untouched sections keep their defaults
        assert_eq!(cfg.preferences.cpu_usage_limit, 100.0);
    }

    #[test]
    fn empty_file_yields_defaults() {
        let f = yaml_tempfile("");
        let mut mgr = ClientConfigManager::new();
        mgr.load_from_file(f.path()).unwrap();
        assert!(mgr.is_loaded());
        assert_eq!(mgr.config().gui_rpc.port, DEFAULT_GUI_RPC_PORT);
    }

    #[test]
    fn missing_file_returns_error() {
        let mut mgr = ClientConfigManager::new();
        let result = mgr.load_from_file(Path::new("/nonexistent/path/client.yaml"));
        assert!(result.is_err());
        assert!(!mgr.is_loaded());
    }

    #[test]
    fn malformed_yaml_returns_error() {
        let f = yaml_tempfile("gui_rpc: [this, is, not, a, map");
        let mut mgr = ClientConfigManager::new();
        assert!(mgr.load_from_file(f.path()).is_err());
        assert!(!mgr.is_loaded());
    }

    #[test]
    fn reload_replaces_previous_values() {
        let f1 = yaml_tempfile("gui_rpc:\n  port: 1111\n");
        let f2 = yaml_tempfile("host:\n  ncpus: 2\n");

        let mut mgr = ClientConfigManager::new();
        mgr.load_from_file(f1.path()).unwrap();
        assert_eq!(mgr.config().gui_rpc.port, 1111);

        mgr.load_from_file(f2.path()).unwrap();
        assert_eq!(
            mgr.config().gui_rpc.port,
            DEFAULT_GUI_RPC_PORT,
            "old value must be gone"
        );
        assert_eq!(mgr.config().host.ncpus, 2);
    }
}
