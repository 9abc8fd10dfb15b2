use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub gbx: GbxSettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
}

/// Where the game server's control interface lives and how to log in
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GbxSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_password")]
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct TimeoutSettings {
    #[serde(default = "default_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_timeout")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_timeout")]
    pub write_timeout_secs: u64,
}

/// Bounds applied to every blocking point of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub read: Duration,
    pub write: Duration,
}

fn default_host() -> String {
    "tmnf-server-xmlrpc".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_user() -> String {
    "SuperAdmin".to_string()
}

fn default_password() -> String {
    "tester123".to_string()
}

fn default_timeout() -> u64 {
    3
}

impl Default for GbxSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: default_user(),
            password: default_password(),
        }
    }
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_timeout(),
            read_timeout_secs: default_timeout(),
            write_timeout_secs: default_timeout(),
        }
    }
}

impl From<TimeoutSettings> for Timeouts {
    fn from(t: TimeoutSettings) -> Self {
        Self {
            connect: Duration::from_secs(t.connect_timeout_secs),
            read: Duration::from_secs(t.read_timeout_secs),
            write: Duration::from_secs(t.write_timeout_secs),
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        TimeoutSettings::default().into()
    }
}

impl GbxSettings {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Applies `XMLRPC_HOST`, `XMLRPC_PORT`, `XMLRPC_USER` and `XMLRPC_PASSWORD`
    pub fn apply_env(&mut self) -> anyhow::Result<()> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    fn apply_vars<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("XMLRPC_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("XMLRPC_PORT") {
            self.port = port
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid XMLRPC_PORT: {}", port))?;
        }
        if let Some(user) = lookup("XMLRPC_USER") {
            self.user = user;
        }
        if let Some(password) = lookup("XMLRPC_PASSWORD") {
            self.password = password;
        }
        Ok(())
    }
}

impl ClientConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self {
            gbx: GbxSettings::default(),
            timeouts: TimeoutSettings::default(),
        }
    }
}
