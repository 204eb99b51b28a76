use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::lobby::viewer::Viewer;

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Lobby server address
    pub server_address: IpAddr,
    /// Lobby server port
    pub server_port: u16,
    /// Viewer identity
    pub username: String,
    /// Usernames the viewer has blocked
    pub blocked_users: Vec<String>,
    /// Moderator/admin view bypasses block filtering
    pub privileged: bool,
    /// Base delay between reconnect attempts
    pub reconnect_delay: Duration,
    /// Bound of the inbound message queue
    pub queue_capacity: usize,
    /// Play lobby alerts at all
    pub lobby_sounds: bool,
    /// Serve metrics on this port when set
    pub metrics_port: Option<u16>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            server_port: 1042,
            username: "guest".to_string(),
            blocked_users: Vec::new(),
            privileged: false,
            reconnect_delay: Duration::from_millis(1000),
            queue_capacity: 1024,
            lobby_sounds: true,
            metrics_port: None,
        }
    }
}

/// Configuration rejected by [`ClientConfig::validate`]
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Server port cannot be 0")]
    ZeroPort,
    #[error("Username cannot be empty")]
    EmptyUsername,
    #[error("Queue capacity must be at least 1")]
    ZeroQueueCapacity,
}

impl ClientConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Unparseable values are
    /// logged and fall back to the default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup("LOBBY_SERVER_ADDR") {
            if let Ok(parsed) = addr.parse() {
                config.server_address = parsed;
            } else {
                tracing::warn!("Invalid LOBBY_SERVER_ADDR '{}', using default", addr);
            }
        }

        if let Some(port) = lookup("LOBBY_SERVER_PORT") {
            match port.parse::<u16>() {
                Ok(parsed) if parsed > 0 => config.server_port = parsed,
                Ok(_) => tracing::warn!("LOBBY_SERVER_PORT must be > 0, using default"),
                Err(_) => tracing::warn!("Invalid LOBBY_SERVER_PORT '{}', using default", port),
            }
        }

        if let Some(username) = lookup("LOBBY_USERNAME") {
            let username = username.trim();
            if username.is_empty() {
                tracing::warn!("LOBBY_USERNAME is empty, using default");
            } else {
                config.username = username.to_string();
            }
        }

        if let Some(blocked) = lookup("LOBBY_BLOCKED_USERS") {
            config.blocked_users = blocked
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(privileged) = lookup("LOBBY_PRIVILEGED") {
            match parse_flag(&privileged) {
                Some(flag) => config.privileged = flag,
                None => tracing::warn!("Invalid LOBBY_PRIVILEGED '{}', using default", privileged),
            }
        }

        if let Some(ms) = lookup("LOBBY_RECONNECT_MS") {
            match ms.parse::<u64>() {
                Ok(parsed) if parsed > 0 => config.reconnect_delay = Duration::from_millis(parsed),
                _ => tracing::warn!("Invalid LOBBY_RECONNECT_MS '{}', using default", ms),
            }
        }

        if let Some(capacity) = lookup("LOBBY_QUEUE_CAPACITY") {
            match capacity.parse::<usize>() {
                Ok(parsed) if parsed > 0 && parsed <= 1_000_000 => config.queue_capacity = parsed,
                _ => tracing::warn!("LOBBY_QUEUE_CAPACITY must be 1-1000000, using default"),
            }
        }

        if let Some(sounds) = lookup("LOBBY_LOBBY_SOUNDS") {
            match parse_flag(&sounds) {
                Some(flag) => config.lobby_sounds = flag,
                None => tracing::warn!("Invalid LOBBY_LOBBY_SOUNDS '{}', using default", sounds),
            }
        }

        if let Some(port) = lookup("METRICS_PORT") {
            match port.parse::<u16>() {
                Ok(parsed) if parsed > 0 => config.metrics_port = Some(parsed),
                _ => tracing::warn!("Invalid METRICS_PORT '{}', metrics disabled", port),
            }
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        if self.username.trim().is_empty() {
            return Err(ConfigError::EmptyUsername);
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        Ok(())
    }

    pub fn server_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server_address, self.server_port)
    }

    /// Viewer identity derived from the configured user
    pub fn viewer(&self) -> Viewer {
        Viewer::new(self.username.clone())
            .with_blocked(self.blocked_users.iter().cloned())
            .with_privileged(self.privileged)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
