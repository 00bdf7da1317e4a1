//! STUN/TURN settings consumed when a call's media streams are created.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;

/// Port used when a STUN or TURN server is configured without one.
pub const DEFAULT_STUN_PORT: u16 = 3478;

/// Process-wide media transport settings.
///
/// Must be filled in before the first call is created. Values are not
/// validated here; unreachable servers only show up once the media engine
/// tries to use them. Changing the settings while a call is setting up its
/// media has no defined effect on that call.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub stun_servers: Vec<(IpAddr, u16)>,
    pub turn_host: Option<IpAddr>,
    pub turn_port: u16,
    pub turn_user: String,
    pub turn_password: String,
}

impl std::fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConfig")
            .field("stun_servers", &self.stun_servers)
            .field("turn_host", &self.turn_host)
            .field("turn_port", &self.turn_port)
            .field("turn_user", &self.turn_user)
            .field("turn_password", &!self.turn_password.is_empty())
            .finish()
    }
}

impl TransportConfig {
    /// Load settings from a JSON document on disk.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn set_stun_servers(&mut self, servers: Vec<(IpAddr, u16)>) {
        self.stun_servers = servers;
    }

    /// Replace the STUN list with a single server.
    pub fn set_stun_server(&mut self, host: IpAddr, port: u16) {
        self.stun_servers.clear();
        self.stun_servers.push((host, port));
    }

    pub fn set_turn_server(&mut self, host: IpAddr, port: u16) {
        self.turn_host = Some(host);
        self.turn_port = port;
    }

    pub fn set_turn_user(&mut self, user: &str) {
        self.turn_user = user.to_string();
    }

    pub fn set_turn_password(&mut self, password: &str) {
        self.turn_password = password.to_string();
    }

    pub fn has_turn(&self) -> bool {
        self.turn_host.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::Ipv4Addr;

    #[test]
    fn test_single_stun_server_replaces_list() {
        let mut config = TransportConfig::default();
        config.set_stun_servers(vec![
            (IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 3478),
            (IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), 3479),
        ]);
        assert_eq!(config.stun_servers.len(), 2);

        config.set_stun_server(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7)), DEFAULT_STUN_PORT);
        assert_eq!(
            config.stun_servers,
            vec![(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7)), 3478)]
        );
    }

    #[test]
    fn test_turn_settings() {
        let mut config = TransportConfig::default();
        assert!(!config.has_turn());

        config.set_turn_server(IpAddr::V4(Ipv4Addr::new(198, 51, 100, 4)), 5349);
        config.set_turn_user("alice");
        config.set_turn_password("s3cret");

        assert!(config.has_turn());
        assert_eq!(config.turn_port, 5349);
        assert_eq!(config.turn_user, "alice");

        let debug = format!("{:?}", config);
        assert!(!debug.contains("s3cret"));
    }

    #[test]
    fn test_load_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"stun_servers": [["203.0.113.9", 3478]], "turn_host": "203.0.113.10", "turn_port": 3478, "turn_user": "bob"}}"#
        )
        .unwrap();

        let config = TransportConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.stun_servers.len(), 1);
        assert_eq!(config.turn_user, "bob");
        assert!(config.turn_password.is_empty());
    }

    #[test]
    fn test_load_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(TransportConfig::from_json_file(file.path()).is_err());
    }
}
