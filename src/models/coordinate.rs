use serde::{Deserialize, Serialize};
use std::fmt;

/// Адрес одного слота ONU на OLT: плата / PON порт / индекс ONU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceCoordinate {
    pub board: u8,
    pub port: u8,
    pub onu: u16,
}

impl DeviceCoordinate {
    pub fn new(board: u8, port: u8, onu: u16) -> Self {
        Self { board, port, onu }
    }

    /// Детерминированный суффикс ключа кэша: `board:port:onu`
    pub fn cache_key(&self) -> String {
        format!("{}:{}:{}", self.board, self.port, self.onu)
    }

    /// Префикс ключей всех ONU одного порта (с завершающим `:`)
    pub fn port_prefix(board: u8, port: u8) -> String {
        format!("{}:{}:", board, port)
    }

    /// Обратная операция к `cache_key`
    pub fn from_cache_key(key: &str) -> Option<Self> {
        let mut parts = key.split(':');
        let board = parts.next()?.parse().ok()?;
        let port = parts.next()?.parse().ok()?;
        let onu = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self { board, port, onu })
    }
}

impl fmt::Display for DeviceCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.board, self.port, self.onu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_stable_and_parses_back() {
        let coordinate = DeviceCoordinate::new(1, 2, 5);
        assert_eq!(coordinate.cache_key(), "1:2:5");
        assert_eq!(DeviceCoordinate::from_cache_key("1:2:5"), Some(coordinate));
    }

    #[test]
    fn port_prefix_does_not_match_neighbouring_ports() {
        let prefix = DeviceCoordinate::port_prefix(1, 1);
        assert!(DeviceCoordinate::new(1, 1, 7).cache_key().starts_with(&prefix));
        assert!(!DeviceCoordinate::new(1, 10, 7).cache_key().starts_with(&prefix));
    }

    #[test]
    fn malformed_keys_are_rejected() {
        assert_eq!(DeviceCoordinate::from_cache_key("1:2"), None);
        assert_eq!(DeviceCoordinate::from_cache_key("1:2:5:9"), None);
        assert_eq!(DeviceCoordinate::from_cache_key("a:2:5"), None);
        assert_eq!(DeviceCoordinate::from_cache_key("1:300:5"), None);
    }
}
