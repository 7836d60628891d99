use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::snmp::RetryPolicy;
use crate::usecase::ServiceSettings;

/// OLT, который опрашивает сервис
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Имя OLT, из него же строится пространство ключей кэша
    pub name: String,
    /// Адрес агента, host:port
    pub target: String,
    /// Community string SNMPv2c
    pub community: String,
    /// Путь к YAML профилю OLT; без него используется ZTE C320
    pub profile: Option<String>,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            name: "olt".to_string(),
            target: "127.0.0.1:161".to_string(),
            community: "public".to_string(),
            profile: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Таймаут одной попытки SNMP запроса (мс)
    pub timeout_ms: u64,
    /// Количество повторов при ошибках
    pub retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Предел одновременных запросов для транспортов, которые это допускают
    pub max_in_flight: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 3000,
            retries: 2,
            backoff_base_ms: 200,
            backoff_max_ms: 2000,
            max_in_flight: 8,
        }
    }
}

impl ConnectionSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(self.timeout_ms),
            retries: self.retries,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Redis,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub backend: CacheBackend,
    pub url: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Redis,
            url: "redis://127.0.0.1:6379/0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    /// Допустимая давность кэша, если запрос её не указал (с)
    pub default_staleness_secs: u64,
    pub fan_out: usize,
    /// Общий таймаут одного запроса к сервису (мс)
    pub request_timeout_ms: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            default_staleness_secs: 30,
            fan_out: 8,
            request_timeout_ms: 30_000,
        }
    }
}

impl PollSettings {
    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            default_staleness: Duration::from_secs(self.default_staleness_secs),
            fan_out: self.fan_out,
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub addr: String,
    /// Сколько ждать завершения запросов при остановке (с)
    pub shutdown_grace_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8081".to_string(),
            shutdown_grace_secs: 10,
        }
    }
}
