use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub mod profile;
pub mod settings;

pub use profile::OltProfile;
pub use settings::{
    CacheBackend, CacheSettings, ConnectionSettings, DeviceSettings, PollSettings, ServerSettings,
};

/// Путь к конфигурации по умолчанию, переопределяется через `OLT_CONFIG`
pub const DEFAULT_CONFIG_PATH: &str = "./config/olt.yaml";

/// Главная конфигурация приложения
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub device: DeviceSettings,
    pub connection: ConnectionSettings,
    pub cache: CacheSettings,
    pub poll: PollSettings,
    pub server: ServerSettings,
}

impl AppConfig {
    /// Загружает конфигурацию из YAML файла. Отсутствующий файл даёт
    /// настройки по умолчанию; переменные окружения применяются поверх.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Не удалось прочитать конфигурацию: {}", path.display()))?;
            serde_yml::from_str(&content).context("Не удалось распарсить YAML конфигурации")?
        } else {
            info!(path = %path.display(), "Файл конфигурации не найден, используются значения по умолчанию");
            AppConfig::default()
        };

        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Загружает конфигурацию по пути из `OLT_CONFIG`
    pub fn from_env() -> Result<Self> {
        let path = env::var("OLT_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load(path)
    }

    /// Переопределения из окружения: SNMP_TARGET, SNMP_COMMUNITY,
    /// SNMP_TIMEOUT (мс), SNMP_RETRIES, REDIS_URL, HTTP_ADDR
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(target) = lookup("SNMP_TARGET") {
            self.device.target = target;
        }
        if let Some(community) = lookup("SNMP_COMMUNITY") {
            self.device.community = community;
        }
        if let Some(timeout) = lookup("SNMP_TIMEOUT") {
            self.connection.timeout_ms = timeout
                .parse()
                .with_context(|| format!("SNMP_TIMEOUT должен быть числом миллисекунд: {}", timeout))?;
        }
        if let Some(retries) = lookup("SNMP_RETRIES") {
            self.connection.retries = retries
                .parse()
                .with_context(|| format!("SNMP_RETRIES должен быть числом: {}", retries))?;
        }
        if let Some(url) = lookup("REDIS_URL") {
            self.cache.url = url;
        }
        if let Some(addr) = lookup("HTTP_ADDR") {
            self.server.addr = addr;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.device.name.is_empty() {
            anyhow::bail!("device.name не может быть пустым");
        }
        if self.device.target.is_empty() {
            anyhow::bail!("device.target не может быть пустым");
        }
        if self.connection.timeout_ms == 0 {
            anyhow::bail!("connection.timeout_ms должен быть больше нуля");
        }
        if self.connection.max_in_flight == 0 {
            anyhow::bail!("connection.max_in_flight должен быть больше нуля");
        }
        if self.poll.fan_out == 0 {
            anyhow::bail!("poll.fan_out должен быть больше нуля");
        }
        if self.poll.request_timeout_ms == 0 {
            anyhow::bail!("poll.request_timeout_ms должен быть больше нуля");
        }
        let budget = self.connection.retry_policy().budget();
        if Duration::from_millis(self.poll.request_timeout_ms) < budget {
            anyhow::bail!(
                "poll.request_timeout_ms ({} мс) меньше времени одного SNMP вызова со всеми повторами ({} мс)",
                self.poll.request_timeout_ms,
                budget.as_millis()
            );
        }
        Ok(())
    }

    /// Профиль OLT из файла или встроенный ZTE C320
    pub fn load_profile(&self) -> Result<OltProfile> {
        match &self.device.profile {
            Some(path) => OltProfile::load(path),
            None => Ok(OltProfile::default()),
        }
    }

    pub fn log_summary(&self) {
        info!(
            device = %self.device.name,
            target = %self.device.target,
            timeout_ms = self.connection.timeout_ms,
            retries = self.connection.retries,
            cache = ?self.cache.backend,
            fan_out = self.poll.fan_out,
            addr = %self.server.addr,
            "Конфигурация загружена"
        );
    }
}
