use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::models::{DeviceCoordinate, OnuRecord};
use crate::snmp::SnmpError;

pub mod decode;
pub mod repository;

pub use repository::SnmpDeviceRepository;

#[derive(Debug, Clone, Error)]
pub enum DeviceError {
    /// Таймаут или отказ транспорта после всех повторов
    #[error("OLT недоступен: {0}")]
    Unreachable(String),

    /// Слот ONU пуст (агент ответил noSuchInstance/noSuchObject)
    #[error("ONU {0} не зарегистрирована на OLT")]
    NotProvisioned(DeviceCoordinate),

    #[error("не удалось декодировать {field} для ONU {coordinate}: {reason}")]
    Decode {
        coordinate: DeviceCoordinate,
        field: &'static str,
        reason: String,
    },

    #[error("запись запрещена агентом: {0}")]
    PermissionDenied(String),

    #[error("SNMP ошибка: {0}")]
    Snmp(SnmpError),

    #[error("опрос OLT отменён")]
    Cancelled,
}

impl From<SnmpError> for DeviceError {
    fn from(err: SnmpError) -> Self {
        match err {
            SnmpError::Timeout { .. } | SnmpError::Transport(_) => DeviceError::Unreachable(err.to_string()),
            SnmpError::Cancelled => DeviceError::Cancelled,
            SnmpError::PermissionDenied { .. } => DeviceError::PermissionDenied(err.to_string()),
            other => DeviceError::Snmp(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, DeviceError>;

/// Результат опроса одной координаты в пакетном опросе порта
#[derive(Debug)]
pub struct PollResult {
    pub coordinate: DeviceCoordinate,
    pub result: Result<OnuRecord>,
}

impl PollResult {
    pub fn new(coordinate: DeviceCoordinate, result: Result<OnuRecord>) -> Self {
        Self { coordinate, result }
    }

    pub fn record(&self) -> Option<&OnuRecord> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&DeviceError> {
        self.result.as_ref().err()
    }
}

/// Чтение и запись состояния ONU на самом OLT
#[async_trait]
pub trait DeviceRepository: Send + Sync {
    async fn fetch_onu(&self, coordinate: DeviceCoordinate, cancel: &CancellationToken) -> Result<OnuRecord>;

    /// Опрос всех ONU порта. Ошибка целиком только если порт не удалось перечислить.
    async fn fetch_onus_for_port(
        &self,
        board: u8,
        port: u8,
        cancel: &CancellationToken,
    ) -> Result<Vec<PollResult>>;

    /// Индексы зарегистрированных ONU на порту, по возрастанию
    async fn onu_indices(&self, board: u8, port: u8, cancel: &CancellationToken) -> Result<Vec<u16>>;

    async fn set_description(
        &self,
        coordinate: DeviceCoordinate,
        description: &str,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Максимальный индекс ONU на порту
    fn onu_capacity(&self) -> u16;
}
