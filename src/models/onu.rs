use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::DeviceCoordinate;

/// Операционный статус ONU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnuStatus {
    Online,
    Offline,
    Unknown,
}

impl OnuStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnuStatus::Online => "online",
            OnuStatus::Offline => "offline",
            OnuStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for OnuStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Оптическая мощность в dBm с фиксированной точкой (сотые доли dBm)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpticalPower {
    centi_dbm: i32,
}

impl OpticalPower {
    pub const fn from_centi_dbm(centi_dbm: i32) -> Self {
        Self { centi_dbm }
    }

    pub fn centi_dbm(&self) -> i32 {
        self.centi_dbm
    }

    pub fn as_dbm(&self) -> f64 {
        f64::from(self.centi_dbm) / 100.0
    }
}

impl fmt::Display for OpticalPower {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.centi_dbm < 0 { "-" } else { "" };
        let abs = self.centi_dbm.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

/// Серийный номер ONU как непрозрачная последовательность байт
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SerialNumber(Vec<u8>);

impl SerialNumber {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for SerialNumber {
    /// Печатаемый ASCII выводится как есть; GPON формат (4 символа вендора +
    /// 4 байта) как `ZTEG` + hex; всё остальное целиком в hex
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let printable = |b: &u8| b.is_ascii_graphic();
        if self.0.iter().all(printable) {
            return f.write_str(&String::from_utf8_lossy(&self.0));
        }
        let (vendor, rest) = if self.0.len() == 8 && self.0[..4].iter().all(printable) {
            (&self.0[..4], &self.0[4..])
        } else {
            (&self.0[..0], &self.0[..])
        };
        f.write_str(&String::from_utf8_lossy(vendor))?;
        for byte in rest {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

/// Декодированное состояние одной ONU.
///
/// Создаётся только декодером ответов SNMP (см. `device::decode`), поэтому
/// поля закрыты для внешних вызывающих. Необязательные поля равны `None`,
/// если устройство не вернуло пригодного значения.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnuRecord {
    pub(crate) coordinate: DeviceCoordinate,
    pub(crate) status: OnuStatus,
    pub(crate) rx_power: Option<OpticalPower>,
    pub(crate) tx_power: Option<OpticalPower>,
    pub(crate) serial_number: SerialNumber,
    pub(crate) description: Option<String>,
    pub(crate) name: Option<String>,
    pub(crate) model: Option<String>,
    pub(crate) observed_at: DateTime<Utc>,
}

impl OnuRecord {
    pub fn coordinate(&self) -> DeviceCoordinate {
        self.coordinate
    }

    pub fn status(&self) -> OnuStatus {
        self.status
    }

    pub fn rx_power(&self) -> Option<OpticalPower> {
        self.rx_power
    }

    pub fn tx_power(&self) -> Option<OpticalPower> {
        self.tx_power
    }

    pub fn serial_number(&self) -> &SerialNumber {
        &self.serial_number
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }
}
