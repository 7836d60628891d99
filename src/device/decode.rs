//! Правила декодирования сырых SNMP значений в поля `OnuRecord`.
//!
//! Все константы раскладки собраны здесь и в профиле OLT. Статус никогда не
//! даёт ошибку: незнакомый код превращается в `Unknown`. Остальные функции
//! возвращают описание проблемы, а решение, деградировать поле или ронять
//! запись, принимает репозиторий.

use crate::models::{OnuStatus, OpticalPower, SerialNumber};
use crate::snmp::SnmpValue;

/// Нижняя граница правдоподобной оптической мощности, сотые dBm
pub const MIN_PLAUSIBLE_CENTI_DBM: i32 = -5000;
/// Верхняя граница правдоподобной оптической мощности, сотые dBm
pub const MAX_PLAUSIBLE_CENTI_DBM: i32 = 1000;

/// Коды `zxGponOnuPhaseState`
const PHASE_LOGGING: i64 = 1;
const PHASE_LOS: i64 = 2;
const PHASE_SYNC_MIB: i64 = 3;
const PHASE_WORKING: i64 = 4;
const PHASE_DYING_GASP: i64 = 5;
const PHASE_AUTH_FAILED: i64 = 6;
const PHASE_OFFLINE: i64 = 7;

pub fn status(value: Option<&SnmpValue>) -> OnuStatus {
    match value.and_then(SnmpValue::as_i64) {
        Some(PHASE_WORKING) => OnuStatus::Online,
        Some(
            PHASE_LOGGING | PHASE_LOS | PHASE_SYNC_MIB | PHASE_DYING_GASP | PHASE_AUTH_FAILED
            | PHASE_OFFLINE,
        ) => OnuStatus::Offline,
        _ => OnuStatus::Unknown,
    }
}

/// Сырое целое / `divisor` = dBm, с округлением до сотых от нуля
pub fn optical_power(value: &SnmpValue, divisor: i64) -> Result<OpticalPower, String> {
    let raw = value
        .as_i64()
        .ok_or_else(|| format!("ожидалось целое значение мощности, получено {}", value))?;
    let centi = scale_to_centi(raw, divisor)
        .ok_or_else(|| format!("значение мощности {} не масштабируется делителем {}", raw, divisor))?;

    if !(MIN_PLAUSIBLE_CENTI_DBM..=MAX_PLAUSIBLE_CENTI_DBM).contains(&centi) {
        return Err(format!(
            "мощность {} вне диапазона",
            OpticalPower::from_centi_dbm(centi)
        ));
    }
    Ok(OpticalPower::from_centi_dbm(centi))
}

fn scale_to_centi(raw: i64, divisor: i64) -> Option<i32> {
    if divisor <= 0 {
        return None;
    }
    let scaled = i128::from(raw) * 100;
    let divisor = i128::from(divisor);
    let quotient = scaled / divisor;
    let remainder = scaled % divisor;
    let rounded = if 2 * remainder.abs() >= divisor {
        quotient + scaled.signum()
    } else {
        quotient
    };
    i32::try_from(rounded).ok()
}

/// Серийный номер обязателен: непустая OCTET STRING
pub fn serial_number(value: &SnmpValue) -> Result<SerialNumber, String> {
    match value.as_bytes() {
        Some(bytes) if !bytes.is_empty() => Ok(SerialNumber::new(bytes.to_vec())),
        Some(_) => Err("пустой серийный номер".to_string()),
        None => Err(format!("ожидалась OCTET STRING, получено {}", value)),
    }
}

/// Необязательное текстовое поле. Пустая строка даёт `None`.
pub fn text(value: &SnmpValue) -> Result<Option<String>, String> {
    let bytes = value
        .as_bytes()
        .ok_or_else(|| format!("ожидалась OCTET STRING, получено {}", value))?;
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim_end_matches(['\0', ' ', '\t', '\r', '\n']).trim_start();
    if trimmed.is_empty() {
        Ok(None)
    } else {
        Ok(Some(trimmed.to_string()))
    }
}
