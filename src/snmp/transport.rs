use async_trait::async_trait;
use std::fmt;

use super::error::Result;
use super::oid::ObjectIdentifier;

/// Владеющее значение varbind, не привязанное к буферу сессии
#[derive(Debug, Clone, PartialEq)]
pub enum SnmpValue {
    Boolean(bool),
    Null,
    Integer(i64),
    OctetString(Vec<u8>),
    ObjectIdentifier(ObjectIdentifier),
    IpAddress([u8; 4]),
    Counter32(u32),
    Unsigned32(u32),
    Timeticks(u32),
    Counter64(u64),
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
    Other(String),
}

impl SnmpValue {
    /// Целочисленное значение для INTEGER и беззнаковых типов
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SnmpValue::Integer(v) => Some(*v),
            SnmpValue::Counter32(v) | SnmpValue::Unsigned32(v) | SnmpValue::Timeticks(v) => {
                Some(i64::from(*v))
            }
            SnmpValue::Counter64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            SnmpValue::OctetString(bytes) => Some(bytes),
            _ => None,
        }
    }
}

impl fmt::Display for SnmpValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnmpValue::Boolean(v) => write!(f, "BOOLEAN: {}", v),
            SnmpValue::Null => f.write_str("NULL"),
            SnmpValue::Integer(v) => write!(f, "INTEGER: {}", v),
            SnmpValue::OctetString(v) => write!(f, "STRING: {}", String::from_utf8_lossy(v)),
            SnmpValue::ObjectIdentifier(v) => write!(f, "OBJECT IDENTIFIER: {}", v),
            SnmpValue::IpAddress([a, b, c, d]) => write!(f, "IpAddress: {}.{}.{}.{}", a, b, c, d),
            SnmpValue::Counter32(v) => write!(f, "Counter32: {}", v),
            SnmpValue::Unsigned32(v) => write!(f, "Gauge32: {}", v),
            SnmpValue::Timeticks(v) => write!(f, "Timeticks: {}", v),
            SnmpValue::Counter64(v) => write!(f, "Counter64: {}", v),
            SnmpValue::NoSuchObject => f.write_str("noSuchObject"),
            SnmpValue::NoSuchInstance => f.write_str("noSuchInstance"),
            SnmpValue::EndOfMibView => f.write_str("endOfMibView"),
            SnmpValue::Other(v) => f.write_str(v),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Varbind {
    pub oid: ObjectIdentifier,
    pub value: SnmpValue,
}

impl Varbind {
    pub fn new(oid: ObjectIdentifier, value: SnmpValue) -> Self {
        Self { oid, value }
    }
}

/// Ответ агента как есть: статус ошибки не интерпретируется на этом уровне
#[derive(Debug, Clone)]
pub struct Response {
    pub error_status: u32,
    pub error_index: u32,
    pub varbinds: Vec<Varbind>,
}

impl Response {
    pub fn ok(varbinds: Vec<Varbind>) -> Self {
        Self {
            error_status: 0,
            error_index: 0,
            varbinds,
        }
    }
}

/// Может ли транспорт обслуживать несколько запросов одновременно
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportConcurrency {
    /// Одна сессия, один запрос в полёте
    Serialized,
    /// Транспорт сам мультиплексирует запросы по request-id
    Multiplexed,
}

/// Сырой SNMP транспорт.
///
/// Без таймаутов и повторов: этим занимается `SnmpClient`. Реализация
/// обязана честно сообщать `concurrency()`, клиент по нему решает, сколько
/// запросов пускать одновременно.
#[async_trait]
pub trait SnmpTransport: Send + Sync {
    fn concurrency(&self) -> TransportConcurrency;

    async fn get(&self, oid: &ObjectIdentifier) -> Result<Response>;

    async fn get_next(&self, oid: &ObjectIdentifier) -> Result<Response>;

    async fn set(&self, oid: &ObjectIdentifier, value: &SnmpValue) -> Result<Response>;
}
