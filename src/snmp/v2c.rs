use async_trait::async_trait;
use snmp2::{AsyncSession, Oid, Pdu, Value};
use tokio::sync::Mutex;
use tracing::debug;

use super::error::{Result, SnmpError};
use super::oid::{ObjectIdentifier, parse_oid};
use super::transport::{Response, SnmpTransport, SnmpValue, TransportConcurrency, Varbind};

/// SNMPv2c транспорт поверх `snmp2::AsyncSession`.
///
/// Сессия одна на процесс и требует `&mut self` на каждый запрос, поэтому
/// она под асинхронным мьютексом и объявлена как `Serialized`.
pub struct SnmpClientV2c {
    target: String,
    session: Mutex<AsyncSession>,
}

impl SnmpClientV2c {
    pub async fn new(target: &str, community: &[u8]) -> Result<Self> {
        let session = AsyncSession::new_v2c(target, community, 2)
            .await
            .map_err(|e| SnmpError::Transport(format!("не удалось создать SNMP сессию {}: {:?}", target, e)))?;

        debug!(target, "SNMPv2c сессия открыта");
        Ok(Self {
            target: target.to_string(),
            session: Mutex::new(session),
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

#[async_trait]
impl SnmpTransport for SnmpClientV2c {
    fn concurrency(&self) -> TransportConcurrency {
        TransportConcurrency::Serialized
    }

    async fn get(&self, oid: &ObjectIdentifier) -> Result<Response> {
        let oid = to_snmp2_oid(oid)?;
        let mut session = self.session.lock().await;
        let pdu = session
            .get(&oid)
            .await
            .map_err(|e| SnmpError::Transport(format!("SNMP GET запрос не удался: {:?}", e)))?;
        to_response(pdu)
    }

    async fn get_next(&self, oid: &ObjectIdentifier) -> Result<Response> {
        let oid = to_snmp2_oid(oid)?;
        let mut session = self.session.lock().await;
        let pdu = session
            .getnext(&oid)
            .await
            .map_err(|e| SnmpError::Transport(format!("SNMP GETNEXT запрос не удался: {:?}", e)))?;
        to_response(pdu)
    }

    async fn set(&self, oid: &ObjectIdentifier, value: &SnmpValue) -> Result<Response> {
        let oid = to_snmp2_oid(oid)?;
        let value = to_snmp2_value(value)?;
        let mut session = self.session.lock().await;
        let pdu = session
            .set(&[(&oid, value)])
            .await
            .map_err(|e| SnmpError::Transport(format!("SNMP SET запрос не удался: {:?}", e)))?;
        to_response(pdu)
    }
}

fn to_snmp2_oid(oid: &ObjectIdentifier) -> Result<Oid<'static>> {
    Oid::from(oid.arcs()).map_err(|e| SnmpError::InvalidOid(format!("{}: {:?}", oid, e)))
}

fn to_snmp2_value(value: &SnmpValue) -> Result<Value<'_>> {
    let converted = match value {
        SnmpValue::Integer(v) => Value::Integer(*v),
        SnmpValue::OctetString(v) => Value::OctetString(v),
        SnmpValue::Counter32(v) => Value::Counter32(*v),
        SnmpValue::Unsigned32(v) => Value::Unsigned32(*v),
        SnmpValue::Timeticks(v) => Value::Timeticks(*v),
        SnmpValue::IpAddress(v) => Value::IpAddress(*v),
        SnmpValue::Null => Value::Null,
        other => {
            return Err(SnmpError::Malformed(format!(
                "тип значения не поддерживается для SET: {}",
                other
            )));
        }
    };
    Ok(converted)
}

/// Копирует ответ из буфера сессии в владеющие структуры
fn to_response(pdu: Pdu<'_>) -> Result<Response> {
    let error_status = u32::try_from(pdu.error_status).unwrap_or(u32::MAX);
    let error_index = u32::try_from(pdu.error_index).unwrap_or(u32::MAX);

    let mut varbinds = Vec::new();
    for (oid, value) in pdu.varbinds {
        let oid = parse_oid(&oid.to_string())?;
        varbinds.push(Varbind::new(oid, from_snmp2_value(value)?));
    }

    Ok(Response {
        error_status,
        error_index,
        varbinds,
    })
}

fn from_snmp2_value(value: Value<'_>) -> Result<SnmpValue> {
    let converted = match value {
        Value::Boolean(v) => SnmpValue::Boolean(v),
        Value::Null => SnmpValue::Null,
        Value::Integer(v) => SnmpValue::Integer(v),
        Value::OctetString(v) => SnmpValue::OctetString(v.to_vec()),
        Value::ObjectIdentifier(v) => SnmpValue::ObjectIdentifier(parse_oid(&v.to_string())?),
        Value::IpAddress(v) => SnmpValue::IpAddress(v),
        Value::Counter32(v) => SnmpValue::Counter32(v),
        Value::Unsigned32(v) => SnmpValue::Unsigned32(v),
        Value::Timeticks(v) => SnmpValue::Timeticks(v),
        Value::Counter64(v) => SnmpValue::Counter64(v),
        Value::NoSuchObject => SnmpValue::NoSuchObject,
        Value::NoSuchInstance => SnmpValue::NoSuchInstance,
        Value::EndOfMibView => SnmpValue::EndOfMibView,
        other => SnmpValue::Other(format!("{:?}", other)),
    };
    Ok(converted)
}
