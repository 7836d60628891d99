use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::{DeviceError, DeviceRepository, PollResult, Result, decode};
use crate::config::OltProfile;
use crate::config::profile::OidTemplate;
use crate::models::{DeviceCoordinate, OnuRecord};
use crate::snmp::{ObjectIdentifier, SnmpClient, SnmpError, SnmpValue};

/// Репозиторий ONU поверх SNMP клиента и профиля OLT
pub struct SnmpDeviceRepository {
    client: SnmpClient,
    profile: OltProfile,
    fan_out: usize,
}

impl SnmpDeviceRepository {
    pub fn new(client: SnmpClient, profile: OltProfile, fan_out: usize) -> Self {
        Self {
            client,
            profile,
            fan_out: fan_out.max(1),
        }
    }

    pub fn profile(&self) -> &OltProfile {
        &self.profile
    }

    fn oid(&self, template: &OidTemplate, coordinate: DeviceCoordinate) -> Result<ObjectIdentifier> {
        let if_index = self.profile.if_index(coordinate.board, coordinate.port);
        template.render(if_index, coordinate.onu).map_err(DeviceError::from)
    }

    /// Читает необязательный атрибут. Отсутствие и ошибки агента дают `None`,
    /// недоступность и отмена пробрасываются: частичные сетевые данные в
    /// запись не попадают.
    async fn optional(
        &self,
        field: &'static str,
        template: &OidTemplate,
        coordinate: DeviceCoordinate,
        cancel: &CancellationToken,
    ) -> Result<Option<SnmpValue>> {
        let oid = self.oid(template, coordinate)?;
        match self.client.get(&oid, cancel).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_absent() => {
                debug!(%coordinate, field, "атрибут отсутствует на агенте");
                Ok(None)
            }
            Err(e @ (SnmpError::Timeout { .. } | SnmpError::Transport(_) | SnmpError::Cancelled)) => {
                Err(e.into())
            }
            Err(e) => {
                warn!(%coordinate, field, error = %e, "атрибут не прочитан, поле пропущено");
                Ok(None)
            }
        }
    }
}

fn degrade<T>(
    coordinate: DeviceCoordinate,
    field: &'static str,
    value: Option<SnmpValue>,
    parse: impl FnOnce(&SnmpValue) -> std::result::Result<Option<T>, String>,
) -> Option<T> {
    let value = value?;
    match parse(&value) {
        Ok(decoded) => decoded,
        Err(reason) => {
            warn!(%coordinate, field, %reason, "поле не декодировано, пропущено");
            None
        }
    }
}

#[async_trait]
impl DeviceRepository for SnmpDeviceRepository {
    #[instrument(skip(self, cancel), fields(coordinate = %coordinate))]
    async fn fetch_onu(&self, coordinate: DeviceCoordinate, cancel: &CancellationToken) -> Result<OnuRecord> {
        let oids = &self.profile.oids;

        // Серийный номер читается первым: по нему отличаем пустой слот
        let serial_oid = self.oid(&oids.serial_number, coordinate)?;
        let serial_number = match self.client.get(&serial_oid, cancel).await {
            Ok(value) => decode::serial_number(&value).map_err(|reason| DeviceError::Decode {
                coordinate,
                field: "serial_number",
                reason,
            })?,
            Err(e) if e.is_absent() => return Err(DeviceError::NotProvisioned(coordinate)),
            Err(e) => return Err(e.into()),
        };

        let (status, rx_power, tx_power, description, name, model) = tokio::join!(
            self.optional("status", &oids.status, coordinate, cancel),
            self.optional("rx_power", &oids.rx_power, coordinate, cancel),
            self.optional("tx_power", &oids.tx_power, coordinate, cancel),
            self.optional("description", &oids.description, coordinate, cancel),
            self.optional("name", &oids.name, coordinate, cancel),
            self.optional("model", &oids.model, coordinate, cancel),
        );

        let status = status?;
        let divisor = self.profile.power_divisor;
        let record = OnuRecord {
            coordinate,
            status: decode::status(status.as_ref()),
            rx_power: degrade(coordinate, "rx_power", rx_power?, |v| {
                decode::optical_power(v, divisor).map(Some)
            }),
            tx_power: degrade(coordinate, "tx_power", tx_power?, |v| {
                decode::optical_power(v, divisor).map(Some)
            }),
            serial_number,
            description: degrade(coordinate, "description", description?, decode::text),
            name: degrade(coordinate, "name", name?, decode::text),
            model: degrade(coordinate, "model", model?, decode::text),
            observed_at: Utc::now(),
        };

        debug!(status = %record.status, "ONU опрошена");
        Ok(record)
    }

    #[instrument(skip(self, cancel))]
    async fn fetch_onus_for_port(
        &self,
        board: u8,
        port: u8,
        cancel: &CancellationToken,
    ) -> Result<Vec<PollResult>> {
        let indices = self.onu_indices(board, port, cancel).await?;

        let mut results: Vec<PollResult> = stream::iter(indices)
            .map(|onu| async move {
                let coordinate = DeviceCoordinate::new(board, port, onu);
                PollResult::new(coordinate, self.fetch_onu(coordinate, cancel).await)
            })
            .buffer_unordered(self.fan_out)
            .collect()
            .await;

        results.sort_by_key(|r| r.coordinate);
        Ok(results)
    }

    #[instrument(skip(self, cancel))]
    async fn onu_indices(&self, board: u8, port: u8, cancel: &CancellationToken) -> Result<Vec<u16>> {
        let if_index = self.profile.if_index(board, port);
        let root = self.profile.oids.serial_number.column_root(if_index)?;

        let rows: Vec<_> = self.client.walk(root.clone(), cancel).try_collect().await?;

        let mut indices: Vec<u16> = rows
            .iter()
            .filter_map(|row| {
                let onu = row.oid.suffix_after(&root)?.first().copied()?;
                match u16::try_from(onu) {
                    Ok(onu) => Some(onu),
                    Err(_) => {
                        warn!(oid = %row.oid, "индекс ONU вне диапазона, пропущен");
                        None
                    }
                }
            })
            .collect();
        indices.sort_unstable();
        indices.dedup();

        debug!(count = indices.len(), "ONU на порту");
        Ok(indices)
    }

    #[instrument(skip(self, cancel, description), fields(coordinate = %coordinate))]
    async fn set_description(
        &self,
        coordinate: DeviceCoordinate,
        description: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let oid = self.oid(&self.profile.oids.description, coordinate)?;
        let value = SnmpValue::OctetString(description.as_bytes().to_vec());

        match self.client.set(&oid, value, cancel).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_absent() => Err(DeviceError::NotProvisioned(coordinate)),
            Err(e) => Err(e.into()),
        }
    }

    fn onu_capacity(&self) -> u16 {
        self.profile.max_onu_index
    }
}
