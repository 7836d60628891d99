use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{DeviceCoordinate, OnuRecord};

pub mod redis_store;
pub mod store;

pub use redis_store::RedisStore;
pub use store::{KeyValueStore, MemoryStore};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Сохранённое значение не разбирается как запись ONU
    #[error("повреждённая запись кэша {key}: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("координата {expected} не совпадает с координатой записи {actual}")]
    CoordinateMismatch {
        expected: DeviceCoordinate,
        actual: DeviceCoordinate,
    },
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Запись кэша: последний успешный опрос ONU
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub record: OnuRecord,
    pub fetched_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(record: OnuRecord) -> Self {
        let fetched_at = record.observed_at();
        Self { record, fetched_at }
    }

    pub fn coordinate(&self) -> DeviceCoordinate {
        self.record.coordinate()
    }

    /// Возраст записи относительно `now`; записи "из будущего" имеют нулевой возраст
    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.fetched_at).to_std().unwrap_or_default()
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, max_staleness: std::time::Duration) -> bool {
        self.age(now) <= max_staleness
    }
}

/// Хранилище декодированных записей ONU. Свежесть не проверяет: это решает
/// вызывающий.
#[async_trait]
pub trait CacheRepository: Send + Sync {
    async fn get(&self, coordinate: DeviceCoordinate) -> Result<Option<CacheEntry>>;

    /// Отсутствующие и нечитаемые записи просто не попадают в результат
    async fn get_many(&self, coordinates: &[DeviceCoordinate]) -> Result<HashMap<DeviceCoordinate, CacheEntry>>;

    async fn put(&self, coordinate: DeviceCoordinate, record: &OnuRecord) -> Result<()>;

    async fn invalidate(&self, coordinate: DeviceCoordinate) -> Result<()>;

    async fn contains(&self, coordinate: DeviceCoordinate) -> Result<bool>;

    /// Все записи порта, по возрастанию индекса ONU
    async fn scan_port(&self, board: u8, port: u8) -> Result<Vec<CacheEntry>>;
}

/// Кэш ONU поверх любого `KeyValueStore`, записи в JSON под
/// `{namespace}:{board}:{port}:{onu}`
#[derive(Clone)]
pub struct OnuCacheRepository {
    store: Arc<dyn KeyValueStore>,
    namespace: String,
}

impl OnuCacheRepository {
    pub fn new(store: Arc<dyn KeyValueStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn key(&self, coordinate: DeviceCoordinate) -> String {
        format!("{}:{}", self.namespace, coordinate.cache_key())
    }

    fn decode(key: &str, payload: &str) -> Result<CacheEntry> {
        serde_json::from_str(payload).map_err(|source| CacheError::Serialization {
            key: key.to_string(),
            source,
        })
    }

    /// Разбор пачки значений; битые записи пропускаются с предупреждением
    fn decode_many(keys: &[String], payloads: Vec<Option<String>>) -> Vec<CacheEntry> {
        keys.iter()
            .zip(payloads)
            .filter_map(|(key, payload)| {
                let payload = payload?;
                match Self::decode(key, &payload) {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        warn!(error = %e, "Пропуск повреждённой записи кэша");
                        None
                    }
                }
            })
            .collect()
    }
}

#[async_trait]
impl CacheRepository for OnuCacheRepository {
    async fn get(&self, coordinate: DeviceCoordinate) -> Result<Option<CacheEntry>> {
        let key = self.key(coordinate);
        match self.store.get(&key).await? {
            Some(payload) => Self::decode(&key, &payload).map(Some),
            None => Ok(None),
        }
    }

    async fn get_many(&self, coordinates: &[DeviceCoordinate]) -> Result<HashMap<DeviceCoordinate, CacheEntry>> {
        let keys: Vec<String> = coordinates.iter().map(|c| self.key(*c)).collect();
        let payloads = self.store.get_many(&keys).await?;

        Ok(Self::decode_many(&keys, payloads)
            .into_iter()
            .map(|entry| (entry.coordinate(), entry))
            .collect())
    }

    async fn put(&self, coordinate: DeviceCoordinate, record: &OnuRecord) -> Result<()> {
        if record.coordinate() != coordinate {
            return Err(CacheError::CoordinateMismatch {
                expected: coordinate,
                actual: record.coordinate(),
            });
        }

        let key = self.key(coordinate);
        let payload = serde_json::to_string(&CacheEntry::new(record.clone())).map_err(|source| {
            CacheError::Serialization {
                key: key.clone(),
                source,
            }
        })?;

        self.store.set(&key, payload).await?;
        debug!(key, "Запись ONU сохранена в кэш");
        Ok(())
    }

    async fn invalidate(&self, coordinate: DeviceCoordinate) -> Result<()> {
        let key = self.key(coordinate);
        self.store.delete(&key).await?;
        debug!(key, "Запись ONU удалена из кэша");
        Ok(())
    }

    async fn contains(&self, coordinate: DeviceCoordinate) -> Result<bool> {
        self.store.exists(&self.key(coordinate)).await
    }

    async fn scan_port(&self, board: u8, port: u8) -> Result<Vec<CacheEntry>> {
        let prefix = format!("{}:{}", self.namespace, DeviceCoordinate::port_prefix(board, port));

        // только ключи ровно вида {namespace}:{board}:{port}:{onu}
        let keys: Vec<String> = self
            .store
            .scan_prefix(&prefix)
            .await?
            .into_iter()
            .filter(|key| {
                key.strip_prefix(&self.namespace)
                    .and_then(|rest| rest.strip_prefix(':'))
                    .and_then(DeviceCoordinate::from_cache_key)
                    .is_some()
            })
            .collect();

        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let payloads = self.store.get_many(&keys).await?;
        let mut entries = Self::decode_many(&keys, payloads);
        entries.retain(|entry| {
            let c = entry.coordinate();
            c.board == board && c.port == port
        });
        entries.sort_by_key(CacheEntry::coordinate);
        Ok(entries)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{OnuStatus, SerialNumber};
    use chrono::Duration as ChronoDuration;

    pub(crate) fn record_at(coordinate: DeviceCoordinate, observed_at: DateTime<Utc>) -> OnuRecord {
        OnuRecord {
            coordinate,
            status: OnuStatus::Online,
            rx_power: None,
            tx_power: None,
            serial_number: SerialNumber::new(b"ZTEGC0FFEE01".to_vec()),
            description: Some("flat 12".to_string()),
            name: None,
            model: None,
            observed_at,
        }
    }

    fn repository() -> (Arc<MemoryStore>, OnuCacheRepository) {
        let store = Arc::new(MemoryStore::new());
        let repository = OnuCacheRepository::new(store.clone(), "olt-a");
        (store, repository)
    }

    #[tokio::test]
    async fn put_then_get_returns_record_and_fetch_time() {
        let (_, cache) = repository();
        let c = DeviceCoordinate::new(1, 1, 5);
        let record = record_at(c, Utc::now());

        cache.put(c, &record).await.unwrap();
        let entry = cache.get(c).await.unwrap().unwrap();
        assert_eq!(entry.record, record);
        assert_eq!(entry.fetched_at, record.observed_at());
        assert!(cache.contains(c).await.unwrap());
    }

    #[tokio::test]
    async fn put_rejects_foreign_coordinate() {
        let (_, cache) = repository();
        let record = record_at(DeviceCoordinate::new(1, 1, 5), Utc::now());

        let err = cache.put(DeviceCoordinate::new(1, 1, 6), &record).await.unwrap_err();
        assert!(matches!(err, CacheError::CoordinateMismatch { .. }));
    }

    #[tokio::test]
    async fn last_put_wins_and_invalidate_removes() {
        let (_, cache) = repository();
        let c = DeviceCoordinate::new(2, 3, 1);
        let older = record_at(c, Utc::now() - ChronoDuration::seconds(60));
        let newer = record_at(c, Utc::now());

        cache.put(c, &older).await.unwrap();
        cache.put(c, &newer).await.unwrap();
        assert_eq!(cache.get(c).await.unwrap().unwrap().record, newer);

        cache.invalidate(c).await.unwrap();
        assert!(cache.get(c).await.unwrap().is_none());
        assert!(!cache.contains(c).await.unwrap());
    }

    #[tokio::test]
    async fn corrupt_payload_is_an_error_for_get_and_skipped_in_bulk() {
        let (store, cache) = repository();
        let good = DeviceCoordinate::new(1, 1, 1);
        let bad = DeviceCoordinate::new(1, 1, 2);
        cache.put(good, &record_at(good, Utc::now())).await.unwrap();
        store.set("olt-a:1:1:2", "not json".to_string()).await.unwrap();

        assert!(matches!(
            cache.get(bad).await.unwrap_err(),
            CacheError::Serialization { .. }
        ));

        let many = cache.get_many(&[good, bad]).await.unwrap();
        assert_eq!(many.len(), 1);
        assert!(many.contains_key(&good));

        let port = cache.scan_port(1, 1).await.unwrap();
        assert_eq!(port.len(), 1);
    }

    #[tokio::test]
    async fn scan_port_is_scoped_by_namespace_and_port() {
        let (store, cache) = repository();
        let other = OnuCacheRepository::new(store.clone(), "olt-b");
        for onu in [7, 2, 12] {
            let c = DeviceCoordinate::new(1, 1, onu);
            cache.put(c, &record_at(c, Utc::now())).await.unwrap();
        }
        let neighbour = DeviceCoordinate::new(1, 10, 1);
        cache.put(neighbour, &record_at(neighbour, Utc::now())).await.unwrap();
        let foreign = DeviceCoordinate::new(1, 1, 3);
        other.put(foreign, &record_at(foreign, Utc::now())).await.unwrap();

        let onus: Vec<u16> = cache
            .scan_port(1, 1)
            .await
            .unwrap()
            .iter()
            .map(|e| e.coordinate().onu)
            .collect();
        assert_eq!(onus, vec![2, 7, 12]);
    }

    #[test]
    fn freshness_is_measured_from_fetch_time() {
        let now = Utc::now();
        let entry = CacheEntry::new(record_at(DeviceCoordinate::new(1, 1, 1), now - ChronoDuration::seconds(10)));

        assert!(entry.is_fresh(now, std::time::Duration::from_secs(30)));
        assert!(!entry.is_fresh(now, std::time::Duration::from_secs(5)));

        let future = CacheEntry::new(record_at(DeviceCoordinate::new(1, 1, 1), now + ChronoDuration::seconds(5)));
        assert_eq!(future.age(now), std::time::Duration::ZERO);
    }
}
