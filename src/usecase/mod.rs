//! Согласование кэша и живого состояния OLT.
//!
//! Каждая координата проходит один и тот же путь: свежая запись кэша
//! отдаётся без обращения к устройству, иначе ONU опрашивается заново и
//! результат пишется в кэш. Если OLT недоступен, а в кэше есть запись, она
//! отдаётся с пометкой `stale`. Пустой слот удаляет запись из кэша.
//!
//! Каждый вызов ограничен таймаутом запроса: по его истечении токен отмены
//! обрывает SNMP запросы. Координата, которую не успели опросить, ведёт себя
//! как при недоступном OLT: запись кэша отдаётся как `stale`, а без неё вызов
//! завершается `DeadlineExceeded`. В листинге порта уже полученные итоги
//! сохраняются.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::cache::{CacheEntry, CacheRepository};
use crate::device::{DeviceError, DeviceRepository};
use crate::models::{DeviceCoordinate, OnuRecord};

/// Максимальная длина описания ONU в байтах
pub const MAX_DESCRIPTION_LEN: usize = 64;

#[derive(Debug, Clone, Error)]
pub enum OnuError {
    #[error("ONU {0} не найдена")]
    NotFound(DeviceCoordinate),

    #[error("OLT недоступен: {0}")]
    DeviceUnreachable(String),

    #[error("{0}")]
    Decode(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("некорректный запрос: {0}")]
    InvalidInput(String),

    #[error("запрос не уложился в {0:?}")]
    DeadlineExceeded(Duration),

    #[error("запрос отменён")]
    Cancelled,

    #[error(transparent)]
    Device(DeviceError),
}

impl From<DeviceError> for OnuError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::Unreachable(reason) => OnuError::DeviceUnreachable(reason),
            DeviceError::NotProvisioned(coordinate) => OnuError::NotFound(coordinate),
            DeviceError::Decode { .. } => OnuError::Decode(err.to_string()),
            DeviceError::PermissionDenied(reason) => OnuError::PermissionDenied(reason),
            DeviceError::Cancelled => OnuError::Cancelled,
            other => OnuError::Device(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, OnuError>;

/// Откуда взята запись
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    /// Только что прочитана с OLT
    Live,
    /// Из кэша, в пределах допустимой давности
    Cached,
    /// Из кэша сверх допустимой давности: OLT не ответил
    Stale,
}

impl Freshness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Freshness::Live => "live",
            Freshness::Cached => "cached",
            Freshness::Stale => "stale",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OnuView {
    pub record: OnuRecord,
    pub fetched_at: DateTime<Utc>,
    pub freshness: Freshness,
}

impl OnuView {
    fn live(record: OnuRecord) -> Self {
        Self {
            fetched_at: record.observed_at(),
            record,
            freshness: Freshness::Live,
        }
    }

    fn from_cache(entry: CacheEntry, freshness: Freshness) -> Self {
        Self {
            record: entry.record,
            fetched_at: entry.fetched_at,
            freshness,
        }
    }

    pub fn is_stale(&self) -> bool {
        self.freshness == Freshness::Stale
    }
}

/// Итог опроса одной координаты в листинге порта
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinateOutcome {
    Found(OnuView),
    NotFound,
    Unreachable(String),
    Failed(String),
}

impl CoordinateOutcome {
    pub fn tag(&self) -> &'static str {
        match self {
            CoordinateOutcome::Found(view) => view.freshness.as_str(),
            CoordinateOutcome::NotFound => "not_found",
            CoordinateOutcome::Unreachable(_) => "unreachable",
            CoordinateOutcome::Failed(_) => "failed",
        }
    }

    pub fn view(&self) -> Option<&OnuView> {
        match self {
            CoordinateOutcome::Found(view) => Some(view),
            _ => None,
        }
    }

    fn from_result(result: Result<OnuView>) -> Self {
        match result {
            Ok(view) => CoordinateOutcome::Found(view),
            Err(OnuError::NotFound(_)) => CoordinateOutcome::NotFound,
            Err(OnuError::DeviceUnreachable(reason)) => CoordinateOutcome::Unreachable(reason),
            Err(e @ OnuError::DeadlineExceeded(_)) => CoordinateOutcome::Unreachable(e.to_string()),
            Err(e) => CoordinateOutcome::Failed(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSummary {
    pub total: usize,
    pub live: usize,
    pub cached: usize,
    pub stale: usize,
    pub not_found: usize,
    pub unreachable: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PortListing {
    pub board: u8,
    pub port: u8,
    /// По возрастанию индекса ONU
    pub outcomes: Vec<(DeviceCoordinate, CoordinateOutcome)>,
}

impl PortListing {
    fn new(board: u8, port: u8, outcomes: BTreeMap<DeviceCoordinate, CoordinateOutcome>) -> Self {
        Self {
            board,
            port,
            outcomes: outcomes.into_iter().collect(),
        }
    }

    fn from_cache(board: u8, port: u8, entries: Vec<CacheEntry>, freshness: Freshness) -> Self {
        let outcomes = entries
            .into_iter()
            .map(|entry| {
                (
                    entry.coordinate(),
                    CoordinateOutcome::Found(OnuView::from_cache(entry, freshness)),
                )
            })
            .collect();
        Self::new(board, port, outcomes)
    }

    /// Все полученные записи, без координат с ошибками
    pub fn records(&self) -> impl Iterator<Item = &OnuView> {
        self.outcomes.iter().filter_map(|(_, outcome)| outcome.view())
    }

    pub fn outcome(&self, coordinate: DeviceCoordinate) -> Option<&CoordinateOutcome> {
        self.outcomes
            .iter()
            .find(|(c, _)| *c == coordinate)
            .map(|(_, outcome)| outcome)
    }

    pub fn summary(&self) -> PortSummary {
        let mut summary = PortSummary {
            total: self.outcomes.len(),
            ..PortSummary::default()
        };
        for (_, outcome) in &self.outcomes {
            match outcome.tag() {
                "live" => summary.live += 1,
                "cached" => summary.cached += 1,
                "stale" => summary.stale += 1,
                "not_found" => summary.not_found += 1,
                "unreachable" => summary.unreachable += 1,
                _ => summary.failed += 1,
            }
        }
        summary
    }
}

/// Параметры опроса
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Давность кэша по умолчанию, если вызывающий её не указал
    pub default_staleness: Duration,
    /// Сколько координат опрашивается одновременно
    pub fan_out: usize,
    pub request_timeout: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            default_staleness: Duration::from_secs(30),
            fan_out: 8,
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
pub struct OnuService {
    device: Arc<dyn DeviceRepository>,
    cache: Arc<dyn CacheRepository>,
    settings: ServiceSettings,
    shutdown: CancellationToken,
}

impl OnuService {
    pub fn new(
        device: Arc<dyn DeviceRepository>,
        cache: Arc<dyn CacheRepository>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            device,
            cache,
            settings: ServiceSettings {
                fan_out: settings.fan_out.max(1),
                ..settings
            },
            shutdown: CancellationToken::new(),
        }
    }

    /// Токен остановки сервиса: его отмена обрывает все текущие запросы
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn onu_capacity(&self) -> u16 {
        self.device.onu_capacity()
    }

    #[instrument(skip(self), fields(coordinate = %coordinate))]
    pub async fn get_onu(&self, coordinate: DeviceCoordinate, max_staleness: Option<Duration>) -> Result<OnuView> {
        self.validate_coordinate(coordinate)?;
        let max_staleness = max_staleness.unwrap_or(self.settings.default_staleness);
        let scope = self.scope();

        let cached = self
            .bounded(&scope, self.cached_entry(coordinate))
            .await?
            .flatten();
        if let Some(view) = cache_hit(coordinate, cached.as_ref(), Some(max_staleness)) {
            return Ok(view);
        }

        match self
            .bounded(&scope, self.device.fetch_onu(coordinate, &scope.cancel))
            .await?
        {
            Some(result) => self.settle(coordinate, result, cached).await,
            None => past_deadline(coordinate, cached, scope.timeout),
        }
    }

    #[instrument(skip(self))]
    pub async fn list_onus_for_port(
        &self,
        board: u8,
        port: u8,
        max_staleness: Option<Duration>,
    ) -> Result<PortListing> {
        self.validate_port(board, port)?;
        let max_staleness = max_staleness.unwrap_or(self.settings.default_staleness);
        let scope = self.scope();

        let scanned = self
            .bounded(&scope, self.scan_port(board, port))
            .await?
            .unwrap_or_default();

        let now = Utc::now();
        if !scanned.is_empty() && scanned.iter().all(|e| e.is_fresh(now, max_staleness)) {
            debug!(count = scanned.len(), "Порт целиком свежий в кэше");
            return Ok(PortListing::from_cache(board, port, scanned, Freshness::Cached));
        }

        let indices = match self
            .bounded(&scope, self.device.onu_indices(board, port, &scope.cancel))
            .await?
        {
            Some(Ok(indices)) => indices,
            Some(Err(DeviceError::Unreachable(reason))) => {
                return stale_port(board, port, scanned, OnuError::DeviceUnreachable(reason));
            }
            Some(Err(e)) => return Err(e.into()),
            None => return stale_port(board, port, scanned, OnuError::DeadlineExceeded(scope.timeout)),
        };

        let coordinates: Vec<DeviceCoordinate> = indices
            .iter()
            .map(|onu| DeviceCoordinate::new(board, port, *onu))
            .collect();

        self.invalidate_ghosts(&scanned, &coordinates).await;

        let mut cached = match self.bounded(&scope, self.cache.get_many(&coordinates)).await? {
            Some(Ok(cached)) => cached,
            Some(Err(e)) => {
                warn!(error = %e, "Пакетное чтение кэша не удалось, считаем промахом");
                Default::default()
            }
            None => Default::default(),
        };

        let mut outcomes = BTreeMap::new();
        let mut pending = Vec::new();
        let now = Utc::now();
        for coordinate in coordinates {
            match cached.remove(&coordinate) {
                Some(entry) if entry.is_fresh(now, max_staleness) => {
                    outcomes.insert(
                        coordinate,
                        CoordinateOutcome::Found(OnuView::from_cache(entry, Freshness::Cached)),
                    );
                }
                entry => pending.push((coordinate, entry)),
            }
        }

        debug!(cached = outcomes.len(), refresh = pending.len(), "Опрос порта");
        outcomes.extend(self.refresh_many(pending, Some(max_staleness), &scope).await?);
        Ok(PortListing::new(board, port, outcomes))
    }

    /// Принудительный опрос всего порта мимо проверки свежести.
    ///
    /// Порт перечисляется так же, как в `fetch_onus_for_port`, но каждая ONU
    /// опрашивается отдельной задачей, чтобы при таймауте запроса уже
    /// опрошенные попали в ответ, а остальные отдались из кэша.
    #[instrument(skip(self))]
    pub async fn refresh_port(&self, board: u8, port: u8) -> Result<PortListing> {
        self.validate_port(board, port)?;
        let scope = self.scope();

        let scanned = self
            .bounded(&scope, self.scan_port(board, port))
            .await?
            .unwrap_or_default();
        let indices = match self
            .bounded(&scope, self.device.onu_indices(board, port, &scope.cancel))
            .await?
        {
            Some(indices) => indices?,
            None => return Err(OnuError::DeadlineExceeded(scope.timeout)),
        };

        let enumerated: Vec<DeviceCoordinate> = indices
            .iter()
            .map(|onu| DeviceCoordinate::new(board, port, *onu))
            .collect();
        self.invalidate_ghosts(&scanned, &enumerated).await;

        let mut previous: BTreeMap<DeviceCoordinate, CacheEntry> =
            scanned.into_iter().map(|e| (e.coordinate(), e)).collect();
        let pending = enumerated
            .into_iter()
            .map(|coordinate| (coordinate, previous.remove(&coordinate)))
            .collect();

        let outcomes = self.refresh_many(pending, None, &scope).await?;
        let listing = PortListing::new(board, port, outcomes);
        info!(summary = ?listing.summary(), "Порт опрошен принудительно");
        Ok(listing)
    }

    /// Записывает описание ONU на OLT и сбрасывает её запись в кэше
    #[instrument(skip(self, description), fields(coordinate = %coordinate))]
    pub async fn update_description(&self, coordinate: DeviceCoordinate, description: &str) -> Result<()> {
        self.validate_coordinate(coordinate)?;
        validate_description(description)?;

        self.with_deadline(|cancel| async move {
            self.device
                .set_description(coordinate, description, &cancel)
                .await?;
            if let Err(e) = self.cache.invalidate(coordinate).await {
                warn!(error = %e, "Не удалось сбросить запись кэша после записи описания");
            }
            info!("Описание ONU обновлено");
            Ok(())
        })
        .await
    }

    /// Свободные индексы ONU на порту, по возрастанию
    #[instrument(skip(self))]
    pub async fn free_onu_indices(&self, board: u8, port: u8) -> Result<Vec<u16>> {
        self.validate_port(board, port)?;

        self.with_deadline(|cancel| async move {
            let used: HashSet<u16> = self
                .device
                .onu_indices(board, port, &cancel)
                .await?
                .into_iter()
                .collect();
            Ok((1..=self.device.onu_capacity())
                .filter(|onu| !used.contains(onu))
                .collect())
        })
        .await
    }

    fn scope(&self) -> RequestScope {
        let timeout = self.settings.request_timeout;
        RequestScope {
            cancel: self.shutdown.child_token(),
            deadline: Instant::now() + timeout,
            timeout,
        }
    }

    /// Ждёт `operation` до конца таймаута запроса. `None` значит, что время
    /// вышло и токен запроса уже отменён; остановка сервиса даёт `Cancelled`.
    async fn bounded<T>(&self, scope: &RequestScope, operation: impl Future<Output = T>) -> Result<Option<T>> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(OnuError::Cancelled),
            result = tokio::time::timeout_at(scope.deadline, operation) => match result {
                Ok(value) => Ok(Some(value)),
                Err(_) => {
                    scope.cancel.cancel();
                    warn!(timeout = ?scope.timeout, "Запрос превысил таймаут");
                    Ok(None)
                }
            },
        }
    }

    /// Вызов без кэша, которым нечем подменить ответ OLT после таймаута
    async fn with_deadline<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let scope = self.scope();
        match self.bounded(&scope, operation(scope.cancel.clone())).await? {
            Some(result) => result,
            None => Err(OnuError::DeadlineExceeded(scope.timeout)),
        }
    }

    async fn cached_entry(&self, coordinate: DeviceCoordinate) -> Option<CacheEntry> {
        match self.cache.get(coordinate).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(%coordinate, error = %e, "Чтение кэша не удалось, считаем промахом");
                None
            }
        }
    }

    /// Путь одной координаты: свежий кэш, иначе опрос OLT.
    /// Без `max_staleness` кэш не проверяется.
    async fn resolve(
        &self,
        coordinate: DeviceCoordinate,
        max_staleness: Option<Duration>,
        cached: Option<CacheEntry>,
        cancel: &CancellationToken,
    ) -> Result<OnuView> {
        if let Some(view) = cache_hit(coordinate, cached.as_ref(), max_staleness) {
            return Ok(view);
        }

        let result = self.device.fetch_onu(coordinate, cancel).await;
        self.settle(coordinate, result, cached).await
    }

    /// Применяет результат опроса к кэшу
    async fn settle(
        &self,
        coordinate: DeviceCoordinate,
        result: std::result::Result<OnuRecord, DeviceError>,
        cached: Option<CacheEntry>,
    ) -> Result<OnuView> {
        match result {
            Ok(record) => {
                if let Err(e) = self.cache.put(coordinate, &record).await {
                    warn!(%coordinate, error = %e, "Запись в кэш не удалась");
                }
                Ok(OnuView::live(record))
            }
            Err(DeviceError::Unreachable(reason)) => match cached {
                Some(entry) => {
                    warn!(%coordinate, %reason, fetched_at = %entry.fetched_at, "OLT недоступен, отдаём устаревшую запись");
                    Ok(OnuView::from_cache(entry, Freshness::Stale))
                }
                None => Err(OnuError::DeviceUnreachable(reason)),
            },
            Err(DeviceError::NotProvisioned(_)) => {
                if let Err(e) = self.cache.invalidate(coordinate).await {
                    warn!(%coordinate, error = %e, "Не удалось сбросить запись кэша");
                }
                Err(OnuError::NotFound(coordinate))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Параллельный опрос координат, не больше `fan_out` одновременно.
    ///
    /// Таймаут запроса не теряет уже полученные итоги: координаты, которые
    /// не успели опросить, отдаются из кэша как `stale`, а без записи в кэше
    /// помечаются недоступными.
    async fn refresh_many(
        &self,
        pending: Vec<(DeviceCoordinate, Option<CacheEntry>)>,
        max_staleness: Option<Duration>,
        scope: &RequestScope,
    ) -> Result<BTreeMap<DeviceCoordinate, CoordinateOutcome>> {
        // если задача оборвётся, координата останется с этим итогом
        let mut outcomes: BTreeMap<_, _> = pending
            .iter()
            .map(|(c, _)| (*c, CoordinateOutcome::Failed("опрос прерван".to_string())))
            .collect();
        let mut unfinished: BTreeMap<DeviceCoordinate, Option<CacheEntry>> =
            pending.iter().cloned().collect();

        let permits = Arc::new(Semaphore::new(self.settings.fan_out));
        let mut tasks = JoinSet::new();

        for (coordinate, cached) in pending {
            let permits = permits.clone();
            let service = self.clone();
            let cancel = scope.cancel.clone();
            tasks.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => service.resolve(coordinate, max_staleness, cached, &cancel).await,
                    Err(_) => Err(OnuError::Cancelled),
                };
                (coordinate, CoordinateOutcome::from_result(result))
            });
        }

        let drained = self
            .bounded(scope, async {
                while let Some(joined) = tasks.join_next().await {
                    match joined {
                        Ok((coordinate, outcome)) => {
                            unfinished.remove(&coordinate);
                            outcomes.insert(coordinate, outcome);
                        }
                        Err(e) => error!(error = %e, "Задача опроса ONU завершилась аварийно"),
                    }
                }
            })
            .await?;

        if drained.is_none() {
            tasks.abort_all();
            warn!(count = unfinished.len(), "Не все ONU опрошены до таймаута запроса");
            for (coordinate, cached) in unfinished {
                let result = past_deadline(coordinate, cached, scope.timeout);
                outcomes.insert(coordinate, CoordinateOutcome::from_result(result));
            }
        }
        Ok(outcomes)
    }

    async fn scan_port(&self, board: u8, port: u8) -> Vec<CacheEntry> {
        match self.cache.scan_port(board, port).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(board, port, error = %e, "Сканирование кэша порта не удалось");
                Vec::new()
            }
        }
    }

    /// Удаляет из кэша ONU, которых больше нет на порту
    async fn invalidate_ghosts(&self, scanned: &[CacheEntry], enumerated: &[DeviceCoordinate]) {
        let enumerated: HashSet<&DeviceCoordinate> = enumerated.iter().collect();
        for entry in scanned {
            let coordinate = entry.coordinate();
            if enumerated.contains(&coordinate) {
                continue;
            }
            match self.cache.invalidate(coordinate).await {
                Ok(()) => info!(%coordinate, "ONU пропала с порта, запись кэша удалена"),
                Err(e) => warn!(%coordinate, error = %e, "Не удалось удалить запись пропавшей ONU"),
            }
        }
    }

    fn validate_port(&self, board: u8, port: u8) -> Result<()> {
        if board == 0 || port == 0 {
            return Err(OnuError::InvalidInput(format!(
                "плата и порт нумеруются с 1, получено {}/{}",
                board, port
            )));
        }
        Ok(())
    }

    fn validate_coordinate(&self, coordinate: DeviceCoordinate) -> Result<()> {
        self.validate_port(coordinate.board, coordinate.port)?;
        let capacity = self.device.onu_capacity();
        if coordinate.onu == 0 || coordinate.onu > capacity {
            return Err(OnuError::InvalidInput(format!(
                "индекс ONU {} вне диапазона 1..={}",
                coordinate.onu, capacity
            )));
        }
        Ok(())
    }
}

fn validate_description(description: &str) -> Result<()> {
    if description.len() > MAX_DESCRIPTION_LEN {
        return Err(OnuError::InvalidInput(format!(
            "описание длиннее {} байт",
            MAX_DESCRIPTION_LEN
        )));
    }
    if description.chars().any(char::is_control) {
        return Err(OnuError::InvalidInput("описание содержит управляющие символы".to_string()));
    }
    Ok(())
}

/// Токен отмены и крайний срок одного вызова сервиса
struct RequestScope {
    cancel: CancellationToken,
    deadline: Instant,
    timeout: Duration,
}

fn cache_hit(
    coordinate: DeviceCoordinate,
    cached: Option<&CacheEntry>,
    max_staleness: Option<Duration>,
) -> Option<OnuView> {
    let entry = cached?;
    if !entry.is_fresh(Utc::now(), max_staleness?) {
        return None;
    }
    debug!(%coordinate, "Попадание в кэш");
    Some(OnuView::from_cache(entry.clone(), Freshness::Cached))
}

/// Итог координаты, которую не успели опросить до таймаута запроса
fn past_deadline(coordinate: DeviceCoordinate, cached: Option<CacheEntry>, timeout: Duration) -> Result<OnuView> {
    match cached {
        Some(entry) => {
            warn!(%coordinate, fetched_at = %entry.fetched_at, "OLT не ответил вовремя, отдаём устаревшую запись");
            Ok(OnuView::from_cache(entry, Freshness::Stale))
        }
        None => Err(OnuError::DeadlineExceeded(timeout)),
    }
}

/// Кэш порта целиком как устаревший, если OLT не перечислил ONU
fn stale_port(board: u8, port: u8, scanned: Vec<CacheEntry>, reason: OnuError) -> Result<PortListing> {
    if scanned.is_empty() {
        return Err(reason);
    }
    warn!(%reason, count = scanned.len(), "OLT не перечислил ONU, отдаём кэш порта как устаревший");
    Ok(PortListing::from_cache(board, port, scanned, Freshness::Stale))
}

#[cfg(test)]
mod tests;
