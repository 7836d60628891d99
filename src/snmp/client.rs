use futures::stream::{self, BoxStream, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::{ErrorStatus, Result, SnmpError};
use super::oid::ObjectIdentifier;
use super::transport::{Response, SnmpTransport, SnmpValue, TransportConcurrency, Varbind};

/// Политика таймаутов и повторов для одного SNMP вызова
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl RetryPolicy {
    /// Пауза перед повтором номер `attempt + 1`: base * 2^attempt, не больше max
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }

    /// Наибольшая длительность одного вызова: все попытки и паузы между ними
    pub fn budget(&self) -> Duration {
        let attempts = self.timeout.saturating_mul(self.retries.saturating_add(1));
        (0..self.retries).fold(attempts, |total, attempt| total.saturating_add(self.backoff(attempt)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            retries: 2,
            backoff_base: Duration::from_millis(200),
            backoff_max: Duration::from_secs(2),
        }
    }
}

/// SNMP клиент: таймауты, повторы с экспоненциальной паузой, отмена и
/// ограничение числа одновременных запросов к транспорту.
#[derive(Clone)]
pub struct SnmpClient {
    transport: Arc<dyn SnmpTransport>,
    policy: RetryPolicy,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
}

impl SnmpClient {
    /// Размер пула запросов определяется возможностями транспорта:
    /// `Serialized` всегда получает ровно один слот, независимо от `max_in_flight`.
    pub fn new(transport: Arc<dyn SnmpTransport>, policy: RetryPolicy, max_in_flight: usize) -> Self {
        let concurrency = transport.concurrency();
        let max_in_flight = match concurrency {
            TransportConcurrency::Serialized => 1,
            TransportConcurrency::Multiplexed => max_in_flight.max(1),
        };
        info!(
            ?concurrency,
            max_in_flight,
            timeout_ms = policy.timeout.as_millis() as u64,
            retries = policy.retries,
            "SNMP клиент инициализирован"
        );

        Self {
            transport,
            policy,
            permits: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// GET одного OID. Исключения varbind превращаются в типизированные ошибки.
    pub async fn get(&self, oid: &ObjectIdentifier, cancel: &CancellationToken) -> Result<SnmpValue> {
        let response = self.call("GET", oid, cancel, || self.transport.get(oid)).await?;
        let varbind = single_varbind(oid, response)?;

        match varbind.value {
            SnmpValue::NoSuchObject => Err(SnmpError::NoSuchObject(oid.to_string())),
            SnmpValue::NoSuchInstance => Err(SnmpError::NoSuchInstance(oid.to_string())),
            SnmpValue::EndOfMibView => Err(SnmpError::EndOfMibView(oid.to_string())),
            value => Ok(value),
        }
    }

    /// GETNEXT: varbind возвращается как есть, включая `endOfMibView`
    pub async fn get_next(&self, oid: &ObjectIdentifier, cancel: &CancellationToken) -> Result<Varbind> {
        let response = self
            .call("GETNEXT", oid, cancel, || self.transport.get_next(oid))
            .await?;
        single_varbind(oid, response)
    }

    pub async fn set(
        &self,
        oid: &ObjectIdentifier,
        value: SnmpValue,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let value = &value;
        self.call("SET", oid, cancel, || self.transport.set(oid, value))
            .await?;
        Ok(())
    }

    /// Ленивый обход поддерева `base` через GETNEXT.
    ///
    /// Поток конечен: заканчивается на первом OID вне поддерева или на
    /// `endOfMibView`, после ошибки больше ничего не отдаёт. Повторный обход
    /// требует нового вызова `walk`.
    pub fn walk<'a>(
        &'a self,
        base: ObjectIdentifier,
        cancel: &'a CancellationToken,
    ) -> BoxStream<'a, Result<Varbind>> {
        let start = Some(base.clone());
        stream::try_unfold(start, move |cursor| {
            let base = base.clone();
            async move {
                let Some(cursor) = cursor else {
                    return Ok(None);
                };
                let varbind = self.get_next(&cursor, cancel).await?;

                if varbind.value == SnmpValue::EndOfMibView || !varbind.oid.starts_with(&base) {
                    return Ok(None);
                }
                if varbind.oid <= cursor {
                    return Err(SnmpError::Malformed(format!(
                        "агент вернул невозрастающий OID {} после {}",
                        varbind.oid, cursor
                    )));
                }

                let next = varbind.oid.clone();
                Ok(Some((varbind, Some(next))))
            }
        })
        .boxed()
    }

    async fn call<F, Fut>(
        &self,
        op: &'static str,
        oid: &ObjectIdentifier,
        cancel: &CancellationToken,
        attempt_fn: F,
    ) -> Result<Response>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Response>>,
    {
        // Ожидание слота не входит в таймаут вызова
        let _permit = tokio::select! {
            _ = cancel.cancelled() => return Err(SnmpError::Cancelled),
            permit = self.permits.acquire() => permit
                .map_err(|_| SnmpError::Transport("пул SNMP запросов закрыт".to_string()))?,
        };

        let attempts = self.policy.retries + 1;

        for attempt in 0..attempts {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(SnmpError::Cancelled),
                outcome = timeout(self.policy.timeout, attempt_fn()) => outcome,
            };

            match outcome {
                Ok(Ok(response)) => return check_status(oid, response),
                Ok(Err(e)) if e.is_transient() => {
                    warn!(op, %oid, attempt, error = %e, "SNMP запрос не удался, повтор");
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => debug!(op, %oid, attempt, "SNMP таймаут"),
            }

            if attempt + 1 < attempts {
                let delay = self.policy.backoff(attempt);
                tokio::select! {
                    _ = cancel.cancelled() => return Err(SnmpError::Cancelled),
                    _ = sleep(delay) => {}
                }
            }
        }

        // исчерпанные повторы одинаково означают недоступный агент
        Err(SnmpError::Timeout {
            oid: oid.to_string(),
            attempts,
        })
    }
}

/// Переводит ненулевой error-status PDU в типизированную ошибку
fn check_status(oid: &ObjectIdentifier, response: Response) -> Result<Response> {
    let Some(status) = ErrorStatus::from_code(response.error_status) else {
        return Ok(response);
    };

    // error-index считается с 1; для одиночных запросов это всегда наш OID
    let failed_oid = response
        .error_index
        .checked_sub(1)
        .and_then(|i| response.varbinds.get(i as usize))
        .map(|vb| vb.oid.to_string())
        .unwrap_or_else(|| oid.to_string());

    let error = match status {
        ErrorStatus::NoSuchName => SnmpError::NoSuchObject(failed_oid),
        status if status.is_permission_denied() => SnmpError::PermissionDenied {
            oid: failed_oid,
            status,
        },
        status => SnmpError::Status {
            oid: failed_oid,
            status,
        },
    };
    Err(error)
}

fn single_varbind(oid: &ObjectIdentifier, response: Response) -> Result<Varbind> {
    response
        .varbinds
        .into_iter()
        .next()
        .ok_or_else(|| SnmpError::Malformed(format!("SNMP ответ пустой: {}", oid)))
}
