use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::error::{Result, SnmpError};
use super::oid::ObjectIdentifier;
use super::transport::{Response, SnmpTransport, SnmpValue, TransportConcurrency, Varbind};

/// SNMP агент в памяти: MIB как упорядоченная карта OID → значение.
///
/// Используется тестами вместо реального OLT. Умеет изображать
/// недоступность (запрос висит до таймаута клиента), отдавать error-status
/// для конкретного OID, сбоить транспортом заданное число раз и отвечать на
/// GETNEXT заранее заданным varbind, даже неупорядоченным. Сам агент
/// запросы не сериализует, поэтому `peak_in_flight` показывает, что
/// реально делает клиент.
pub struct InMemoryAgent {
    concurrency: TransportConcurrency,
    latency: Duration,
    objects: Mutex<BTreeMap<ObjectIdentifier, SnmpValue>>,
    status_faults: Mutex<HashMap<ObjectIdentifier, u32>>,
    next_overrides: Mutex<HashMap<ObjectIdentifier, Varbind>>,
    transient_faults: Mutex<VecDeque<SnmpError>>,
    unreachable: AtomicBool,
    requests: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl InMemoryAgent {
    pub fn new(concurrency: TransportConcurrency) -> Self {
        Self {
            concurrency,
            latency: Duration::ZERO,
            objects: Mutex::new(BTreeMap::new()),
            status_faults: Mutex::new(HashMap::new()),
            next_overrides: Mutex::new(HashMap::new()),
            transient_faults: Mutex::new(VecDeque::new()),
            unreachable: AtomicBool::new(false),
            requests: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn insert(&self, oid: ObjectIdentifier, value: SnmpValue) {
        lock(&self.objects).insert(oid, value);
    }

    pub fn remove(&self, oid: &ObjectIdentifier) {
        lock(&self.objects).remove(oid);
    }

    /// Удаляет все объекты, для которых `predicate` истинен
    pub fn remove_where(&self, predicate: impl Fn(&ObjectIdentifier) -> bool) {
        lock(&self.objects).retain(|oid, _| !predicate(oid));
    }

    pub fn value(&self, oid: &ObjectIdentifier) -> Option<SnmpValue> {
        lock(&self.objects).get(oid).cloned()
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Следующие `times` запросов завершатся ошибкой `error`
    pub fn fail_next(&self, error: SnmpError, times: usize) {
        let mut faults = lock(&self.transient_faults);
        for _ in 0..times {
            faults.push_back(error.clone());
        }
    }

    /// Любой запрос к `oid` вернёт PDU с указанным error-status
    pub fn fail_with_status(&self, oid: ObjectIdentifier, status: u32) {
        lock(&self.status_faults).insert(oid, status);
    }

    /// GETNEXT от `after` вернёт `next` вместо следующего объекта MIB
    pub fn override_next(&self, after: ObjectIdentifier, next: Varbind) {
        lock(&self.next_overrides).insert(after, next);
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn reset_request_count(&self) {
        self.requests.store(0, Ordering::SeqCst);
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn serve<F>(&self, oid: &ObjectIdentifier, respond: F) -> Result<Response>
    where
        F: FnOnce(&mut BTreeMap<ObjectIdentifier, SnmpValue>) -> Varbind,
    {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.unreachable.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if let Some(error) = lock(&self.transient_faults).pop_front() {
            return Err(error);
        }
        if let Some(status) = lock(&self.status_faults).get(oid).copied() {
            return Ok(Response {
                error_status: status,
                error_index: 1,
                varbinds: vec![Varbind::new(oid.clone(), SnmpValue::Null)],
            });
        }

        let varbind = respond(&mut lock(&self.objects));
        Ok(Response::ok(vec![varbind]))
    }
}

#[async_trait]
impl SnmpTransport for InMemoryAgent {
    fn concurrency(&self) -> TransportConcurrency {
        self.concurrency
    }

    async fn get(&self, oid: &ObjectIdentifier) -> Result<Response> {
        self.serve(oid, |objects| {
            let value = objects.get(oid).cloned().unwrap_or(SnmpValue::NoSuchInstance);
            Varbind::new(oid.clone(), value)
        })
        .await
    }

    async fn get_next(&self, oid: &ObjectIdentifier) -> Result<Response> {
        let scripted = lock(&self.next_overrides).get(oid).cloned();
        self.serve(oid, |objects| {
            if let Some(varbind) = scripted {
                return varbind;
            }
            objects
                .range((Bound::Excluded(oid.clone()), Bound::Unbounded))
                .next()
                .map(|(next, value)| Varbind::new(next.clone(), value.clone()))
                .unwrap_or_else(|| Varbind::new(oid.clone(), SnmpValue::EndOfMibView))
        })
        .await
    }

    async fn set(&self, oid: &ObjectIdentifier, value: &SnmpValue) -> Result<Response> {
        self.serve(oid, |objects| {
            objects.insert(oid.clone(), value.clone());
            Varbind::new(oid.clone(), value.clone())
        })
        .await
    }
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
