#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use olt_snmp_poller::cache::{MemoryStore, OnuCacheRepository};
use olt_snmp_poller::config::OltProfile;
use olt_snmp_poller::config::profile::{OidTemplate, OnuOids};
use olt_snmp_poller::device::SnmpDeviceRepository;
use olt_snmp_poller::models::DeviceCoordinate;
use olt_snmp_poller::snmp::{
    InMemoryAgent, ObjectIdentifier, RetryPolicy, SnmpClient, SnmpValue, TransportConcurrency,
};
use olt_snmp_poller::usecase::{OnuService, ServiceSettings};

pub struct Harness {
    pub agent: Arc<InMemoryAgent>,
    pub cache: Arc<OnuCacheRepository>,
    pub service: OnuService,
}

pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        timeout: Duration::from_millis(25),
        retries: 1,
        backoff_base: Duration::from_millis(1),
        backoff_max: Duration::from_millis(4),
    }
}

pub fn settings() -> ServiceSettings {
    ServiceSettings {
        default_staleness: Duration::from_secs(30),
        fan_out: 8,
        request_timeout: Duration::from_secs(5),
    }
}

pub fn harness_with(agent: InMemoryAgent, max_in_flight: usize, settings: ServiceSettings) -> Harness {
    harness_full(agent, fast_policy(), max_in_flight, settings)
}

pub fn harness_full(
    agent: InMemoryAgent,
    policy: RetryPolicy,
    max_in_flight: usize,
    settings: ServiceSettings,
) -> Harness {
    let agent = Arc::new(agent);
    let client = SnmpClient::new(agent.clone(), policy, max_in_flight);
    let device = Arc::new(SnmpDeviceRepository::new(client, OltProfile::default(), settings.fan_out));
    let cache = Arc::new(OnuCacheRepository::new(Arc::new(MemoryStore::new()), "it-olt"));
    let service = OnuService::new(device, cache.clone(), settings);
    Harness { agent, cache, service }
}

pub fn harness() -> Harness {
    harness_with(InMemoryAgent::new(TransportConcurrency::Serialized), 1, settings())
}

pub fn oid(field: impl Fn(&OnuOids) -> &OidTemplate, c: DeviceCoordinate) -> ObjectIdentifier {
    let profile = OltProfile::default();
    field(&profile.oids)
        .render(profile.if_index(c.board, c.port), c.onu)
        .expect("default profile renders")
}

/// Заводит ONU на агенте со всеми атрибутами
pub fn provision(agent: &InMemoryAgent, c: DeviceCoordinate, rx_centi_dbm: i64) {
    let serial = format!("ZTEG{:04X}{:04X}", c.port, c.onu);
    agent.insert(oid(|o| &o.serial_number, c), SnmpValue::OctetString(serial.into_bytes()));
    agent.insert(oid(|o| &o.status, c), SnmpValue::Integer(4));
    agent.insert(oid(|o| &o.rx_power, c), SnmpValue::Integer(rx_centi_dbm));
    agent.insert(oid(|o| &o.tx_power, c), SnmpValue::Integer(215));
    agent.insert(oid(|o| &o.description, c), SnmpValue::OctetString(format!("customer-{}", c.onu).into_bytes()));
    agent.insert(oid(|o| &o.name, c), SnmpValue::OctetString(format!("ONU-{}:{}", c.port, c.onu).into_bytes()));
    agent.insert(oid(|o| &o.model, c), SnmpValue::OctetString(b"F660".to_vec()));
}
