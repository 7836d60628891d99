use super::*;
use crate::cache::tests::record_at;
use crate::cache::{MemoryStore, OnuCacheRepository};
use crate::config::OltProfile;
use crate::device::SnmpDeviceRepository;
use crate::models::{OnuStatus, OpticalPower};
use crate::snmp::{InMemoryAgent, ObjectIdentifier, RetryPolicy, SnmpClient, SnmpValue, TransportConcurrency};

struct Fixture {
    agent: Arc<InMemoryAgent>,
    cache: Arc<OnuCacheRepository>,
    service: OnuService,
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        timeout: Duration::from_millis(20),
        retries: 1,
        backoff_base: Duration::from_millis(1),
        backoff_max: Duration::from_millis(2),
    }
}

fn fixture_with(policy: RetryPolicy, settings: ServiceSettings) -> Fixture {
    fixture_on(InMemoryAgent::new(TransportConcurrency::Serialized), policy, settings)
}

fn fixture_on(agent: InMemoryAgent, policy: RetryPolicy, settings: ServiceSettings) -> Fixture {
    let agent = Arc::new(agent);
    let client = SnmpClient::new(agent.clone(), policy, 4);
    let device = Arc::new(SnmpDeviceRepository::new(client, OltProfile::default(), 4));
    let cache = Arc::new(OnuCacheRepository::new(Arc::new(MemoryStore::new()), "olt-test"));
    let service = OnuService::new(device, cache.clone(), settings);
    Fixture { agent, cache, service }
}

fn fixture() -> Fixture {
    fixture_with(
        fast_policy(),
        ServiceSettings {
            default_staleness: Duration::from_secs(30),
            fan_out: 4,
            request_timeout: Duration::from_secs(5),
        },
    )
}

fn oid(field: fn(&crate::config::profile::OnuOids) -> &crate::config::profile::OidTemplate, c: DeviceCoordinate) -> ObjectIdentifier {
    let profile = OltProfile::default();
    field(&profile.oids)
        .render(profile.if_index(c.board, c.port), c.onu)
        .unwrap()
}

fn provision(agent: &InMemoryAgent, c: DeviceCoordinate, rx_centi_dbm: i64) {
    let serial = format!("ZTEG{:08X}", u32::from(c.onu) << 8 | u32::from(c.port));
    agent.insert(oid(|o| &o.serial_number, c), SnmpValue::OctetString(serial.into_bytes()));
    agent.insert(oid(|o| &o.status, c), SnmpValue::Integer(4));
    agent.insert(oid(|o| &o.rx_power, c), SnmpValue::Integer(rx_centi_dbm));
    agent.insert(oid(|o| &o.tx_power, c), SnmpValue::Integer(230));
    agent.insert(oid(|o| &o.description, c), SnmpValue::OctetString(b"subscriber".to_vec()));
    agent.insert(oid(|o| &o.name, c), SnmpValue::OctetString(b"ONU".to_vec()));
    agent.insert(oid(|o| &o.model, c), SnmpValue::OctetString(b"F601".to_vec()));
}

async fn let_cache_age() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test]
async fn polled_record_round_trips_through_cache() {
    let f = fixture();
    let c = DeviceCoordinate::new(1, 2, 5);
    provision(&f.agent, c, -1500);

    let live = f.service.get_onu(c, None).await.unwrap();
    assert_eq!(live.freshness, Freshness::Live);
    assert_eq!(live.record.rx_power(), Some(OpticalPower::from_centi_dbm(-1500)));
    assert_eq!(live.record.rx_power().map(|p| p.to_string()).as_deref(), Some("-15.00"));

    let entry = f.cache.get(c).await.unwrap().unwrap();
    assert_eq!(entry.record, live.record);
    assert_eq!(entry.fetched_at, live.fetched_at);

    let cached = f.service.get_onu(c, Some(Duration::from_secs(3600))).await.unwrap();
    assert_eq!(cached.freshness, Freshness::Cached);
    assert_eq!(cached.record, live.record);
}

#[tokio::test]
async fn second_call_within_staleness_window_sends_no_snmp() {
    let f = fixture();
    let c = DeviceCoordinate::new(1, 2, 5);
    provision(&f.agent, c, -1500);

    f.service.get_onu(c, Some(Duration::from_secs(30))).await.unwrap();
    assert!(f.agent.request_count() > 0);
    f.agent.reset_request_count();

    let view = f.service.get_onu(c, Some(Duration::from_secs(30))).await.unwrap();
    assert_eq!(view.freshness, Freshness::Cached);
    assert_eq!(f.agent.request_count(), 0);
}

#[tokio::test]
async fn stale_entry_is_refreshed_from_device() {
    let f = fixture();
    let c = DeviceCoordinate::new(1, 1, 3);
    provision(&f.agent, c, -1500);
    f.service.get_onu(c, None).await.unwrap();

    f.agent.insert(oid(|o| &o.rx_power, c), SnmpValue::Integer(-2210));
    let_cache_age().await;

    let view = f.service.get_onu(c, Some(Duration::ZERO)).await.unwrap();
    assert_eq!(view.freshness, Freshness::Live);
    assert_eq!(view.record.rx_power(), Some(OpticalPower::from_centi_dbm(-2210)));
    assert_eq!(f.cache.get(c).await.unwrap().unwrap().record, view.record);
}

#[tokio::test]
async fn deprovisioned_onu_is_not_found_and_evicted() {
    let f = fixture();
    let c = DeviceCoordinate::new(1, 1, 3);
    provision(&f.agent, c, -1500);
    f.service.get_onu(c, None).await.unwrap();

    f.agent.remove(&oid(|o| &o.serial_number, c));
    let_cache_age().await;

    let err = f.service.get_onu(c, Some(Duration::ZERO)).await.unwrap_err();
    assert!(matches!(err, OnuError::NotFound(found) if found == c));
    assert!(!f.cache.contains(c).await.unwrap());

    // даже с большим окном старая запись больше не вернётся
    let err = f.service.get_onu(c, Some(Duration::from_secs(3600))).await.unwrap_err();
    assert!(matches!(err, OnuError::NotFound(_)));
}

#[tokio::test]
async fn unreachable_device_serves_stale_cache() {
    let f = fixture();
    let c = DeviceCoordinate::new(1, 1, 3);
    provision(&f.agent, c, -1500);
    let live = f.service.get_onu(c, None).await.unwrap();

    f.agent.set_unreachable(true);
    let_cache_age().await;

    let view = f.service.get_onu(c, Some(Duration::ZERO)).await.unwrap();
    assert!(view.is_stale());
    assert_eq!(view.record, live.record);
    assert_eq!(view.fetched_at, live.fetched_at);
}

#[tokio::test]
async fn unreachable_device_without_cache_fails() {
    let f = fixture();
    f.agent.set_unreachable(true);

    let err = f
        .service
        .get_onu(DeviceCoordinate::new(1, 1, 3), None)
        .await
        .unwrap_err();
    assert!(matches!(err, OnuError::DeviceUnreachable(_)));
}

#[tokio::test]
async fn unknown_status_code_is_not_an_error() {
    let f = fixture();
    let c = DeviceCoordinate::new(1, 1, 8);
    provision(&f.agent, c, -1500);
    f.agent.insert(oid(|o| &o.status, c), SnmpValue::Integer(250));

    let view = f.service.get_onu(c, None).await.unwrap();
    assert_eq!(view.record.status(), OnuStatus::Unknown);
}

#[tokio::test]
async fn decode_failure_leaves_cache_untouched() {
    let f = fixture();
    let c = DeviceCoordinate::new(1, 1, 8);
    provision(&f.agent, c, -1500);
    f.agent.insert(oid(|o| &o.serial_number, c), SnmpValue::Integer(1));

    let err = f.service.get_onu(c, None).await.unwrap_err();
    assert!(matches!(err, OnuError::Decode(_)));
    assert!(!f.cache.contains(c).await.unwrap());
}

#[tokio::test]
async fn out_of_range_coordinates_are_rejected() {
    let f = fixture();
    for c in [
        DeviceCoordinate::new(0, 1, 1),
        DeviceCoordinate::new(1, 0, 1),
        DeviceCoordinate::new(1, 1, 0),
        DeviceCoordinate::new(1, 1, 129),
    ] {
        let err = f.service.get_onu(c, None).await.unwrap_err();
        assert!(matches!(err, OnuError::InvalidInput(_)), "{}", c);
    }
    assert_eq!(f.agent.request_count(), 0);
}

#[tokio::test]
async fn port_listing_isolates_failing_coordinates() {
    let f = fixture();
    for onu in 1..=4 {
        provision(&f.agent, DeviceCoordinate::new(1, 1, onu), -1800);
    }
    let broken = DeviceCoordinate::new(1, 1, 3);
    f.agent.insert(oid(|o| &o.serial_number, broken), SnmpValue::OctetString(Vec::new()));

    let listing = f.service.list_onus_for_port(1, 1, None).await.unwrap();
    assert_eq!(listing.outcomes.len(), 4);
    assert_eq!(listing.records().count(), 3);
    assert!(matches!(listing.outcome(broken), Some(CoordinateOutcome::Failed(_))));

    let summary = listing.summary();
    assert_eq!(summary.total, 4);
    assert_eq!(summary.live, 3);
    assert_eq!(summary.failed, 1);

    let onus: Vec<u16> = listing.outcomes.iter().map(|(c, _)| c.onu).collect();
    assert_eq!(onus, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn fresh_port_is_served_from_cache_without_snmp() {
    let f = fixture();
    for onu in [1, 2, 5] {
        provision(&f.agent, DeviceCoordinate::new(1, 1, onu), -1800);
    }

    f.service.list_onus_for_port(1, 1, None).await.unwrap();
    f.agent.reset_request_count();

    let listing = f.service.list_onus_for_port(1, 1, None).await.unwrap();
    assert_eq!(f.agent.request_count(), 0);
    assert_eq!(listing.summary().cached, 3);
    assert!(listing.outcomes.iter().all(|(_, o)| o.tag() == "cached"));
}

#[tokio::test]
async fn port_listing_evicts_onus_that_left_the_port() {
    let f = fixture();
    for onu in [1, 2, 5] {
        provision(&f.agent, DeviceCoordinate::new(1, 1, onu), -1800);
    }
    f.service.list_onus_for_port(1, 1, None).await.unwrap();

    let gone = DeviceCoordinate::new(1, 1, 2);
    f.agent.remove(&oid(|o| &o.serial_number, gone));
    let_cache_age().await;

    let listing = f.service.list_onus_for_port(1, 1, Some(Duration::ZERO)).await.unwrap();
    assert!(listing.outcome(gone).is_none());
    assert_eq!(listing.summary().live, 2);
    assert!(!f.cache.contains(gone).await.unwrap());
}

#[tokio::test]
async fn port_listing_falls_back_to_stale_cache_when_unreachable() {
    let f = fixture();
    for onu in [1, 2] {
        provision(&f.agent, DeviceCoordinate::new(1, 1, onu), -1800);
    }
    f.service.list_onus_for_port(1, 1, None).await.unwrap();

    f.agent.set_unreachable(true);
    let_cache_age().await;

    let listing = f.service.list_onus_for_port(1, 1, Some(Duration::ZERO)).await.unwrap();
    assert_eq!(listing.summary().stale, 2);
    assert!(listing.records().all(OnuView::is_stale));

    let err = f.service.list_onus_for_port(1, 2, None).await.unwrap_err();
    assert!(matches!(err, OnuError::DeviceUnreachable(_)));
}

#[tokio::test]
async fn refresh_port_bypasses_fresh_cache() {
    let f = fixture();
    let c = DeviceCoordinate::new(1, 4, 1);
    provision(&f.agent, c, -1800);
    f.service.list_onus_for_port(1, 4, None).await.unwrap();

    f.agent.insert(oid(|o| &o.rx_power, c), SnmpValue::Integer(-2500));
    let listing = f.service.refresh_port(1, 4).await.unwrap();

    assert_eq!(listing.summary().live, 1);
    let view = listing.records().next().unwrap();
    assert_eq!(view.record.rx_power(), Some(OpticalPower::from_centi_dbm(-2500)));
    assert_eq!(f.cache.get(c).await.unwrap().unwrap().record, view.record);
}

#[tokio::test]
async fn free_indices_exclude_provisioned_onus() {
    let f = fixture();
    for onu in [1, 2, 7] {
        provision(&f.agent, DeviceCoordinate::new(1, 1, onu), -1800);
    }

    let free = f.service.free_onu_indices(1, 1).await.unwrap();
    assert_eq!(free.len(), 125);
    assert_eq!(&free[..5], &[3, 4, 5, 6, 8]);
    assert_eq!(free.last(), Some(&128));
}

#[tokio::test]
async fn description_update_writes_device_and_evicts_cache() {
    let f = fixture();
    let c = DeviceCoordinate::new(1, 1, 1);
    provision(&f.agent, c, -1800);
    f.service.get_onu(c, None).await.unwrap();

    f.service.update_description(c, "flat 14").await.unwrap();
    assert_eq!(
        f.agent.value(&oid(|o| &o.description, c)),
        Some(SnmpValue::OctetString(b"flat 14".to_vec()))
    );
    assert!(!f.cache.contains(c).await.unwrap());

    let view = f.service.get_onu(c, None).await.unwrap();
    assert_eq!(view.record.description(), Some("flat 14"));
}

#[tokio::test]
async fn description_is_validated_before_any_snmp() {
    let f = fixture();
    let c = DeviceCoordinate::new(1, 1, 1);

    let long = "x".repeat(MAX_DESCRIPTION_LEN + 1);
    assert!(matches!(
        f.service.update_description(c, &long).await.unwrap_err(),
        OnuError::InvalidInput(_)
    ));
    assert!(matches!(
        f.service.update_description(c, "line\nbreak").await.unwrap_err(),
        OnuError::InvalidInput(_)
    ));
    assert_eq!(f.agent.request_count(), 0);
}

#[tokio::test]
async fn slow_device_hits_request_deadline() {
    let slow_policy = RetryPolicy {
        timeout: Duration::from_secs(5),
        ..fast_policy()
    };
    let f = fixture_with(
        slow_policy,
        ServiceSettings {
            default_staleness: Duration::from_secs(30),
            fan_out: 4,
            request_timeout: Duration::from_millis(50),
        },
    );
    f.agent.set_unreachable(true);

    let err = f
        .service
        .get_onu(DeviceCoordinate::new(1, 1, 1), None)
        .await
        .unwrap_err();
    assert!(matches!(err, OnuError::DeadlineExceeded(_)));
}

#[tokio::test]
async fn slow_device_past_deadline_serves_stale_cache() {
    let slow_policy = RetryPolicy {
        timeout: Duration::from_secs(5),
        ..fast_policy()
    };
    let f = fixture_with(
        slow_policy,
        ServiceSettings {
            default_staleness: Duration::from_secs(30),
            fan_out: 4,
            request_timeout: Duration::from_millis(100),
        },
    );
    let c = DeviceCoordinate::new(1, 1, 3);
    provision(&f.agent, c, -1500);
    let live = f.service.get_onu(c, None).await.unwrap();

    f.agent.set_unreachable(true);
    let_cache_age().await;

    let started = tokio::time::Instant::now();
    let view = f.service.get_onu(c, Some(Duration::ZERO)).await.unwrap();
    assert!(view.is_stale());
    assert_eq!(view.record, live.record);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn port_listing_past_deadline_keeps_finished_coordinates() {
    let agent = InMemoryAgent::new(TransportConcurrency::Serialized).with_latency(Duration::from_millis(5));
    let f = fixture_on(
        agent,
        RetryPolicy {
            timeout: Duration::from_secs(5),
            ..fast_policy()
        },
        ServiceSettings {
            default_staleness: Duration::from_secs(30),
            fan_out: 4,
            request_timeout: Duration::from_millis(400),
        },
    );
    for onu in 1..=20 {
        provision(&f.agent, DeviceCoordinate::new(1, 1, onu), -1800);
    }
    // вторая половина порта уже была в кэше, но давно
    let hour_ago = Utc::now() - chrono::Duration::hours(1);
    for onu in 11..=20 {
        let c = DeviceCoordinate::new(1, 1, onu);
        f.cache.put(c, &record_at(c, hour_ago)).await.unwrap();
    }

    let started = tokio::time::Instant::now();
    let listing = f.service.list_onus_for_port(1, 1, None).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(listing.outcomes.len(), 20);

    let summary = listing.summary();
    assert!(summary.live >= 1, "{:?}", summary);
    assert!(summary.live < 20, "{:?}", summary);
    assert_eq!(summary.live + summary.stale + summary.unreachable, 20, "{:?}", summary);

    for (c, outcome) in &listing.outcomes {
        match outcome.tag() {
            "live" => {
                let view = outcome.view().unwrap();
                assert_eq!(f.cache.get(*c).await.unwrap().unwrap().record, view.record);
            }
            "stale" => assert!(c.onu > 10, "{}", c),
            "unreachable" => assert!(c.onu <= 10, "{}", c),
            other => panic!("{}: {}", c, other),
        }
    }
}

#[tokio::test]
async fn forced_refresh_past_deadline_keeps_finished_coordinates() {
    let agent = InMemoryAgent::new(TransportConcurrency::Serialized).with_latency(Duration::from_millis(5));
    let f = fixture_on(
        agent,
        RetryPolicy {
            timeout: Duration::from_secs(5),
            ..fast_policy()
        },
        ServiceSettings {
            default_staleness: Duration::from_secs(30),
            fan_out: 4,
            request_timeout: Duration::from_millis(400),
        },
    );
    for onu in 1..=20 {
        let c = DeviceCoordinate::new(1, 1, onu);
        provision(&f.agent, c, -1800);
        f.cache.put(c, &record_at(c, Utc::now())).await.unwrap();
    }

    let listing = f.service.refresh_port(1, 1).await.unwrap();
    assert_eq!(listing.outcomes.len(), 20);

    let summary = listing.summary();
    assert!(summary.live >= 1, "{:?}", summary);
    assert_eq!(summary.live + summary.stale, 20, "{:?}", summary);
}

#[tokio::test]
async fn shutdown_cancels_requests() {
    let f = fixture();
    let shutdown = CancellationToken::new();
    let service = f.service.clone().with_shutdown(shutdown.clone());
    f.agent.set_unreachable(true);
    shutdown.cancel();

    let err = service
        .get_onu(DeviceCoordinate::new(1, 1, 1), None)
        .await
        .unwrap_err();
    assert!(matches!(err, OnuError::Cancelled));
}
