use anyhow::{Context, Result};
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use olt_snmp_poller::cache::{KeyValueStore, MemoryStore, OnuCacheRepository, RedisStore};
use olt_snmp_poller::config::{AppConfig, CacheBackend};
use olt_snmp_poller::device::SnmpDeviceRepository;
use olt_snmp_poller::handlers::AppState;
use olt_snmp_poller::routes::create_router;
use olt_snmp_poller::snmp;
use olt_snmp_poller::usecase::OnuService;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    if let Err(e) = run().await {
        error!(error = %format!("{:#}", e), "Сервис остановлен с ошибкой");
        return Err(e);
    }
    Ok(())
}

async fn run() -> Result<()> {
    let config = AppConfig::from_env()?;
    config.log_summary();
    let profile = config.load_profile()?;
    info!(profile = %profile.name, "Профиль OLT загружен");

    let store: Arc<dyn KeyValueStore> = match config.cache.backend {
        CacheBackend::Redis => Arc::new(
            RedisStore::connect(&config.cache.url)
                .await
                .context("Не удалось подключиться к Redis")?,
        ),
        CacheBackend::Memory => {
            warn!("Кэш в памяти процесса: данные не переживут перезапуск");
            Arc::new(MemoryStore::new())
        }
    };
    let cache = Arc::new(OnuCacheRepository::new(store, config.device.name.clone()));

    let client = snmp::create_v2c_client(
        &config.device.target,
        config.device.community.as_bytes(),
        config.connection.retry_policy(),
        config.connection.max_in_flight,
    )
    .await
    .with_context(|| format!("Не удалось открыть SNMP сессию с {}", config.device.target))?;
    let device = Arc::new(SnmpDeviceRepository::new(client, profile, config.poll.fan_out));

    // отмена этого токена обрывает все запросы, ещё не закончившиеся к концу grace периода
    let requests = CancellationToken::new();
    let service = OnuService::new(device, cache, config.poll.service_settings()).with_shutdown(requests.clone());
    let app = create_router(AppState::new(service, config.device.name.clone()));

    let listener = TcpListener::bind(&config.server.addr)
        .await
        .with_context(|| format!("Не удалось занять адрес {}", config.server.addr))?;
    info!("Сервер слушает http://{}", config.server.addr);

    let signal = CancellationToken::new();
    tokio::spawn(wait_for_signal(signal.clone()));

    let server = axum::serve(listener, app).with_graceful_shutdown({
        let signal = signal.clone();
        async move { signal.cancelled().await }
    });

    let grace = Duration::from_secs(config.server.shutdown_grace_secs);
    tokio::select! {
        result = server.into_future() => result.context("HTTP сервер завершился с ошибкой")?,
        _ = async {
            signal.cancelled().await;
            tokio::time::sleep(grace).await;
        } => {
            warn!(?grace, "Запросы не завершились за grace период, обрываем");
            requests.cancel();
        }
    }

    info!("Сервис остановлен");
    Ok(())
}

/// Инициализирует tracing subscriber, уровень из RUST_LOG
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "olt_snmp_poller=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;

    Ok(())
}

/// Ждёт Ctrl-C или SIGTERM
async fn wait_for_signal(signal: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Не удалось подписаться на Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Не удалось подписаться на SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Получен Ctrl-C, останавливаемся"),
        _ = terminate => info!("Получен SIGTERM, останавливаемся"),
    }
    signal.cancel();
}
