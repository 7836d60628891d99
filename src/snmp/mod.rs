use std::sync::Arc;

pub mod client;
pub mod error;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod oid;
pub mod transport;
pub mod v2c;

pub use client::{RetryPolicy, SnmpClient};
pub use error::{ErrorStatus, SnmpError};
#[cfg(any(test, feature = "testing"))]
pub use memory::InMemoryAgent;
pub use oid::{ObjectIdentifier, parse_oid};
pub use transport::{Response, SnmpTransport, SnmpValue, TransportConcurrency, Varbind};
pub use v2c::SnmpClientV2c;

/// Открывает SNMPv2c сессию и оборачивает её в клиент с политикой повторов
pub async fn create_v2c_client(
    target: &str,
    community: &[u8],
    policy: RetryPolicy,
    max_in_flight: usize,
) -> error::Result<SnmpClient> {
    let transport = SnmpClientV2c::new(target, community).await?;
    Ok(SnmpClient::new(Arc::new(transport), policy, max_in_flight))
}
