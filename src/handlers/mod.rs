use std::sync::Arc;

use crate::usecase::OnuService;

pub mod error;
pub mod health;
pub mod onu;

pub use error::ApiError;
pub use health::health;
pub use onu::{get_onu, list_empty_onu_ids, list_port, refresh_port, update_description};

/// Общее состояние обработчиков
#[derive(Clone)]
pub struct AppState {
    pub service: OnuService,
    pub device_name: Arc<str>,
}

impl AppState {
    pub fn new(service: OnuService, device_name: impl Into<Arc<str>>) -> Self {
        Self {
            service,
            device_name: device_name.into(),
        }
    }
}
