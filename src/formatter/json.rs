use serde::{Deserialize, Serialize};

use crate::usecase::{CoordinateOutcome, OnuView, PortListing, PortSummary};

/// JSON представление одной ONU
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnuJson {
    pub board: u8,
    pub pon: u8,
    pub onu_id: u16,
    pub name: Option<String>,
    pub description: Option<String>,
    pub model: Option<String>,
    pub serial_number: String,
    pub status: String, // "online" | "offline" | "unknown"
    /// dBm с двумя знаками, например "-15.00"
    pub rx_power: Option<String>,
    pub tx_power: Option<String>,
    pub freshness: String, // "live" | "cached" | "stale"
    pub stale: bool,
    pub fetched_at: String,
}

/// Координата порта без записи
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeErrorJson {
    pub onu_id: u16,
    pub status: String, // "not_found" | "unreachable" | "failed"
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortListingJson {
    pub board: u8,
    pub pon: u8,
    pub summary: PortSummary,
    pub onus: Vec<OnuJson>,
    pub errors: Vec<OutcomeErrorJson>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreeIndicesJson {
    pub board: u8,
    pub pon: u8,
    pub onu_ids: Vec<u16>,
}

/// JSON форматтер ответов API
pub struct JsonFormatter;

impl JsonFormatter {
    pub fn format_onu(view: &OnuView) -> OnuJson {
        let record = &view.record;
        let coordinate = record.coordinate();

        OnuJson {
            board: coordinate.board,
            pon: coordinate.port,
            onu_id: coordinate.onu,
            name: record.name().map(str::to_string),
            description: record.description().map(str::to_string),
            model: record.model().map(str::to_string),
            serial_number: record.serial_number().to_string(),
            status: record.status().as_str().to_string(),
            rx_power: record.rx_power().map(|p| p.to_string()),
            tx_power: record.tx_power().map(|p| p.to_string()),
            freshness: view.freshness.as_str().to_string(),
            stale: view.is_stale(),
            fetched_at: view.fetched_at.to_rfc3339(),
        }
    }

    pub fn format_port_listing(listing: &PortListing) -> PortListingJson {
        let mut onus = Vec::new();
        let mut errors = Vec::new();

        for (coordinate, outcome) in &listing.outcomes {
            let error = match outcome {
                CoordinateOutcome::Found(view) => {
                    onus.push(Self::format_onu(view));
                    continue;
                }
                CoordinateOutcome::NotFound => None,
                CoordinateOutcome::Unreachable(reason) | CoordinateOutcome::Failed(reason) => {
                    Some(reason.clone())
                }
            };
            errors.push(OutcomeErrorJson {
                onu_id: coordinate.onu,
                status: outcome.tag().to_string(),
                error,
            });
        }

        PortListingJson {
            board: listing.board,
            pon: listing.port,
            summary: listing.summary(),
            onus,
            errors,
        }
    }

    pub fn format_free_indices(board: u8, pon: u8, onu_ids: Vec<u16>) -> FreeIndicesJson {
        FreeIndicesJson { board, pon, onu_ids }
    }}
