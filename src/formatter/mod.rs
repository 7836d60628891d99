pub mod json;

pub use json::{FreeIndicesJson, JsonFormatter, OnuJson, OutcomeErrorJson, PortListingJson};
