//! Опрос ONU на GPON OLT по SNMP с кэшем последних состояний.
//!
//! Слои снизу вверх: `snmp` (протокол), `device` (раскладка MIB и
//! декодирование), `cache` (хранилище записей), `usecase` (согласование кэша
//! и устройства), `handlers`/`routes` (HTTP).

pub mod cache;
pub mod config;
pub mod device;
pub mod formatter;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod snmp;
pub mod usecase;
