//! CryptoScanner
//!
//! Batch ETL pipeline: ingests exchange tickers and on-chain metrics into a
//! warehouse, derives moving-average signals, LONG/SHORT decisions and
//! on-chain anomaly flags, then sends one Telegram summary per run.

pub mod anomaly;
pub mod config;
pub mod error;
pub mod ingester;
pub mod notify;
pub mod pipeline;
pub mod rowset;
pub mod schema;
pub mod strategy;
pub mod telemetry;
pub mod warehouse;
