//! # EV Parking Common Library
//!
//! Shared code for the evpark services including:
//! - Configuration loading (one immutable `Config` per process)
//! - Error types
//! - Database pool setup and the known-vehicle / monitoring tables
//! - Plate grammar and powertrain codes
//! - Evidence filename contract and evidence zones

pub mod config;
pub mod db;
pub mod error;
pub mod evidence;
pub mod plate;
pub mod powertrain;

pub use error::{Error, Result};
pub use config::Config;
pub use evidence::{EvidenceLayout, EvidenceName, EvidenceStore, PendingCase};
pub use plate::Plate;
pub use powertrain::{PowertrainTag, PowertrainType};
