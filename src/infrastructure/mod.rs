//! Storage adapters implementing the domain ports.

pub mod in_memory;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;

use crate::domain::deal::Deal;
use crate::domain::earnout::EarnoutSchedule;
use crate::domain::nda::NdaRequest;
use crate::domain::payment::Payment;

/// Entities written through compare-and-swap.
pub(crate) trait Versioned: Clone {
    const ENTITY: &'static str;
    fn key(&self) -> String;
    fn version(&self) -> u64;
    fn set_version(&mut self, version: u64);
}

impl Versioned for Deal {
    const ENTITY: &'static str = "deal";
    fn key(&self) -> String {
        self.id.to_string()
    }
    fn version(&self) -> u64 {
        self.version
    }
    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

impl Versioned for Payment {
    const ENTITY: &'static str = "payment";
    fn key(&self) -> String {
        self.id.to_string()
    }
    fn version(&self) -> u64 {
        self.version
    }
    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

impl Versioned for NdaRequest {
    const ENTITY: &'static str = "nda request";
    fn key(&self) -> String {
        self.id.to_string()
    }
    fn version(&self) -> u64 {
        self.version
    }
    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

impl Versioned for EarnoutSchedule {
    const ENTITY: &'static str = "earnout schedule";
    fn key(&self) -> String {
        self.deal_id.to_string()
    }
    fn version(&self) -> u64 {
        self.version
    }
    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}
