//! Storage Data Models
//!
//! Data categories, versioned records and health reporting shared by every
//! storage tier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::codec::compute_sha256;

// ============================================================================
// Data Categories
// ============================================================================

/// Independently stored, versioned and recoverable partitions of business data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataCategory {
    Company,
    Clients,
    Invoices,
    Quotes,
    Templates,
    ChartOfAccounts,
    LeaveRequests,
    TaxDocuments,
    Settings,
}

impl DataCategory {
    pub const ALL: [DataCategory; 9] = [
        DataCategory::Company,
        DataCategory::Clients,
        DataCategory::Invoices,
        DataCategory::Quotes,
        DataCategory::Templates,
        DataCategory::ChartOfAccounts,
        DataCategory::LeaveRequests,
        DataCategory::TaxDocuments,
        DataCategory::Settings,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataCategory::Company => "company",
            DataCategory::Clients => "clients",
            DataCategory::Invoices => "invoices",
            DataCategory::Quotes => "quotes",
            DataCategory::Templates => "templates",
            DataCategory::ChartOfAccounts => "chart_of_accounts",
            DataCategory::LeaveRequests => "leave_requests",
            DataCategory::TaxDocuments => "tax_documents",
            DataCategory::Settings => "settings",
        }
    }
}

impl fmt::Display for DataCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown data category: {0}")]
pub struct UnknownCategory(pub String);

impl FromStr for DataCategory {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

// ============================================================================
// Storage Tiers
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageTier {
    /// JSON documents in the data directory
    Local,
    /// SQLite records table
    Database,
    /// Remote store over HTTP
    Remote,
}

impl StorageTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageTier::Local => "local",
            StorageTier::Database => "database",
            StorageTier::Remote => "remote",
        }
    }
}

impl fmt::Display for StorageTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Versioned Records
// ============================================================================

/// The stored content of one data category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedRecord {
    pub category: DataCategory,

    /// Starts at 1 and increases with every local save
    pub version: i64,

    /// Opaque category payload
    pub data: serde_json::Value,

    /// SHA-256 of the compact JSON form of `data`
    pub checksum: String,

    /// Device that produced this version
    pub origin: String,

    pub updated_at: DateTime<Utc>,
}

impl VersionedRecord {
    /// Create a record stamped with the current time and device
    pub fn new(category: DataCategory, version: i64, data: serde_json::Value) -> Self {
        let checksum = checksum_of(&data);
        Self {
            category,
            version,
            data,
            checksum,
            origin: device_name(),
            updated_at: Utc::now(),
        }
    }

    /// Whether the stored checksum still matches the data
    pub fn is_intact(&self) -> bool {
        checksum_of(&self.data) == self.checksum
    }
}

/// Checksum of a category payload
pub fn checksum_of(data: &serde_json::Value) -> String {
    compute_sha256(data.to_string().as_bytes())
}

/// Device name from hostname
pub fn device_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-device".to_string())
}

// ============================================================================
// Health
// ============================================================================

/// Availability of each storage tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StorageTypes {
    pub local: bool,
    pub database: bool,
    pub network: bool,
}

/// Freshly derived health of the storage layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub storage_types: StorageTypes,
    pub issues: Vec<String>,
}

// ============================================================================
// Tests
// ============================================================================
