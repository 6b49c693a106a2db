//! Table definitions and descriptions.

use serde::{Deserialize, Serialize};

/// Scalar types allowed for a hash key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarAttributeType {
    S,
    N,
}

/// Billing mode for a table. Only on-demand is offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BillingMode {
    #[default]
    #[serde(rename = "PAY_PER_REQUEST")]
    PayPerRequest,
}

/// Current status of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableStatus {
    #[serde(rename = "CREATING")]
    Creating,
    #[serde(rename = "ACTIVE")]
    Active,
}

impl TableStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "CREATING",
            Self::Active => "ACTIVE",
        }
    }
}

impl std::fmt::Display for TableStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single-attribute hash key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySchema {
    pub hash_key: String,
    pub attribute_type: ScalarAttributeType,
}

/// What `create_table` needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    pub key_schema: KeySchema,
    #[serde(default)]
    pub billing_mode: BillingMode,
}

impl TableDefinition {
    /// On-demand table keyed by a string hash key.
    pub fn on_demand(name: impl Into<String>, hash_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_schema: KeySchema {
                hash_key: hash_key.into(),
                attribute_type: ScalarAttributeType::S,
            },
            billing_mode: BillingMode::PayPerRequest,
        }
    }
}

/// What `describe_table` reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescription {
    pub name: String,
    pub key_schema: KeySchema,
    pub billing_mode: BillingMode,
    pub status: TableStatus,
    pub item_count: usize,
    /// RFC 3339 creation time.
    pub created_at: String,
}
