use serde::{Deserialize, Serialize};

use crate::types::Id;

/// Supply: an input (material, labour, equipment) that can be priced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Supply {
    #[serde(default)]
    pub id: Id,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    pub name: String,

    /// Unit of measure (e.g. "kg", "m2", "hh").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub supply_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_id: Option<Id>,

    #[serde(default = "active")]
    pub state: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

fn active() -> i32 {
    1
}
