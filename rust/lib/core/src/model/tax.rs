use serde::{Deserialize, Serialize};

use crate::types::Id;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tax {
    #[serde(default)]
    pub id: Id,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    pub name: String,

    /// Percentage as a decimal string, e.g. "18.00".
    pub rate: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_id: Option<Id>,

    #[serde(default = "active")]
    pub state: i32,
}

fn active() -> i32 {
    1
}
