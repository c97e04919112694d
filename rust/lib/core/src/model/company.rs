use serde::{Deserialize, Serialize};

use crate::types::Id;

/// Company: the tenant every other record belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Company {
    #[serde(default)]
    pub id: Id,

    pub name: String,

    /// Registered legal name, when it differs from `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_name: Option<String>,

    /// Taxpayer registry number (RUC).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ruc: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// 1 = active, 0 = disabled.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_payload_gets_defaults() {
        let c: Company =
            serde_json::from_str(r#"{"id": 3, "name": "Acme", "extra": true}"#).unwrap();
        assert_eq!(c.id.as_str(), "3");
        assert_eq!(c.state, 1);
        assert!(c.ruc.is_none());

        let out = serde_json::to_value(&c).unwrap();
        assert!(out.get("ruc").is_none(), "absent options are not serialized");
    }
}
