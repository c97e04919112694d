use serde::{Deserialize, Serialize};

use crate::types::Id;

/// One row of a price list: the price of a supply over a validity window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupplyPrice {
    #[serde(default)]
    pub id: Id,

    pub supply_id: Id,

    /// Denormalized supply name, read-only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supply_name: Option<String>,

    /// Decimal amount as sent by the API (string to avoid float drift).
    pub price: String,

    #[serde(default = "default_currency")]
    pub currency: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_id: Option<Id>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

fn default_currency() -> String {
    "PEN".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_ids_and_default_currency() {
        let p: SupplyPrice =
            serde_json::from_str(r#"{"id": 9, "supply_id": 4, "price": "12.50"}"#).unwrap();
        assert_eq!(p.supply_id.as_str(), "4");
        assert_eq!(p.currency, "PEN");
    }
}
