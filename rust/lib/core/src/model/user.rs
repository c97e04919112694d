use serde::{Deserialize, Serialize};

use crate::types::Id;

/// User account. Also the shape of the signed-in user cached by the session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    #[serde(default)]
    pub id: Id,

    /// Display name.
    #[serde(default)]
    pub name: String,

    pub login: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, alias = "company", skip_serializing_if = "Option::is_none")]
    pub company_id: Option<Id>,

    /// Role, e.g. "admin" or "operator".
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login: Option<String>,

    #[serde(default = "active")]
    pub state: i32,
}

fn active() -> i32 {
    1
}

impl User {
    /// Name to show in headers and greetings.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.login
        } else {
            &self.name
        }
    }
}
