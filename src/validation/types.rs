//! Request and response bodies for the UID validation service.

use serde::{Deserialize, Serialize};

/// Body sent to POST /api/validate_uids.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ValidationRequest {
    pub uids: Vec<String>,
}

/// Verdict from POST /api/validate_uids.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationResponse {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accounts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ValidationResponse {
    pub fn accepted(accounts: Vec<String>) -> Self {
        Self {
            valid: true,
            accounts,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            accounts: Vec::new(),
            reason: Some(reason.into()),
        }
    }
}
