//! Data Transfer Objects - request/response types for the API.

use serde::{Deserialize, Serialize};

/// The caller's current window for a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowResponse {
    pub resource: String,
    pub client: String,
    /// Requests counted in the open window (0 when none is open).
    pub count: u64,
    /// Admissions left before the window denies.
    pub remaining: u64,
    /// Seconds until the window resets, if one is open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_after_secs: Option<u64>,
}
