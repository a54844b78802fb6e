//! IPC protocol types and validation for sitescan-daemon.
//!
//! This crate is shared by the daemon and its clients to prevent schema drift.
//! The daemon remains the authority on validation, but clients can reuse the
//! same types to construct valid requests.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB
pub const MAX_LOCATION_NAME_LEN: usize = 128;
pub const MAX_COMPARE_LOCATIONS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    AddLocation,
    ListLocations,
    DeleteLocation,
    StartScan,
    CancelScan,
    GetActive,
    GetLiveState,
    Compare,
    ListScans,
    StoreLive,
    ResetStored,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(method: Method, params: Option<Value>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            method,
            id: None,
            params,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocationParams {
    pub location_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddLocationParams {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompareParams {
    pub location_ids: Vec<i64>,
}

/// A stored location as returned by `add_location` and `list_locations`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationInfo {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub scanning: bool,
}

/// One stored series as returned by `list_scans`, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanInfo {
    pub id: i64,
    pub location_id: i64,
    pub bssid: String,
    pub ssid: String,
    pub recorded_at: String,
    pub series: Vec<i32>,
}

pub fn parse_location(params: Option<Value>) -> Result<LocationParams, ErrorInfo> {
    let parsed: LocationParams = parse_params(params, "location_id is required")?;
    if parsed.location_id <= 0 {
        return Err(ErrorInfo::new(
            "invalid_location_id",
            "location_id must be positive",
        ));
    }
    Ok(parsed)
}

pub fn parse_add_location(params: Option<Value>) -> Result<AddLocationParams, ErrorInfo> {
    let parsed: AddLocationParams = parse_params(params, "name is required")?;
    let name = parsed.name.trim();
    if name.is_empty() {
        return Err(ErrorInfo::new("missing_field", "name is required"));
    }
    if name.chars().count() > MAX_LOCATION_NAME_LEN {
        return Err(ErrorInfo::new(
            "invalid_name",
            format!(
                "name must be {} characters or fewer",
                MAX_LOCATION_NAME_LEN
            ),
        ));
    }
    Ok(AddLocationParams {
        name: name.to_string(),
    })
}

/// Ids are de-duplicated, keeping first occurrence order.
pub fn parse_compare(params: Option<Value>) -> Result<CompareParams, ErrorInfo> {
    let parsed: CompareParams = parse_params(params, "location_ids is required")?;
    let mut location_ids = Vec::with_capacity(parsed.location_ids.len());
    for id in parsed.location_ids {
        if id <= 0 {
            return Err(ErrorInfo::new(
                "invalid_location_id",
                "location_ids must be positive",
            ));
        }
        if !location_ids.contains(&id) {
            location_ids.push(id);
        }
    }
    if location_ids.len() > MAX_COMPARE_LOCATIONS {
        return Err(ErrorInfo::new(
            "invalid_params",
            format!(
                "at most {} locations can be compared",
                MAX_COMPARE_LOCATIONS
            ),
        ));
    }
    Ok(CompareParams { location_ids })
}

fn parse_params<T: serde::de::DeserializeOwned>(
    params: Option<Value>,
    missing: &str,
) -> Result<T, ErrorInfo> {
    let params = params.ok_or_else(|| ErrorInfo::new("invalid_params", missing))?;
    if !params.is_object() {
        return Err(ErrorInfo::new("invalid_params", "params must be an object"));
    }
    serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new("invalid_params", format!("params are invalid: {}", err))
    })
}
