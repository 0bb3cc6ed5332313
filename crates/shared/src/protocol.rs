use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Function that writes `<key>:<value>` into one of the device's mutable fields.
pub const SET_VARIABLE_FUNCTION: &str = "variable";
/// Cursor function selecting which named scalar the `variable` slot exposes.
pub const VARIABLE_CURSOR_FUNCTION: &str = "varCursor";
pub const VARIABLE_RESULT_SLOT: &str = "variable";
/// Cursor function selecting which pattern name the `patternName` slot exposes.
pub const PATTERN_NAME_CURSOR_FUNCTION: &str = "pNameCursor";
pub const PATTERN_NAME_RESULT_SLOT: &str = "patternName";
pub const PATTERN_COUNT_VARIABLE: &str = "patternCount";
/// Readable as a variable and callable as a function.
pub const PATTERN_INDEX: &str = "patternIndex";

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableResponse {
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub return_value: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected: Option<bool>,
}

/// Form body of a function call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub access_token: String,
    pub args: String,
}

/// `args` value for [`SET_VARIABLE_FUNCTION`].
pub fn set_variable_args(key: &str, value: i64) -> String {
    format!("{key}:{value}")
}
