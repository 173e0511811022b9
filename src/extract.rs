// src/extract.rs

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::LazyLock;
use tracing::{debug, warn};

/// Canonical name lists pulled out of one attachment's OCR result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub employee_names: Vec<String>,
    pub company_names: Vec<String>,
    #[serde(default)]
    pub ic_numbers: Vec<String>,
}

impl ExtractionResult {
    pub fn is_empty(&self) -> bool {
        self.employee_names.is_empty() && self.company_names.is_empty() && self.ic_numbers.is_empty()
    }
}

const EMPLOYEE_KEYS: &[&str] = &["employee_names", "employee", "employee-name"];
const COMPANY_KEYS: &[&str] = &["company_names", "company", "company-name"];
const IC_KEYS: &[&str] = &[
    "identification",
    "identification_number",
    "ic",
    "ic_number",
    "ic_numbers",
    "identification-number",
];

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

static LIST_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[,;\n]").expect("separator pattern is valid"));

// ---------------------------------------------------------------------------
// Payload location
// ---------------------------------------------------------------------------

/// Places the extraction API has put its field object across response
/// envelope versions, in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSource {
    /// `document.value.response.value`
    DocumentResponse,
    /// `value.response.value`
    ValueResponse,
    /// `data.value`
    DataValue,
    /// `value`, as JSON text or, failing that, a single employee name
    BareValue,
    /// The whole response
    Whole,
}

impl PayloadSource {
    pub const ORDER: [PayloadSource; 5] = [
        PayloadSource::DocumentResponse,
        PayloadSource::ValueResponse,
        PayloadSource::DataValue,
        PayloadSource::BareValue,
        PayloadSource::Whole,
    ];

    /// Try to resolve a field object from `raw` at this location.
    pub fn resolve(self, raw: &Value) -> Option<Map<String, Value>> {
        match self {
            PayloadSource::DocumentResponse => {
                present(raw.pointer("/document/value/response/value")).and_then(as_object)
            }
            PayloadSource::ValueResponse => {
                present(raw.pointer("/value/response/value")).and_then(as_object)
            }
            PayloadSource::DataValue => present(raw.pointer("/data/value")).and_then(as_object),
            PayloadSource::BareValue => {
                let value = present(raw.get("value"))?;
                let Value::String(text) = value else {
                    return as_object(value);
                };
                match serde_json::from_str::<Value>(text) {
                    Ok(Value::Object(map)) => Some(map),
                    Ok(other) => {
                        debug!(kind = json_kind(&other), "value is JSON but not an object");
                        None
                    }
                    // Some prompt schemas answer with a plain name string
                    Err(_) => {
                        let mut single = Map::new();
                        single.insert("employee_names".to_string(), Value::String(text.clone()));
                        single.insert("company_names".to_string(), Value::String(String::new()));
                        Some(single)
                    }
                }
            }
            PayloadSource::Whole => as_object(raw),
        }
    }
}

/// Treat `null` and `""` the same as a missing key.
fn present(value: Option<&Value>) -> Option<&Value> {
    match value? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        v => Some(v),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// An object as-is, or JSON text that decodes to one.
fn as_object(value: &Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map.clone()),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Some(map),
            Ok(_) => None,
            Err(e) => {
                debug!(error = %e, "value is not JSON text");
                None
            }
        },
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Normalisation
// ---------------------------------------------------------------------------

fn normalize_key(key: &str) -> String {
    WHITESPACE.replace_all(&key.to_lowercase(), "_").into_owned()
}

fn normalize_keys(payload: Map<String, Value>) -> Map<String, Value> {
    payload
        .into_iter()
        .map(|(k, v)| (normalize_key(&k), v))
        .collect()
}

fn first_alias<'a>(fields: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .filter_map(|alias| fields.get(*alias))
        .find(|v| !v.is_null())
}

fn element_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Turn a field value into trimmed, non-empty entries.
fn to_list(value: Option<&Value>) -> Vec<String> {
    let Some(value) = value else {
        return Vec::new();
    };
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items
            .iter()
            .filter_map(element_text)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        scalar => {
            let text = element_text(scalar).unwrap_or_default();
            LIST_SEPARATORS
                .split(&text)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        }
    }
}

/// Normalise a raw OCR response into name lists.
///
/// Never fails: a response with no recognisable payload yields an empty result.
pub fn extract(raw: &Value) -> ExtractionResult {
    let resolved = PayloadSource::ORDER
        .iter()
        .find_map(|source| source.resolve(raw).map(|payload| (*source, payload)));

    let Some((source, payload)) = resolved else {
        warn!("No field object found in OCR response");
        return ExtractionResult::default();
    };

    let fields = normalize_keys(payload);
    let result = ExtractionResult {
        employee_names: to_list(first_alias(&fields, EMPLOYEE_KEYS)),
        company_names: to_list(first_alias(&fields, COMPANY_KEYS)),
        ic_numbers: to_list(first_alias(&fields, IC_KEYS)),
    };

    debug!(
        source = ?source,
        employees = result.employee_names.len(),
        companies = result.company_names.len(),
        ic_numbers = result.ic_numbers.len(),
        "Extracted fields"
    );
    result
}
