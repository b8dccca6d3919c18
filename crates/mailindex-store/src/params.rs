use mailindex_core::config::search;
use mailindex_core::parse_timestamp_ms;
use serde_json::Value;

use crate::{StoreError, StoreResult};

/// Parses a date parameter given as epoch milliseconds, a numeric string, or RFC 3339.
///
/// `null`, absent and blank values mean "no bound".
pub fn parse_date_param(value: &Value) -> StoreResult<Option<i64>> {
    match value {
        Value::Null => Ok(None),
        Value::Number(number) => Ok(number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float as i64))),
        Value::String(raw) if raw.trim().is_empty() => Ok(None),
        Value::String(raw) => parse_timestamp_ms(raw)
            .map(Some)
            .ok_or_else(|| StoreError::invalid(format!("Invalid date format: '{raw}'"))),
        other => Err(StoreError::invalid(format!("Invalid date format: '{other}'"))),
    }
}

/// Inclusive `dateMs` bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateFilter {
    pub from_ms: Option<i64>,
    pub to_ms: Option<i64>,
}

impl DateFilter {
    /// Reads `from` / `to`, ignoring both when `ignoreDate` is true.
    pub fn from_params(params: &Value) -> StoreResult<Self> {
        if params.get("ignoreDate").and_then(Value::as_bool).unwrap_or(false) {
            return Ok(Self::default());
        }
        Ok(Self {
            from_ms: parse_date_param(params.get("from").unwrap_or(&Value::Null))?,
            to_ms: parse_date_param(params.get("to").unwrap_or(&Value::Null))?,
        })
    }

    pub fn contains(&self, date_ms: i64) -> bool {
        self.from_ms.map_or(true, |from| date_ms >= from) && self.to_ms.map_or(true, |to| date_ms <= to)
    }
}

/// Parameters shared by `search` and `memorySearch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    pub limit: i64,
    pub dates: DateFilter,
}

impl SearchRequest {
    pub fn new(query: &str, limit: i64) -> Self {
        Self {
            query: query.to_string(),
            limit: clamp_limit(limit, search::DEFAULT_LIMIT, search::MAX_LIMIT),
            dates: DateFilter::default(),
        }
    }

    pub fn from_params(params: &Value) -> StoreResult<Self> {
        let query = string_field(params, &["q", "query"]).unwrap_or_default();
        let limit = int_field(params, "limit").unwrap_or(search::DEFAULT_LIMIT);
        Ok(Self {
            query: query.trim().to_string(),
            limit: clamp_limit(limit, search::DEFAULT_LIMIT, search::MAX_LIMIT),
            dates: DateFilter::from_params(params)?,
        })
    }

    pub fn candidate_limit(&self) -> i64 {
        self.limit
            .saturating_mul(mailindex_core::config::hybrid::CANDIDATE_MULTIPLIER)
    }
}

pub(crate) fn clamp_limit(limit: i64, default: i64, max: i64) -> i64 {
    if limit <= 0 {
        default
    } else {
        limit.min(max)
    }
}

/// First string value found under any of `keys`.
pub(crate) fn string_field<'a>(row: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| row.get(*key).and_then(Value::as_str))
}

pub(crate) fn int_field(params: &Value, key: &str) -> Option<i64> {
    let value = params.get(key)?;
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|float| float as i64))
        .or_else(|| value.as_str().and_then(|raw| raw.trim().parse::<i64>().ok()))
}

pub(crate) fn bool_field(row: &Value, key: &str) -> bool {
    match row.get(key) {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_i64().unwrap_or(0) != 0,
        _ => false,
    }
}

/// Ids from a list of strings or `{<id_key>: ...}` objects.
///
/// Entries with no usable id map to `None` so callers can still account for them.
pub(crate) fn id_entries(list: &[Value], id_key: &str) -> Vec<Option<String>> {
    list.iter()
        .map(|entry| {
            let raw = match entry {
                Value::String(id) => Some(id.as_str()),
                Value::Object(_) => entry.get(id_key).and_then(Value::as_str),
                _ => None,
            };
            raw.map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
        })
        .collect()
}

/// The first array found under any of `keys`, or an error naming the first key.
pub(crate) fn array_param<'a>(params: &'a Value, keys: &[&str]) -> StoreResult<&'a [Value]> {
    keys.iter()
        .find_map(|key| params.get(*key).and_then(Value::as_array))
        .map(Vec::as_slice)
        .ok_or_else(|| {
            StoreError::invalid(format!(
                "Missing or invalid '{}' parameter (expected an array)",
                keys.first().copied().unwrap_or("rows")
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unit_parse_date_param_accepts_numbers_and_iso_strings() {
        assert_eq!(parse_date_param(&json!(1_700_000_000_000_i64)).expect("int"), Some(1_700_000_000_000));
        assert_eq!(parse_date_param(&json!(12.7)).expect("float"), Some(12));
        assert_eq!(parse_date_param(&json!("1970-01-01T00:00:02Z")).expect("iso"), Some(2_000));
        assert_eq!(parse_date_param(&json!("42")).expect("numeric string"), Some(42));
        assert_eq!(parse_date_param(&json!(null)).expect("null"), None);
        assert_eq!(parse_date_param(&json!("")).expect("blank"), None);
    }

    #[test]
    fn regression_parse_date_param_rejects_garbage() {
        let error = parse_date_param(&json!("last tuesday")).expect_err("garbage");
        assert!(error.to_string().contains("Invalid date format"));
        assert!(parse_date_param(&json!({"ms": 1})).is_err());
    }

    #[test]
    fn unit_date_filter_honors_ignore_date() {
        let params = json!({"from": 10, "to": 20, "ignoreDate": true});
        assert_eq!(DateFilter::from_params(&params).expect("filter"), DateFilter::default());

        let filter = DateFilter::from_params(&json!({"from": 10, "to": 20})).expect("filter");
        assert!(filter.contains(10) && filter.contains(20));
        assert!(!filter.contains(9) && !filter.contains(21));
    }

    #[test]
    fn unit_search_request_defaults_and_clamps_limit() {
        let request = SearchRequest::from_params(&json!({"q": "  invoice "})).expect("request");
        assert_eq!(request.query, "invoice");
        assert_eq!(request.limit, search::DEFAULT_LIMIT);

        let request = SearchRequest::from_params(&json!({"query": "x", "limit": 1_000_000})).expect("request");
        assert_eq!(request.limit, search::MAX_LIMIT);
        assert_eq!(request.candidate_limit(), search::MAX_LIMIT * 4);
    }

    #[test]
    fn unit_id_entries_accepts_strings_and_objects() {
        let entries = id_entries(
            &[json!("a"), json!({"msgId": " b "}), json!({"other": 1}), json!(""), json!(7)],
            "msgId",
        );
        assert_eq!(
            entries,
            vec![Some("a".to_string()), Some("b".to_string()), None, None, None]
        );
    }
}
