//! Result-volume guard for enumeration.
//!
//! Remote collections can hold hundreds of thousands of keys. Listing starts
//! with a count query (`limit: 1`); browsing is only ever done in small pages.

use serde_json::{Map, Value};

use crate::tools::arg;

/// Page size of the count query.
pub const COUNT_LIMIT: u64 = 1;
pub const MIN_PAGE_SIZE: usize = 5;
pub const MAX_PAGE_SIZE: usize = 10;

const TOTAL_FIELDS: &[&str] = &["total", "count", "total_count", "totalCount", "total_keys"];
const NESTED_FIELDS: &[&str] = &["pagination", "meta", "page_info"];
const LIST_FIELDS: &[&str] = &["keys", "items", "memories", "results"];
const KEY_FIELDS: &[&str] = &["key", "key_name", "name"];

/// Clamp a requested browse page size into `MIN_PAGE_SIZE..=MAX_PAGE_SIZE`.
pub fn clamp_page_size(requested: usize) -> usize {
    requested.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE)
}

/// Canonical arguments for the count query.
pub fn count_arguments(prefix: Option<&str>) -> Map<String, Value> {
    let mut args = Map::new();
    args.insert(arg::LIMIT.into(), Value::from(COUNT_LIMIT));
    if let Some(prefix) = prefix {
        args.insert(arg::PREFIX.into(), Value::from(prefix));
    }
    args
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub prefix: Option<String>,
    /// Zero-based page number.
    pub page: usize,
    pub page_size: usize,
}

impl PageRequest {
    pub fn new(prefix: Option<String>, page: usize, page_size: usize) -> Self {
        Self {
            prefix,
            page,
            page_size: clamp_page_size(page_size),
        }
    }

    /// Saturates instead of overflowing for absurd page numbers.
    pub fn offset(&self) -> usize {
        self.page.saturating_mul(self.page_size)
    }

    pub fn arguments(&self) -> Map<String, Value> {
        let mut args = Map::new();
        args.insert(arg::LIMIT.into(), Value::from(self.page_size));
        args.insert(arg::OFFSET.into(), Value::from(self.offset()));
        if let Some(prefix) = &self.prefix {
            args.insert(arg::PREFIX.into(), Value::from(prefix.as_str()));
        }
        args
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub request: PageRequest,
    pub keys: Vec<String>,
    pub total: Option<u64>,
}

impl Page {
    pub fn from_response(request: PageRequest, json: Option<&Value>) -> Self {
        let keys = json.map(extract_keys).unwrap_or_default();
        let total = json.and_then(extract_total);
        Self { request, keys, total }
    }

    pub fn has_more(&self) -> bool {
        match self.total {
            Some(total) => (self.request.offset().saturating_add(self.keys.len()) as u64) < total,
            None => self.keys.len() == self.request.page_size,
        }
    }
}

/// Find a total-count field at the top level or one level down.
pub fn extract_total(json: &Value) -> Option<u64> {
    let direct = TOTAL_FIELDS
        .iter()
        .find_map(|f| json.get(*f).and_then(Value::as_u64));
    direct.or_else(|| {
        NESTED_FIELDS
            .iter()
            .filter_map(|n| json.get(*n))
            .find_map(|nested| TOTAL_FIELDS.iter().find_map(|f| nested.get(*f).and_then(Value::as_u64)))
    })
}

/// Pull key names out of a listing response: either an array of strings or an
/// array of objects with a key-ish field.
pub fn extract_keys(json: &Value) -> Vec<String> {
    let list = match json {
        Value::Array(items) => Some(items),
        other => LIST_FIELDS
            .iter()
            .find_map(|f| other.get(*f).and_then(Value::as_array)),
    };

    list.map(|items| {
        items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Object(_) => KEY_FIELDS
                    .iter()
                    .find_map(|f| item.get(*f).and_then(Value::as_str))
                    .map(str::to_string),
                _ => None,
            })
            .collect()
    })
    .unwrap_or_default()
}

/// Message shown after the count query.
pub fn count_message(total: Option<u64>, prefix: Option<&str>) -> String {
    let scope = prefix
        .map(|p| format!(" under `{p}`"))
        .unwrap_or_default();
    match total {
        Some(total) => format!(
            "There are {total} memories{scope}. What are you looking for? \
             I can search by meaning, or browse a few at a time."
        ),
        None => format!(
            "The memory network did not report a count{scope}. What are you looking for? \
             I can search by meaning, or browse a few at a time."
        ),
    }
}

/// Heading for a topical listing answered by semantic search.
pub fn topic_message(total: Option<u64>, topic: &str) -> String {
    match total {
        Some(total) => format!("{total} memories in total. Closest matches for \"{topic}\":"),
        None => format!("Closest matches for \"{topic}\":"),
    }
}
