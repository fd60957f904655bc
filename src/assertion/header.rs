//! Header assertions over `response.headers`.

use super::{record, Check};
use crate::context::SharedContext;
use serde_json::Value;
use std::collections::HashMap;

/// An exact key wins; otherwise the lowest case-insensitive match, so the
/// result never depends on map iteration order.
fn find_header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    if let Some(value) = headers.get(name) {
        return Some(value.as_str());
    }
    headers
        .iter()
        .filter(|(key, _)| key.eq_ignore_ascii_case(name))
        .min_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, value)| value.as_str())
}

pub(crate) fn to_have_header(headers: &HashMap<String, String>, name: &str) -> Check {
    let found = find_header(headers, name);
    Check::new(
        "has header",
        found.is_some(),
        found.map(|v| Value::String(v.to_string())),
        Some(Value::String(name.to_string())),
    )
}

pub(crate) fn to_have_header_value(headers: &HashMap<String, String>, name: &str, expected: &str) -> Check {
    let found = find_header(headers, name);
    let check = Check::new(
        "has header value",
        found == Some(expected),
        found.map(|v| Value::String(v.to_string())),
        Some(Value::String(expected.to_string())),
    );
    match found {
        Some(_) => check,
        None => check.with_detail(format!("Header '{name}' is not present")),
    }
}

/// Case-insensitive substring check on `Content-Type`.
pub(crate) fn to_have_content_type(headers: &HashMap<String, String>, expected: &str) -> Check {
    let found = find_header(headers, "content-type");
    let passed = found.is_some_and(|ct| {
        ct.to_ascii_lowercase()
            .contains(&expected.to_ascii_lowercase())
    });
    Check::new(
        "content type",
        passed,
        found.map(|v| Value::String(v.to_string())),
        Some(Value::String(expected.to_string())),
    )
}

#[derive(Debug, Clone)]
pub struct HeaderAssertions {
    context: SharedContext,
    headers: HashMap<String, String>,
}

impl HeaderAssertions {
    pub fn new(context: &SharedContext, headers: HashMap<String, String>) -> Self {
        Self {
            context: context.clone(),
            headers,
        }
    }

    /// Headers of the context's response; missing headers read as
    /// empty.
    pub fn from_response(context: &SharedContext) -> Self {
        let headers = context.with(|ctx| ctx.response.headers.clone().unwrap_or_default());
        Self::new(context, headers)
    }

    fn record(&self, check: Check, message: Option<&str>) -> &Self {
        record(&self.context, check, message);
        self
    }

    pub fn to_have_header(&self, name: &str, message: Option<&str>) -> &Self {
        self.record(to_have_header(&self.headers, name), message)
    }

    pub fn to_have_header_value(&self, name: &str, expected: &str, message: Option<&str>) -> &Self {
        self.record(to_have_header_value(&self.headers, name, expected), message)
    }

    pub fn to_have_content_type(&self, expected: &str, message: Option<&str>) -> &Self {
        self.record(to_have_content_type(&self.headers, expected), message)
    }
}
