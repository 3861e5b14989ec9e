//! URL building and canonicalization.
//!
//! [`build_url`] appends a parameter map to a URL the same way common HTTP
//! clients do: `null` values are dropped, arrays expand to repeated
//! `name[]=value` pairs and nested objects are sent as JSON. [`sort_query`]
//! turns any URL into its canonical form by sorting the query pairs, so two
//! requests that differ only in parameter order share the same identity.

use http::{Method, Uri};
use serde::Serialize;
use serde_json::{Map, Value};

/// Query parameters attached to a request before they are serialized.
pub type QueryParams = Map<String, Value>;

/// Appends `params` to `url` using the default serialization.
///
/// A `#fragment` is dropped before the query is appended. If `url` already
/// carries a query string, the parameters are added after a `&`.
pub fn build_url(url: &str, params: &QueryParams) -> String {
    build_url_with(url, params, serialize_params)
}

/// Appends `params` to `url`, serializing them with `serializer`.
pub fn build_url_with<F>(url: &str, params: &QueryParams, serializer: F) -> String
where
    F: Fn(&QueryParams) -> String,
{
    let serialized = serializer(params);
    if serialized.is_empty() {
        return url.to_owned();
    }

    let base = match url.find('#') {
        Some(index) => &url[..index],
        None => url,
    };
    let separator = if base.contains('?') { '&' } else { '?' };

    let mut built = String::with_capacity(base.len() + serialized.len() + 1);
    built.push_str(base);
    built.push(separator);
    built.push_str(&serialized);
    built
}

/// Builds the URL and returns it with its query pairs sorted.
pub fn build_sorted_url(url: &str, params: &QueryParams) -> String {
    sort_query(&build_url(url, params))
}

/// Sorts the `name=value` pairs of a URL's query string.
///
/// Pairs are compared as whole strings. A URL without a query, or with an
/// empty one, is returned unchanged.
pub fn sort_query(url: &str) -> String {
    match url.split_once('?') {
        Some((path, query)) if !query.is_empty() => {
            let mut pairs: Vec<&str> = query.split('&').collect();
            pairs.sort_unstable();
            format!("{}?{}", path, pairs.join("&"))
        }
        _ => url.to_owned(),
    }
}

/// Canonical identity of a request: method plus sorted URL.
pub fn canonical_key(method: &Method, uri: &Uri) -> String {
    format!("{} {}", method, sort_query(&uri.to_string()))
}

/// Converts any serializable value into [`QueryParams`].
///
/// Non-object values yield an empty map.
pub fn params_from<T: Serialize>(value: &T) -> Result<QueryParams, serde_json::Error> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        _ => Ok(QueryParams::new()),
    }
}

/// Default parameter serialization.
pub fn serialize_params(params: &QueryParams) -> String {
    let mut parts = Vec::new();
    for (name, value) in params {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                let key = encode(&format!("{name}[]"));
                for item in items.iter().filter(|item| !item.is_null()) {
                    parts.push(format!("{}={}", key, encode(&value_to_string(item))));
                }
            }
            other => {
                parts.push(format!("{}={}", encode(name), encode(&value_to_string(other))));
            }
        }
    }
    parts.join("&")
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Null => String::new(),
        nested => nested.to_string(),
    }
}

fn encode(raw: &str) -> String {
    ::url::form_urlencoded::byte_serialize(raw.as_bytes())
        .collect::<String>()
        .replace("%3A", ":")
        .replace("%24", "$")
        .replace("%2C", ",")
        .replace("%5B", "[")
        .replace("%5D", "]")
}
