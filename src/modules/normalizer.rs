// Stream Result Normalizer
//
// Module scripts return stream data in a zoo of ad hoc shapes: a bare URL
// string, a flat [label, url, label, url] array, arrays of objects keyed
// `streamUrl`/`url`/`file`, a single `stream` value, JWPlayer-style
// `source`/`sources` lists, or a top-level array. This module collapses all
// of them into one canonical `StreamBundle`.
//
// The checks run in a fixed order and the first match wins. The `streams`
// convention is authoritative for well-behaved modules; the later branches
// exist for backward compatibility with older scripts and must stay in this
// exact order because some shapes are structurally ambiguous subsets of
// others.

use super::types::{StreamBundle, StreamOption};
use serde_json::Value;
use std::collections::HashMap;

/// Normalize whatever a module's stream-extraction call returned.
pub fn normalize(data: &Value) -> StreamBundle {
    // Raw URL string return.
    if let Some(text) = data.as_str() {
        if text.starts_with("http") {
            return StreamBundle {
                streams: vec![stream_option("Default", text, None, text)],
                subtitles: Vec::new(),
            };
        }
        return StreamBundle::default();
    }

    let streams = from_streams_array(data)
        .or_else(|| from_single_stream(data))
        .or_else(|| from_root_url(data))
        .or_else(|| from_source_list(data, "source"))
        .or_else(|| from_source_list(data, "sources"))
        .or_else(|| from_bare_array(data))
        .unwrap_or_default();

    StreamBundle {
        streams,
        subtitles: extract_subtitles(data),
    }
}

/// Headers to attach when the module gave none. Deliberately empty: plain
/// no-Referer access matches direct-link behavior for the sources in
/// circulation. Extend per-host here if a source starts requiring Referer
/// or Origin to stream.
pub fn infer_headers(_url: &str) -> HashMap<String, String> {
    HashMap::new()
}

fn stream_option(
    label: &str,
    url: &str,
    explicit: Option<&Value>,
    infer_from: &str,
) -> StreamOption {
    let mut headers = infer_headers(infer_from);
    if let Some(Value::Object(map)) = explicit {
        for (key, value) in map {
            if let Some(text) = value.as_str() {
                headers.insert(key.clone(), text.to_string());
            }
        }
    }
    StreamOption {
        label: label.to_string(),
        url: url.to_string(),
        headers,
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn str_field<'a>(object: &'a Value, key: &str) -> Option<&'a str> {
    object.get(key).and_then(Value::as_str)
}

/// `streams` array: either a flattened [label, url, ...] sequence or an
/// array of per-stream objects.
fn from_streams_array(data: &Value) -> Option<Vec<StreamOption>> {
    let entries = data.get("streams")?.as_array()?;

    // Flat pairing mode: label at even indices, URL after it. An unpaired
    // trailing element is dropped.
    if entries.first().map_or(false, Value::is_string) {
        let mut streams = Vec::new();
        let mut index = 0;
        while index + 1 < entries.len() {
            let label = text_of(&entries[index]);
            let url = text_of(&entries[index + 1]);
            streams.push(stream_option(&label, &url, None, &url));
            index += 2;
        }
        return Some(streams);
    }

    Some(entries.iter().filter_map(object_entry).collect())
}

/// Per-element shape sniffing for `streams` object arrays. Unrecognized
/// elements are dropped.
fn object_entry(entry: &Value) -> Option<StreamOption> {
    if let Some(url) = entry.as_str() {
        return Some(stream_option("Stream", url, None, url));
    }

    let headers = entry.get("headers");

    if entry.get("streamUrl").is_some() || entry.get("title").is_some() {
        let label = str_field(entry, "title").unwrap_or("Unknown");
        let url = str_field(entry, "streamUrl").unwrap_or_default();
        return Some(stream_option(label, url, headers, url));
    }

    if entry.get("url").is_some() || entry.get("label").is_some() {
        let label = str_field(entry, "label").unwrap_or("Default");
        let url = str_field(entry, "url").unwrap_or_default();
        return Some(stream_option(label, url, headers, url));
    }

    // JWPlayer style.
    if let Some(url) = str_field(entry, "file") {
        let label = str_field(entry, "label").unwrap_or("Default");
        return Some(stream_option(label, url, headers, url));
    }

    None
}

/// Single `stream` value, object or string.
fn from_single_stream(data: &Value) -> Option<Vec<StreamOption>> {
    let stream = data.get("stream")?;

    if stream.is_object() {
        let label = str_field(stream, "title").unwrap_or("Default");
        let url = str_field(stream, "streamUrl")
            .or_else(|| str_field(stream, "url"))
            .or_else(|| str_field(stream, "file"))
            .unwrap_or_default();
        return Some(vec![stream_option(label, url, stream.get("headers"), url)]);
    }

    if let Some(url) = stream.as_str() {
        return Some(vec![stream_option("Default", url, None, url)]);
    }

    None
}

/// Legacy single `url` at the root.
fn from_root_url(data: &Value) -> Option<Vec<StreamOption>> {
    let url = str_field(data, "url")?;
    Some(vec![stream_option(
        "Default",
        url,
        data.get("headers"),
        url,
    )])
}

/// `source` / `sources` arrays of `{file|url|src, label?}` objects.
fn from_source_list(data: &Value, key: &str) -> Option<Vec<StreamOption>> {
    let entries = data.get(key)?.as_array()?;
    Some(
        entries
            .iter()
            .map(|entry| {
                let label = str_field(entry, "label").unwrap_or("Default");
                let url = str_field(entry, "file")
                    .or_else(|| str_field(entry, "url"))
                    .or_else(|| str_field(entry, "src"))
                    .unwrap_or_default();
                stream_option(label, url, entry.get("headers"), url)
            })
            .collect(),
    )
}

/// The payload itself is an array of `{file}` or `{url}` objects.
fn from_bare_array(data: &Value) -> Option<Vec<StreamOption>> {
    let entries = data.as_array()?;
    Some(
        entries
            .iter()
            .filter_map(|entry| {
                let url = str_field(entry, "file").or_else(|| str_field(entry, "url"))?;
                let label = str_field(entry, "label").unwrap_or("Default");
                Some(stream_option(label, url, entry.get("headers"), url))
            })
            .collect(),
    )
}

/// `subtitles`, falling back to `tracks`. Elements may be bare URL strings
/// or track objects; track objects contribute their `url`/`file`/`src`.
fn extract_subtitles(data: &Value) -> Vec<String> {
    let list = data
        .get("subtitles")
        .or_else(|| data.get("tracks"))
        .and_then(Value::as_array);

    match list {
        Some(entries) => entries
            .iter()
            .filter_map(|entry| {
                if let Some(text) = entry.as_str() {
                    return Some(text.to_string());
                }
                str_field(entry, "url")
                    .or_else(|| str_field(entry, "file"))
                    .or_else(|| str_field(entry, "src"))
                    .map(ToString::to_string)
            })
            .collect(),
        None => Vec::new(),
    }
}
