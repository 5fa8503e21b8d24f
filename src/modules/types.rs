// Module System Data Types
//
// Core data structures exchanged with module scripts: the manifest that
// names a script, search results, content details with episodes, and the
// canonical stream bundle produced by normalization.
//
// Every module-defined id (content id, episode id) is an opaque string and
// is passed back to the module verbatim — the engine never parses it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// JSON descriptor naming a module's script location and metadata.
///
/// Identity is the `scriptUrl`; everything else is display metadata. Unknown
/// keys are preserved so callers can round-trip manifests they store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleManifest {
    #[serde(default)]
    pub script_url: String,
    #[serde(default)]
    pub source_name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One entry of a module's search response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchResultItem {
    pub id: String,
    pub title: String,
    pub poster: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
}

impl Default for SearchResultItem {
    fn default() -> Self {
        Self {
            id: String::new(),
            title: String::new(),
            poster: None,
            kind: "Video".to_string(),
            description: String::new(),
        }
    }
}

/// Reference to one playable episode. `id` is module-defined and handed back
/// to `get_stream` untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EpisodeRef {
    pub id: String,
    pub title: String,
    pub number: f64,
    pub season: u32,
}

/// Details for one content item, with its episode list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentDetails {
    pub id: String,
    pub title: String,
    pub description: String,
    /// Release year or date text, as loose as modules report it. Used by
    /// callers for metadata matching only.
    pub year: Option<String>,
    pub episodes: Vec<EpisodeRef>,
}

/// One playable stream choice.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamOption {
    pub label: String,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// Canonical result of stream resolution.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StreamBundle {
    pub streams: Vec<StreamOption>,
    pub subtitles: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_keeps_unknown_keys() {
        let manifest: ModuleManifest = serde_json::from_str(
            r#"{"scriptUrl": "https://x/mod.js", "sourceName": "X", "iconUrl": "https://x/icon.png"}"#,
        )
        .unwrap();
        assert_eq!(manifest.script_url, "https://x/mod.js");
        assert_eq!(manifest.source_name.as_deref(), Some("X"));
        assert!(manifest.extra.contains_key("iconUrl"));
    }

    #[test]
    fn test_search_item_defaults() {
        let item: SearchResultItem = serde_json::from_str(r#"{"id": "a", "title": "T"}"#).unwrap();
        assert_eq!(item.kind, "Video");
        assert_eq!(item.poster, None);
        assert_eq!(item.description, "");
    }
}
