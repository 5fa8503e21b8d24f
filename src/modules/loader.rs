// Module Loader
//
// Turns a manifest (or its URL, or inline JSON) into a normalized module
// handle. The pipeline: resolve manifest -> fetch script through the proxy
// path -> patch known-broken snippets -> execute in a fresh realm with the
// polyfill installed -> detect which calling convention the script used ->
// wrap it behind one uniform interface.
//
// Failure policy: anything up to and including execution surfaces as a
// typed error ("module is broken or unreachable" is actionable). Once a
// module is loaded, `search`/`get_details` still propagate their errors —
// the caller needs to know browsing failed — but `get_stream` degrades to
// an empty bundle, because stream extraction failure should offer "try
// another source" rather than crash playback.

use crate::error::ModuleError;
use crate::modules::manifest;
use crate::modules::normalizer;
use crate::modules::runtime::{LegacySlot, ModuleRuntime};
use crate::modules::types::{ContentDetails, EpisodeRef, ModuleManifest, SearchResultItem, StreamBundle};
use crate::proxy::ProxyClient;
use serde_json::Value;
use std::sync::Arc;

/// Known-broken snippets shipped by upstream module authors, removed
/// textually before execution. A narrowly-scoped workaround list, not a
/// sanitizer.
const SCRIPT_PATCHES: &[&str] = &[".replace(\"megaup22\", \"megaup.site\")"];

fn apply_script_patches(code: &str) -> String {
    let mut patched = code.to_string();
    for needle in SCRIPT_PATCHES {
        if patched.contains(needle) {
            log::info!("patching module script: removing {needle:?}");
            patched = patched.replace(needle, "");
        }
    }
    patched
}

/// Loads module scripts. Stateless across calls: every `load` re-executes
/// the script and hands back an independent handle; callers own handles
/// for their lifetime and there is no registry here.
pub struct ModuleLoader {
    proxy: Arc<ProxyClient>,
}

impl ModuleLoader {
    pub fn new(proxy: Arc<ProxyClient>) -> Self {
        Self { proxy }
    }

    /// Load from an absolute manifest URL or inline JSON manifest text.
    pub fn load(&self, input: &str) -> Result<LoadedModule, ModuleError> {
        let manifest = manifest::resolve(&self.proxy, input)?;
        self.load_manifest(manifest)
    }

    /// Load from an already-parsed manifest.
    pub fn load_manifest(&self, manifest: ModuleManifest) -> Result<LoadedModule, ModuleError> {
        manifest::ensure_script_url(&manifest)?;

        let response = self
            .proxy
            .fetch_text(&manifest.script_url)
            .map_err(|err| ModuleError::ScriptFetch(err.to_string()))?;
        if !response.ok {
            return Err(ModuleError::ScriptFetch(format!("HTTP {}", response.status)));
        }

        self.load_from_code(manifest, &response.body)
    }

    /// Load from script source directly, skipping the fetch. This is the
    /// paste-a-script installation path.
    pub fn load_from_code(
        &self,
        manifest: ModuleManifest,
        code: &str,
    ) -> Result<LoadedModule, ModuleError> {
        let code = apply_script_patches(code);
        let (runtime, object_name) = ModuleRuntime::execute(self.proxy.clone(), &code)?;

        let name = object_name
            .or_else(|| manifest.source_name.clone())
            .unwrap_or_else(|| "Unknown Module".to_string());

        log::info!("loaded module: {name}");
        Ok(LoadedModule {
            manifest,
            name,
            runtime,
        })
    }
}

/// A loaded module: the uniform `{search, get_details, get_stream}` handle
/// both calling conventions collapse into.
#[derive(Debug)]
pub struct LoadedModule {
    manifest: ModuleManifest,
    name: String,
    runtime: ModuleRuntime,
}

impl LoadedModule {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn manifest(&self) -> &ModuleManifest {
        &self.manifest
    }

    /// Search the module's source. Errors propagate.
    pub fn search(&self, query: &str) -> Result<Vec<SearchResultItem>, ModuleError> {
        if self.runtime.is_object_convention() {
            let raw = parse_if_string(self.runtime.call_object_method("search", query)?)?;
            return serde_json::from_value(raw)
                .map_err(|err| ModuleError::BadPayload(err.to_string()));
        }

        let raw = parse_if_string(self.runtime.call_legacy(LegacySlot::Search, query)?)?;
        let items = raw
            .as_array()
            .ok_or_else(|| ModuleError::BadPayload("search result is not an array".to_string()))?;

        Ok(items
            .iter()
            .map(|item| SearchResultItem {
                id: text_field(item, "href"),
                title: text_field(item, "title"),
                poster: item
                    .get("image")
                    .and_then(Value::as_str)
                    .map(ToString::to_string),
                kind: "Video".to_string(),
                description: String::new(),
            })
            .collect())
    }

    /// Fetch details and the episode list. Errors propagate.
    pub fn get_details(&self, id: &str) -> Result<ContentDetails, ModuleError> {
        if self.runtime.is_object_convention() {
            let raw = parse_if_string(self.runtime.call_object_method("getDetails", id)?)?;
            return Ok(details_from_value(id, &raw, raw.get("episodes")));
        }

        let raw = parse_if_string(self.runtime.call_legacy(LegacySlot::Details, id)?)?;
        // Legacy modules return the details object wrapped in an array.
        let details = raw
            .as_array()
            .and_then(|entries| entries.first())
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()));

        let episodes = if self.runtime.has_legacy(LegacySlot::Episodes) {
            let raw = parse_if_string(self.runtime.call_legacy(LegacySlot::Episodes, id)?)?;
            let entries = raw.as_array().ok_or_else(|| {
                ModuleError::BadPayload("episode list is not an array".to_string())
            })?;
            Some(entries.iter().map(legacy_episode).collect::<Vec<_>>())
        } else {
            None
        };

        let mut merged = details_from_value(id, &details, None);
        merged.id = id.to_string();
        merged.episodes = episodes.unwrap_or_default();
        Ok(merged)
    }

    /// Resolve streams for an episode. Never fails: any internal error is
    /// logged and yields an empty bundle for the "no streams available" UI
    /// state.
    pub fn get_stream(&self, episode_id: &str) -> StreamBundle {
        match self.try_stream(episode_id) {
            Ok(bundle) => bundle,
            Err(err) => {
                log::error!("stream extraction error for {}: {err}", self.name);
                StreamBundle::default()
            }
        }
    }

    fn try_stream(&self, episode_id: &str) -> Result<StreamBundle, ModuleError> {
        let raw = if self.runtime.is_object_convention() {
            self.runtime.call_object_method("getStream", episode_id)?
        } else {
            self.runtime.call_legacy(LegacySlot::Stream, episode_id)?
        };

        // A raw URL string short-circuits before any JSON interpretation.
        if raw.as_str().map_or(false, |text| text.starts_with("http")) {
            return Ok(normalizer::normalize(&raw));
        }

        let data = parse_if_string(raw)?;
        Ok(normalizer::normalize(&data))
    }
}

/// Modules may return JSON-encoded strings instead of structures.
fn parse_if_string(value: Value) -> Result<Value, ModuleError> {
    match value {
        Value::String(text) => {
            serde_json::from_str(&text).map_err(|err| ModuleError::BadPayload(err.to_string()))
        }
        other => Ok(other),
    }
}

fn text_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn format_episode_number(number: f64) -> String {
    if number.fract() == 0.0 {
        format!("{}", number as i64)
    } else {
        format!("{number}")
    }
}

fn episode_number(entry: &Value) -> f64 {
    match entry.get("number") {
        Some(Value::Number(number)) => number.as_f64().unwrap_or(0.0),
        Some(Value::String(text)) => text.parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn legacy_episode(entry: &Value) -> EpisodeRef {
    let number = episode_number(entry);
    let title = entry
        .get("title")
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .unwrap_or_else(|| format!("Episode {}", format_episode_number(number)));
    EpisodeRef {
        id: text_field(entry, "href"),
        title,
        number,
        season: 1,
    }
}

fn object_episode(entry: &Value) -> EpisodeRef {
    let number = episode_number(entry);
    let id = entry
        .get("id")
        .or_else(|| entry.get("href"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let title = entry
        .get("title")
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .unwrap_or_else(|| format!("Episode {}", format_episode_number(number)));
    let season = entry
        .get("season")
        .and_then(Value::as_u64)
        .unwrap_or(1) as u32;
    EpisodeRef {
        id,
        title,
        number,
        season,
    }
}

/// Release year or date text for metadata matching, as loosely as modules
/// report it.
fn coalesce_year(details: &Value) -> Option<String> {
    for key in ["year", "aired", "premiered", "releaseDate"] {
        match details.get(key) {
            Some(Value::String(text)) if !text.is_empty() => return Some(text.clone()),
            Some(Value::Number(number)) if number.as_f64() != Some(0.0) => {
                return Some(number.to_string())
            }
            _ => continue,
        }
    }
    None
}

fn details_from_value(id: &str, details: &Value, episodes: Option<&Value>) -> ContentDetails {
    let episodes = episodes
        .and_then(Value::as_array)
        .map(|entries| entries.iter().map(object_episode).collect())
        .unwrap_or_default();

    ContentDetails {
        id: details
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or(id)
            .to_string(),
        title: details
            .get("title")
            .and_then(Value::as_str)
            .filter(|title| !title.is_empty())
            .unwrap_or("Details")
            .to_string(),
        description: text_field(details, "description"),
        year: coalesce_year(details),
        episodes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loader() -> ModuleLoader {
        ModuleLoader::new(Arc::new(ProxyClient::direct()))
    }

    fn manifest() -> ModuleManifest {
        serde_json::from_str(r#"{"scriptUrl": "https://x/mod.js", "sourceName": "Test Source"}"#)
            .unwrap()
    }

    #[test]
    fn test_legacy_search_mapping() {
        let module = loader()
            .load_from_code(
                manifest(),
                r#"globalThis.searchResults = q => [{href: "h1", title: "T " + q, image: "i1"}];"#,
            )
            .unwrap();

        let results = module.search("cat").unwrap();
        assert_eq!(
            results,
            vec![SearchResultItem {
                id: "h1".to_string(),
                title: "T cat".to_string(),
                poster: Some("i1".to_string()),
                kind: "Video".to_string(),
                description: String::new(),
            }]
        );
    }

    #[test]
    fn test_legacy_search_accepts_json_string() {
        let module = loader()
            .load_from_code(
                manifest(),
                r#"globalThis.searchResults = q => JSON.stringify([{href: "h", title: q}]);"#,
            )
            .unwrap();
        let results = module.search("dog").unwrap();
        assert_eq!(results[0].id, "h");
        assert_eq!(results[0].poster, None);
    }

    #[test]
    fn test_legacy_details_merges_episodes() {
        let module = loader()
            .load_from_code(
                manifest(),
                r#"
                globalThis.searchResults = q => [];
                globalThis.extractDetails = id => [{title: "Show", description: "D", aired: "2021"}];
                globalThis.extractEpisodes = id => [
                    {href: "e1", title: "Opening", number: 1},
                    {href: "e2", number: 2}
                ];
                "#,
            )
            .unwrap();

        let details = module.get_details("show-1").unwrap();
        assert_eq!(details.id, "show-1");
        assert_eq!(details.title, "Show");
        assert_eq!(details.year.as_deref(), Some("2021"));
        assert_eq!(details.episodes.len(), 2);
        assert_eq!(details.episodes[0].title, "Opening");
        assert_eq!(details.episodes[1].title, "Episode 2");
        assert_eq!(details.episodes[1].id, "e2");
        assert_eq!(details.episodes[1].season, 1);
    }

    #[test]
    fn test_legacy_details_without_episode_extractor() {
        let module = loader()
            .load_from_code(
                manifest(),
                r#"
                globalThis.searchResults = q => [];
                globalThis.extractDetails = id => [{}];
                "#,
            )
            .unwrap();

        let details = module.get_details("x").unwrap();
        assert_eq!(details.title, "Details");
        assert_eq!(details.episodes, vec![]);
        assert_eq!(details.year, None);
    }

    #[test]
    fn test_legacy_details_missing_extractor_is_distinguishable() {
        let module = loader()
            .load_from_code(manifest(), "globalThis.searchResults = q => [];")
            .unwrap();
        let err = module.get_details("x").unwrap_err();
        assert!(matches!(err, ModuleError::MissingFunction("extractDetails")));
    }

    #[test]
    fn test_legacy_stream_flat_pairs() {
        let module = loader()
            .load_from_code(
                manifest(),
                r#"
                globalThis.searchResults = q => [];
                globalThis.extractStreamUrl = id => ({
                    streams: ["720p", "http://a/720.m3u8", "1080p", "http://a/1080.m3u8"]
                });
                "#,
            )
            .unwrap();

        let bundle = module.get_stream("e1");
        assert_eq!(bundle.streams.len(), 2);
        assert_eq!(bundle.streams[0].label, "720p");
        assert_eq!(bundle.streams[1].url, "http://a/1080.m3u8");
    }

    #[test]
    fn test_legacy_stream_raw_url_string() {
        let module = loader()
            .load_from_code(
                manifest(),
                r#"
                globalThis.searchResults = q => [];
                globalThis.extractStreamUrl = id => "http://a/video.mp4";
                "#,
            )
            .unwrap();

        let bundle = module.get_stream("e1");
        assert_eq!(bundle.streams[0].label, "Default");
        assert_eq!(bundle.streams[0].url, "http://a/video.mp4");
    }

    #[test]
    fn test_stream_errors_degrade_to_empty_bundle() {
        let module = loader()
            .load_from_code(
                manifest(),
                r#"
                globalThis.searchResults = q => [];
                globalThis.extractStreamUrl = id => { throw new Error("no stream"); };
                "#,
            )
            .unwrap();
        assert_eq!(module.get_stream("e1"), StreamBundle::default());

        // Missing extractor degrades the same way.
        let module = loader()
            .load_from_code(manifest(), "globalThis.searchResults = q => [];")
            .unwrap();
        assert_eq!(module.get_stream("e1"), StreamBundle::default());
    }

    #[test]
    fn test_object_convention_module() {
        let module = loader()
            .load_from_code(
                manifest(),
                r#"
                const mod = {
                    name: 'Sample',
                    search: async function(query) {
                        return [{id: 'elephants', title: 'Elephants Dream', type: 'Movie'}];
                    },
                    getDetails: async function(id) {
                        return {
                            id: id,
                            title: 'Elephants Dream',
                            description: 'Proog and Emo',
                            episodes: [{id: id + '-full', title: 'Full Movie', number: 1}]
                        };
                    },
                    getStream: async function(episodeId) {
                        return { url: 'http://cdn/ed.mp4', type: 'mp4' };
                    }
                };
                mod;
                "#,
            )
            .unwrap();

        assert_eq!(module.name(), "Sample");

        let results = module.search("ele").unwrap();
        assert_eq!(results[0].kind, "Movie");

        let details = module.get_details("elephants").unwrap();
        assert_eq!(details.episodes[0].id, "elephants-full");

        let bundle = module.get_stream("elephants-full");
        assert_eq!(bundle.streams.len(), 1);
        assert_eq!(bundle.streams[0].label, "Default");
        assert_eq!(bundle.streams[0].url, "http://cdn/ed.mp4");
    }

    #[test]
    fn test_module_name_falls_back_to_manifest() {
        let module = loader()
            .load_from_code(manifest(), "globalThis.searchResults = q => [];")
            .unwrap();
        assert_eq!(module.name(), "Test Source");

        let bare: ModuleManifest = serde_json::from_str(r#"{"scriptUrl": "https://x/m.js"}"#).unwrap();
        let module = loader()
            .load_from_code(bare, "globalThis.searchResults = q => [];")
            .unwrap();
        assert_eq!(module.name(), "Unknown Module");
    }

    #[test]
    fn test_script_patching_removes_broken_snippet() {
        let code = r#"
            var domain = "https://megaup22.example".replace("megaup22", "megaup.site");
            globalThis.searchResults = q => [{href: domain, title: q}];
        "#;
        let module = loader().load_from_code(manifest(), code).unwrap();
        let results = module.search("q").unwrap();
        // The broken rewrite was stripped, so the original domain survives.
        assert_eq!(results[0].id, "https://megaup22.example");
    }

    #[test]
    fn test_load_rejects_bad_manifest_input() {
        let err = loader().load("{broken json").unwrap_err();
        assert!(matches!(err, ModuleError::InvalidManifest(_)));

        let err = loader().load(r#"{"sourceName": "X"}"#).unwrap_err();
        assert!(matches!(err, ModuleError::MissingScriptUrl));
    }

    #[test]
    fn test_opaque_ids_pass_through_verbatim() {
        let module = loader()
            .load_from_code(
                manifest(),
                r#"
                globalThis.searchResults = q => [];
                globalThis.extractDetails = id => [{title: id}];
                "#,
            )
            .unwrap();
        // Ids are uninterpreted strings, URL-shaped or not.
        let odd_id = "weird::id//with spaces?&x=1";
        let details = module.get_details(odd_id).unwrap();
        assert_eq!(details.id, odd_id);
        assert_eq!(details.title, odd_id);
    }
}
