// Manifest resolution
//
// `load()` accepts a manifest three ways: an already-parsed struct, an
// absolute URL to fetch (through the proxy path, like everything else), or
// inline JSON text. Parse failures and a missing `scriptUrl` are distinct
// errors so callers can tell bad input from an unreachable host.

use crate::error::ModuleError;
use crate::modules::types::ModuleManifest;
use crate::proxy::ProxyClient;

/// Resolve a manifest from URL or inline JSON text.
pub fn resolve(proxy: &ProxyClient, input: &str) -> Result<ModuleManifest, ModuleError> {
    let input = input.trim();

    let manifest: ModuleManifest = if input.starts_with("http") {
        let response = proxy
            .fetch_text(input)
            .map_err(|err| ModuleError::ManifestFetch(err.to_string()))?;
        if !response.ok {
            return Err(ModuleError::ManifestFetch(format!("HTTP {}", response.status)));
        }
        serde_json::from_str(&response.body)
            .map_err(|err| ModuleError::InvalidManifest(err.to_string()))?
    } else {
        serde_json::from_str(input).map_err(|err| ModuleError::InvalidManifest(err.to_string()))?
    };

    ensure_script_url(&manifest)?;
    Ok(manifest)
}

/// Reject manifests that do not name a script.
pub fn ensure_script_url(manifest: &ModuleManifest) -> Result<(), ModuleError> {
    if manifest.script_url.trim().is_empty() {
        return Err(ModuleError::MissingScriptUrl);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_json_manifest() {
        let proxy = ProxyClient::direct();
        let manifest = resolve(
            &proxy,
            r#"  {"scriptUrl": "https://x/mod.js", "sourceName": "X"}  "#,
        )
        .unwrap();
        assert_eq!(manifest.script_url, "https://x/mod.js");
    }

    #[test]
    fn test_invalid_json_is_invalid_manifest() {
        let proxy = ProxyClient::direct();
        let err = resolve(&proxy, "not json at all").unwrap_err();
        assert!(matches!(err, ModuleError::InvalidManifest(_)));
    }

    #[test]
    fn test_missing_script_url() {
        let proxy = ProxyClient::direct();
        let err = resolve(&proxy, r#"{"sourceName": "X"}"#).unwrap_err();
        assert!(matches!(err, ModuleError::MissingScriptUrl));

        let err = resolve(&proxy, r#"{"scriptUrl": "   "}"#).unwrap_err();
        assert!(matches!(err, ModuleError::MissingScriptUrl));
    }
}
