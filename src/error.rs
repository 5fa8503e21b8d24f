// Module engine error types
//
// Load-time failures (manifest, script fetch, execution, missing contract)
// are distinguishable so a caller can tell "couldn't reach module" apart
// from "module is malformed". Call-time failures carry enough context to be
// shown next to the module name.

use thiserror::Error;

/// Errors produced by the module loader and loaded-module calls.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// The manifest URL could not be fetched or returned a non-success status.
    #[error("failed to fetch manifest: {0}")]
    ManifestFetch(String),

    /// The manifest text was not valid JSON.
    #[error("invalid JSON manifest: {0}")]
    InvalidManifest(String),

    /// The manifest parsed but does not name a script.
    #[error("manifest missing \"scriptUrl\"")]
    MissingScriptUrl,

    /// The module script could not be fetched or returned a non-success status.
    #[error("failed to fetch script: {0}")]
    ScriptFetch(String),

    /// The script threw during evaluation, or a module call threw.
    #[error("script execution failed: {0}")]
    ScriptExecution(String),

    /// The script defined neither a `search` method nor a global
    /// `searchResults` function. This is the minimum viable module contract.
    #[error("module did not define \"searchResults\" global function")]
    MissingSearchFunction,

    /// A loaded module was asked for an operation it never defined.
    #[error("module missing \"{0}\" function")]
    MissingFunction(&'static str),

    /// The module returned data the engine could not interpret.
    #[error("module returned unexpected data: {0}")]
    BadPayload(String),
}
