// Module System
//
// Handles:
// - Manifest resolution and script loading
// - JavaScript execution in per-module QuickJS realms
// - The polyfilled native scraping API scripts are written against
// - Normalization of the two module calling conventions and of stream
//   result shapes

pub mod loader;
pub mod manifest;
pub mod normalizer;
pub mod polyfill;
pub mod runtime;
pub mod types;

pub use loader::{LoadedModule, ModuleLoader};
pub use types::{
    ContentDetails, EpisodeRef, ModuleManifest, SearchResultItem, StreamBundle, StreamOption,
};
