// Module runtime - QuickJS execution and interface detection
//
// Each loaded module owns a dedicated QuickJS runtime and context with only
// the polyfilled bindings installed. After the script executes, its
// interface is detected (first match wins):
//
// 1. Object-return convention: the script evaluates to an object exposing a
//    callable `search`; its methods are called with the object as `this`.
// 2. Legacy global-function convention: the script defined free functions
//    (`searchResults`, `extractDetails`, `extractEpisodes`,
//    `extractStreamUrl`) on the global object. References are snapshotted
//    immediately after execution so nothing that runs later can swap them.
//
// Values cross back to Rust as JSON. Async module functions are supported:
// a returned Promise is driven to completion on the QuickJS job queue (all
// host callbacks are synchronous, so every pending promise can settle).

use crate::error::ModuleError;
use crate::modules::polyfill;
use crate::proxy::ProxyClient;
use rquickjs::function::This;
use rquickjs::{Context, Ctx, Function, Object, Persistent, Runtime, Value};
use std::sync::Arc;

/// The four legacy global entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacySlot {
    Search,
    Details,
    Episodes,
    Stream,
}

impl LegacySlot {
    pub fn name(self) -> &'static str {
        match self {
            LegacySlot::Search => "searchResults",
            LegacySlot::Details => "extractDetails",
            LegacySlot::Episodes => "extractEpisodes",
            LegacySlot::Stream => "extractStreamUrl",
        }
    }
}

enum ModuleAdapter {
    ObjectReturn {
        object: Persistent<Object<'static>>,
    },
    LegacyGlobals {
        search: Persistent<Function<'static>>,
        details: Option<Persistent<Function<'static>>>,
        episodes: Option<Persistent<Function<'static>>>,
        stream: Option<Persistent<Function<'static>>>,
    },
}

/// A module script loaded into its own realm.
///
/// Not `Send`: QuickJS contexts are single-threaded. Callers that need this
/// off the main thread wrap calls in `spawn_blocking` on a dedicated
/// thread, creating the module there.
pub struct ModuleRuntime {
    _runtime: Runtime,
    context: Context,
    adapter: ModuleAdapter,
}

impl std::fmt::Debug for ModuleRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRuntime").finish_non_exhaustive()
    }
}

impl ModuleRuntime {
    /// Execute a module script and detect its interface. Returns the
    /// runtime and, for object-convention modules, the name the object
    /// declared for itself.
    pub fn execute(
        proxy: Arc<ProxyClient>,
        code: &str,
    ) -> Result<(Self, Option<String>), ModuleError> {
        let runtime = Runtime::new().map_err(engine_error)?;
        let context = Context::full(&runtime).map_err(engine_error)?;

        let (adapter, object_name) = context.with(|ctx| {
            polyfill::install(&ctx, proxy.clone()).map_err(|err| exec_error(&ctx, err))?;

            let value: Value = ctx.eval(code).map_err(|err| exec_error(&ctx, err))?;
            let value = settle(&ctx, value)?;

            if let Some(object) = value.as_object() {
                let has_search = object
                    .get::<_, Value>("search")
                    .map_or(false, |member| member.is_function());
                if has_search {
                    log::info!("module loaded via returned object");
                    let name = object.get::<_, Option<String>>("name").ok().flatten();
                    return Ok((
                        ModuleAdapter::ObjectReturn {
                            object: Persistent::save(&ctx, object.clone()),
                        },
                        name,
                    ));
                }
            }

            // Snapshot the legacy globals this script just defined, before
            // anything else can overwrite them.
            let globals = ctx.globals();
            let capture = |key: &str| -> Option<Persistent<Function<'static>>> {
                globals
                    .get::<_, Function>(key)
                    .ok()
                    .map(|function| Persistent::save(&ctx, function))
            };

            let search = capture(LegacySlot::Search.name())
                .ok_or(ModuleError::MissingSearchFunction)?;
            log::info!("module loaded via legacy global functions");
            Ok((
                ModuleAdapter::LegacyGlobals {
                    search,
                    details: capture(LegacySlot::Details.name()),
                    episodes: capture(LegacySlot::Episodes.name()),
                    stream: capture(LegacySlot::Stream.name()),
                },
                None,
            ))
        })?;

        Ok((
            Self {
                _runtime: runtime,
                context,
                adapter,
            },
            object_name,
        ))
    }

    pub fn is_object_convention(&self) -> bool {
        matches!(self.adapter, ModuleAdapter::ObjectReturn { .. })
    }

    pub fn has_legacy(&self, slot: LegacySlot) -> bool {
        match &self.adapter {
            ModuleAdapter::ObjectReturn { .. } => false,
            ModuleAdapter::LegacyGlobals {
                details,
                episodes,
                stream,
                ..
            } => match slot {
                LegacySlot::Search => true,
                LegacySlot::Details => details.is_some(),
                LegacySlot::Episodes => episodes.is_some(),
                LegacySlot::Stream => stream.is_some(),
            },
        }
    }

    /// Call a method on an object-convention module with the module object
    /// as `this`, returning the settled result as JSON.
    pub fn call_object_method(
        &self,
        name: &'static str,
        arg: &str,
    ) -> Result<serde_json::Value, ModuleError> {
        let object = match &self.adapter {
            ModuleAdapter::ObjectReturn { object } => object.clone(),
            ModuleAdapter::LegacyGlobals { .. } => return Err(ModuleError::MissingFunction(name)),
        };

        self.context.with(|ctx| {
            let object = object.restore(&ctx).map_err(|err| exec_error(&ctx, err))?;
            let function: Function = object
                .get(name)
                .map_err(|_| ModuleError::MissingFunction(name))?;
            let value: Value = function
                .call((This(object.clone()), arg))
                .map_err(|err| exec_error(&ctx, err))?;
            let value = settle(&ctx, value)?;
            to_json(&ctx, value)
        })
    }

    /// Call one of the captured legacy globals, returning the settled
    /// result as JSON.
    pub fn call_legacy(&self, slot: LegacySlot, arg: &str) -> Result<serde_json::Value, ModuleError> {
        let function = match &self.adapter {
            ModuleAdapter::ObjectReturn { .. } => {
                return Err(ModuleError::MissingFunction(slot.name()))
            }
            ModuleAdapter::LegacyGlobals {
                search,
                details,
                episodes,
                stream,
            } => match slot {
                LegacySlot::Search => Some(search.clone()),
                LegacySlot::Details => details.clone(),
                LegacySlot::Episodes => episodes.clone(),
                LegacySlot::Stream => stream.clone(),
            }
            .ok_or(ModuleError::MissingFunction(slot.name()))?,
        };

        self.context.with(|ctx| {
            let function = function.restore(&ctx).map_err(|err| exec_error(&ctx, err))?;
            let value: Value = function
                .call((arg,))
                .map_err(|err| exec_error(&ctx, err))?;
            let value = settle(&ctx, value)?;
            to_json(&ctx, value)
        })
    }
}

/// Drive a returned Promise to completion on the job queue.
fn settle<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> Result<Value<'js>, ModuleError> {
    if let Some(promise) = value.as_promise() {
        return match promise.finish::<Value>() {
            Ok(resolved) => Ok(resolved),
            Err(rquickjs::Error::WouldBlock) => Err(ModuleError::ScriptExecution(
                "module promise never settled".to_string(),
            )),
            Err(err) => Err(exec_error(ctx, err)),
        };
    }
    Ok(value)
}

fn to_json<'a>(ctx: &Ctx<'a>, value: Value<'a>) -> Result<serde_json::Value, ModuleError> {
    if value.is_undefined() || value.is_null() {
        return Ok(serde_json::Value::Null);
    }
    let text = match ctx
        .json_stringify(value)
        .map_err(|err| exec_error(ctx, err))?
    {
        Some(text) => text.to_string().map_err(|err| exec_error(ctx, err))?,
        None => return Ok(serde_json::Value::Null),
    };
    serde_json::from_str(&text).map_err(|err| ModuleError::BadPayload(err.to_string()))
}

fn exec_error(ctx: &Ctx<'_>, err: rquickjs::Error) -> ModuleError {
    if matches!(err, rquickjs::Error::Exception) {
        let caught = ctx.catch();
        let message = caught
            .as_object()
            .and_then(|object| object.get::<_, String>("message").ok())
            .or_else(|| {
                caught
                    .as_string()
                    .and_then(|text| text.to_string().ok())
            })
            .unwrap_or_else(|| "unknown script exception".to_string());
        return ModuleError::ScriptExecution(message);
    }
    ModuleError::ScriptExecution(err.to_string())
}

fn engine_error(err: rquickjs::Error) -> ModuleError {
    ModuleError::ScriptExecution(err.to_string())
}
