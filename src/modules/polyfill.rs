// Native scraping API polyfill
//
// Module scripts are written against a scripting host that exposes native
// network primitives (`networkFetch`, `fetchv2`, ...). This installs those
// globals into a QuickJS context so such scripts run unmodified: a
// synchronous Rust `__host_fetch` routes through the proxy client, and a JS
// prelude builds the expected function shapes on top of it.
//
// Installation is idempotent per function: anything already defined is left
// alone. Network failures never throw out of these functions — scripts are
// third-party and must not be able to crash the host with an unhandled
// rejection — so every failure path resolves with `success:false` or
// `ok:false` and an error string.

use crate::proxy::ProxyClient;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rquickjs::{Ctx, Function, Value};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(serde::Deserialize)]
struct HostFetchSpec {
    url: String,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    headers: HashMap<String, serde_json::Value>,
    #[serde(default)]
    body: Option<String>,
}

fn error_payload(url: &str, message: &str) -> String {
    json!({
        "status": 0,
        "ok": false,
        "finalUrl": url,
        "body": "",
        "error": message,
    })
    .to_string()
}

fn host_fetch(proxy: &ProxyClient, spec_json: &str) -> String {
    let spec: HostFetchSpec = match serde_json::from_str(spec_json) {
        Ok(spec) => spec,
        Err(err) => return error_payload("", &format!("invalid fetch options: {err}")),
    };

    let method = spec.method.unwrap_or_else(|| "GET".to_string());
    let mut headers = HashMap::new();
    for (name, value) in spec.headers {
        let value = match value {
            serde_json::Value::String(text) => text,
            other => other.to_string(),
        };
        headers.insert(name, value);
    }

    log::debug!("module fetch: {} {}", method, spec.url);

    match proxy.request(
        &method,
        &spec.url,
        &headers,
        spec.body.as_deref().map(str::as_bytes),
    ) {
        Ok(response) => json!({
            "status": response.status,
            "ok": response.ok,
            "finalUrl": response.final_url,
            "body": response.body,
            "error": null,
        })
        .to_string(),
        Err(err) => {
            log::warn!("module fetch failed: {err:#}");
            error_payload(&spec.url, &err.to_string())
        }
    }
}

/// Install the host functions and the JS prelude into a context. Safe to
/// call repeatedly; already-present functions are not replaced.
pub fn install(ctx: &Ctx<'_>, proxy: Arc<ProxyClient>) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    let already = globals
        .get::<_, Value>("__host_fetch")
        .map_or(false, |value| value.is_function());

    if !already {
        let fetch_proxy = proxy.clone();
        let fetch_fn = Function::new(ctx.clone(), move |spec: String| -> String {
            host_fetch(&fetch_proxy, &spec)
        })?;
        globals.set("__host_fetch", fetch_fn)?;

        let log_fn = Function::new(ctx.clone(), |message: String| {
            log::info!("[module] {message}");
        })?;
        globals.set("__log", log_fn)?;

        let atob_fn = Function::new(ctx.clone(), |data: String| -> rquickjs::Result<String> {
            let bytes = BASE64
                .decode(data.trim())
                .map_err(|_| rquickjs::Error::Exception)?;
            Ok(bytes.into_iter().map(|byte| byte as char).collect())
        })?;
        globals.set("__atob", atob_fn)?;

        let btoa_fn = Function::new(ctx.clone(), |data: String| -> rquickjs::Result<String> {
            if data.chars().any(|c| (c as u32) > 255) {
                return Err(rquickjs::Error::Exception);
            }
            let bytes: Vec<u8> = data.chars().map(|c| c as u8).collect();
            Ok(BASE64.encode(bytes))
        })?;
        globals.set("__btoa", btoa_fn)?;
    }

    ctx.eval::<(), _>(PRELUDE)?;
    Ok(())
}

const PRELUDE: &str = r#"
(function() {
    var stringify = function(value) {
        if (typeof value === 'string') return value;
        try { return JSON.stringify(value); } catch (e) { return String(value); }
    };

    if (!globalThis.console) {
        globalThis.console = {
            log: function() { __log(Array.prototype.map.call(arguments, stringify).join(' ')); },
            warn: function() { __log('WARN: ' + Array.prototype.map.call(arguments, stringify).join(' ')); },
            error: function() { __log('ERROR: ' + Array.prototype.map.call(arguments, stringify).join(' ')); }
        };
    }

    // Timer shims: there is no event loop here, so deferred callbacks run
    // immediately. Scripts only use timers for politeness delays.
    if (!globalThis.setTimeout) {
        globalThis.setTimeout = function(fn) {
            if (typeof fn === 'function') fn();
            return 0;
        };
        globalThis.clearTimeout = function() {};
    }

    var proxyFetch = function(url, options) {
        options = options || {};
        if (typeof options === 'number') options = { timeoutSeconds: options };
        var body = options.body;
        if (body !== undefined && body !== null && typeof body !== 'string') {
            body = JSON.stringify(body);
        }
        var raw = __host_fetch(JSON.stringify({
            url: url,
            method: options.method || 'GET',
            headers: options.headers || {},
            body: body === undefined ? null : body
        }));
        return JSON.parse(raw);
    };

    var describeError = function(result) {
        if (result.error) return result.error;
        if (!result.ok) return 'HTTP ' + result.status;
        return null;
    };

    if (!globalThis.networkFetch) {
        globalThis.networkFetch = function(url, options) {
            var result = proxyFetch(url, options || {});
            var html = result.error ? null : result.body;
            return Promise.resolve({
                url: result.finalUrl || url,
                requests: [url],
                html: html,
                cookies: null,
                success: result.ok,
                error: describeError(result),
                totalRequests: 1,
                cutoffTriggered: false,
                cutoffUrl: null,
                htmlCaptured: !!html,
                cookiesCaptured: false,
                elementsClicked: [],
                waitResults: {}
            });
        };
    }

    if (!globalThis.networkFetchSimple) {
        globalThis.networkFetchSimple = function(url, options) {
            var result = proxyFetch(url, options || {});
            return Promise.resolve({
                url: result.finalUrl || url,
                requests: [url],
                success: result.ok,
                error: describeError(result),
                totalRequests: 1
            });
        };
    }

    if (!globalThis.networkFetchWithHTML) {
        globalThis.networkFetchWithHTML = function(url, timeoutSeconds) {
            return globalThis.networkFetch(url, { timeoutSeconds: timeoutSeconds || 10, returnHTML: true });
        };
    }

    if (!globalThis.networkFetchWithCutoff) {
        globalThis.networkFetchWithCutoff = function(url, cutoff, timeoutSeconds) {
            return globalThis.networkFetch(url, { cutoff: cutoff, timeoutSeconds: timeoutSeconds || 10 });
        };
    }

    if (!globalThis.networkFetchWithClicks) {
        globalThis.networkFetchWithClicks = function(url, clickSelectors, options) {
            console.warn('networkFetchWithClicks: click selectors are not supported in this environment');
            return globalThis.networkFetch(url, options || {});
        };
    }

    if (!globalThis.networkFetchFromHTML) {
        globalThis.networkFetchFromHTML = function(htmlContent) {
            return Promise.resolve({
                url: '',
                requests: [],
                html: htmlContent,
                cookies: null,
                success: true,
                error: null,
                htmlCaptured: true
            });
        };
    }

    if (!globalThis.fetchv2) {
        globalThis.fetchv2 = function(url, headers, method, body) {
            headers = headers || {};
            method = method || 'GET';

            var emptyBody = {
                text: function() { return Promise.resolve(''); },
                json: function() { return Promise.resolve({}); }
            };

            if (!url) {
                console.error('fetchv2 called with undefined URL');
                return Promise.resolve({ ok: false, status: 0, text: emptyBody.text, json: emptyBody.json });
            }

            var finalHeaders = {};
            for (var key in headers) finalHeaders[key] = headers[key];

            // Forbidden headers are smuggled under X-Proxy-* names and
            // restored by the gateway.
            var forbiddenMap = {
                'cookie': 'X-Proxy-Cookie',
                'user-agent': 'X-Proxy-User-Agent',
                'referer': 'X-Proxy-Referer',
                'origin': 'X-Proxy-Origin'
            };
            for (var name in headers) {
                var lower = name.toLowerCase();
                if (forbiddenMap[lower]) finalHeaders[forbiddenMap[lower]] = headers[name];
            }

            var finalBody = body;
            if (body && typeof body === 'object') {
                var contentTypeKey = null;
                for (var header in headers) {
                    if (header.toLowerCase() === 'content-type') contentTypeKey = header;
                }
                var contentType = contentTypeKey ? String(headers[contentTypeKey]).toLowerCase() : '';

                if (contentType.indexOf('application/x-www-form-urlencoded') !== -1) {
                    var parts = [];
                    for (var field in body) {
                        parts.push(encodeURIComponent(field) + '=' + encodeURIComponent(body[field]));
                    }
                    finalBody = parts.join('&');
                } else if (contentType.indexOf('application/json') !== -1 || !contentType) {
                    finalBody = JSON.stringify(body);
                    if (!contentType) finalHeaders['Content-Type'] = 'application/json';
                } else if (contentType.indexOf('multipart/form-data') !== -1) {
                    // Leave the body alone and drop the content type so a
                    // boundary can be set downstream.
                    delete finalHeaders[contentTypeKey];
                }
            }

            var result = proxyFetch(url, { method: method, headers: finalHeaders, body: finalBody });

            if (result.error) {
                console.error('fetchv2 network error: ' + result.error);
                return Promise.resolve({ ok: false, status: 0, text: emptyBody.text, json: emptyBody.json });
            }
            if (!result.ok) {
                console.warn('fetchv2 failed: HTTP ' + result.status + ' for ' + url);
            }

            return Promise.resolve({
                text: function() { return Promise.resolve(result.body); },
                json: function() {
                    try { return Promise.resolve(JSON.parse(result.body)); }
                    catch (e) { return Promise.reject(e); }
                },
                status: result.status,
                ok: result.ok
            });
        };
    }

    if (!globalThis.atob) globalThis.atob = __atob;
    if (!globalThis.btoa) globalThis.btoa = __btoa;
})();
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use rquickjs::{Context, Runtime};

    fn with_polyfill<R>(run: impl FnOnce(&Ctx<'_>) -> R) -> R {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        context.with(|ctx| {
            install(&ctx, Arc::new(ProxyClient::direct())).unwrap();
            run(&ctx)
        })
    }

    #[test]
    fn test_installs_expected_globals() {
        with_polyfill(|ctx| {
            for name in [
                "networkFetch",
                "networkFetchSimple",
                "networkFetchWithHTML",
                "networkFetchWithCutoff",
                "networkFetchWithClicks",
                "networkFetchFromHTML",
                "fetchv2",
                "atob",
                "btoa",
            ] {
                let kind: String = ctx.eval(format!("typeof {name}")).unwrap();
                assert_eq!(kind, "function", "{name} should be installed");
            }
        });
    }

    #[test]
    fn test_install_is_idempotent_per_function() {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        context.with(|ctx| {
            ctx.eval::<(), _>("globalThis.networkFetch = function() { return 'mine'; }")
                .unwrap();
            install(&ctx, Arc::new(ProxyClient::direct())).unwrap();
            install(&ctx, Arc::new(ProxyClient::direct())).unwrap();
            let result: String = ctx.eval("networkFetch()").unwrap();
            assert_eq!(result, "mine");
            // Other functions were still installed.
            let kind: String = ctx.eval("typeof fetchv2").unwrap();
            assert_eq!(kind, "function");
        });
    }

    #[test]
    fn test_base64_round_trip() {
        with_polyfill(|ctx| {
            let encoded: String = ctx.eval("btoa('hello world')").unwrap();
            assert_eq!(encoded, "aGVsbG8gd29ybGQ=");
            let decoded: String = ctx.eval("atob('aGVsbG8gd29ybGQ=')").unwrap();
            assert_eq!(decoded, "hello world");
        });
    }

    #[test]
    fn test_fetch_from_html_resolves_without_network() {
        with_polyfill(|ctx| {
            let html: String = ctx
                .eval::<rquickjs::Promise, _>("networkFetchFromHTML('<p>x</p>')")
                .unwrap()
                .finish::<rquickjs::Object>()
                .unwrap()
                .get("html")
                .unwrap();
            assert_eq!(html, "<p>x</p>");
        });
    }

    #[test]
    fn test_fetchv2_without_url_resolves_not_ok() {
        with_polyfill(|ctx| {
            let result = ctx
                .eval::<rquickjs::Promise, _>("fetchv2('')")
                .unwrap()
                .finish::<rquickjs::Object>()
                .unwrap();
            let ok: bool = result.get("ok").unwrap();
            let status: i32 = result.get("status").unwrap();
            assert!(!ok);
            assert_eq!(status, 0);
        });
    }
}
