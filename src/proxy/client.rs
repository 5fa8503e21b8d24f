// Engine-side proxy client
//
// The module loader and the polyfilled fetch functions never contact a
// target origin with the caller's headers as-is; they go through the same
// tunneling pipeline the gateway applies. Two modes:
//
// - Remote: speak to a running gateway over HTTP exactly as the browser
//   front-end would (tunneled X-Proxy-* names on the wire).
// - Direct: apply the identical header restoration in-process and fetch the
//   target here, for when the engine runs in the same process as the
//   gateway and a loopback hop would be pointless.
//
// Calls are synchronous on purpose: they are invoked from inside QuickJS
// host functions, which cannot suspend.

use crate::config::{GatewayConfig, FALLBACK_USER_AGENT};
use crate::proxy::headers;
use anyhow::anyhow;
use axum::http::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;
use std::io::Read;
use std::time::Duration;

/// Upper bound on buffered response bodies (manifest/script/API text).
/// Media segments stream through the gateway, not through this client.
const MAX_BODY_BYTES: u64 = 10_000_000;

lazy_static::lazy_static! {
    static ref SHARED_AGENT: ureq::Agent = build_agent(300, 10);
}

fn build_agent(timeout_secs: u64, redirects: usize) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout(Duration::from_secs(timeout_secs))
        .redirects(redirects as u32)
        .build()
}

#[derive(Debug, Clone)]
enum ProxyMode {
    Direct,
    Remote(String),
}

/// Buffered result of a proxied fetch.
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: u16,
    pub ok: bool,
    /// Where the redirect chain landed.
    pub final_url: String,
    pub body: String,
}

pub struct ProxyClient {
    mode: ProxyMode,
    agent: ureq::Agent,
    fallback_user_agent: String,
}

impl ProxyClient {
    /// In-process client with default settings.
    pub fn direct() -> Self {
        Self {
            mode: ProxyMode::Direct,
            agent: SHARED_AGENT.clone(),
            fallback_user_agent: FALLBACK_USER_AGENT.to_string(),
        }
    }

    /// In-process client honoring the gateway's configured timeouts.
    pub fn with_config(config: &GatewayConfig) -> Self {
        Self {
            mode: ProxyMode::Direct,
            agent: build_agent(config.request_timeout_secs, config.redirect_limit),
            fallback_user_agent: config.fallback_user_agent.clone(),
        }
    }

    /// Client that routes every request through a gateway instance, e.g.
    /// `http://127.0.0.1:8800/proxy`.
    pub fn remote(gateway_base: impl Into<String>) -> Self {
        Self {
            mode: ProxyMode::Remote(gateway_base.into()),
            agent: SHARED_AGENT.clone(),
            fallback_user_agent: FALLBACK_USER_AGENT.to_string(),
        }
    }

    /// GET a text resource (manifest, script) through the proxy path.
    pub fn fetch_text(&self, url: &str) -> anyhow::Result<ProxyResponse> {
        self.request("GET", url, &HashMap::new(), None)
    }

    /// Perform a proxied request. `headers` may carry tunneled X-Proxy-*
    /// names; in Direct mode they are restored here, in Remote mode the
    /// gateway restores them.
    pub fn request(
        &self,
        method: &str,
        url: &str,
        headers: &HashMap<String, String>,
        body: Option<&[u8]>,
    ) -> anyhow::Result<ProxyResponse> {
        match &self.mode {
            ProxyMode::Direct => self.request_direct(method, url, headers, body),
            ProxyMode::Remote(base) => self.request_remote(base, method, url, headers, body),
        }
    }

    fn request_direct(
        &self,
        method: &str,
        url: &str,
        headers: &HashMap<String, String>,
        body: Option<&[u8]>,
    ) -> anyhow::Result<ProxyResponse> {
        let mut header_map = HeaderMap::new();
        for (name, value) in headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                header_map.append(name, value);
            }
        }
        let cleaned = headers::clean_request_headers(&header_map, &self.fallback_user_agent);

        let mut request = self.agent.request(method, url);
        for (name, value) in &cleaned {
            if let Ok(value) = value.to_str() {
                request = request.set(name.as_str(), value);
            }
        }

        log::debug!("proxy client fetch: {} {}", method, url);
        let outcome = match body {
            Some(bytes) => request.send_bytes(bytes),
            None => request.call(),
        };
        finish(outcome, url, false)
    }

    fn request_remote(
        &self,
        base: &str,
        method: &str,
        url: &str,
        headers: &HashMap<String, String>,
        body: Option<&[u8]>,
    ) -> anyhow::Result<ProxyResponse> {
        let proxied = format!("{}?url={}", base, urlencoding::encode(url));
        let mut request = self.agent.request(method, &proxied);
        for (name, value) in headers {
            request = request.set(name, value);
        }

        log::debug!("proxy client via gateway: {} {}", method, url);
        let outcome = match body {
            Some(bytes) => request.send_bytes(bytes),
            None => request.call(),
        };
        finish(outcome, url, true)
    }
}

fn finish(
    outcome: Result<ureq::Response, ureq::Error>,
    requested_url: &str,
    remote: bool,
) -> anyhow::Result<ProxyResponse> {
    match outcome {
        Ok(response) => Ok(read_response(response, requested_url, remote)),
        // Non-2xx still carries a response; proxy semantics surface it
        // rather than treating it as a transport failure.
        Err(ureq::Error::Status(_, response)) => Ok(read_response(response, requested_url, remote)),
        Err(err) => Err(anyhow!("proxy request failed: {err}")),
    }
}

fn read_response(response: ureq::Response, requested_url: &str, remote: bool) -> ProxyResponse {
    let status = response.status();
    let final_url = if remote {
        response
            .header("x-final-url")
            .map(ToString::to_string)
            .unwrap_or_else(|| requested_url.to_string())
    } else {
        response.get_url().to_string()
    };

    let mut bytes = Vec::new();
    if let Err(err) = response
        .into_reader()
        .take(MAX_BODY_BYTES)
        .read_to_end(&mut bytes)
    {
        log::warn!("proxy client body read error: {err}");
    }

    ProxyResponse {
        status,
        ok: (200..300).contains(&status),
        final_url,
        body: String::from_utf8_lossy(&bytes).into_owned(),
    }
}
