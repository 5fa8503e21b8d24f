// Proxy header policy
//
// Two concerns, shared by the gateway handler and the in-process client:
//
// 1. Stripping: headers that describe the client->gateway hop must not leak
//    to (or conflict with) the gateway->target hop.
// 2. Tunneling: a browser cannot set Cookie, User-Agent, Referer or Origin
//    on a cross-origin fetch, so callers smuggle them as X-Proxy-* and the
//    gateway restores the real names before forwarding.

use axum::http::header::{HeaderMap, HeaderName, HeaderValue};

/// Hop-specific headers removed from every forwarded request. Prefix
/// families are handled separately below.
pub const STRIPPED_REQUEST_HEADERS: &[&str] = &[
    "host",
    "origin",
    "referer",
    "accept-encoding",
    "connection",
    "content-length",
    "cookie",
];

/// Prefixes of header families that are never forwarded.
pub const STRIPPED_REQUEST_PREFIXES: &[&str] = &["sec-fetch-", "x-forwarded-"];

/// Tunneled name -> real name, applied after stripping.
pub const TUNNEL_MAP: &[(&str, &str)] = &[
    ("x-proxy-cookie", "cookie"),
    ("x-proxy-user-agent", "user-agent"),
    ("x-proxy-referer", "referer"),
    ("x-proxy-origin", "origin"),
];

/// Upstream response headers dropped before mirroring: the body may already
/// be decoded (encoding), its length changes after rewriting (length), and
/// the gateway sets its own CORS policy (allow-origin).
pub const STRIPPED_RESPONSE_HEADERS: &[&str] = &[
    "content-encoding",
    "access-control-allow-origin",
    "content-length",
];

fn is_stripped(name: &str) -> bool {
    STRIPPED_REQUEST_HEADERS.contains(&name)
        || STRIPPED_REQUEST_PREFIXES
            .iter()
            .any(|prefix| name.starts_with(prefix))
}

/// Build the forwarded header set from an incoming request's headers:
/// strip hop headers, then restore tunneled ones under their real names.
/// If no User-Agent was tunneled, the client's own User-Agent is kept as
/// `client_user_agent` fallback (the gateway passes the one it received).
pub fn clean_request_headers(incoming: &HeaderMap, fallback_user_agent: &str) -> HeaderMap {
    let mut cleaned = HeaderMap::new();

    let client_user_agent = incoming
        .get("user-agent")
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string);

    for (name, value) in incoming {
        let name_str = name.as_str();
        if is_stripped(name_str) {
            continue;
        }
        if TUNNEL_MAP.iter().any(|(tunneled, _)| *tunneled == name_str) {
            continue;
        }
        cleaned.append(name.clone(), value.clone());
    }

    // Restore tunneled headers under their real names.
    for (tunneled, real) in TUNNEL_MAP {
        if let Some(value) = incoming.get(*tunneled) {
            if let Ok(real_name) = HeaderName::from_bytes(real.as_bytes()) {
                cleaned.insert(real_name, value.clone());
            }
        }
    }

    // Default to the client's own User-Agent if none was tunneled, with the
    // configured fallback as the explicit last resort.
    if !cleaned.contains_key("user-agent") {
        let agent = client_user_agent.unwrap_or_else(|| fallback_user_agent.to_string());
        if let Ok(value) = HeaderValue::from_str(&agent) {
            cleaned.insert(HeaderName::from_static("user-agent"), value);
        }
    }

    cleaned
}

/// True if an upstream response header should not be mirrored to the client.
pub fn is_stripped_response_header(name: &str) -> bool {
    STRIPPED_RESPONSE_HEADERS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_strips_hop_headers() {
        let incoming = headers(&[
            ("host", "gateway.local"),
            ("cookie", "session=1"),
            ("origin", "http://app.local"),
            ("referer", "http://app.local/watch"),
            ("accept-encoding", "gzip"),
            ("content-length", "42"),
            ("connection", "keep-alive"),
            ("sec-fetch-mode", "cors"),
            ("sec-fetch-site", "cross-site"),
            ("x-forwarded-for", "1.2.3.4"),
            ("accept", "*/*"),
        ]);
        let cleaned = clean_request_headers(&incoming, "FallbackUA");
        for name in [
            "host",
            "cookie",
            "origin",
            "referer",
            "accept-encoding",
            "content-length",
            "connection",
            "sec-fetch-mode",
            "sec-fetch-site",
            "x-forwarded-for",
        ] {
            assert!(!cleaned.contains_key(name), "{name} should be stripped");
        }
        assert!(cleaned.contains_key("accept"));
    }

    #[test]
    fn test_restores_tunneled_headers() {
        let incoming = headers(&[
            ("x-proxy-referer", "https://site.example/"),
            ("x-proxy-cookie", "auth=abc"),
            ("x-proxy-origin", "https://site.example"),
        ]);
        let cleaned = clean_request_headers(&incoming, "FallbackUA");
        assert_eq!(cleaned.get("referer").unwrap(), "https://site.example/");
        assert_eq!(cleaned.get("cookie").unwrap(), "auth=abc");
        assert_eq!(cleaned.get("origin").unwrap(), "https://site.example");
        assert!(!cleaned.contains_key("x-proxy-referer"));
        assert!(!cleaned.contains_key("x-proxy-cookie"));
        assert!(!cleaned.contains_key("x-proxy-origin"));
    }

    #[test]
    fn test_tunneled_user_agent_wins() {
        let incoming = headers(&[
            ("user-agent", "BrowserUA"),
            ("x-proxy-user-agent", "ScriptUA"),
        ]);
        let cleaned = clean_request_headers(&incoming, "FallbackUA");
        assert_eq!(cleaned.get("user-agent").unwrap(), "ScriptUA");
    }

    #[test]
    fn test_client_user_agent_kept_when_not_tunneled() {
        let incoming = headers(&[("user-agent", "BrowserUA")]);
        let cleaned = clean_request_headers(&incoming, "FallbackUA");
        assert_eq!(cleaned.get("user-agent").unwrap(), "BrowserUA");
    }

    #[test]
    fn test_fallback_user_agent_when_absent() {
        let cleaned = clean_request_headers(&HeaderMap::new(), "FallbackUA");
        assert_eq!(cleaned.get("user-agent").unwrap(), "FallbackUA");
    }

    #[test]
    fn test_response_strip_set() {
        assert!(is_stripped_response_header("content-encoding"));
        assert!(is_stripped_response_header("access-control-allow-origin"));
        assert!(is_stripped_response_header("content-length"));
        assert!(!is_stripped_response_header("content-type"));
    }
}
