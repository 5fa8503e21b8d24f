// Proxy Gateway
//
// Stateless HTTP handler that fetches arbitrary third-party URLs on behalf
// of the browser: restores tunneled headers the browser is forbidden from
// setting, follows redirects, rewrites HLS manifests so every downstream
// segment request also routes through the gateway, and streams everything
// else through without buffering.
//
// Contract: GET|POST|PUT|PATCH|DELETE <gateway-path>?url=<encoded target>.
// 400 when the target is missing, 500 with an {error, stack} JSON body on
// internal failure. The final post-redirect URL is surfaced as X-Final-Url.

use crate::config::GatewayConfig;
use crate::proxy::{headers, hls};
use anyhow::{anyhow, Context as _};
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use futures_util::TryStreamExt;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use url::Url;

/// Upload bodies are buffered, then forwarded.
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

struct GatewayState {
    client: reqwest::Client,
    config: GatewayConfig,
}

/// The embeddable gateway server.
pub struct ProxyServer {
    config: GatewayConfig,
}

impl ProxyServer {
    pub fn new(config: GatewayConfig) -> Self {
        Self { config }
    }

    /// Build the axum router serving the gateway route.
    pub fn router(config: GatewayConfig) -> anyhow::Result<Router> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(config.redirect_limit))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("failed to build HTTP client")?;

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers(Any);

        let state = Arc::new(GatewayState {
            client,
            config: config.clone(),
        });

        Ok(Router::new()
            .route(&config.gateway_path, any(proxy_handler))
            .layer(cors)
            .with_state(state))
    }

    pub async fn start(self) -> anyhow::Result<()> {
        let listen_addr = self.config.listen_addr.clone();
        let router = Self::router(self.config)?;

        log::info!("proxy gateway starting on http://{listen_addr}");
        let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
        axum::serve(listener, router).await?;
        Ok(())
    }
}

async fn proxy_handler(State(state): State<Arc<GatewayState>>, request: Request) -> Response {
    match forward(&state, request).await {
        Ok(response) => response,
        Err(err) => {
            log::error!("proxy failure: {err:#}");
            let body = serde_json::json!({
                "error": err.to_string(),
                "stack": format!("{err:?}"),
            });
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "application/json")],
                body.to_string(),
            )
                .into_response()
        }
    }
}

fn target_url(uri: &Uri) -> Option<String> {
    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key.as_ref() == "url")
        .map(|(_, value)| value.into_owned())
}

async fn forward(state: &GatewayState, request: Request) -> anyhow::Result<Response> {
    let (parts, body) = request.into_parts();

    let target = match target_url(&parts.uri) {
        Some(target) => target,
        None => {
            log::warn!("proxy request without url parameter: {}", parts.uri);
            return Ok((
                StatusCode::BAD_REQUEST,
                format!("Missing url query parameter. Req url: {}", parts.uri),
            )
                .into_response());
        }
    };

    log::info!("proxying {} {}", parts.method, target);

    let cleaned = headers::clean_request_headers(&parts.headers, &state.config.fallback_user_agent);
    let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes())
        .map_err(|_| anyhow!("unsupported method: {}", parts.method))?;

    let mut upstream = state.client.request(method, &target);
    for (name, value) in &cleaned {
        upstream = upstream.header(name.as_str(), value.as_bytes());
    }

    if matches!(parts.method.as_str(), "POST" | "PUT" | "PATCH") {
        let bytes = axum::body::to_bytes(body, MAX_UPLOAD_BYTES)
            .await
            .map_err(|err| anyhow!("failed to read request body: {err}"))?;
        if !bytes.is_empty() {
            upstream = upstream.body(bytes);
        }
    }

    let upstream_response = upstream
        .send()
        .await
        .with_context(|| format!("upstream request to {target} failed"))?;

    let status = StatusCode::from_u16(upstream_response.status().as_u16())
        .unwrap_or(StatusCode::BAD_GATEWAY);
    let final_url = upstream_response.url().to_string();
    let content_type = upstream_response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string);

    let mut builder = Response::builder().status(status);
    for (name, value) in upstream_response.headers() {
        if headers::is_stripped_response_header(name.as_str()) {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_bytes());
    }
    builder = builder.header("X-Final-Url", final_url.as_str());

    if hls::is_hls_manifest(&target, content_type.as_deref()) {
        log::info!("rewriting HLS manifest: {target}");
        let text = upstream_response.text().await?;
        // Relative references resolve against wherever the redirect chain
        // landed, which is where the manifest actually lives.
        let base = Url::parse(&final_url)
            .or_else(|_| Url::parse(&target))
            .context("unparseable manifest URL")?;
        let rewritten = hls::rewrite_manifest(&text, &base, &state.config.gateway_path);
        return Ok(builder
            .header(header::CONTENT_LENGTH, rewritten.len())
            .body(Body::from(rewritten))?);
    }

    // Everything else streams through chunk by chunk; a failed client write
    // drops the stream and with it the upstream connection.
    let stream = upstream_response
        .bytes_stream()
        .inspect_err(|err| log::error!("proxy stream error: {err}"));
    Ok(builder.body(Body::from_stream(stream))?)
}
