//! Reverse proxy: `/proxy/{port}/*` → `localhost:{port}/*`.
//!
//! HTML responses are buffered so a `<style>` block can be spliced in: the
//! mobile client's webview cannot reliably load same-origin stylesheets
//! through the gateway, so the proxy fetches a conventional stylesheet path
//! on the same port and inlines it before `</head>`. Everything else passes
//! through unmodified apart from permissive cross-origin headers: upstream
//! headers are copied (minus hop-by-hop ones) and redirects are forwarded
//! to the client, never followed by the proxy itself.

use axum::{
    body::Body,
    extract::{Path, Request, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::time::Duration;

use super::server::SharedSession;
use crate::errors::HostError;

/// Stylesheet locations tried for HTML inlining, in order.
const STYLESHEET_PATHS: &[&str] = &["/styles.css", "/style.css"];

/// How long to wait for the secondary stylesheet fetch.
const STYLESHEET_TIMEOUT: Duration = Duration::from_secs(2);

/// Largest request body the proxy will forward upstream.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// `/proxy/{port}` — forward to the upstream root.
pub async fn proxy_root(
    State(session): State<SharedSession>,
    Path(port): Path<u16>,
    request: Request,
) -> Response {
    forward(session, port, String::new(), request).await
}

/// `/proxy/{port}/{*path}` — forward an arbitrary sub-path.
pub async fn proxy_path(
    State(session): State<SharedSession>,
    Path((port, path)): Path<(u16, String)>,
    request: Request,
) -> Response {
    forward(session, port, path, request).await
}

async fn forward(session: SharedSession, port: u16, path: String, request: Request) -> Response {
    session.idle.touch();

    let query = request
        .uri()
        .query()
        .map(|q| format!("?{q}"))
        .unwrap_or_default();
    let url = format!("http://127.0.0.1:{port}/{path}{query}");

    let method = reqwest::Method::from_bytes(request.method().as_str().as_bytes())
        .unwrap_or(reqwest::Method::GET);

    let mut upstream_request = session.http.request(method, &url);
    for (name, value) in request.headers() {
        // Host and connection-management headers are the upstream's concern
        if name == header::HOST || name == header::CONNECTION || name == header::CONTENT_LENGTH {
            continue;
        }
        if let Ok(value) = value.to_str() {
            upstream_request = upstream_request.header(name.as_str(), value);
        }
    }

    let body = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return gateway_error(
                StatusCode::BAD_REQUEST,
                format!("Failed to read request body: {e}"),
            );
        }
    };
    if !body.is_empty() {
        upstream_request = upstream_request.body(body.to_vec());
    }

    let upstream_response = match upstream_request.send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!(port, error = %e, "proxy upstream unreachable");
            return gateway_error(
                StatusCode::BAD_GATEWAY,
                HostError::UpstreamUnreachable { port }.to_string(),
            );
        }
    };

    let status = StatusCode::from_u16(upstream_response.status().as_u16())
        .unwrap_or(StatusCode::BAD_GATEWAY);
    let upstream_headers = upstream_response.headers().clone();
    let is_html = upstream_headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/html"));

    let body_bytes = match upstream_response.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            return gateway_error(
                StatusCode::BAD_GATEWAY,
                format!("Upstream on port {port} dropped the connection: {e}"),
            );
        }
    };

    let body = if is_html {
        let html = String::from_utf8_lossy(&body_bytes).into_owned();
        match fetch_stylesheet(&session, port).await {
            Some(css) => Body::from(inline_stylesheet(&html, &css)),
            None => Body::from(html),
        }
    } else {
        Body::from(body_bytes)
    };

    let mut builder = Response::builder().status(status);
    if let Some(headers) = builder.headers_mut() {
        // Upstream headers pass through verbatim; only hop-by-hop headers
        // and the stale length of a rewritten body are the proxy's concern.
        for (name, value) in &upstream_headers {
            if !is_hop_by_hop(name.as_str()) {
                headers.append(name, value.clone());
            }
        }
        if is_html {
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/html; charset=utf-8"),
            );
        }
    }
    with_cors(
        builder
            .body(body)
            .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response()),
    )
}

fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name,
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
            | "content-length"
    )
}

/// Try the conventional stylesheet paths on the same port.
async fn fetch_stylesheet(session: &SharedSession, port: u16) -> Option<String> {
    for path in STYLESHEET_PATHS {
        let url = format!("http://127.0.0.1:{port}{path}");
        let Ok(response) = session
            .http
            .get(&url)
            .timeout(STYLESHEET_TIMEOUT)
            .send()
            .await
        else {
            continue;
        };
        if response.status().is_success() {
            if let Ok(css) = response.text().await {
                if !css.trim().is_empty() {
                    return Some(css);
                }
            }
        }
    }
    None
}

/// Splice a `<style>` block into an HTML document, before `</head>` when
/// one exists, otherwise prepended.
fn inline_stylesheet(html: &str, css: &str) -> String {
    let style_block = format!("<style>\n{css}\n</style>");
    // Lowercasing can shift byte offsets for non-ASCII text, so the match
    // position is only trusted when it still lands on a char boundary.
    let lower = html.to_lowercase();
    match lower.find("</head>") {
        Some(pos) if html.is_char_boundary(pos) => {
            format!("{}{}{}", &html[..pos], style_block, &html[pos..])
        }
        _ => format!("{style_block}{html}"),
    }
}

fn with_cors(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("*"),
    );
    response
}

fn gateway_error(status: StatusCode, message: String) -> Response {
    with_cors(
        (
            status,
            axum::Json(serde_json::json!({ "success": false, "error": message })),
        )
            .into_response(),
    )
}
