//! Acquisition: the reverse-proxy socket layer.
//!
//! Grounded on `original_source/stages/acquisition/acquisition.py`
//! (`ProxyHTTPRequestHandler`). Binds `0.0.0.0:80`, builds an
//! [`HttpMessage`] from each inbound request and runs it through the
//! detection [`Pipeline`]. Unlike the Python prototype (which calls
//! `self.successor.run(dto)` and unconditionally proceeds to
//! `requests.get/post(...)` regardless of what the chain returned),
//! spec.md §7 fixes this behavior: an alert means the request is dropped —
//! not forwarded upstream, no response body from the core — with a clean
//! 403 as the expected refinement. A clean pipeline run still forwards the
//! original wire-level request target upstream unchanged.
//!
//! `axum` (teacher's web framework) supplies the listening surface;
//! `reqwest`'s async client (teacher's HTTP client, already a dependency
//! for the IP blocklist refresher) supplies upstream forwarding.

use crate::config::PipelineSettings;
use crate::dto::{AcquisitionFilterDto, StageInput};
use crate::message::HttpMessage;
use crate::pipeline::Pipeline;
use axum::body::{to_bytes, Body, Bytes};
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;

const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Response headers the origin may set that must never be forwarded
/// verbatim, since `Content-Length` is recomputed and the proxy never
/// re-applies the origin's transfer framing (spec.md §4.2 `send_resp_headers`).
const STRIPPED_RESPONSE_HEADERS: [&str; 3] = ["content-encoding", "transfer-encoding", "content-length"];

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
    client: reqwest::Client,
    upstream_host: String,
}

/// Binds `0.0.0.0:80` and serves until the process is killed. Runs forever
/// (matches `HTTPServer.serve_forever`); callers in `main` should `.await`
/// this as the last step of startup.
pub async fn serve(pipeline: Arc<Pipeline>, settings: &PipelineSettings) -> anyhow::Result<()> {
    let state = AppState {
        pipeline,
        client: reqwest::Client::builder().danger_accept_invalid_certs(true).build()?,
        upstream_host: settings.upstream_host.clone(),
    };
    let app = Router::new()
        .route("/", any(handle))
        .route("/*path", any(handle))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:80").await?;
    tracing::info!("acquisition listening on 0.0.0.0:80");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

async fn handle(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request<Body>,
) -> Response {
    let method = req.method().clone();
    if !matches!(method, Method::GET | Method::POST | Method::HEAD) {
        return StatusCode::NOT_IMPLEMENTED.into_response();
    }

    let (parts, body) = req.into_parts();
    // The literal request-target as the client sent it, percent-encoding
    // and all — this is what gets forwarded upstream unchanged.
    let raw_target = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let raw_body = if method == Method::POST {
        to_bytes(body, MAX_BODY_BYTES).await.unwrap_or_default()
    } else {
        Bytes::new()
    };

    let message = build_message(addr, &method, &parts.uri, &parts.headers, &raw_body);
    let outcome = state.pipeline.run(StageInput::AcquisitionFilter(AcquisitionFilterDto {
        message,
    }));

    // spec.md §7: an alert drops the request — no upstream forward, no
    // response body from the core; a clean 403 is the expected refinement.
    // A protocol-contract/config violation is refused the same way; the
    // pipeline itself raises it as a `pipeline-contract` alert before
    // returning the error, so it reaches the alert bus like any verdict.
    let should_forward = match outcome {
        Ok(forwarded) => {
            tracing::debug!(forwarded, path = %parts.uri.path(), "pipeline verdict");
            forwarded
        }
        Err(err) => {
            tracing::error!(error = %err, "pipeline contract violation");
            false
        }
    };

    if !should_forward {
        return StatusCode::FORBIDDEN.into_response();
    }

    forward_upstream(&state, &method, &raw_target, &parts.headers, raw_body, method == Method::HEAD).await
}

/// Builds the pipeline-facing [`HttpMessage`], URL-decoding the query and
/// (for POST) the body exactly once (spec.md §4.2) — this single decode
/// pass is what makes the double-encoding filter plug-in meaningful.
fn build_message(
    addr: SocketAddr,
    method: &Method,
    uri: &axum::http::Uri,
    headers: &HeaderMap,
    raw_body: &Bytes,
) -> HttpMessage {
    let decoded_query = uri
        .query()
        .map(|q| percent_encoding::percent_decode_str(q).decode_utf8_lossy().into_owned())
        .unwrap_or_default();

    let decoded_body = if raw_body.is_empty() {
        Vec::new()
    } else {
        let as_text = String::from_utf8_lossy(raw_body);
        percent_encoding::percent_decode_str(&as_text)
            .decode_utf8_lossy()
            .into_owned()
            .into_bytes()
    };

    let header_pairs = headers
        .iter()
        .map(|(name, value)| (name.as_str().to_string(), value.to_str().unwrap_or_default().to_string()))
        .collect();

    HttpMessage {
        source_address: addr.ip().to_string(),
        method: method.as_str().to_string(),
        path: uri.path().to_string(),
        query: decoded_query,
        protocol_version: "HTTP/1.1".to_string(),
        headers: header_pairs,
        body: decoded_body,
    }
}

/// `head_suppresses_body` mirrors `do_HEAD`'s `self.do_GET(body=False)`:
/// the original still performs a real upstream GET for a client HEAD
/// request, it just never writes the fetched body back to the client.
async fn forward_upstream(
    state: &AppState,
    method: &Method,
    raw_target: &str,
    request_headers: &HeaderMap,
    body: Bytes,
    head_suppresses_body: bool,
) -> Response {
    let url = format!("http://{}{}", state.upstream_host, raw_target);
    let upstream_method = if *method == Method::HEAD { Method::GET } else { method.clone() };

    let mut builder = state
        .client
        .request(reqwest::Method::from_bytes(upstream_method.as_str().as_bytes()).unwrap_or(reqwest::Method::GET), &url);
    for (name, value) in request_headers.iter() {
        if name.as_str().eq_ignore_ascii_case("host") {
            continue;
        }
        if let Ok(value) = value.to_str() {
            builder = builder.header(name.as_str(), value);
        }
    }
    builder = builder.header("Host", &state.upstream_host);
    if upstream_method == Method::POST {
        builder = builder.body(body);
    }

    let response = match builder.send().await {
        Ok(resp) => resp,
        Err(err) => {
            tracing::warn!(error = %err, url, "error trying to proxy");
            return (StatusCode::NOT_FOUND, "error trying to proxy").into_response();
        }
    };

    let status = response.status();
    let mut out_headers = HeaderMap::new();
    for (name, value) in response.headers().iter() {
        if STRIPPED_RESPONSE_HEADERS.contains(&name.as_str().to_ascii_lowercase().as_str()) {
            continue;
        }
        out_headers.insert(name.clone(), value.clone());
    }
    let payload = match response.bytes().await {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(error = %err, "error reading upstream response body");
            return (StatusCode::NOT_FOUND, "error trying to proxy").into_response();
        }
    };
    out_headers.insert(
        "content-length",
        payload
            .len()
            .to_string()
            .parse()
            .expect("a decimal digit string is always a valid header value"),
    );

    let mut builder = Response::builder().status(status.as_u16());
    *builder
        .headers_mut()
        .expect("a freshly built Response::builder has no prior error") = out_headers;
    let body_bytes = if head_suppresses_body { Bytes::new() } else { payload };
    builder.body(Body::from(body_bytes)).unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, Uri};

    #[test]
    fn decodes_query_once_leaving_remaining_encoding_intact() {
        let headers = HeaderMap::new();
        let uri: Uri = "/search?q=%2527OR1%253D1".parse().unwrap();
        let msg = build_message(
            "127.0.0.1:1234".parse().unwrap(),
            &Method::GET,
            &uri,
            &headers,
            &Bytes::new(),
        );
        assert_eq!(msg.query, "%27OR1%3D1");
    }

    #[test]
    fn non_post_requests_never_decode_a_body() {
        let headers = HeaderMap::new();
        let uri: Uri = "/".parse().unwrap();
        let msg = build_message(
            "127.0.0.1:1234".parse().unwrap(),
            &Method::GET,
            &uri,
            &headers,
            &Bytes::new(),
        );
        assert!(msg.body.is_empty());
    }

    #[test]
    fn header_order_and_duplicates_are_preserved() {
        let mut headers = HeaderMap::new();
        headers.append("x-test", HeaderValue::from_static("a"));
        headers.append("x-test", HeaderValue::from_static("b"));
        let uri: Uri = "/".parse().unwrap();
        let msg = build_message(
            "127.0.0.1:1234".parse().unwrap(),
            &Method::GET,
            &uri,
            &headers,
            &Bytes::new(),
        );
        let values: Vec<&str> = msg
            .headers
            .iter()
            .filter(|(k, _)| k == "x-test")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(values, vec!["a", "b"]);
    }
}
