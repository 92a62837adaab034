// every backend gets its own /proxy/{name} routes, the body is buffered whole so the filter can see
// the complete document before anything reaches the client
use axum::{
    Extension, Router,
    body::Body,
    extract::Request,
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::Response,
    routing::any,
};
use futures::StreamExt;
use metrics::counter;
use tracing::{debug, error, info};

use crate::server::{
    error::{AppResult, Error},
    services::{Backend, DynFilterService, GatewayServices, filter_services::FilterContext},
    utils::{
        encoding_utils::{ContentEncoding, decode_body, is_decodable},
        proxy_utils::{
            backend_segment, client_response_headers, strip_route_prefix,
            upstream_request_headers, upstream_url,
        },
    },
};

/// everything the decode -> filter -> encode pass needs, owned so it can run on a blocking thread
struct BodyJob {
    filter: DynFilterService,
    target_url: String,
    content_type: String,
    content_encoding: Option<String>,
    accept_encoding: Option<String>,
    max_body_bytes: usize,
    backend: String,
}

impl BodyJob {
    fn run(self, raw: Vec<u8>, response_headers: &mut HeaderMap) -> AppResult<Vec<u8>> {
        let decoded = decode_body(raw, self.content_encoding.as_deref(), self.max_body_bytes)
            .map_err(|e| {
                error!("failed to decode body from {}: {}", self.target_url, e);
                Error::BadGateway(format!("{}: {}", self.target_url, e))
            })?;

        let before = decoded.len();
        let filtered = self.filter.filter(
            decoded,
            &FilterContext {
                url: &self.target_url,
                content_type: &self.content_type,
            },
        );
        if filtered.len() < before {
            let removed = (before - filtered.len()) as u64;
            debug!("filter removed {} bytes from {}", removed, self.target_url);
            counter!("gateway_filtered_bytes_total", "backend" => self.backend).increment(removed);
        }

        ProxyController::encode_for_client(
            filtered,
            &self.content_type,
            self.accept_encoding.as_deref(),
            response_headers,
        )
    }
}

pub struct ProxyController;

impl ProxyController {
    /// one route set for every backend, the name segment is looked up in the registry so
    /// `/proxy/VENUS` and `/proxy/venus` reach the same origin
    pub fn app() -> Router {
        // a wildcard doesn't match an empty segment so the bare prefix and the trailing slash
        // need routes of their own
        Router::new()
            .route("/proxy/{backend}", any(Self::proxy))
            .route("/proxy/{backend}/", any(Self::proxy))
            .route("/proxy/{backend}/{*rest}", any(Self::proxy))
    }

    async fn proxy(
        Extension(services): Extension<GatewayServices>,
        request: Request,
    ) -> AppResult<Response> {
        let segment = backend_segment(request.uri().path())
            .unwrap_or_default()
            .to_string();

        let Some(backend) = services.registry.get(&segment).cloned() else {
            debug!("no backend named {}", segment);
            return Err(Error::NotFound(format!("Unknown backend {}", segment)));
        };

        // strip what the client actually sent, the case may differ from the registered name
        let prefix = format!("/proxy/{}", segment);
        Self::forward(services, backend, &prefix, request).await
    }

    async fn forward(
        services: GatewayServices,
        backend: Backend,
        prefix: &str,
        request: Request,
    ) -> AppResult<Response> {
        let slug = backend.slug();
        counter!("gateway_proxy_requests_total", "backend" => slug.clone()).increment(1);

        let max_body_bytes = services.config.max_body_bytes;
        let (parts, body) = request.into_parts();

        let path = strip_route_prefix(parts.uri.path(), prefix);
        let target_url = upstream_url(&backend.origin, &path, parts.uri.query());
        debug!("{} {} -> {}", parts.method, parts.uri, target_url);

        let request_body = Self::read_request_body(body, &parts.headers, max_body_bytes).await?;

        let upstream = services
            .http
            .request(parts.method.clone(), &target_url)
            .headers(upstream_request_headers(&parts.headers, &backend.origin))
            .body(request_body)
            .send()
            .await
            .map_err(|e| {
                counter!("gateway_proxy_upstream_errors_total", "backend" => slug.clone())
                    .increment(1);
                Error::BadGateway(format!("{} unreachable: {}", target_url, e))
            })?;

        let status = upstream.status();
        debug!("{} answered {}", target_url, status);

        let upstream_headers = upstream.headers().clone();
        let mut response_headers =
            client_response_headers(&upstream_headers, &backend.origin, &backend.route_prefix());

        // nothing to filter, the upstream's own length still describes the resource
        if parts.method == Method::HEAD {
            if let Some(length) = upstream_headers.get(header::CONTENT_LENGTH) {
                response_headers.insert(header::CONTENT_LENGTH, length.clone());
            }
            if let Some(encoding) = upstream_headers.get(header::CONTENT_ENCODING) {
                response_headers.insert(header::CONTENT_ENCODING, encoding.clone());
            }
            return Ok(Self::build_response(status, response_headers, Vec::new()));
        }

        if upstream
            .content_length()
            .is_some_and(|length| length > max_body_bytes as u64)
        {
            return Err(Error::BadGateway(format!(
                "{} declared a body over {} bytes",
                target_url, max_body_bytes
            )));
        }

        let raw = Self::read_capped(upstream, max_body_bytes, &target_url).await?;

        let content_type = upstream_headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let content_encoding = upstream_headers
            .get(header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        // we never ask for anything else, but an upstream that sends it anyway can't be filtered
        if !is_decodable(content_encoding.as_deref()) {
            info!(
                "{} sent content-encoding {:?}, passing through unfiltered",
                target_url, content_encoding
            );
            if let Some(encoding) = upstream_headers.get(header::CONTENT_ENCODING) {
                response_headers.insert(header::CONTENT_ENCODING, encoding.clone());
            }
            return Ok(Self::build_response(status, response_headers, raw));
        }

        let job = BodyJob {
            filter: services.filter.clone(),
            target_url,
            content_type,
            content_encoding,
            accept_encoding: parts
                .headers
                .get(header::ACCEPT_ENCODING)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string()),
            max_body_bytes,
            backend: slug,
        };

        // html parsing and selector matching is cpu bound, it must not hold a runtime worker
        let (body, response_headers) = tokio::task::spawn_blocking(move || {
            let mut response_headers = response_headers;
            job.run(raw, &mut response_headers)
                .map(|body| (body, response_headers))
        })
        .await
        .map_err(|e| Error::InternalServerErrorWithContext(format!("body pass failed: {}", e)))??;

        Ok(Self::build_response(status, response_headers, body))
    }

    /// buffers the client body for forwarding, anything over the cap is a 413
    async fn read_request_body(
        body: Body,
        headers: &HeaderMap,
        limit: usize,
    ) -> AppResult<Vec<u8>> {
        let declared = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if declared.is_some_and(|length| length > limit as u64) {
            return Err(Error::PayloadTooLarge(format!(
                "declared {:?} bytes, cap is {}",
                declared, limit
            )));
        }

        let mut stream = body.into_data_stream();
        let mut buffer = Vec::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| Error::BadRequest(format!("Failed to read request body: {}", e)))?;
            if buffer.len() + chunk.len() > limit {
                return Err(Error::PayloadTooLarge(format!("body over {} bytes", limit)));
            }
            buffer.extend_from_slice(&chunk);
        }

        Ok(buffer)
    }

    /// buffers the upstream body, bailing as soon as it crosses the cap
    async fn read_capped(
        mut upstream: reqwest::Response,
        limit: usize,
        target_url: &str,
    ) -> AppResult<Vec<u8>> {
        let mut buffer = Vec::new();

        while let Some(chunk) = upstream.chunk().await.map_err(|e| {
            Error::BadGateway(format!("failed to read body from {}: {}", target_url, e))
        })? {
            if buffer.len() + chunk.len() > limit {
                return Err(Error::BadGateway(format!(
                    "{} sent a body over {} bytes",
                    target_url, limit
                )));
            }
            buffer.extend_from_slice(&chunk);
        }

        Ok(buffer)
    }

    /// compresses text bodies for clients that take it, media is sent as is
    fn encode_for_client(
        body: Vec<u8>,
        content_type: &str,
        accept_encoding: Option<&str>,
        response_headers: &mut HeaderMap,
    ) -> AppResult<Vec<u8>> {
        let encoding = ContentEncoding::from_accept_encoding(accept_encoding);

        if encoding == ContentEncoding::None || body.is_empty() || !Self::is_textual(content_type) {
            return Ok(body);
        }

        let compressed = encoding.compress(&body).map_err(|e| {
            error!("Failed to compress response with {:?}: {}", encoding, e);
            Error::InternalServerErrorWithContext("Failed to compress response".to_string())
        })?;
        debug!(
            "Compressed with {:?} from {} to {} bytes",
            encoding,
            body.len(),
            compressed.len()
        );

        if let Some(value) = encoding.as_header_value() {
            response_headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static(value));
            response_headers.append(header::VARY, HeaderValue::from_static("accept-encoding"));
        }

        Ok(compressed)
    }

    fn is_textual(content_type: &str) -> bool {
        let content_type = content_type.to_ascii_lowercase();
        content_type.starts_with("text/")
            || content_type.contains("javascript")
            || content_type.contains("json")
            || content_type.contains("xml")
            || content_type.contains("mpegurl")
    }

    /// content-length always describes the body we send, never the upstream's
    fn build_response(status: StatusCode, mut headers: HeaderMap, body: Vec<u8>) -> Response {
        let bodiless = status.is_informational()
            || status == StatusCode::NO_CONTENT
            || status == StatusCode::NOT_MODIFIED;

        if !bodiless && !headers.contains_key(header::CONTENT_LENGTH) {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
        }

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}
