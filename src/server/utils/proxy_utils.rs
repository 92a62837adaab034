use axum::http::{HeaderMap, HeaderName, HeaderValue, header};

use crate::server::utils::encoding_utils::UPSTREAM_ACCEPT_ENCODING;

/// headers that only mean something for a single connection (rfc 9110 7.6.1)
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(name)
}

/// headers named by the Connection header are hop-by-hop too
fn connection_listed(headers: &HeaderMap) -> Vec<HeaderName> {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect()
}

/// the `{name}` in `/proxy/{name}/...`, exactly as the client sent it
pub fn backend_segment(path: &str) -> Option<&str> {
    path.strip_prefix("/proxy/")?
        .split('/')
        .next()
        .filter(|segment| !segment.is_empty())
}

/// removes one leading `prefix` from `path`, only on a segment boundary
///
/// paths without the prefix come back unchanged, an empty remainder becomes `/`
pub fn strip_route_prefix(path: &str, prefix: &str) -> String {
    let remainder = match path.strip_prefix(prefix) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => path,
    };

    if remainder.is_empty() {
        "/".to_string()
    } else {
        remainder.to_string()
    }
}

/// `{origin}{path}{?query}`, origin is expected without a trailing slash
pub fn upstream_url(origin: &str, path: &str, query: Option<&str>) -> String {
    match query.filter(|q| !q.is_empty()) {
        Some(query) => format!("{}{}?{}", origin, path, query),
        None => format!("{}{}", origin, path),
    }
}

/// client headers as the upstream should see them
///
/// hop-by-hop, host and content-length are dropped (reqwest fills host from the target url, so the
/// upstream sees its own origin). origin and referer are pointed at the upstream too, some embed
/// hosts refuse cross-origin players
pub fn upstream_request_headers(headers: &HeaderMap, origin: &str) -> HeaderMap {
    let listed = connection_listed(headers);
    let mut forwarded = HeaderMap::with_capacity(headers.len());

    for (name, value) in headers {
        if is_hop_by_hop(name)
            || listed.contains(name)
            || name == header::HOST
            || name == header::CONTENT_LENGTH
            || name == header::ACCEPT_ENCODING
        {
            continue;
        }
        forwarded.append(name.clone(), value.clone());
    }

    if let Ok(origin_value) = HeaderValue::from_str(origin) {
        if forwarded.contains_key(header::ORIGIN) {
            forwarded.insert(header::ORIGIN, origin_value);
        }
    }
    if forwarded.contains_key(header::REFERER) {
        if let Ok(referer) = HeaderValue::from_str(&format!("{}/", origin)) {
            forwarded.insert(header::REFERER, referer);
        }
    }

    forwarded.insert(
        header::ACCEPT_ENCODING,
        HeaderValue::from_static(UPSTREAM_ACCEPT_ENCODING),
    );

    forwarded
}

/// upstream response headers that survive into the client response
///
/// length and encoding are dropped since the body gets decoded and filtered, the caller sets
/// them again for the final body
pub fn client_response_headers(headers: &HeaderMap, origin: &str, prefix: &str) -> HeaderMap {
    let listed = connection_listed(headers);
    let mut forwarded = HeaderMap::with_capacity(headers.len());

    for (name, value) in headers {
        if is_hop_by_hop(name)
            || listed.contains(name)
            || name == header::CONTENT_LENGTH
            || name == header::CONTENT_ENCODING
        {
            continue;
        }

        if name == header::LOCATION {
            let rewritten = value
                .to_str()
                .ok()
                .and_then(|location| rewrite_location(location, origin, prefix))
                .and_then(|location| HeaderValue::from_str(&location).ok());
            if let Some(rewritten) = rewritten {
                forwarded.append(header::LOCATION, rewritten);
                continue;
            }
        }

        forwarded.append(name.clone(), value.clone());
    }

    forwarded
}

/// points redirects that stay on the backend back through the proxy prefix
///
/// redirects to other hosts return None and are passed along as they are
pub fn rewrite_location(location: &str, origin: &str, prefix: &str) -> Option<String> {
    if location.starts_with('/') && !location.starts_with("//") {
        return Some(format!("{}{}", prefix, location));
    }

    let target = url::Url::parse(location).ok()?;
    let origin = url::Url::parse(origin).ok()?;

    if target.origin() != origin.origin() {
        return None;
    }

    // the backend origin may carry a base path of its own
    let base_path = origin.path().trim_end_matches('/');
    let path = target.path().strip_prefix(base_path).unwrap_or(target.path());
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };

    Some(upstream_url(prefix, &path, target.query()))
}
