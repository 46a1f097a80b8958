use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use hyper::{Request, Response, StatusCode, Uri};
use log::{debug, warn};

use crate::error::ProxyError;
use crate::{Client, ProxyBody, quick_response};

const UPSTREAM_RESOLVER: &str = "cloudflare-dns.com";
const DNS_MESSAGE_TYPE: &str = "application/dns-message";

/// Wire-format DoH requests announce themselves with an exact Accept value;
/// anything else on this route is not ours to answer.
#[must_use]
fn is_dns_message_request(headers: &HeaderMap) -> bool {
    headers
        .get(ACCEPT)
        .and_then(|val| val.to_str().ok())
        .is_some_and(|accept| accept == DNS_MESSAGE_TYPE)
}

fn resolver_uri(query: Option<&str>) -> Result<Uri, ProxyError> {
    let path_and_query = match query {
        Some(q) => format!("/dns-query?{q}"),
        None => String::from("/dns-query"),
    };

    Uri::builder()
        .scheme("https")
        .authority(UPSTREAM_RESOLVER)
        .path_and_query(path_and_query)
        .build()
        .map_err(ProxyError::Http)
}

/// Relays a DNS-over-HTTPS query to the fixed upstream resolver and returns
/// its response verbatim, body streamed through.
pub(crate) async fn serve_dns_query(
    req: Request<Incoming>,
    client: &Client,
) -> Response<ProxyBody> {
    if !is_dns_message_request(req.headers()) {
        debug!("Rejecting non-DoH request on resolver route: {req:?}");
        return quick_response(StatusCode::NOT_FOUND, "not found");
    }

    let uri = match resolver_uri(req.uri().query()) {
        Ok(uri) => uri,
        Err(err) => {
            warn!("Failed to assemble resolver URL:  {err}");
            return quick_response(StatusCode::INTERNAL_SERVER_ERROR, "Invalid resolver URL");
        }
    };

    let (parts, body) = req.into_parts();

    let mut fwd_request = Request::builder()
        .method(parts.method)
        .uri(uri)
        .header(ACCEPT, HeaderValue::from_static(DNS_MESSAGE_TYPE))
        .body(body.map_err(ProxyError::Hyper).boxed())
        .expect("resolver request is valid");
    /* POST queries carry the message in the body */
    if let Some(content_type) = parts.headers.get(CONTENT_TYPE) {
        fwd_request
            .headers_mut()
            .insert(CONTENT_TYPE, content_type.clone());
    }

    match client.request(fwd_request).await {
        Ok(response) => {
            let (parts, body) = response.into_parts();
            Response::from_parts(parts, body.map_err(ProxyError::Hyper).boxed())
        }
        Err(err) => {
            warn!("Request to upstream resolver failed:  {err}");
            quick_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Upstream resolver request failed",
            )
        }
    }
}
