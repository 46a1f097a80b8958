use http_body_util::combinators::BoxBody;
use hyper::body::Incoming;
use hyper::header::{
    ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, CACHE_CONTROL, CONNECTION, HOST, HeaderMap,
    HeaderName, HeaderValue, LOCATION, ORIGIN, RANGE, REFERER, USER_AGENT,
};
use hyper::{Method, Request, Response, Uri};
use log::trace;

use crate::Client;
use crate::error::ProxyError;
use crate::profiles::{Profile, RefererMode};

/// Builds the target URI for the upstream fetch: the inbound path and query
/// on the selected mirror host, always via https.
pub(crate) fn target_uri(mirror_host: &str, inbound: &Uri) -> Result<Uri, ProxyError> {
    let path_and_query = inbound.path_and_query().map_or("/", |pq| pq.as_str());

    Uri::builder()
        .scheme("https")
        .authority(mirror_host)
        .path_and_query(path_and_query)
        .build()
        .map_err(ProxyError::Http)
}

/// Assembles the outbound header set: a fixed allow-list, pinned connection
/// headers, and conditional entries taken from the inbound request. Anything
/// not named here (cookies, auth, hop-by-hop headers) is dropped.
#[must_use]
pub(crate) fn build_outbound_headers(
    inbound: &HeaderMap,
    target: &Uri,
    profile: &Profile,
) -> HeaderMap {
    let mut outbound = HeaderMap::new();

    let host = target.host().expect("target uri has a host");
    outbound.insert(
        HOST,
        HeaderValue::from_str(host).expect("mirror hostnames are valid header values"),
    );

    copy_if_present(inbound, &mut outbound, USER_AGENT);
    copy_if_present(inbound, &mut outbound, ACCEPT);
    copy_if_present(inbound, &mut outbound, ACCEPT_ENCODING);
    if profile.forward_accept_language {
        copy_if_present(inbound, &mut outbound, ACCEPT_LANGUAGE);
    }

    outbound.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    outbound.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=0"));

    /* Required for partial-content/resume semantics on large package files. */
    copy_if_present(inbound, &mut outbound, RANGE);

    copy_if_present(inbound, &mut outbound, ORIGIN);

    match profile.referer {
        RefererMode::PassThrough => copy_if_present(inbound, &mut outbound, REFERER),
        RefererMode::TargetUrl => {
            if inbound.contains_key(REFERER) {
                outbound.insert(
                    REFERER,
                    HeaderValue::from_str(&target.to_string())
                        .expect("target uri is a valid header value"),
                );
            }
        }
    }

    outbound
}

fn copy_if_present(inbound: &HeaderMap, outbound: &mut HeaderMap, name: HeaderName) {
    if let Some(value) = inbound.get(&name) {
        outbound.insert(name, value.clone());
    }
}

/// Issues the single outbound call for this request. No retries, and the
/// client does not follow redirects; 3xx responses surface to the caller.
pub(crate) async fn forward_upstream(
    client: &Client,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: BoxBody<bytes::Bytes, ProxyError>,
) -> Result<Response<Incoming>, hyper_util::client::legacy::Error> {
    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .body(body)
        .expect("forwarded request is valid");
    *request.headers_mut() = headers;

    trace!("Forwarded request: {request:?}");

    client.request(request).await
}

/// Rewrites an absolute `Location` value so its authority becomes the
/// client-facing one, preserving scheme, path, query, and fragment
/// byte-for-byte. Returns `None` for relative locations, which already
/// resolve against the client-facing host.
///
/// Done at the string level: `http::Uri` cannot represent fragments.
#[must_use]
pub(crate) fn rewrite_location(location: &str, client_authority: &str) -> Option<String> {
    let scheme_end = location.find("://")?;
    let (scheme, rest) = location.split_at(scheme_end);
    let rest = &rest[3..];

    if scheme.is_empty() || !scheme.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return None;
    }

    let authority_end = rest
        .find(['/', '?', '#'])
        .unwrap_or(rest.len());

    Some(format!(
        "{scheme}://{client_authority}{}",
        &rest[authority_end..]
    ))
}

/// Applies the `Location` rewrite to a 3xx response in place. All other
/// response fields are left untouched.
pub(crate) fn rewrite_redirect<B>(response: &mut Response<B>, client_authority: &str) {
    if !response.status().is_redirection() {
        return;
    }

    let Some(rewritten) = response
        .headers()
        .get(LOCATION)
        .and_then(|val| val.to_str().ok())
        .and_then(|loc| rewrite_location(loc, client_authority))
    else {
        return;
    };

    let value = HeaderValue::from_str(&rewritten)
        .expect("rewritten location contains only valid header characters");
    response.headers_mut().insert(LOCATION, value);
}

/// Strips an optional port from an authority, keeping IPv6 literals intact.
#[must_use]
pub(crate) fn host_only(authority: &str) -> &str {
    if authority.starts_with('[') {
        match authority.find(']') {
            Some(end) => &authority[..=end],
            None => authority,
        }
    } else {
        match authority.rsplit_once(':') {
            Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
                host
            }
            _ => authority,
        }
    }
}

/// Package managers and download tools fetch files, not pages; rewriting
/// HTML for them is wasted work at best. The predicate is deliberately a
/// prefix check on the product token.
#[must_use]
pub(crate) fn is_tooling_client(user_agent: &str) -> bool {
    const TOOL_PREFIXES: &[&str] = &["apt", "debian apt", "curl", "wget", "pacman", "libalpm"];

    let ua = user_agent.trim_start();

    TOOL_PREFIXES.iter().any(|prefix| {
        ua.len() >= prefix.len() && ua[..prefix.len()].eq_ignore_ascii_case(prefix)
    })
}

#[cfg(test)]
mod tests {
    use hyper::StatusCode;

    use crate::profiles::{ARCH, DEBIAN};

    use super::*;

    fn headers(entries: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in entries {
            map.insert(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn target_uri_keeps_path_and_query() {
        let inbound: Uri = "/archlinux/iso/latest/?C=M&O=D".parse().unwrap();
        let uri = target_uri("arch.hu.fo", &inbound).unwrap();
        assert_eq!(uri.to_string(), "https://arch.hu.fo/archlinux/iso/latest/?C=M&O=D");

        let root: Uri = "/".parse().unwrap();
        let uri = target_uri("deb.debian.org", &root).unwrap();
        assert_eq!(uri.to_string(), "https://deb.debian.org/");
    }

    #[test]
    fn outbound_headers_allow_list() {
        let inbound = headers(&[
            ("user-agent", "Mozilla/5.0"),
            ("accept", "text/html"),
            ("accept-encoding", "gzip"),
            ("accept-language", "en-US"),
            ("cookie", "secret=1"),
            ("authorization", "Bearer tok"),
            ("x-forwarded-for", "203.0.113.7"),
        ]);
        let target: Uri = "https://arch.hu.fo/archlinux/".parse().unwrap();

        let out = build_outbound_headers(&inbound, &target, &ARCH);

        assert_eq!(out.get(HOST).unwrap(), "arch.hu.fo");
        assert_eq!(out.get(USER_AGENT).unwrap(), "Mozilla/5.0");
        assert_eq!(out.get(ACCEPT).unwrap(), "text/html");
        assert_eq!(out.get(ACCEPT_ENCODING).unwrap(), "gzip");
        assert_eq!(out.get(ACCEPT_LANGUAGE).unwrap(), "en-US");
        assert_eq!(out.get(CONNECTION).unwrap(), "keep-alive");
        assert_eq!(out.get(CACHE_CONTROL).unwrap(), "max-age=0");

        /* nothing outside the allow-list leaks upstream */
        assert!(out.get("cookie").is_none());
        assert!(out.get("authorization").is_none());
        assert!(out.get("x-forwarded-for").is_none());
    }

    #[test]
    fn outbound_headers_conditional_entries() {
        let target: Uri = "https://arch.hu.fo/".parse().unwrap();

        let bare = build_outbound_headers(&HeaderMap::new(), &target, &ARCH);
        assert!(bare.get(RANGE).is_none());
        assert!(bare.get(ORIGIN).is_none());
        assert!(bare.get(REFERER).is_none());

        let inbound = headers(&[
            ("range", "bytes=0-1023"),
            ("origin", "https://arch.akihi.me"),
            ("referer", "https://arch.akihi.me/archlinux/"),
        ]);
        let out = build_outbound_headers(&inbound, &target, &ARCH);
        assert_eq!(out.get(RANGE).unwrap(), "bytes=0-1023");
        assert_eq!(out.get(ORIGIN).unwrap(), "https://arch.akihi.me");
        assert_eq!(out.get(REFERER).unwrap(), "https://arch.akihi.me/archlinux/");
    }

    #[test]
    fn accept_language_gated_per_profile() {
        let inbound = headers(&[("accept-language", "de-DE")]);
        let target: Uri = "https://deb.debian.org/".parse().unwrap();

        let out = build_outbound_headers(&inbound, &target, &DEBIAN);
        assert!(out.get(ACCEPT_LANGUAGE).is_none());

        let out = build_outbound_headers(&inbound, &target, &ARCH);
        assert_eq!(out.get(ACCEPT_LANGUAGE).unwrap(), "de-DE");
    }

    #[test]
    fn referer_rewritten_to_target_url() {
        let inbound = headers(&[("referer", "https://deb.boletus.me/debian/")]);
        let target: Uri = "https://cdn-fastly.deb.debian.org/debian/dists/stable/InRelease"
            .parse()
            .unwrap();

        let out = build_outbound_headers(&inbound, &target, &DEBIAN);
        assert_eq!(
            out.get(REFERER).unwrap(),
            "https://cdn-fastly.deb.debian.org/debian/dists/stable/InRelease"
        );

        /* no inbound referer means none is invented */
        let out = build_outbound_headers(&HeaderMap::new(), &target, &DEBIAN);
        assert!(out.get(REFERER).is_none());
    }

    #[test]
    fn location_rewrite_replaces_authority_only() {
        assert_eq!(
            rewrite_location(
                "https://internal-mirror.example/archlinux/foo",
                "arch.example.com"
            ),
            Some("https://arch.example.com/archlinux/foo".to_string())
        );

        /* query and fragment survive byte-for-byte */
        assert_eq!(
            rewrite_location(
                "https://mirror.internal:8443/debian/pool/?a=1&b=2#frag",
                "deb.example.org"
            ),
            Some("https://deb.example.org/debian/pool/?a=1&b=2#frag".to_string())
        );

        /* client authority may carry a port */
        assert_eq!(
            rewrite_location("http://mirror.internal/x", "proxy.example:8080"),
            Some("http://proxy.example:8080/x".to_string())
        );

        /* bare authority, no path */
        assert_eq!(
            rewrite_location("https://mirror.internal", "proxy.example"),
            Some("https://proxy.example".to_string())
        );
    }

    #[test]
    fn relative_location_passes_through() {
        assert_eq!(rewrite_location("/archlinux/", "proxy.example"), None);
        assert_eq!(rewrite_location("foo/bar", "proxy.example"), None);
        assert_eq!(rewrite_location("", "proxy.example"), None);
    }

    #[test]
    fn redirect_rewrite_applies_to_3xx_only() {
        let mut response = Response::builder()
            .status(StatusCode::MOVED_PERMANENTLY)
            .header(LOCATION, "https://internal-mirror.example/archlinux/foo")
            .body(())
            .unwrap();
        rewrite_redirect(&mut response, "arch.example.com");
        assert_eq!(
            response.headers().get(LOCATION).unwrap(),
            "https://arch.example.com/archlinux/foo"
        );

        /* a 200 with a Location-like header is left alone */
        let mut response = Response::builder()
            .status(StatusCode::OK)
            .header(LOCATION, "https://internal-mirror.example/")
            .body(())
            .unwrap();
        rewrite_redirect(&mut response, "arch.example.com");
        assert_eq!(
            response.headers().get(LOCATION).unwrap(),
            "https://internal-mirror.example/"
        );
    }

    #[test]
    fn host_only_strips_port() {
        assert_eq!(host_only("deb.boletus.me"), "deb.boletus.me");
        assert_eq!(host_only("deb.boletus.me:8443"), "deb.boletus.me");
        assert_eq!(host_only("[::1]:8080"), "[::1]");
        assert_eq!(host_only("[2001:db8::1]"), "[2001:db8::1]");
        /* not a port */
        assert_eq!(host_only("weird:host"), "weird:host");
    }

    #[test]
    fn tooling_clients_detected() {
        assert!(is_tooling_client("Debian APT-HTTP/1.3 (2.7.10)"));
        assert!(is_tooling_client("apt/2.9.5"));
        assert!(is_tooling_client("curl/8.5.0"));
        assert!(is_tooling_client("Wget/1.21.4"));
        assert!(is_tooling_client("pacman/6.0.2 (x86_64-pc-linux-gnu) libalpm/13.0.2"));

        assert!(!is_tooling_client("Mozilla/5.0 (X11; Linux x86_64)"));
        assert!(!is_tooling_client(""));
        /* substring matches elsewhere in the value do not count */
        assert!(!is_tooling_client("Mozilla/5.0 compatible; curl-like"));
    }
}
