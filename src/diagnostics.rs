use std::net::SocketAddr;

use hyper::HeaderMap;
use hyper::header::USER_AGENT;
use hyper::{Response, StatusCode};

use crate::geo::{HDR_ASN, HDR_CITY, HDR_CONNECTING_IP, HDR_COUNTRY, HDR_ORGANIZATION, header_str};
use crate::{ProxyBody, quick_response};

/// Builds the `/ip` report: address, geo, and network origin, one field
/// group per line. Absent edge headers render as empty fields.
#[must_use]
fn format_ip_report(headers: &HeaderMap, peer: SocketAddr) -> String {
    let ip = match header_str(headers, HDR_CONNECTING_IP) {
        Some(ip) => ip.to_string(),
        None => peer.ip().to_canonical().to_string(),
    };
    let country = header_str(headers, HDR_COUNTRY).unwrap_or_default();
    let city = header_str(headers, HDR_CITY).unwrap_or_default();
    let asn = header_str(headers, HDR_ASN).unwrap_or_default();
    let organization = header_str(headers, HDR_ORGANIZATION).unwrap_or_default();

    format!("{ip}\n{country}  {city}\nAS{asn}  {organization}\n")
}

#[must_use]
fn format_ua_report(headers: &HeaderMap) -> String {
    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|val| val.to_str().ok())
        .unwrap_or_default();

    format!("{user_agent}\n")
}

#[must_use]
pub(crate) fn serve_ip_echo(headers: &HeaderMap, peer: SocketAddr) -> Response<ProxyBody> {
    quick_response(StatusCode::OK, format_ip_report(headers, peer))
}

#[must_use]
pub(crate) fn serve_ua_echo(headers: &HeaderMap) -> Response<ProxyBody> {
    quick_response(StatusCode::OK, format_ua_report(headers))
}

#[cfg(test)]
mod tests {
    use hyper::header::{HeaderName, HeaderValue};

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

    const PEER: &str = "203.0.113.7:49152";

    #[test]
    fn ip_report_from_edge_headers() {
        let map = headers(&[
            (HDR_CONNECTING_IP, "198.51.100.23"),
            (HDR_COUNTRY, "US"),
            (HDR_CITY, "Los Angeles"),
            (HDR_ASN, "13335"),
            (HDR_ORGANIZATION, "Cloudflare, Inc."),
        ]);

        assert_eq!(
            format_ip_report(&map, PEER.parse().unwrap()),
            "198.51.100.23\nUS  Los Angeles\nAS13335  Cloudflare, Inc.\n"
        );
    }

    #[test]
    fn ip_report_falls_back_to_peer_address() {
        assert_eq!(
            format_ip_report(&HeaderMap::new(), PEER.parse().unwrap()),
            "203.0.113.7\n  \nAS  \n"
        );
    }

    #[test]
    fn ip_report_canonicalizes_mapped_peer() {
        let peer: SocketAddr = "[::ffff:203.0.113.7]:49152".parse().unwrap();
        let report = format_ip_report(&HeaderMap::new(), peer);
        assert!(report.starts_with("203.0.113.7\n"));
    }

    #[test]
    fn ua_report_echoes_header() {
        let map = headers(&[("user-agent", "curl/8.5.0")]);
        assert_eq!(format_ua_report(&map), "curl/8.5.0\n");

        assert_eq!(format_ua_report(&HeaderMap::new()), "\n");
    }
}
