use hyper::HeaderMap;

/// Headers injected by the fronting edge layer. The proxy itself performs no
/// geo lookups; absent headers simply mean "no geo attributes".
pub(crate) const HDR_CONNECTING_IP: &str = "cf-connecting-ip";
pub(crate) const HDR_COUNTRY: &str = "cf-ipcountry";
pub(crate) const HDR_RAY: &str = "cf-ray";
pub(crate) const HDR_CITY: &str = "cf-ipcity";
pub(crate) const HDR_ASN: &str = "cf-ipasn";
pub(crate) const HDR_ORGANIZATION: &str = "cf-iporganization";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct GeoAttributes<'a> {
    pub(crate) country: Option<&'a str>,
    pub(crate) colo: Option<&'a str>,
}

impl<'a> GeoAttributes<'a> {
    #[must_use]
    pub(crate) fn from_headers(headers: &'a HeaderMap) -> Self {
        Self {
            country: header_str(headers, HDR_COUNTRY).filter(|c| valid_country(c)),
            colo: header_str(headers, HDR_RAY).and_then(colo_from_ray),
        }
    }
}

#[must_use]
pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|val| val.to_str().ok())
        .filter(|s| !s.is_empty())
}

/// The edge sends uppercase ISO 3166-1 alpha-2 codes, with `XX` (unknown)
/// and `T1` (Tor exit) as placeholders that must not steer mirror selection.
#[must_use]
fn valid_country(code: &str) -> bool {
    code.len() == 2
        && code.bytes().all(|b| b.is_ascii_uppercase())
        && code != "XX"
        && code != "T1"
}

/// Extracts the edge-location code from a ray id such as
/// `93a5b1cc2e1a2c3d-NRT`.
#[must_use]
fn colo_from_ray(ray: &str) -> Option<&str> {
    let (_id, colo) = ray.rsplit_once('-')?;

    if colo.len() == 3 && colo.bytes().all(|b| b.is_ascii_uppercase()) {
        Some(colo)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use hyper::HeaderMap;
    use hyper::header::HeaderValue;

    use super::*;

    fn headers(entries: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in entries {
            map.insert(
                hyper::header::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn geo_from_edge_headers() {
        let map = headers(&[
            (HDR_COUNTRY, "US"),
            (HDR_RAY, "93a5b1cc2e1a2c3d-NRT"),
        ]);
        assert_eq!(
            GeoAttributes::from_headers(&map),
            GeoAttributes {
                country: Some("US"),
                colo: Some("NRT"),
            }
        );
    }

    #[test]
    fn geo_absent_headers() {
        let map = HeaderMap::new();
        assert_eq!(GeoAttributes::from_headers(&map), GeoAttributes::default());
    }

    #[test]
    fn geo_placeholder_country_ignored() {
        let map = headers(&[(HDR_COUNTRY, "XX")]);
        assert_eq!(GeoAttributes::from_headers(&map).country, None);

        let map = headers(&[(HDR_COUNTRY, "T1")]);
        assert_eq!(GeoAttributes::from_headers(&map).country, None);

        let map = headers(&[(HDR_COUNTRY, "usa")]);
        assert_eq!(GeoAttributes::from_headers(&map).country, None);
    }

    #[test]
    fn colo_from_ray_suffix() {
        assert_eq!(colo_from_ray("93a5b1cc2e1a2c3d-NRT"), Some("NRT"));
        assert_eq!(colo_from_ray("93a5b1cc2e1a2c3d-HKG"), Some("HKG"));

        /* no separator */
        assert_eq!(colo_from_ray("93a5b1cc2e1a2c3d"), None);

        /* malformed suffix */
        assert_eq!(colo_from_ray("93a5b1cc2e1a2c3d-nrt"), None);
        assert_eq!(colo_from_ray("93a5b1cc2e1a2c3d-LONG"), None);
        assert_eq!(colo_from_ray("93a5b1cc2e1a2c3d-"), None);
    }
}
