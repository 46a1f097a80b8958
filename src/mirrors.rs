use rand::Rng;
use rand::SeedableRng;
use rand::rngs::SmallRng;

use crate::geo::GeoAttributes;

/// Path admission policy of a deployment. Pure and path-only: geo attributes
/// must never influence whether a request is proxied at all.
#[derive(Debug)]
pub(crate) struct PathPolicy {
    pub(crate) prefixes: &'static [&'static str],
    pub(crate) allow_root: bool,
    /// Admit any path containing a dot (static asset heuristic).
    pub(crate) allow_dotted: bool,
}

impl PathPolicy {
    #[must_use]
    pub(crate) fn allows(&self, path: &str) -> bool {
        if self.allow_root && path == "/" {
            return true;
        }

        if self.prefixes.iter().any(|prefix| path.starts_with(prefix)) {
            return true;
        }

        self.allow_dotted && path.contains('.')
    }
}

#[derive(Debug)]
pub(crate) enum GeoPredicate {
    Country(&'static str),
    ColoIn(&'static [&'static str]),
    CountryOrColo(&'static str, &'static str),
}

impl GeoPredicate {
    #[must_use]
    fn matches(&self, geo: GeoAttributes<'_>) -> bool {
        match self {
            Self::Country(code) => geo.country == Some(code),
            Self::ColoIn(colos) => geo.colo.is_some_and(|c| colos.contains(&c)),
            Self::CountryOrColo(code, colo) => {
                geo.country == Some(code) || geo.colo == Some(colo)
            }
        }
    }
}

/// One steering rule: requests matching the predicate go to the target host.
/// Rules are evaluated in declaration order, first match wins.
#[derive(Debug)]
pub(crate) struct MirrorRule {
    pub(crate) predicate: GeoPredicate,
    pub(crate) target: &'static str,
}

/// Selects the upstream mirror host for the given geo attributes.
///
/// All explicit rules are deterministic; only the fallback pool is
/// randomized, uniformly and without any affinity across requests.
#[must_use]
pub(crate) fn select_mirror(
    rules: &[MirrorRule],
    fallback: &'static [&'static str],
    geo: GeoAttributes<'_>,
) -> &'static str {
    if let Some(rule) = rules.iter().find(|rule| rule.predicate.matches(geo)) {
        return rule.target;
    }

    match fallback {
        [] => unreachable!("profile fallback pool is never empty"),
        [single] => single,
        pool => {
            let mut rng = SmallRng::from_os_rng();
            pool[rng.random_range(0..pool.len())]
        }
    }
}
