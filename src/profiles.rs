use crate::mirrors::{GeoPredicate, MirrorRule, PathPolicy};

/// How the outbound `Referer` header is derived. Some mirrors validate the
/// referer against their own domain; for those the client value is replaced
/// by the resolved target URL instead of being passed through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RefererMode {
    PassThrough,
    TargetUrl,
}

#[derive(Debug)]
pub(crate) struct Branding {
    /// Complete favicon `<link>` element with an embedded image.
    pub(crate) favicon_link: &'static str,
    /// Extra elements injected ahead of the meta block, may be empty.
    pub(crate) head_extra: &'static str,
    /// Open Graph / Twitter card block.
    pub(crate) meta_tags: &'static str,
}

/// Title/heading substitution applied only at the canonical root URL.
#[derive(Debug)]
pub(crate) struct Rebrand {
    pub(crate) canonical_host: &'static str,
    pub(crate) prefix: &'static str,
    pub(crate) title_suffix: &'static str,
    pub(crate) heading_suffix: &'static str,
}

/// A compiled-in deployment: one public hostname identity, its steering
/// table, header quirks, and branding. Read-only for the process lifetime.
#[derive(Debug)]
pub(crate) struct Profile {
    pub(crate) name: &'static str,
    pub(crate) paths: PathPolicy,
    pub(crate) rules: &'static [MirrorRule],
    pub(crate) fallback: &'static [&'static str],
    pub(crate) forward_accept_language: bool,
    pub(crate) referer: RefererMode,
    pub(crate) branding: Branding,
    /// Path of the mirrored tree's index page that gets the geo/mirror
    /// info fragment appended. Other pages never leak routing details.
    pub(crate) info_fragment_path: Option<&'static str>,
    pub(crate) rebrand: Option<Rebrand>,
}

impl Profile {
    #[must_use]
    pub(crate) fn by_name(name: &str) -> Option<&'static Self> {
        match name {
            "arch" => Some(&ARCH),
            "debian" => Some(&DEBIAN),
            _ => None,
        }
    }
}

const ARCH_FAVICON: &str = r#"<link rel="icon" type="image/png" href="data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAABAAAAAQCAYAAAAf8/9hAAAABmJLR0QA/wD/AP+gvaeTAAABuElEQVQ4y5WQP2gTURzHP+/dS85rTeGuYG+oi4kUSslgEdTZVRBxEZ0crGAWwYBQdNFZhx6dHArtIg4iWkGhg1MRRegVFcVoqRkOLSIGkibeu+dygTTkQv0u78fvz5fP+wpjDFnyg/D4aE6q2tzMetaOYriuWUKMAJkGIovg8OLmuBDU85ZUU549tXq+9HXQnsxyHs3LOUfJA2BUK06uZ+1lGjhKHnGUxFGSVpxcvPpy2923wamVT2dtS7yxlVhzlKSjjVv/05nfVwazSx/znqNqxjAZG/MrMbjaGOFYslHIy+Ljc8WfQwk8R1VHcnLSVgJj8No6EX+1YVcnhZY2t4YSTD/4MHbUs7d2mrH7vdGho/fS2ZZojNlWafPy9I+BBLs6qb6Lmm7td7t7/AR42J23tSnstOIbAwn8IDwE1ICD6exZVCmfSWfLwKW03wSKUaUc9RPc7jkGeNpTv0hfA3wDqnu+4AdhEbjSl8+Xnvp9lxiwgUf9GdwFcmm9BdwDPvcY1IH7wDZQAtb8ILwAICYWNo4Bb4HnwJ2oUn7NEPlBeBKYB04DM2JiYeMm8CqqlNf5D6VGJ/4BcSib4cIIXvoAAAAASUVORK5CYII=" />"#;

const ARCH_META_TAGS: &str = r#"
    <meta property="og:url" content="https://arch.akihi.me">
    <meta property="og:type" content="website">
    <meta property="og:title" content="arch.akihi.me" />
    <meta property="og:description" content="Arch Linux mirror" />
    <meta property="og:image" content="https://cdn.jsdelivr.net/gh/walkxcode/dashboard-icons@master/png/arch.png" />
    <meta property="og:image:width" content="64" />
    <meta property="og:image:height" content="64" />
    <meta property="twitter:domain" content="arch.akihi.me">
    <meta property="twitter:url" content="https://arch.akihi.me">
    <meta name="twitter:title" content="arch.akihi.me">
    <meta name="twitter:description" content="Arch Linux mirror">
    <meta name="twitter:image" content="https://cdn.jsdelivr.net/gh/walkxcode/dashboard-icons@master/png/arch.png">
    "#;

const DEBIAN_FAVICON: &str = r#"<link rel="icon" type="image/png" href="data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAACAAAAAgCAYAAABzenr0AAAABmJLR0QA/wD/AP+gvaeTAAACQElEQVRYw9WWsY7TQBCGv0U0AZkqdpPihJCbVER5ALu9/uLXQfc64D6t/QARnZsIEEWaTSp8IeVSJI7s9e7aPpNDTGnvzvzzz8w/K3iGrQnVhBkAJ3bcsQVWnPjOExsRDfAlhgTOiFXfsyd2HFmIBz6PB1DP+DkWk1njdAIwZR3gM+eL9a4JsA2EE4AeXJANqq9+3wTile3yhmXj8oFgUHBTwDVhi83X+occiIASDzg30z3bQc2qs6YuTJzLsnUzENWoGxu88lcHk7sYSEmYIq80dQVPSXjL10bDmfrEo6TEwwdVkAhqo9kqQUCGJObEzplZDiikEmxFpNGaklCf/x98EFOk+knY8tMqgSQG4E1H9r8Jla0xfU186mD0fw0A7/l2pd/V8SkJAe+wqZzt7oQZexI7gCc2vRpuilTLjrM5j31ctXsAcNb/XPtui/hk9PtAZmfAZ6UA7vjYC70LpMmOLNxKuL/o+96h85WlWi2biTRJMimgEYDOhMkizlTW9aLKurgEntd2TErChBkHAuNqNgKQ7J3ZH1mIE7vGvoi0wFXwKVIF+NaJaQDou2yqWZb8Yk2o9JqnJGTEaopUBwLhWt2tHxuWqsRzPiIqK+Cqbvr+9yjpGlVjCaot2Of5NQdxz1YcWYgAH4+SA4GIyUSf4FbLiNWQ998YMzZh1yK6OYBqDb8EC9YnWYAPQOHQhJsCqEanSxNubi/ZkE4QLj3/r5kYJBYFKyXZ/5XX8igrWP37vsh5ZE2oClYqH+HnD8KP16YBvW+JAAAAAElFTkSuQmCC" />"#;

const DEBIAN_HEAD_EXTRA: &str = "<title>Debian mirrors backed by Cloudflare CDN</title>";

const DEBIAN_META_TAGS: &str = r#"
      <meta property="og:title" content="deb.boletus.me" />
      <meta property="og:description" content="Debian mirrors backed by Cloudflare CDN" />
      <meta property="og:image" content="https://cdn.jsdelivr.net/gh/walkxcode/dashboard-icons@master/png/debian.png" />
      <meta property="og:image:width" content="64" />
      <meta property="og:image:height" content="64" />
      <meta name="twitter:title" content="deb.boletus.me">
      <meta name="twitter:description" content="Debian mirrors backed by Cloudflare CDN">
      <meta name="twitter:image" content="https://cdn.jsdelivr.net/gh/walkxcode/dashboard-icons@master/png/debian.png">
      "#;

pub(crate) static ARCH: Profile = Profile {
    name: "arch",
    paths: PathPolicy {
        prefixes: &["/archlinux", "/icons"],
        allow_root: true,
        allow_dotted: false,
    },
    rules: &[
        MirrorRule {
            predicate: GeoPredicate::Country("US"),
            target: "arch.hu.fo",
        },
        MirrorRule {
            predicate: GeoPredicate::ColoIn(&["NRT", "KIX", "FUK", "OKA"]),
            target: "mirror.nishi.network",
        },
        MirrorRule {
            predicate: GeoPredicate::CountryOrColo("HK", "HKG"),
            target: "mirror-hk.koddos.net",
        },
        MirrorRule {
            predicate: GeoPredicate::Country("CA"),
            target: "mirror.cedille.club",
        },
    ],
    fallback: &[
        "arch.hu.fo",
        "mirrors.sonic.net",
        "mirror.lty.me",
        "mirrors.xtom.com",
    ],
    forward_accept_language: true,
    referer: RefererMode::PassThrough,
    branding: Branding {
        favicon_link: ARCH_FAVICON,
        head_extra: "",
        meta_tags: ARCH_META_TAGS,
    },
    info_fragment_path: Some("/archlinux/"),
    rebrand: None,
};

pub(crate) static DEBIAN: Profile = Profile {
    name: "debian",
    paths: PathPolicy {
        prefixes: &["/debian", "/debian-security"],
        allow_root: true,
        allow_dotted: true,
    },
    rules: &[MirrorRule {
        predicate: GeoPredicate::CountryOrColo("HK", "HKG"),
        target: "cdn-fastly.deb.debian.org",
    }],
    fallback: &["deb.debian.org"],
    forward_accept_language: false,
    referer: RefererMode::TargetUrl,
    branding: Branding {
        favicon_link: DEBIAN_FAVICON,
        head_extra: DEBIAN_HEAD_EXTRA,
        meta_tags: DEBIAN_META_TAGS,
    },
    info_fragment_path: None,
    rebrand: Some(Rebrand {
        canonical_host: "deb.boletus.me",
        prefix: "Debian mirrors backed by ",
        title_suffix: "Cloudflare CDN",
        heading_suffix: "<s>Fastly</s> Cloudflare CDN",
    }),
};

#[cfg(test)]
mod tests {
    use crate::geo::GeoAttributes;
    use crate::mirrors::select_mirror;

    use super::*;

    const fn geo<'a>(country: Option<&'a str>, colo: Option<&'a str>) -> GeoAttributes<'a> {
        GeoAttributes { country, colo }
    }

    #[test]
    fn lookup_by_name() {
        assert_eq!(Profile::by_name("arch").unwrap().name, "arch");
        assert_eq!(Profile::by_name("debian").unwrap().name, "debian");
        assert!(Profile::by_name("fedora").is_none());
    }

    #[test]
    fn arch_steering_table() {
        let p = &ARCH;

        assert_eq!(
            select_mirror(p.rules, p.fallback, geo(Some("US"), None)),
            "arch.hu.fo"
        );
        for colo in ["NRT", "KIX", "FUK", "OKA"] {
            assert_eq!(
                select_mirror(p.rules, p.fallback, geo(None, Some(colo))),
                "mirror.nishi.network"
            );
        }
        assert_eq!(
            select_mirror(p.rules, p.fallback, geo(Some("HK"), None)),
            "mirror-hk.koddos.net"
        );
        assert_eq!(
            select_mirror(p.rules, p.fallback, geo(None, Some("HKG"))),
            "mirror-hk.koddos.net"
        );
        assert_eq!(
            select_mirror(p.rules, p.fallback, geo(Some("CA"), None)),
            "mirror.cedille.club"
        );

        for _ in 0..32 {
            let picked = select_mirror(p.rules, p.fallback, geo(Some("DE"), Some("FRA")));
            assert!(p.fallback.contains(&picked));
        }
    }

    #[test]
    fn debian_steering_table() {
        let p = &DEBIAN;

        assert_eq!(
            select_mirror(p.rules, p.fallback, geo(Some("HK"), None)),
            "cdn-fastly.deb.debian.org"
        );
        assert_eq!(
            select_mirror(p.rules, p.fallback, geo(None, Some("HKG"))),
            "cdn-fastly.deb.debian.org"
        );

        /* single-host fallback is deterministic */
        for _ in 0..8 {
            assert_eq!(
                select_mirror(p.rules, p.fallback, geo(None, None)),
                "deb.debian.org"
            );
        }
    }

    #[test]
    fn arch_path_admission() {
        assert!(ARCH.paths.allows("/"));
        assert!(ARCH.paths.allows("/archlinux/core/os/x86_64/core.db"));
        assert!(ARCH.paths.allows("/icons/folder.png"));
        assert!(!ARCH.paths.allows("/debian/"));
        assert!(!ARCH.paths.allows("/favicon.ico"));
    }

    #[test]
    fn debian_path_admission() {
        assert!(DEBIAN.paths.allows("/"));
        assert!(DEBIAN.paths.allows("/debian/dists/stable/InRelease"));
        assert!(DEBIAN.paths.allows("/debian-security/"));
        /* dot heuristic admits stray static assets */
        assert!(DEBIAN.paths.allows("/favicon.ico"));
        assert!(!DEBIAN.paths.allows("/ubuntu/"));
    }
}
