//! Parsing of `WWW-Authenticate` challenges returned by `/v2/`
//!
//! Only what a registry login needs: the scheme of each challenge and its
//! `key=value` parameters.

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;

/// How the registry wants credentials to be presented
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    /// Credentials go straight to `/v2/` as HTTP basic auth
    Basic,
    /// Credentials are exchanged for a token at `realm` first
    Bearer {
        realm: String,
        service: Option<String>,
        scope: Option<String>,
    },
}

impl Challenge {
    /// Pick the challenge to answer from a raw header value
    ///
    /// Bearer wins over Basic when both are offered. A header that cannot be
    /// parsed, or names only unknown schemes, falls back to Basic since that
    /// is what legacy registries expect.
    pub fn from_header(value: Option<&str>) -> Challenge {
        let Some(value) = value else {
            return Challenge::Basic;
        };

        let mut challenges = parse(value);
        if let Some(pos) = challenges.iter().position(|(scheme, params)| {
            scheme.eq_ignore_ascii_case("bearer") && params.contains_key("realm")
        }) {
            let (_, mut params) = challenges.swap_remove(pos);
            return Challenge::Bearer {
                realm: params.remove("realm").unwrap_or_default(),
                service: params.remove("service"),
                scope: params.remove("scope"),
            };
        }

        Challenge::Basic
    }
}

/// Split a header into `(scheme, parameters)` pairs
///
/// A challenge without parameters (e.g. a bare `Basic`) is kept with an
/// empty map.
fn parse(value: &str) -> Vec<(String, HashMap<String, String>)> {
    lazy_static! {
        // group 1: scheme (only at the start of a challenge)
        // group 2: parameter name
        // group 3: quoted value, group 4: token value
        static ref PARAM: Regex =
            Regex::new(r#"(?:^|,)\s*(?:([A-Za-z][\w-]*)\s+)?(\w+)\s*=\s*(?:"((?:[^"\\]|\\.)*)"|([^",\s]*))"#)
                .unwrap();
        static ref BARE_SCHEME: Regex = Regex::new(r"^\s*([A-Za-z][\w-]*)\s*$").unwrap();
    }

    if let Some(caps) = BARE_SCHEME.captures(value) {
        return vec![(caps[1].to_string(), HashMap::new())];
    }

    let mut challenges: Vec<(String, HashMap<String, String>)> = Vec::new();
    for caps in PARAM.captures_iter(value) {
        if let Some(scheme) = caps.get(1) {
            challenges.push((scheme.as_str().to_string(), HashMap::new()));
        }

        let Some((_, params)) = challenges.last_mut() else {
            // Parameters before any scheme: malformed
            return Vec::new();
        };

        let key = caps[2].to_ascii_lowercase();
        let val = caps
            .get(3)
            .map(|m| m.as_str().replace("\\\"", "\""))
            .or_else(|| caps.get(4).map(|m| m.as_str().to_string()))
            .unwrap_or_default();
        params.insert(key, val);
    }

    challenges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_docker_hub_bearer() {
        let header = r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io""#;
        assert_eq!(
            Challenge::from_header(Some(header)),
            Challenge::Bearer {
                realm: "https://auth.docker.io/token".to_string(),
                service: Some("registry.docker.io".to_string()),
                scope: None,
            }
        );
    }

    #[test]
    fn test_bearer_with_scope() {
        let header = r#"Bearer realm="https://ghcr.io/token",service="ghcr.io",scope="repository:user/image:pull""#;
        match Challenge::from_header(Some(header)) {
            Challenge::Bearer { scope, .. } => {
                assert_eq!(scope.as_deref(), Some("repository:user/image:pull"))
            }
            other => panic!("expected bearer, got {:?}", other),
        }
    }

    #[test]
    fn test_basic_realm() {
        assert_eq!(
            Challenge::from_header(Some(r#"Basic realm="Registry Realm""#)),
            Challenge::Basic
        );
        assert_eq!(Challenge::from_header(Some("Basic")), Challenge::Basic);
    }

    #[test]
    fn test_bearer_preferred_over_basic() {
        let header = r#"Basic realm="legacy", Bearer realm="http://127.0.0.1/token",service="local""#;
        assert!(matches!(
            Challenge::from_header(Some(header)),
            Challenge::Bearer { .. }
        ));
    }

    #[test]
    fn test_missing_or_garbage_falls_back_to_basic() {
        assert_eq!(Challenge::from_header(None), Challenge::Basic);
        assert_eq!(Challenge::from_header(Some("")), Challenge::Basic);
        assert_eq!(Challenge::from_header(Some("=== nonsense")), Challenge::Basic);
        // Bearer without a realm cannot be answered
        assert_eq!(
            Challenge::from_header(Some(r#"Bearer service="x""#)),
            Challenge::Basic
        );
    }
}
