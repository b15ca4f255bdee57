use axum::http::HeaderMap;
use axum::http::Uri;
use serde_json::Value;

use crate::error::GatewayError;

/// Ways a caller can supply the Apollo.io API key, in lookup order.
pub const ACCEPTED_CREDENTIAL_METHODS: &[&str] = &[
    "X-Apollo-Api-Key header",
    "X-Api-Key header",
    "Authorization: Bearer <key>",
    "Authorization: ApiKey <key>",
    "api_key query parameter",
    "api_key body field",
];

/// Resolves the backend credential for a request.
///
/// Precedence: explicit key > key carried by the request > process-wide default.
#[derive(Clone, Default)]
pub struct CredentialResolver {
    explicit: Option<String>,
    default: Option<String>,
    /// Set when `Authorization` carries the server access token instead.
    skip_authorization: bool,
}

impl std::fmt::Debug for CredentialResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialResolver")
            .field("explicit", &self.explicit.is_some())
            .field("default", &self.default.is_some())
            .field("skip_authorization", &self.skip_authorization)
            .finish()
    }
}

impl CredentialResolver {
    pub fn new(explicit: Option<String>, default: Option<String>, skip_authorization: bool) -> Self {
        Self {
            explicit: non_empty(explicit),
            default: non_empty(default),
            skip_authorization,
        }
    }

    /// Key usable without a request (stdio).
    pub fn startup_key(&self) -> Option<&str> {
        self.explicit.as_deref().or(self.default.as_deref())
    }

    pub fn resolve(
        &self,
        headers: &HeaderMap,
        uri: &Uri,
        body: Option<&Value>,
    ) -> Result<String, GatewayError> {
        self.explicit
            .clone()
            .or_else(|| self.from_request(headers, uri, body))
            .or_else(|| self.default.clone())
            .ok_or_else(GatewayError::missing_credential)
    }

    /// First non-empty key the request itself carries.
    pub fn from_request(&self, headers: &HeaderMap, uri: &Uri, body: Option<&Value>) -> Option<String> {
        header_value(headers, "x-apollo-api-key")
            .or_else(|| header_value(headers, "x-api-key"))
            .or_else(|| {
                if self.skip_authorization {
                    return None;
                }
                header_value(headers, "authorization").map(|v| strip_scheme(&v).to_string())
            })
            .filter(|v| !v.is_empty())
            .or_else(|| query_value(uri, "api_key"))
            .or_else(|| {
                body.and_then(|b| b.get("api_key"))
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            })
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// A bare scheme word with no key yields an empty string.
fn strip_scheme(v: &str) -> &str {
    for scheme in ["bearer", "apikey"] {
        let Some(prefix) = v.get(..scheme.len()) else {
            continue;
        };
        if !prefix.eq_ignore_ascii_case(scheme) {
            continue;
        }
        let rest = &v[scheme.len()..];
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            return rest.trim();
        }
    }
    v
}

fn query_value(uri: &Uri, name: &str) -> Option<String> {
    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, v)| k == name && !v.trim().is_empty())
        .map(|(_, v)| v.trim().to_string())
}

/// Drop credential fields from an argument bag before it reaches an operation.
pub fn strip_credential_fields(args: &mut Value) {
    if let Some(obj) = args.as_object_mut() {
        obj.remove("api_key");
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (k, v) in pairs {
            h.insert(*k, HeaderValue::from_str(v).expect("header"));
        }
        h
    }

    fn uri(s: &str) -> Uri {
        s.parse().expect("uri")
    }

    #[test]
    fn dedicated_header_wins_over_everything_from_the_request() {
        let r = CredentialResolver::default();
        let h = headers(&[
            ("x-apollo-api-key", "dedicated"),
            ("x-api-key", "generic"),
            ("authorization", "Bearer bearer"),
        ]);
        let got = r.from_request(&h, &uri("/api/tools?api_key=query"), None);
        assert_eq!(got.as_deref(), Some("dedicated"));
    }

    #[test]
    fn authorization_schemes_and_raw_values() {
        let r = CredentialResolver::default();
        for (raw, want) in [
            ("Bearer abc", "abc"),
            ("bearer abc", "abc"),
            ("ApiKey k-1", "k-1"),
            ("rawkey", "rawkey"),
        ] {
            let got = r.from_request(&headers(&[("authorization", raw)]), &uri("/"), None);
            assert_eq!(got.as_deref(), Some(want), "{raw}");
        }
    }

    #[test]
    fn bare_scheme_without_a_key_is_no_credential() {
        let r = CredentialResolver::default();
        for raw in ["Bearer", "bearer ", "ApiKey", "APIKEY   "] {
            let h = headers(&[("authorization", raw)]);
            assert!(r.from_request(&h, &uri("/"), None).is_none(), "{raw}");
            let err = r.resolve(&h, &uri("/"), None).expect_err(raw);
            assert!(matches!(err, GatewayError::Credential(_)), "{raw}");
        }

        // "Bearerish" is a raw key, not a scheme.
        let got = r.from_request(&headers(&[("authorization", "Bearerish")]), &uri("/"), None);
        assert_eq!(got.as_deref(), Some("Bearerish"));

        let got = r.from_request(&headers(&[("authorization", "Bearer")]), &uri("/?api_key=q"), None);
        assert_eq!(got.as_deref(), Some("q"));
    }

    #[test]
    fn query_then_body_are_last_resorts() {
        let r = CredentialResolver::default();
        let body = serde_json::json!({ "api_key": "from-body" });
        assert_eq!(
            r.from_request(&HeaderMap::new(), &uri("/x?api_key=from-query"), Some(&body))
                .as_deref(),
            Some("from-query")
        );
        assert_eq!(
            r.from_request(&HeaderMap::new(), &uri("/x?api_key="), Some(&body))
                .as_deref(),
            Some("from-body")
        );
    }

    #[test]
    fn authorization_ignored_when_it_carries_the_server_token() {
        let r = CredentialResolver::new(None, None, true);
        let got = r.from_request(&headers(&[("authorization", "Bearer srv")]), &uri("/"), None);
        assert!(got.is_none());
    }

    #[test]
    fn explicit_beats_request_beats_default() {
        let h = headers(&[("x-api-key", "req")]);
        let u = uri("/");

        let r = CredentialResolver::new(Some("explicit".into()), Some("default".into()), false);
        assert_eq!(r.resolve(&h, &u, None).expect("key"), "explicit");

        let r = CredentialResolver::new(None, Some("default".into()), false);
        assert_eq!(r.resolve(&h, &u, None).expect("key"), "req");
        assert_eq!(r.resolve(&HeaderMap::new(), &u, None).expect("key"), "default");

        let r = CredentialResolver::new(Some("  ".into()), None, false);
        let err = r.resolve(&HeaderMap::new(), &u, None).expect_err("missing");
        assert!(matches!(err, GatewayError::Credential(_)));
    }
}
