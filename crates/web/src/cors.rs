//! Cross-origin resource sharing.
//!
//! A [`CorsPolicy`] is evaluated once per request. Preflights are answered
//! directly with a `204`, disallowed origins with a `403`, and allowed
//! cross-origin requests get the response headers merged in after the
//! handler ran.

use http::header::{HeaderName, HeaderValue};
use http::Method;
use wafer_http::Request;

/// Headers to merge into a response.
pub type HeaderSet = Vec<(HeaderName, HeaderValue)>;

/// What to do with a request, from the CORS standpoint.
pub enum CorsDecision {
    /// Same-origin request, nothing to add.
    NotCors,
    /// Origin not allowed; answer `403` without touching the route.
    Forbidden,
    /// Preflight; answer `204` with these headers.
    Preflight(HeaderSet),
    /// Allowed cross-origin request; merge these headers into the response.
    Allowed(HeaderSet),
}

#[derive(Debug, Clone)]
pub struct CorsPolicy {
    /// Allowed origins; the single entry `"*"` allows any.
    pub allow_origins: Vec<String>,
    pub allow_methods: Vec<Method>,
    /// Request headers allowed in preflight; empty echoes whatever was asked.
    pub allow_headers: Vec<String>,
    pub expose_headers: Vec<String>,
    pub allow_credentials: bool,
    /// Preflight cache lifetime in seconds.
    pub max_age: Option<u64>,
}

impl Default for CorsPolicy {
    fn default() -> Self {
        Self {
            allow_origins: vec!["*".to_string()],
            allow_methods: vec![
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ],
            allow_headers: Vec::new(),
            expose_headers: Vec::new(),
            allow_credentials: false,
            max_age: Some(600),
        }
    }
}

impl CorsPolicy {
    fn wildcard(&self) -> bool {
        self.allow_origins.iter().any(|o| o == "*")
    }

    fn origin_allowed(&self, origin: &str) -> bool {
        self.wildcard() || self.allow_origins.iter().any(|o| o.eq_ignore_ascii_case(origin))
    }

    /// The `Access-Control-Allow-Origin` value plus its companions.
    fn base_headers(&self, origin: &str) -> HeaderSet {
        let mut headers = Vec::new();
        // Credentialed responses must echo the concrete origin.
        let allow_origin = if self.wildcard() && !self.allow_credentials { "*" } else { origin };
        if let Ok(value) = HeaderValue::from_str(allow_origin) {
            headers.push((http::header::ACCESS_CONTROL_ALLOW_ORIGIN, value));
        }
        if allow_origin != "*" {
            headers.push((http::header::VARY, HeaderValue::from_static("Origin")));
        }
        if self.allow_credentials {
            headers
                .push((http::header::ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true")));
        }
        headers
    }

    pub fn evaluate(&self, request: &Request) -> CorsDecision {
        let Some(origin) = request.header("origin") else {
            return CorsDecision::NotCors;
        };
        if !self.origin_allowed(origin) {
            return CorsDecision::Forbidden;
        }

        let requested_method = request.header("access-control-request-method");
        if request.method() == Method::OPTIONS && requested_method.is_some() {
            let mut headers = self.base_headers(origin);

            let methods =
                self.allow_methods.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
            if let Ok(value) = HeaderValue::from_str(&methods) {
                headers.push((http::header::ACCESS_CONTROL_ALLOW_METHODS, value));
            }

            let allow_headers = if self.allow_headers.is_empty() {
                request.header("access-control-request-headers").unwrap_or("").to_string()
            } else {
                self.allow_headers.join(", ")
            };
            if !allow_headers.is_empty() {
                if let Ok(value) = HeaderValue::from_str(&allow_headers) {
                    headers.push((http::header::ACCESS_CONTROL_ALLOW_HEADERS, value));
                }
            }

            if let Some(max_age) = self.max_age {
                if let Ok(value) = HeaderValue::from_str(&max_age.to_string()) {
                    headers.push((http::header::ACCESS_CONTROL_MAX_AGE, value));
                }
            }
            return CorsDecision::Preflight(headers);
        }

        let mut headers = self.base_headers(origin);
        if !self.expose_headers.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&self.expose_headers.join(", ")) {
                headers.push((http::header::ACCESS_CONTROL_EXPOSE_HEADERS, value));
            }
        }
        CorsDecision::Allowed(headers)
    }
}
