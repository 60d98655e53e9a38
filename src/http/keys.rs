//! Client key derivation for rate limiting.
//!
//! A [`KeyExtractor`] decides which bucket a request is charged to. When an
//! extractor yields nothing (or an empty string) the request is keyed by its
//! client IP instead.

use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, Request};
use axum::http::HeaderName;

use crate::error::{GatekeeperError, Result};

/// Header read by the API key policy.
pub const API_KEY_HEADER: &str = "API-Key";

/// Key used when not even a client IP can be determined.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Authenticated caller identity.
///
/// Authentication middleware inserts this into the request extensions; the
/// [`Identity`] policy reads it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity(pub String);

/// Derives a rate limit key from a request.
pub trait KeyExtractor: Send + Sync {
    /// Return the client key, or `None` to fall back to the client IP.
    fn extract(&self, request: &Request) -> Option<String>;
}

/// Key by client IP address.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientIp;

impl KeyExtractor for ClientIp {
    fn extract(&self, request: &Request) -> Option<String> {
        client_ip(request).map(|ip| ip.to_string())
    }
}

/// Key by authenticated identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl KeyExtractor for Identity {
    fn extract(&self, request: &Request) -> Option<String> {
        request
            .extensions()
            .get::<ClientIdentity>()
            .map(|identity| identity.0.clone())
    }
}

/// Key by the value of a request header.
#[derive(Debug, Clone)]
pub struct HeaderKey {
    name: HeaderName,
}

impl HeaderKey {
    /// Key by the header called `name`.
    pub fn new(name: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            GatekeeperError::Config(format!("invalid header name {:?}: {}", name, e))
        })?;
        Ok(Self { name })
    }

    /// Key by the `API-Key` header.
    pub fn api_key() -> Self {
        Self {
            name: HeaderName::from_static("api-key"),
        }
    }

    /// The header being read.
    pub fn name(&self) -> &HeaderName {
        &self.name
    }
}

impl KeyExtractor for HeaderKey {
    fn extract(&self, request: &Request) -> Option<String> {
        request
            .headers()
            .get(&self.name)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim().to_string())
    }
}

/// Key computed by a caller-supplied function.
pub struct CustomKey<F> {
    f: F,
}

impl<F> CustomKey<F>
where
    F: Fn(&Request) -> Option<String> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> KeyExtractor for CustomKey<F>
where
    F: Fn(&Request) -> Option<String> + Send + Sync,
{
    fn extract(&self, request: &Request) -> Option<String> {
        (self.f)(request)
    }
}

impl<F> std::fmt::Debug for CustomKey<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomKey").finish_non_exhaustive()
    }
}

/// Resolve the key a request is charged to.
///
/// Uses the extractor's key if non-empty, then the client IP, then
/// [`UNKNOWN_CLIENT`].
pub fn resolve_key(extractor: &dyn KeyExtractor, request: &Request) -> String {
    extractor
        .extract(request)
        .filter(|key| !key.is_empty())
        .or_else(|| client_ip(request).map(|ip| ip.to_string()))
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// Determine the client IP of a request.
///
/// Checks `X-Forwarded-For` (first address), then `X-Real-IP`, then the peer
/// address recorded by axum's `ConnectInfo`.
pub fn client_ip(request: &Request) -> Option<IpAddr> {
    let headers = request.headers();

    if let Some(forwarded_for) = headers.get("x-forwarded-for") {
        if let Ok(value) = forwarded_for.to_str() {
            if let Some(first) = value.split(',').next() {
                if let Ok(ip) = first.trim().parse() {
                    return Some(ip);
                }
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(value) = real_ip.to_str() {
            if let Ok(ip) = value.trim().parse() {
                return Some(ip);
            }
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request() -> axum::http::request::Builder {
        axum::http::Request::builder().uri("/")
    }

    fn with_peer(mut request: Request, addr: &str) -> Request {
        let addr: SocketAddr = addr.parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        request
    }

    #[test]
    fn test_client_ip_prefers_forwarded_for() {
        let req = request()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .header("x-real-ip", "198.51.100.2")
            .body(Body::empty())
            .unwrap();
        let req = with_peer(req, "127.0.0.1:5000");

        assert_eq!(client_ip(&req), Some("203.0.113.7".parse().unwrap()));
    }

    #[test]
    fn test_client_ip_uses_real_ip_header() {
        let req = request()
            .header("x-real-ip", "198.51.100.2")
            .body(Body::empty())
            .unwrap();

        assert_eq!(client_ip(&req), Some("198.51.100.2".parse().unwrap()));
    }

    #[test]
    fn test_client_ip_skips_malformed_headers() {
        let req = request()
            .header("x-forwarded-for", "not-an-ip")
            .body(Body::empty())
            .unwrap();
        let req = with_peer(req, "192.0.2.10:443");

        assert_eq!(client_ip(&req), Some("192.0.2.10".parse().unwrap()));
    }

    #[test]
    fn test_client_ip_absent() {
        let req = request().body(Body::empty()).unwrap();
        assert_eq!(client_ip(&req), None);
        assert_eq!(resolve_key(&ClientIp, &req), UNKNOWN_CLIENT);
    }

    #[test]
    fn test_identity_key() {
        let mut req = request().body(Body::empty()).unwrap();
        req.extensions_mut()
            .insert(ClientIdentity("user-42".to_string()));

        assert_eq!(resolve_key(&Identity, &req), "user-42");
    }

    #[test]
    fn test_identity_falls_back_to_ip() {
        let req = with_peer(request().body(Body::empty()).unwrap(), "192.0.2.1:80");
        assert_eq!(resolve_key(&Identity, &req), "192.0.2.1");
    }

    #[test]
    fn test_header_key() {
        let req = request()
            .header("API-Key", "secret-123")
            .body(Body::empty())
            .unwrap();

        assert_eq!(resolve_key(&HeaderKey::api_key(), &req), "secret-123");
    }

    #[test]
    fn test_api_key_header_name() {
        let by_name = HeaderKey::new(API_KEY_HEADER).unwrap();
        assert_eq!(HeaderKey::api_key().name(), by_name.name());
    }

    #[test]
    fn test_empty_header_falls_back_to_ip() {
        let req = request()
            .header("X-Tenant-ID", "")
            .header("x-real-ip", "198.51.100.9")
            .body(Body::empty())
            .unwrap();
        let extractor = HeaderKey::new("X-Tenant-ID").unwrap();

        assert_eq!(extractor.name().as_str(), "x-tenant-id");
        assert_eq!(resolve_key(&extractor, &req), "198.51.100.9");
    }

    #[test]
    fn test_invalid_header_name_rejected() {
        assert!(matches!(
            HeaderKey::new("bad header"),
            Err(GatekeeperError::Config(_))
        ));
    }

    #[test]
    fn test_custom_key() {
        let extractor = CustomKey::new(|req: &Request| {
            req.uri().path().strip_prefix("/tenants/").map(str::to_string)
        });

        let req = axum::http::Request::builder()
            .uri("/tenants/acme")
            .body(Body::empty())
            .unwrap();
        assert_eq!(resolve_key(&extractor, &req), "acme");

        let other = with_peer(request().body(Body::empty()).unwrap(), "192.0.2.5:80");
        assert_eq!(resolve_key(&extractor, &other), "192.0.2.5");
    }
}
