//! Session identity resolution
//!
//! Derives a stable visitor fingerprint from whatever request signals the
//! routing layer forwards. Resolution is pure and infallible: missing
//! signals only push it down to a weaker fallback.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tally_core::VisitorFingerprint;

const HASH_PREFIX: &str = "fp-";
const HASH_HEX_LEN: usize = 32;
const SESSION_ID_MIN: usize = 8;
const SESSION_ID_MAX: usize = 128;

/// Visitor signals extracted from an inbound request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSignals {
    /// Anonymous session id minted by the client on an earlier visit
    pub anonymous_session_id: Option<String>,
    /// Client address as reported by a trusted proxy
    pub trusted_client_ip: Option<String>,
    /// Raw forwarded-for chain; the first hop is used
    pub forwarded_for: Option<String>,
    /// Client-supplied visitor identifier header
    pub client_visitor_id: Option<String>,
    /// Socket peer address
    pub remote_ip: Option<String>,
    /// User-agent header
    pub user_agent: Option<String>,
    /// Accept-language header
    pub accept_language: Option<String>,
}

/// Which signal produced a fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintSource {
    /// Well-formed anonymous session id, passed through
    SessionId,
    /// Trusted-proxy client address and user agent
    TrustedProxy,
    /// First forwarded-for hop and user agent
    ForwardedFor,
    /// Client-supplied header, taken verbatim
    ClientHeader,
    /// Peer address, user agent and accept-language
    Fallback,
}

/// Fingerprint resolver
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityResolver;

impl IdentityResolver {
    /// Create a resolver
    pub fn new() -> Self {
        Self
    }

    /// Resolve the visitor fingerprint for a request
    pub fn resolve(&self, signals: &RequestSignals) -> VisitorFingerprint {
        self.resolve_with_source(signals).0
    }

    /// Resolve the fingerprint and report which signal produced it
    pub fn resolve_with_source(
        &self,
        signals: &RequestSignals,
    ) -> (VisitorFingerprint, FingerprintSource) {
        let user_agent = present(&signals.user_agent).unwrap_or_default();

        if let Some(session_id) = present(&signals.anonymous_session_id) {
            if is_valid_session_id(session_id) {
                return (
                    VisitorFingerprint::new(session_id),
                    FingerprintSource::SessionId,
                );
            }
        }

        if let Some(ip) = present(&signals.trusted_client_ip) {
            return (
                hashed(&[ip, user_agent]),
                FingerprintSource::TrustedProxy,
            );
        }

        if let Some(ip) = present(&signals.forwarded_for)
            .and_then(|chain| chain.split(',').map(str::trim).find(|hop| !hop.is_empty()))
        {
            return (
                hashed(&[ip, user_agent]),
                FingerprintSource::ForwardedFor,
            );
        }

        if let Some(client_id) = present(&signals.client_visitor_id) {
            return (
                VisitorFingerprint::new(client_id),
                FingerprintSource::ClientHeader,
            );
        }

        let ip = present(&signals.remote_ip).unwrap_or_default();
        let language = present(&signals.accept_language).unwrap_or_default();
        (
            hashed(&[ip, user_agent, language]),
            FingerprintSource::Fallback,
        )
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn is_valid_session_id(candidate: &str) -> bool {
    (SESSION_ID_MIN..=SESSION_ID_MAX).contains(&candidate.len())
        && candidate
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

fn hashed(parts: &[&str]) -> VisitorFingerprint {
    let mut hasher = Sha256::new();
    hasher.update(parts.join(":").as_bytes());
    let digest = hex::encode(hasher.finalize());
    VisitorFingerprint::new(format!("{HASH_PREFIX}{}", &digest[..HASH_HEX_LEN]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals() -> RequestSignals {
        RequestSignals {
            user_agent: Some("Mozilla/5.0".to_string()),
            remote_ip: Some("10.0.0.1".to_string()),
            accept_language: Some("en-US".to_string()),
            ..RequestSignals::default()
        }
    }

    #[test]
    fn valid_session_id_wins() {
        let mut s = signals();
        s.anonymous_session_id = Some("visitor_0123abcd".to_string());
        s.trusted_client_ip = Some("203.0.113.9".to_string());

        let (fp, source) = IdentityResolver::new().resolve_with_source(&s);
        assert_eq!(fp.as_str(), "visitor_0123abcd");
        assert_eq!(source, FingerprintSource::SessionId);
    }

    #[test]
    fn malformed_session_id_is_ignored() {
        let mut s = signals();
        s.anonymous_session_id = Some("short".to_string());
        s.trusted_client_ip = Some("203.0.113.9".to_string());
        assert_eq!(
            IdentityResolver::new().resolve_with_source(&s).1,
            FingerprintSource::TrustedProxy
        );

        s.anonymous_session_id = Some("has spaces in it".to_string());
        assert_eq!(
            IdentityResolver::new().resolve_with_source(&s).1,
            FingerprintSource::TrustedProxy
        );
    }

    #[test]
    fn trusted_proxy_and_forwarded_for_agree_on_same_address() {
        let mut proxied = signals();
        proxied.trusted_client_ip = Some("203.0.113.9".to_string());

        let mut forwarded = signals();
        forwarded.forwarded_for = Some("203.0.113.9, 10.1.1.1".to_string());

        let resolver = IdentityResolver::new();
        let (a, source_a) = resolver.resolve_with_source(&proxied);
        let (b, source_b) = resolver.resolve_with_source(&forwarded);
        assert_eq!(a, b);
        assert_eq!(source_a, FingerprintSource::TrustedProxy);
        assert_eq!(source_b, FingerprintSource::ForwardedFor);
        assert!(a.as_str().starts_with("fp-"));
        assert_eq!(a.as_str().len(), 3 + 32);
    }

    #[test]
    fn client_header_is_taken_verbatim() {
        let mut s = signals();
        s.client_visitor_id = Some("device:42".to_string());
        let (fp, source) = IdentityResolver::new().resolve_with_source(&s);
        assert_eq!(fp.as_str(), "device:42");
        assert_eq!(source, FingerprintSource::ClientHeader);
    }

    #[test]
    fn fallback_depends_on_language() {
        let resolver = IdentityResolver::new();
        let english = resolver.resolve(&signals());
        let mut s = signals();
        s.accept_language = Some("fr-FR".to_string());
        assert_ne!(english, resolver.resolve(&s));
    }

    #[test]
    fn empty_request_still_resolves() {
        let (fp, source) = IdentityResolver::new().resolve_with_source(&RequestSignals::default());
        assert!(fp.as_str().starts_with("fp-"));
        assert_eq!(source, FingerprintSource::Fallback);
    }
}
