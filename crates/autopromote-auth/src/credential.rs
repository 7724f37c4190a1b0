//! Credential and caller metadata extraction.
//!
//! Nothing here has side effects; the gateway decides what to do with the
//! values.

use axum::extract::Query;
use axum::http::{header, HeaderMap, Uri};
use ipnetwork::{IpNetwork, IpNetworkError};
use serde::Serialize;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

/// Query parameters checked for a credential, in order.
pub const CREDENTIAL_QUERY_PARAMS: [&str; 3] = ["id_token", "idToken", "token"];

const BEARER_PREFIX: &str = "Bearer ";

/// Number of leading characters of a credential that may appear in logs.
const LOGGED_PREFIX_CHARS: usize = 6;

/// Pull a bearer credential from the request.
///
/// Precedence:
/// 1. `Authorization` header with the `Bearer ` prefix stripped
/// 2. the raw `Authorization` header value when it has no `Bearer ` prefix
/// 3. query parameters `id_token`, `idToken`, `token`
///
/// Empty values count as absent.
pub fn extract_credential(
    headers: &HeaderMap,
    query: &HashMap<String, String>,
) -> Option<String> {
    let from_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|value| value.strip_prefix(BEARER_PREFIX).unwrap_or(value).trim())
        .filter(|value| !value.is_empty());

    if let Some(credential) = from_header {
        return Some(credential.to_string());
    }

    CREDENTIAL_QUERY_PARAMS
        .iter()
        .filter_map(|name| query.get(*name))
        .map(|value| value.trim())
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

/// Decode the query string of a URI. Unparseable queries yield no parameters.
pub fn query_params(uri: &Uri) -> HashMap<String, String> {
    Query::<HashMap<String, String>>::try_from_uri(uri)
        .map(|Query(params)| params)
        .unwrap_or_default()
}

/// Reverse proxies whose forwarding headers are believed.
///
/// Parsed from a comma-separated list of addresses or CIDR blocks. A bare
/// address is a single-host network.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrustedProxies(Vec<IpNetwork>);

impl TrustedProxies {
    pub fn parse(raw: &str) -> Result<Self, IpNetworkError> {
        raw.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::parse::<IpNetwork>)
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        self.0.iter().any(|network| network.contains(ip))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Network address of the caller.
///
/// The socket peer, unless the peer is a trusted proxy: then the first entry
/// of `X-Forwarded-For`, then `X-Real-IP`. Header values that are not IP
/// addresses are ignored. Without a peer the address is `"unknown"`.
pub fn client_address(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted: &TrustedProxies,
) -> String {
    let Some(peer) = peer.map(|addr| addr.ip()) else {
        return "unknown".to_string();
    };

    if !trusted.contains(peer) {
        return peer.to_string();
    }

    let header_ip = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
    };

    header_ip("x-forwarded-for")
        .or_else(|| header_ip("x-real-ip"))
        .unwrap_or(peer)
        .to_string()
}

/// `Origin` header, falling back to `Referer`.
pub fn request_origin(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::ORIGIN)
        .or_else(|| headers.get(header::REFERER))
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Sanitized view of a credential that is safe to log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CredentialInfo {
    pub present: bool,
    pub length: usize,
    pub prefix: String,
}

impl CredentialInfo {
    pub fn of(credential: Option<&str>) -> Self {
        match credential {
            Some(value) => Self {
                present: true,
                length: value.chars().count(),
                prefix: value.chars().take(LOGGED_PREFIX_CHARS).collect(),
            },
            None => Self::default(),
        }
    }
}
