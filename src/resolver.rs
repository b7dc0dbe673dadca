//! URL resolver (C3): parses `ar://` input and builds gateway-addressed URLs.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::error::{Result, WayfinderError};
use crate::gateway::Gateway;
use crate::identifier::{ArnsName, Identifier, TxId};

/// Routing hint derived from a parsed `ar://` identifier, handed to a
/// [`crate::routing::RoutingStrategy`].
#[derive(Debug, Clone, Default)]
pub struct RoutingHint {
    /// Path to request on the selected gateway (always starts with `/`).
    pub path: String,
    /// Subdomain to prepend to the gateway host, empty if none.
    pub subdomain: String,
}

/// The parsed result of an `ar://` input: an optional identifier plus a hint.
#[derive(Debug, Clone)]
pub struct ParsedArUrl {
    /// `None` for gateway-direct (`ar:///...`) or unrecognized-form inputs.
    pub identifier: Option<Identifier>,
    /// Routing hint to pass to a [`crate::routing::RoutingStrategy`].
    pub hint: RoutingHint,
}

static TXID_HEAD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{43}$").unwrap());
static NAME_HEAD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9_-]{1,51}$").unwrap());

/// Rewrite a legacy `https://...arweave.net/...` or `...arweave.dev/...` URL
/// into an `ar://<pathname-without-leading-slash>` form, for backwards
/// compatibility with callers still passing concrete gateway URLs.
pub fn normalize_legacy_gateway_url(input: &str) -> Option<String> {
    let parsed = Url::parse(input).ok()?;
    let host = parsed.host_str()?;
    if host.contains("arweave.net") || host.contains("arweave.dev") {
        let path = parsed.path().trim_start_matches('/');
        let mut rewritten = format!("ar://{path}");
        if let Some(q) = parsed.query() {
            rewritten.push('?');
            rewritten.push_str(q);
        }
        if let Some(f) = parsed.fragment() {
            rewritten.push('#');
            rewritten.push_str(f);
        }
        Some(rewritten)
    } else {
        None
    }
}

/// Parse an `ar://<rest>` input per spec.md §4.3 rules 1-5.
pub fn parse_ar_url(input: &str) -> Result<ParsedArUrl> {
    let rest = input.strip_prefix("ar://").ok_or_else(|| WayfinderError::ParseError {
        input: input.to_string(),
        reason: "missing ar:// scheme".into(),
    })?;

    // Rule 1: gateway-direct.
    if rest.starts_with('/') {
        return Ok(ParsedArUrl {
            identifier: None,
            hint: RoutingHint {
                subdomain: String::new(),
                path: rest.to_string(),
            },
        });
    }

    // Rule 2: split at first '/'.
    let (head, tail) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };

    // Rule 3: transaction id.
    if TXID_HEAD_RE.is_match(head) {
        let txid = TxId::parse(head)?;
        let subdomain = txid.sandbox_subdomain();
        return Ok(ParsedArUrl {
            identifier: Some(Identifier::TxId(txid)),
            hint: RoutingHint {
                subdomain,
                path: format!("/{head}{tail}"),
            },
        });
    }

    // Rule 4: ArNS name (case-insensitive).
    let lowered = head.to_lowercase();
    if NAME_HEAD_RE.is_match(&lowered) {
        let name = ArnsName::parse(&lowered)?;
        let path = if tail.is_empty() { "/".to_string() } else { tail.to_string() };
        return Ok(ParsedArUrl {
            identifier: Some(Identifier::ArnsName(name)),
            hint: RoutingHint {
                subdomain: lowered,
                path,
            },
        });
    }

    // Rule 5: unknown form.
    Ok(ParsedArUrl {
        identifier: None,
        hint: RoutingHint {
            subdomain: String::new(),
            path: format!("/{rest}"),
        },
    })
}

/// Build the concrete gateway URL for a [`RoutingHint`] against a selected
/// [`Gateway`], preserving query and fragment from the hint's path.
pub fn build_gateway_url(gateway: &Gateway, hint: &RoutingHint) -> Result<Url> {
    let host = if hint.subdomain.is_empty() {
        gateway.host.clone()
    } else {
        format!("{}.{}", hint.subdomain, gateway.host)
    };

    let authority = match gateway.port {
        Some(port) => format!("{host}:{port}"),
        None => host,
    };

    let raw = format!("{}://{}{}", gateway.scheme, authority, hint.path);
    Url::parse(&raw).map_err(|e| WayfinderError::ParseError {
        input: raw,
        reason: format!("failed to build gateway url: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Gateway;

    fn gw(host: &str) -> Gateway {
        Gateway {
            scheme: "https".into(),
            host: host.into(),
            port: None,
        }
    }

    #[test]
    fn scenario_1_transaction_id_routing() {
        // Note: this head is not valid base64url-decodable to exactly 32
        // bytes in every position, so we use a real 43-char b64url txid.
        let raw = [3u8; 32];
        let txid = TxId::parse(&data_encoding::BASE64URL_NOPAD.encode(&raw)).unwrap();
        let input = format!("ar://{txid}");
        let parsed = parse_ar_url(&input).unwrap();
        let url = build_gateway_url(&gw("example.net"), &parsed.hint).unwrap();
        assert!(url.host_str().unwrap().ends_with("example.net"));
        assert!(url.host_str().unwrap().starts_with(&txid.sandbox_subdomain()));
        assert_eq!(url.path(), format!("/{txid}"));
    }

    #[test]
    fn scenario_2_arns_routing() {
        let parsed = parse_ar_url("ar://ardrive/settings?a=1").unwrap();
        let url = build_gateway_url(&gw("example.net"), &parsed.hint).unwrap();
        assert_eq!(url.as_str(), "https://ardrive.example.net/settings?a=1");
    }

    #[test]
    fn scenario_3_gateway_direct() {
        let parsed = parse_ar_url("ar:///ar-io/info").unwrap();
        assert!(parsed.identifier.is_none());
        let url = build_gateway_url(&gw("x.y"), &parsed.hint).unwrap();
        assert_eq!(url.as_str(), "https://x.y/ar-io/info");
    }

    #[test]
    fn unknown_form_falls_through_with_empty_subdomain() {
        let parsed = parse_ar_url("ar://!!!not-valid").unwrap();
        assert!(parsed.identifier.is_none());
        assert_eq!(parsed.hint.subdomain, "");
        assert_eq!(parsed.hint.path, "/!!!not-valid");
    }

    #[test]
    fn legacy_arweave_net_url_is_rewritten() {
        let rewritten = normalize_legacy_gateway_url("https://arweave.net/abc123?x=1#frag").unwrap();
        assert_eq!(rewritten, "ar://abc123?x=1#frag");
    }

    #[test]
    fn non_legacy_url_is_not_rewritten() {
        assert!(normalize_legacy_gateway_url("https://example.com/abc").is_none());
    }

    #[test]
    fn build_gateway_url_includes_explicit_port() {
        let gateway = Gateway {
            scheme: "http".into(),
            host: "localhost".into(),
            port: Some(1984),
        };
        let parsed = parse_ar_url("ar://ardrive").unwrap();
        let url = build_gateway_url(&gateway, &parsed.hint).unwrap();
        assert_eq!(url.as_str(), "http://ardrive.localhost:1984/");
    }
}
