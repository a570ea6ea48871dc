//! Endpoint normalization: the only place that knows how to turn a
//! resolved provider's raw endpoint into the exact URL to POST a JSON-RPC
//! request to.
//!
//! Every function here is pure and total: no I/O, and no input (including
//! garbage that isn't a URL at all) may panic. Orbs' dynamic discovery step
//! is a separate async call made by the health checker before normalization
//! ever sees the discovered URL.

use crate::config::ProviderType;

/// Normalize `raw_url` for `provider_type`. `has_api_key` only affects
/// OnFinality (`/rpc` vs `/public`); every other family ignores it.
pub fn normalize_url(provider_type: ProviderType, raw_url: &str, has_api_key: bool) -> String {
    let trimmed = strip_trailing_slash(raw_url);
    match provider_type {
        ProviderType::Onfinality => normalize_onfinality(&trimmed, has_api_key),
        ProviderType::Orbs => normalize_orbs(&trimmed),
        ProviderType::Custom | ProviderType::Ankr | ProviderType::Tonhub => {
            normalize_generic(&trimmed)
        }
        ProviderType::Toncenter
        | ProviderType::Chainstack
        | ProviderType::Quicknode
        | ProviderType::Getblock
        | ProviderType::Tatum => normalize_forced(&trimmed),
    }
}

fn strip_trailing_slash(url: &str) -> String {
    if let Some(stripped) = url.strip_suffix('/') {
        stripped.to_string()
    } else {
        url.to_string()
    }
}

fn ends_with_ci(s: &str, suffix: &str) -> bool {
    s.to_ascii_lowercase().ends_with(&suffix.to_ascii_lowercase())
}

fn cut_suffix<'a>(s: &'a str, suffix_len: usize) -> &'a str {
    &s[..s.len() - suffix_len]
}

/// Families whose shape always gets a `/jsonRPC` path appended (or
/// rewritten) regardless of what's already there: toncenter, chainstack,
/// quicknode, getblock, tatum, and Orbs' non-`/api/v2` fallback branch.
fn normalize_forced(url: &str) -> String {
    if ends_with_ci(url, "/api/v3") {
        return format!("{}/api/v2/jsonRPC", cut_suffix(url, "/api/v3".len()));
    }
    if ends_with_ci(url, "/jsonrpc") {
        return format!("{}/jsonRPC", cut_suffix(url, "/jsonrpc".len()));
    }
    format!("{url}/jsonRPC")
}

fn normalize_orbs(url: &str) -> String {
    if ends_with_ci(url, "/api/v2") {
        url.to_string()
    } else {
        normalize_forced(url)
    }
}

fn normalize_onfinality(url: &str, has_api_key: bool) -> String {
    let no_query = url.split('?').next().unwrap_or(url);
    let trimmed = strip_trailing_slash(no_query);
    let suffix = if has_api_key { "/rpc" } else { "/public" };
    if ends_with_ci(&trimmed, suffix) {
        trimmed
    } else {
        format!("{trimmed}{suffix}")
    }
}

/// Conservative rule for `custom`/unknown/Ankr/Tonhub: only append
/// `/jsonRPC` when there is no path at all; an endpoint with an opinion
/// about its own path is left alone.
fn normalize_generic(url: &str) -> String {
    if ends_with_ci(url, "/api/v3") {
        return format!("{}/api/v2/jsonRPC", cut_suffix(url, "/api/v3".len()));
    }
    if ends_with_ci(url, "/jsonrpc") {
        return format!("{}/jsonRPC", cut_suffix(url, "/jsonrpc".len()));
    }
    let path = path_of(url);
    if path.is_empty() || path == "/" {
        format!("{url}/jsonRPC")
    } else {
        url.to_string()
    }
}

/// Best-effort path extraction without a real URL parser (stays total on
/// non-URL garbage): everything after the origin, found by skipping a
/// `scheme://` prefix if present and taking the rest from the first `/`.
fn path_of(url: &str) -> &str {
    let after_scheme = match url.find("://") {
        Some(idx) => &url[idx + 3..],
        None => url,
    };
    match after_scheme.find('/') {
        Some(idx) => &after_scheme[idx..],
        None => "",
    }
}

/// Header credentials for the given family, built from
/// an optional API key materialized by the registry.
pub fn build_headers(provider_type: ProviderType, api_key: Option<&str>) -> Vec<(&'static str, String)> {
    match provider_type {
        ProviderType::Getblock => api_key
            .map(|k| vec![("x-api-key", k.to_string())])
            .unwrap_or_default(),
        ProviderType::Tatum => api_key
            .map(|k| vec![("x-api-key", k.to_string())])
            .unwrap_or_default(),
        ProviderType::Onfinality => api_key
            .map(|k| vec![("apikey", k.to_string())])
            .unwrap_or_default(),
        ProviderType::Custom | ProviderType::Ankr | ProviderType::Tonhub => api_key
            .map(|k| vec![("x-api-key", k.to_string())])
            .unwrap_or_default(),
        ProviderType::Toncenter | ProviderType::Chainstack | ProviderType::Quicknode | ProviderType::Orbs => {
            vec![]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toncenter_appends_jsonrpc() {
        assert_eq!(
            normalize_url(ProviderType::Toncenter, "https://toncenter.com/api/v2", false),
            "https://toncenter.com/api/v2/jsonRPC"
        );
    }

    #[test]
    fn toncenter_strips_trailing_slash_first() {
        assert_eq!(
            normalize_url(ProviderType::Toncenter, "https://toncenter.com/api/v2/", false),
            "https://toncenter.com/api/v2/jsonRPC"
        );
    }

    #[test]
    fn v3_is_rewritten_to_v2_jsonrpc() {
        assert_eq!(
            normalize_url(ProviderType::Chainstack, "https://x.example.com/api/v3", false),
            "https://x.example.com/api/v2/jsonRPC"
        );
    }

    #[test]
    fn existing_jsonrpc_is_canonicalized_case_only() {
        assert_eq!(
            normalize_url(ProviderType::Toncenter, "https://toncenter.com/api/v2/JsonRpc", false),
            "https://toncenter.com/api/v2/jsonRPC"
        );
    }

    #[test]
    fn quicknode_appends_to_root() {
        assert_eq!(
            normalize_url(ProviderType::Quicknode, "https://abc123.ton.quiknode.pro", false),
            "https://abc123.ton.quiknode.pro/jsonRPC"
        );
    }

    #[test]
    fn onfinality_uses_rpc_when_key_present() {
        assert_eq!(
            normalize_url(ProviderType::Onfinality, "https://ton.api.onfinality.io/ws?apikey=abc", true),
            "https://ton.api.onfinality.io/ws/rpc"
        );
    }

    #[test]
    fn onfinality_uses_public_without_key() {
        assert_eq!(
            normalize_url(ProviderType::Onfinality, "https://ton.api.onfinality.io", false),
            "https://ton.api.onfinality.io/public"
        );
    }

    #[test]
    fn onfinality_strips_query_params() {
        assert_eq!(
            normalize_url(ProviderType::Onfinality, "https://x.onfinality.io/rpc?foo=bar", true),
            "https://x.onfinality.io/rpc"
        );
    }

    #[test]
    fn orbs_keeps_discovered_api_v2_url_as_is() {
        assert_eq!(
            normalize_url(ProviderType::Orbs, "https://node.orbs.network/api/v2", false),
            "https://node.orbs.network/api/v2"
        );
    }

    #[test]
    fn orbs_applies_forced_rule_otherwise() {
        assert_eq!(
            normalize_url(ProviderType::Orbs, "https://node.orbs.network", false),
            "https://node.orbs.network/jsonRPC"
        );
    }

    #[test]
    fn custom_with_empty_path_gets_jsonrpc() {
        assert_eq!(
            normalize_url(ProviderType::Custom, "https://my.proxy", false),
            "https://my.proxy/jsonRPC"
        );
        assert_eq!(
            normalize_url(ProviderType::Custom, "https://my.proxy/", false),
            "https://my.proxy/jsonRPC"
        );
    }

    #[test]
    fn custom_with_opinionated_path_is_untouched() {
        assert_eq!(
            normalize_url(ProviderType::Custom, "https://my.proxy/api/v2/jsonRPC", false),
            "https://my.proxy/api/v2/jsonRPC"
        );
    }

    #[test]
    fn ankr_and_tonhub_use_the_generic_rule() {
        assert_eq!(
            normalize_url(ProviderType::Ankr, "https://rpc.ankr.com/ton", false),
            "https://rpc.ankr.com/ton"
        );
        assert_eq!(
            normalize_url(ProviderType::Tonhub, "https://mainnet-v4.tonhub.com", false),
            "https://mainnet-v4.tonhub.com/jsonRPC"
        );
    }

    #[test]
    fn normalization_is_idempotent_across_all_families() {
        let inputs = [
            (ProviderType::Toncenter, "https://toncenter.com/api/v2", false),
            (ProviderType::Chainstack, "https://x.example.com/abc/api/v3", false),
            (ProviderType::Quicknode, "https://abc.quiknode.pro/", false),
            (ProviderType::Getblock, "https://go.getblock.io/abc", false),
            (ProviderType::Tatum, "https://ton-mainnet.gateway.tatum.io", false),
            (ProviderType::Onfinality, "https://ton.api.onfinality.io/ws?x=1", true),
            (ProviderType::Onfinality, "https://ton.api.onfinality.io", false),
            (ProviderType::Orbs, "https://node.orbs.network", false),
            (ProviderType::Orbs, "https://node.orbs.network/api/v2", false),
            (ProviderType::Custom, "https://my.proxy", false),
            (ProviderType::Custom, "not a url at all", false),
            (ProviderType::Ankr, "", false),
        ];
        for (pt, url, has_key) in inputs {
            let once = normalize_url(pt, url, has_key);
            let twice = normalize_url(pt, &once, has_key);
            assert_eq!(once, twice, "not idempotent for {pt:?} {url:?}");
        }
    }

    #[test]
    fn normalization_never_panics_on_garbage_input() {
        let garbage = ["", "/", "://", "日本語", "\u{0}", "   ", "https://", "a/b/c/d/e"];
        for pt in [
            ProviderType::Toncenter,
            ProviderType::Chainstack,
            ProviderType::Quicknode,
            ProviderType::Getblock,
            ProviderType::Tatum,
            ProviderType::Onfinality,
            ProviderType::Orbs,
            ProviderType::Custom,
            ProviderType::Ankr,
            ProviderType::Tonhub,
        ] {
            for input in garbage {
                let _ = normalize_url(pt, input, true);
                let _ = normalize_url(pt, input, false);
            }
        }
    }
}
