//! Version discovery for recipe artifacts.
//!
//! Each [`VersionStrategy`] produces a version string or fails; failures fall
//! back to the source's `fallback` when one is configured. Cancellation is
//! never masked by a fallback.

use std::cmp::Ordering;
use regex::Regex;
use semver::{Version, VersionReq};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::http::HttpClient;
use crate::recipe::{VersionSource, VersionStrategy};

#[derive(Debug, Deserialize)]
struct GithubTag {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GithubRelease {
    tag_name: String,
    #[serde(default)]
    prerelease: bool,
}

/// Resolves `source` to a concrete version string.
pub fn resolve_version(
    http: &HttpClient,
    source: &VersionSource,
    cancel: &CancelToken,
) -> Result<String> {
    let fallback = source
        .fallback
        .as_deref()
        .map(str::trim)
        .filter(|f| !f.is_empty());
    let result = match &source.strategy {
        VersionStrategy::Static { value } => static_version(value),
        VersionStrategy::GithubRelease {
            repo,
            prerelease,
            constraint,
        } => github_release(http, repo, *prerelease, constraint, cancel),
        VersionStrategy::GithubTag { repo } => github_tag(http, repo, cancel),
        VersionStrategy::HttpJson { url, selector } => http_json(http, url, selector, cancel),
        VersionStrategy::Regex { url, pattern } => http_regex(http, url, pattern, cancel),
        VersionStrategy::Unsupported { kind, .. } => {
            Err(Error::Config(format!("unsupported version source: {kind:?}")))
        }
    };
    match result {
        Ok(version) => {
            debug!(strategy = source.strategy.type_name(), %version, "resolved version");
            Ok(version)
        }
        Err(e) if e.is_cancelled() => Err(e),
        Err(e) => match fallback {
            Some(fallback) => {
                warn!(
                    strategy = source.strategy.type_name(),
                    error = %e,
                    %fallback,
                    "version discovery failed, using fallback"
                );
                Ok(fallback.to_string())
            }
            None => Err(e),
        },
    }
}

fn static_version(value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::Config("static version is empty".into()));
    }
    Ok(value.to_string())
}

fn require<'a>(strategy: &str, field: &str, value: &'a str) -> Result<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::Config(format!("{strategy}: {field} missing")));
    }
    Ok(value)
}

fn strip_v(tag: &str) -> &str {
    let tag = tag.trim();
    tag.strip_prefix('v').unwrap_or(tag)
}

fn github_release(
    http: &HttpClient,
    repo: &str,
    prerelease: bool,
    constraint: &str,
    cancel: &CancelToken,
) -> Result<String> {
    let repo = require("githubRelease", "repo", repo)?;
    let constraint = constraint.trim();

    if !prerelease && constraint.is_empty() {
        let release: GithubRelease =
            http.github_json(&format!("/repos/{repo}/releases/latest"), cancel)?;
        let tag = strip_v(&release.tag_name);
        if tag.is_empty() {
            return Err(Error::Format(format!("githubRelease: {repo} latest release has no tag")));
        }
        return Ok(tag.to_string());
    }

    let req = if constraint.is_empty() {
        None
    } else {
        Some(VersionReq::parse(constraint).map_err(|e| {
            Error::Config(format!("githubRelease: invalid constraint {constraint:?}: {e}"))
        })?)
    };

    let releases: Vec<GithubRelease> =
        http.github_json(&format!("/repos/{repo}/releases?per_page=100"), cancel)?;
    // The API lists newest first; the first compatible entry wins.
    releases
        .iter()
        .filter(|r| prerelease || !r.prerelease)
        .map(|r| strip_v(&r.tag_name))
        .filter(|tag| !tag.is_empty())
        .find(|tag| match &req {
            None => true,
            Some(req) => Version::parse(tag).is_ok_and(|v| req.matches(&v)),
        })
        .map(str::to_string)
        .ok_or_else(|| Error::Format(format!("githubRelease: no matching releases for {repo}")))
}

/// Parses an exact `major.minor.patch` version with no suffixes. Leading
/// zeros are accepted, so `1.02.0` reads as `(1, 2, 0)`.
pub fn parse_triple(version: &str) -> Option<(u64, u64, u64)> {
    let mut parts = version.split('.').map(|part| {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            None
        } else {
            part.parse::<u64>().ok()
        }
    });
    let triple = (parts.next()??, parts.next()??, parts.next()??);
    match parts.next() {
        None => Some(triple),
        Some(_) => None,
    }
}

/// Picks the numerically highest `x.y.z` tag, else the first tag verbatim.
pub fn select_tag<'a, I>(tags: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let tags: Vec<&str> = tags
        .into_iter()
        .map(strip_v)
        .filter(|t| !t.is_empty())
        .collect();
    let best = tags
        .iter()
        .filter_map(|t| parse_triple(t).map(|v| (v, *t)))
        .fold(None::<((u64, u64, u64), &str)>, |best, cur| match best {
            Some(b) if b.0.cmp(&cur.0) != Ordering::Less => Some(b),
            _ => Some(cur),
        });
    best.map(|(_, t)| t.to_string())
        .or_else(|| tags.first().map(|t| t.to_string()))
}

fn github_tag(http: &HttpClient, repo: &str, cancel: &CancelToken) -> Result<String> {
    let repo = require("githubTag", "repo", repo)?;
    let tags: Vec<GithubTag> = http.github_json(&format!("/repos/{repo}/tags?per_page=100"), cancel)?;
    select_tag(tags.iter().map(|t| t.name.as_str()))
        .ok_or_else(|| Error::Format(format!("githubTag: no tags found for {repo}")))
}

/// Applies `pattern` to `body`: the `version` group, else group 1, else the
/// whole match.
pub fn extract_with_regex(pattern: &str, body: &str) -> Result<String> {
    let re = Regex::new(pattern)
        .map_err(|e| Error::Config(format!("regex: invalid pattern: {e}")))?;
    let caps = re
        .captures(body)
        .ok_or_else(|| Error::Format("regex: no match".into()))?;
    if let Some(m) = caps.name("version") {
        let v = m.as_str().trim();
        if !v.is_empty() {
            return Ok(v.to_string());
        }
    }
    let m = caps.get(1).or_else(|| caps.get(0));
    Ok(m.map(|m| m.as_str().trim().to_string()).unwrap_or_default())
}

fn http_regex(http: &HttpClient, url: &str, pattern: &str, cancel: &CancelToken) -> Result<String> {
    let url = require("regex", "url", url)?;
    let pattern = require("regex", "pattern", pattern)?;
    // Reject a bad pattern before any request is made.
    Regex::new(pattern).map_err(|e| Error::Config(format!("regex: invalid pattern: {e}")))?;
    let body = http.get_text(url, cancel)?;
    extract_with_regex(pattern, &body)
}

/// Walks a `$.a.b[0].c` selector through a JSON document.
pub fn select_json<'a>(doc: &'a Value, selector: &str) -> Result<&'a Value> {
    let path = selector.trim();
    let path = path.strip_prefix('$').unwrap_or(path);
    let path = path.strip_prefix('.').unwrap_or(path);
    let mut current = doc;
    if path.is_empty() {
        return Ok(current);
    }
    for segment in path.split('.') {
        let (key, indexes) = match segment.find('[') {
            Some(pos) => (&segment[..pos], &segment[pos..]),
            None => (segment, ""),
        };
        if !key.is_empty() {
            current = current
                .get(key)
                .ok_or_else(|| Error::Format(format!("httpJson: {selector:?}: no key {key:?}")))?;
        }
        let mut rest = indexes;
        while let Some(open) = rest.strip_prefix('[') {
            let close = open
                .find(']')
                .ok_or_else(|| Error::Config(format!("httpJson: malformed selector {selector:?}")))?;
            let index: usize = open[..close]
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("httpJson: bad index in {selector:?}")))?;
            current = current
                .get(index)
                .ok_or_else(|| Error::Format(format!("httpJson: {selector:?}: no index {index}")))?;
            rest = &open[close + 1..];
        }
        if !rest.is_empty() {
            return Err(Error::Config(format!("httpJson: malformed selector {selector:?}")));
        }
    }
    Ok(current)
}

fn http_json(http: &HttpClient, url: &str, selector: &str, cancel: &CancelToken) -> Result<String> {
    let url = require("httpJson", "url", url)?;
    let selector = require("httpJson", "selector", selector)?;
    let doc: Value = http.get_json(url, cancel)?;
    let raw = match select_json(&doc, selector)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        other => {
            return Err(Error::Format(format!(
                "httpJson: {selector:?} selects a non-scalar value: {other}"
            )));
        }
    };
    let version = match raw.strip_prefix('v') {
        Some(rest) if rest.starts_with(|c: char| c.is_ascii_digit()) => rest.to_string(),
        _ => raw,
    };
    if version.is_empty() {
        return Err(Error::Format(format!("httpJson: {selector:?} is empty")));
    }
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::blocking;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source(strategy: VersionStrategy, fallback: Option<&str>) -> VersionSource {
        VersionSource {
            fallback: fallback.map(str::to_string),
            strategy,
        }
    }

    fn offline() -> HttpClient {
        // Nothing listens on port 9; any request fails fast.
        HttpClient::new().unwrap().with_github_api("http://127.0.0.1:9")
    }

    #[test]
    fn test_static_value_then_fallback() {
        let http = offline();
        let cancel = CancelToken::new();
        let s = source(VersionStrategy::Static { value: "2.3.1".into() }, Some("1.0.0"));
        assert_eq!(resolve_version(&http, &s, &cancel).unwrap(), "2.3.1");
        let s = source(VersionStrategy::Static { value: "".into() }, Some("1.0.0"));
        assert_eq!(resolve_version(&http, &s, &cancel).unwrap(), "1.0.0");
        let s = source(VersionStrategy::Static { value: "".into() }, None);
        assert!(matches!(resolve_version(&http, &s, &cancel), Err(Error::Config(_))));
    }

    #[test]
    fn test_select_tag_numeric_not_lexicographic() {
        assert_eq!(select_tag(["v1.2.0", "v1.10.0", "v1.3.0"]).as_deref(), Some("1.10.0"));
    }

    #[test]
    fn test_select_tag_ignores_non_triples() {
        assert_eq!(select_tag(["v2.0.0-rc1", "v1.4.2", "v1.4"]).as_deref(), Some("1.4.2"));
        assert_eq!(select_tag(["nightly", "latest"]).as_deref(), Some("nightly"));
        assert_eq!(select_tag(["vnext"]).as_deref(), Some("next"));
        assert_eq!(select_tag(Vec::<&str>::new()), None);
    }

    #[test]
    fn test_parse_triple_accepts_leading_zeros() {
        assert_eq!(parse_triple("1.02.0"), Some((1, 2, 0)));
        assert_eq!(parse_triple("01.2.003"), Some((1, 2, 3)));
        assert_eq!(parse_triple("1.2.0-rc1"), None);
        assert_eq!(parse_triple("1.2"), None);
        assert_eq!(parse_triple("1.2.3.4"), None);
        assert_eq!(parse_triple("1..3"), None);
        assert_eq!(parse_triple("+1.2.3"), None);
        assert_eq!(select_tag(["v1.9.0", "v1.010.0", "v1.3.0"]).as_deref(), Some("1.010.0"));
    }

    #[test]
    fn test_unsupported_source_uses_fallback() {
        let http = offline();
        let cancel = CancelToken::new();
        let unsupported = |kind: &str| VersionStrategy::Unsupported {
            kind: kind.into(),
            value: "".into(),
        };
        let s = source(unsupported(""), Some("0.4.0"));
        assert_eq!(resolve_version(&http, &s, &cancel).unwrap(), "0.4.0");
        let s = source(unsupported("gitlabRelease"), None);
        let err = resolve_version(&http, &s, &cancel).unwrap_err();
        assert!(err.to_string().contains("unsupported version source"), "{err}");
        assert!(err.to_string().contains("gitlabRelease"), "{err}");
    }

    #[test]
    fn test_extract_with_regex() {
        let body = "...version-4.5.0...";
        assert_eq!(extract_with_regex(r"version-(?P<version>[0-9.]+)", body).unwrap(), "4.5.0");
        assert_eq!(extract_with_regex(r"version-([0-9.]+)\.\.\.", body).unwrap(), "4.5.0");
        assert_eq!(extract_with_regex(r"[0-9]+\.[0-9]+", body).unwrap(), "4.5");
        assert!(matches!(extract_with_regex(r"release-(\d+)", body), Err(Error::Format(_))));
        assert!(matches!(extract_with_regex(r"(unclosed", body), Err(Error::Config(_))));
    }

    #[test]
    fn test_select_json() {
        let doc = json!({"tag_name": "v1.2.3", "releases": [{"version": "9.9.9"}], "n": 3});
        assert_eq!(*select_json(&doc, "$.tag_name").unwrap(), "v1.2.3");
        assert_eq!(*select_json(&doc, "releases[0].version").unwrap(), "9.9.9");
        assert_eq!(*select_json(&doc, "$.n").unwrap(), 3);
        assert!(select_json(&doc, "$.missing").is_err());
        assert!(select_json(&doc, "$.releases[4]").is_err());
        assert!(select_json(&doc, "$.releases[x]").is_err());
    }

    #[test]
    fn test_incomplete_fields_fall_back() {
        let http = offline();
        let cancel = CancelToken::new();
        let s = source(VersionStrategy::GithubTag { repo: " ".into() }, Some("0.9.0"));
        assert_eq!(resolve_version(&http, &s, &cancel).unwrap(), "0.9.0");
        let s = source(VersionStrategy::Regex { url: "".into(), pattern: "x".into() }, None);
        assert!(matches!(resolve_version(&http, &s, &cancel), Err(Error::Config(_))));
    }

    #[test]
    fn test_network_failure_falls_back() {
        let http = offline();
        let s = source(
            VersionStrategy::GithubRelease {
                repo: "o/n".into(),
                prerelease: false,
                constraint: "".into(),
            },
            Some("3.0.0"),
        );
        assert_eq!(resolve_version(&http, &s, &CancelToken::new()).unwrap(), "3.0.0");
    }

    #[test]
    fn test_cancellation_is_not_masked_by_fallback() {
        let http = offline();
        let cancel = CancelToken::new();
        cancel.cancel();
        let s = source(VersionStrategy::GithubTag { repo: "o/n".into() }, Some("1.0.0"));
        assert!(matches!(resolve_version(&http, &s, &cancel), Err(Error::Cancelled)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_github_latest_release_strips_v() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/o/n/releases/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"tag_name": "v0.10.0"})))
            .mount(&server)
            .await;

        let base = server.uri();
        let s = source(
            VersionStrategy::GithubRelease { repo: "o/n".into(), prerelease: false, constraint: "".into() },
            None,
        );
        let v = blocking(move || {
            resolve_version(&HttpClient::new()?.with_github_api(base), &s, &CancelToken::new())
        })
        .await
        .unwrap();
        assert_eq!(v, "0.10.0");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_github_release_listing_order_and_prerelease() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/o/n/releases"))
            .and(query_param("per_page", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"tag_name": "v2.0.0-beta.1", "prerelease": true},
                {"tag_name": "v1.9.0", "prerelease": false},
                {"tag_name": "v1.8.0", "prerelease": false},
            ])))
            .mount(&server)
            .await;

        let base = server.uri();
        let (with_pre, constrained) = blocking(move || {
            let http = HttpClient::new().unwrap().with_github_api(base);
            let cancel = CancelToken::new();
            let with_pre = resolve_version(
                &http,
                &source(
                    VersionStrategy::GithubRelease { repo: "o/n".into(), prerelease: true, constraint: "".into() },
                    None,
                ),
                &cancel,
            );
            let constrained = resolve_version(
                &http,
                &source(
                    VersionStrategy::GithubRelease {
                        repo: "o/n".into(),
                        prerelease: false,
                        constraint: "<1.9.0".into(),
                    },
                    None,
                ),
                &cancel,
            );
            (with_pre, constrained)
        })
        .await;
        assert_eq!(with_pre.unwrap(), "2.0.0-beta.1");
        assert_eq!(constrained.unwrap(), "1.8.0");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_github_tag_picks_highest() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/o/n/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"name": "v1.2.0"}, {"name": "v1.10.0"}, {"name": "v1.3.0"}
            ])))
            .mount(&server)
            .await;

        let base = server.uri();
        let s = source(VersionStrategy::GithubTag { repo: "o/n".into() }, None);
        let v = blocking(move || {
            resolve_version(&HttpClient::new()?.with_github_api(base), &s, &CancelToken::new())
        })
        .await
        .unwrap();
        assert_eq!(v, "1.10.0");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_regex_and_http_json_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/download.html"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<a>version-4.5.0.tar.gz</a>"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/latest.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"current": {"tag": "v7.1.0"}})))
            .mount(&server)
            .await;

        let base = server.uri();
        let (scraped, selected) = blocking(move || {
            let http = HttpClient::new().unwrap();
            let cancel = CancelToken::new();
            let scraped = resolve_version(
                &http,
                &source(
                    VersionStrategy::Regex {
                        url: format!("{base}/download.html"),
                        pattern: r"version-(?P<version>[0-9]+\.[0-9]+\.[0-9]+)".into(),
                    },
                    None,
                ),
                &cancel,
            );
            let selected = resolve_version(
                &http,
                &source(
                    VersionStrategy::HttpJson {
                        url: format!("{base}/latest.json"),
                        selector: "$.current.tag".into(),
                    },
                    None,
                ),
                &cancel,
            );
            (scraped, selected)
        })
        .await;
        assert_eq!(scraped.unwrap(), "4.5.0");
        assert_eq!(selected.unwrap(), "7.1.0");
    }
}
