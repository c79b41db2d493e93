use std::fs::File;
use std::io::Read;
use std::path::Path;
use sha2::{Digest, Sha256};
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::http::HttpClient;
use crate::template::{render, TemplateContext};

/// Strips the `sha256:` prefix from a hash if present.
pub fn format_hash(hash: &str) -> &str {
    let hash = hash.trim();
    hash.strip_prefix("sha256:").unwrap_or(hash)
}

/// True for a 64-character hex string (either case).
pub fn is_hex_sha256(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Resolves a checksum template to a lowercase sha256 hex digest.
///
/// The rendered value is used verbatim when it already is a digest;
/// otherwise it is fetched as a URL whose trimmed body must be one.
pub fn resolve_checksum(
    http: &HttpClient,
    template: &str,
    ctx: &TemplateContext,
    cancel: &CancelToken,
) -> Result<String> {
    let rendered = render(template, ctx)?;
    let value = format_hash(&rendered);
    if value.is_empty() {
        return Err(Error::Config("checksum template rendered empty".into()));
    }
    if is_hex_sha256(value) {
        return Ok(value.to_lowercase());
    }
    let body = http.get_text(value, cancel)?;
    let hash = format_hash(&body);
    if !is_hex_sha256(hash) {
        return Err(Error::Format(format!("{value} did not return a sha256 hex digest")));
    }
    Ok(hash.to_lowercase())
}

/// Computes the sha256 of a file as lowercase hex.
pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| Error::fs("open", path, e))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 8192];
    loop {
        let n = file.read(&mut buffer).map_err(|e| Error::fs("read", path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Fails with [`Error::ChecksumMismatch`] unless `path` hashes to `expected`.
pub fn verify_file(path: &Path, expected: &str) -> Result<()> {
    let expected = format_hash(expected);
    let actual = file_sha256(path)?;
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(Error::ChecksumMismatch {
            file: path.to_path_buf(),
            expected: expected.to_lowercase(),
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::context;
    use crate::test_support::blocking;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // sha256("hello")
    const HELLO: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_format_hash_removes_prefix() {
        assert_eq!(format_hash("sha256:abcdef123456"), "abcdef123456");
        assert_eq!(format_hash("abcdef123456"), "abcdef123456");
    }

    #[test]
    fn test_is_hex_sha256() {
        assert!(is_hex_sha256(HELLO));
        assert!(is_hex_sha256(&HELLO.to_uppercase()));
        assert!(!is_hex_sha256(&HELLO[1..]));
        assert!(!is_hex_sha256(&HELLO.replace('2', "g")));
    }

    #[test]
    fn test_literal_checksum_is_lowercased() {
        let http = HttpClient::new().unwrap();
        let ctx = context([("Sum", HELLO.to_uppercase())]);
        let sum = resolve_checksum(&http, "{{.Sum}}", &ctx, &CancelToken::new()).unwrap();
        assert_eq!(sum, HELLO);
    }

    #[test]
    fn test_verify_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, "hello").unwrap();
        assert_eq!(file_sha256(&file).unwrap(), HELLO);
        verify_file(&file, &HELLO.to_uppercase()).unwrap();
        let err = verify_file(&file, &"0".repeat(64)).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_checksum_from_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tool-1.0.0.sha256"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!("  {}\n", HELLO.to_uppercase())))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/bad.sha256"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!("{HELLO}  tool.tar.gz\n")))
            .mount(&server)
            .await;

        let base = server.uri();
        let (good, bad) = blocking(move || {
            let http = HttpClient::new().unwrap();
            let ctx = context([("Base", base.as_str()), ("Name", "tool"), ("Version", "1.0.0")]);
            let cancel = CancelToken::new();
            (
                resolve_checksum(&http, "{{.Base}}/{{.Name}}-{{.Version}}.sha256", &ctx, &cancel),
                resolve_checksum(&http, "{{.Base}}/bad.sha256", &ctx, &cancel),
            )
        })
        .await;
        assert_eq!(good.unwrap(), HELLO);
        assert!(matches!(bad, Err(Error::Format(_))));
    }
}
