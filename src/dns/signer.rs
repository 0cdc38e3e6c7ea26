//! AK/SK request signing (`SDK-HMAC-SHA256`) as accepted by the Open Telekom Cloud API gateway.
//!
//! The scheme follows the usual canonical request layout: method, canonical path (always ending in `/`), sorted
//! query, signed headers, and the hex SHA-256 of the body. The hex SHA-256 of that request is signed together with
//! the `X-Sdk-Date` timestamp.

use chrono::{
    DateTime,
    Utc,
};
use hmac::{
    Hmac,
    Mac as _,
};
use percent_encoding::{
    utf8_percent_encode,
    AsciiSet,
    NON_ALPHANUMERIC,
};
use reqwest::{
    Method,
    Url,
};
use sha2::{
    Digest as _,
    Sha256,
};
use std::collections::BTreeMap;

type HmacSha256 = Hmac<Sha256>;

pub const ALGORITHM: &str = "SDK-HMAC-SHA256";
pub const DATE_HEADER: &str = "x-sdk-date";
const DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// RFC 3986 unreserved characters stay as they are.
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

#[derive(Clone)]
pub struct Signer {
    access_key: String,
    secret_key: String,
}

impl Signer {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    /// Returns the full set of headers to send: `headers` (names lowercased) plus `host`, `x-sdk-date` and
    /// `authorization`.
    pub fn sign(
        &self,
        method: &Method,
        url: &Url,
        headers: &[(&str, &str)],
        body: &[u8],
        now: DateTime<Utc>,
    ) -> BTreeMap<String, String> {
        let mut signed: BTreeMap<String, String> = headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.trim().to_string()))
            .collect();
        signed.insert("host".to_string(), host(url));
        let timestamp = now.format(DATE_FORMAT).to_string();
        signed.insert(DATE_HEADER.to_string(), timestamp.clone());

        let canonical = canonical_request(method, url, &signed, body);
        let string_to_sign = format!("{ALGORITHM}\n{timestamp}\n{}", hex::encode(Sha256::digest(canonical.as_bytes())));
        let signature = self.signature(&string_to_sign);

        let authorization = format!(
            "{ALGORITHM} Access={}, SignedHeaders={}, Signature={signature}",
            self.access_key,
            signed_header_names(&signed)
        );
        signed.insert("authorization".to_string(), authorization);
        signed
    }

    fn signature(&self, string_to_sign: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes()).expect("HMAC key length is valid");
        mac.update(string_to_sign.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

fn host(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

fn escape(s: &str) -> String {
    utf8_percent_encode(s, UNRESERVED).to_string()
}

pub(crate) fn canonical_uri(url: &Url) -> String {
    let path = url
        .path()
        .split('/')
        .map(|segment| {
            let decoded = percent_encoding::percent_decode_str(segment).decode_utf8_lossy();
            escape(&decoded)
        })
        .collect::<Vec<_>>()
        .join("/");
    if path.ends_with('/') {
        path
    } else {
        format!("{path}/")
    }
}

pub(crate) fn canonical_query(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(key, value)| (escape(&key), escape(&value)))
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn signed_header_names(headers: &BTreeMap<String, String>) -> String {
    headers.keys().map(String::as_str).collect::<Vec<_>>().join(";")
}

pub(crate) fn canonical_request(method: &Method, url: &Url, headers: &BTreeMap<String, String>, body: &[u8]) -> String {
    let canonical_headers: String = headers.iter().map(|(name, value)| format!("{name}:{value}\n")).collect();
    format!(
        "{method}\n{}\n{}\n{canonical_headers}\n{}\n{}",
        canonical_uri(url),
        canonical_query(url),
        signed_header_names(headers),
        hex::encode(Sha256::digest(body)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap()
    }

    #[test]
    fn canonical_uri_always_ends_with_slash() {
        let url = Url::parse("https://dns.eu-de.otc.t-systems.com/v2/zones").unwrap();
        assert_eq!(canonical_uri(&url), "/v2/zones/");

        let url = Url::parse("https://dns.eu-de.otc.t-systems.com/").unwrap();
        assert_eq!(canonical_uri(&url), "/");
    }

    #[test]
    fn canonical_query_is_sorted_and_escaped() {
        let mut url = Url::parse("https://dns.eu-de.otc.t-systems.com/v2/zones/z1/recordsets").unwrap();
        url.query_pairs_mut()
            .append_pair("type", "TXT")
            .append_pair("records", "\"abc 123\"")
            .append_pair("name", "_acme-challenge.example.com.");

        assert_eq!(
            canonical_query(&url),
            "name=_acme-challenge.example.com.&records=%22abc%20123%22&type=TXT"
        );
    }

    #[test]
    fn canonical_request_layout() {
        let url = Url::parse("https://dns.eu-de.otc.t-systems.com/v2/zones?name=example.com.").unwrap();
        let headers = BTreeMap::from([
            ("content-type".to_string(), "application/json".to_string()),
            ("host".to_string(), "dns.eu-de.otc.t-systems.com".to_string()),
            ("x-sdk-date".to_string(), "20240301T123005Z".to_string()),
        ]);

        let canonical = canonical_request(&Method::GET, &url, &headers, b"");
        let expected = [
            "GET",
            "/v2/zones/",
            "name=example.com.",
            "content-type:application/json",
            "host:dns.eu-de.otc.t-systems.com",
            "x-sdk-date:20240301T123005Z",
            "",
            "content-type;host;x-sdk-date",
            EMPTY_SHA256,
        ]
        .join("\n");
        assert_eq!(canonical, expected);
    }

    #[test]
    fn sign_adds_authorization() {
        let signer = Signer::new("AKEXAMPLE", "secret");
        let url = Url::parse("https://iam.eu-de.otc.t-systems.com:443/v3/projects?name=eu-de").unwrap();

        let headers = signer.sign(
            &Method::GET,
            &url,
            &[("Content-Type", "application/json")],
            b"",
            now(),
        );

        assert_eq!(headers["host"], "iam.eu-de.otc.t-systems.com");
        assert_eq!(headers["x-sdk-date"], "20240301T123005Z");
        let authorization = &headers["authorization"];
        assert!(authorization.starts_with("SDK-HMAC-SHA256 Access=AKEXAMPLE, SignedHeaders=content-type;host;x-sdk-date, Signature="));
        let signature = authorization.rsplit("Signature=").next().unwrap();
        assert_eq!(signature.len(), 64);
        assert!(!authorization.contains("secret"));
    }

    #[test]
    fn signature_depends_on_body_and_key() {
        let url = Url::parse("https://dns.eu-de.otc.t-systems.com/v2/zones/z1/recordsets").unwrap();
        let sign = |secret: &str, body: &[u8]| {
            Signer::new("ak", secret).sign(&Method::POST, &url, &[], body, now())["authorization"].clone()
        };

        assert_eq!(sign("sk", b"{}"), sign("sk", b"{}"));
        assert_ne!(sign("sk", b"{}"), sign("sk", b"[]"));
        assert_ne!(sign("sk", b"{}"), sign("other", b"{}"));
    }

    #[test]
    fn non_default_port_is_part_of_host() {
        let url = Url::parse("http://127.0.0.1:8080/v3/projects").unwrap();
        assert_eq!(host(&url), "127.0.0.1:8080");
    }
}
