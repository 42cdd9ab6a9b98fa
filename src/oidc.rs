//! OIDC issuer discovery documents
//!
//! Service account tokens name an issuer; relying parties fetch
//! `<issuer>/.well-known/openid-configuration` and the key set it points to
//! in order to verify them. Both documents are pure functions of the issuer
//! URL and the service account keyset.

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// Store path of the discovery document
pub const DISCOVERY_PATH: &str = ".well-known/openid-configuration";

/// Store path of the key set, relative to the issuer
pub const JWKS_PATH: &str = "openid/v1/jwks";

/// Subject common name of keys that sign service account tokens
pub const SIGNING_COMMON_NAME: &str = "service-account";

/// DER encoding of the rsaEncryption OID, 1.2.840.113549.1.1.1
const RSA_ENCRYPTION_OID: [u8; 9] = [0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01];

#[derive(Debug, Serialize)]
struct DiscoveryDocument<'a> {
    issuer: &'a str,
    jwks_uri: String,
    authorization_endpoint: &'static str,
    response_types_supported: [&'static str; 1],
    subject_types_supported: [&'static str; 1],
    id_token_signing_alg_values_supported: [&'static str; 1],
    claims_supported: [&'static str; 2],
}

#[derive(Debug, Serialize)]
struct KeySet {
    keys: Vec<Jwk>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct Jwk {
    #[serde(rename = "use")]
    usage: &'static str,
    kty: &'static str,
    kid: String,
    alg: &'static str,
    n: String,
    e: String,
}

/// Service account keyset file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Keyset {
    #[serde(default)]
    pub items: Vec<KeysetItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeysetItem {
    pub id: String,
    /// Subject common name of the key's certificate
    pub common_name: String,
    /// PEM `PUBLIC KEY`; items without one are skipped
    #[serde(default)]
    pub public_key: Option<String>,
    /// Set once the key must no longer be trusted
    #[serde(default)]
    pub distrusted_at: Option<DateTime<Utc>>,
}

impl Keyset {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read keyset {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid keyset {}", path.display()))
    }
}

/// Serialize like the documents relying parties already cache: one member
/// per line, no indentation.
fn to_json<T: Serialize>(value: &T) -> Result<String> {
    let mut out = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(b""));
    value.serialize(&mut serializer)?;
    Ok(String::from_utf8(out)?)
}

/// The `openid-configuration` document for `issuer`
pub fn discovery_document(issuer: &str) -> Result<String> {
    let document = DiscoveryDocument {
        issuer,
        jwks_uri: format!("{issuer}/{JWKS_PATH}"),
        authorization_endpoint: "urn:kubernetes:programmatic_authorization",
        response_types_supported: ["id_token"],
        subject_types_supported: ["public"],
        id_token_signing_alg_values_supported: ["RS256"],
        claims_supported: ["sub", "iss"],
    };
    to_json(&document)
}

/// The JWKS document holding every trusted signing key, sorted by key id
pub fn jwks_document(keyset: &Keyset) -> Result<String> {
    let mut keys = Vec::new();
    for item in &keyset.items {
        if item.distrusted_at.is_some() {
            log::debug!("skipping distrusted key {}", item.id);
            continue;
        }
        let Some(pem) = &item.public_key else {
            log::debug!("skipping key {} without a public key", item.id);
            continue;
        };
        if item.common_name != SIGNING_COMMON_NAME {
            log::debug!("skipping key {} with subject {:?}", item.id, item.common_name);
            continue;
        }
        let jwk = rsa_jwk(pem).with_context(|| format!("Invalid public key for {}", item.id))?;
        keys.push(jwk);
    }
    keys.sort_by(|a, b| a.kid.cmp(&b.kid));
    to_json(&KeySet { keys })
}

fn rsa_jwk(pem: &str) -> Result<Jwk> {
    let der = decode_pem(pem, "PUBLIC KEY")?;
    let (n, e) = parse_rsa_public_key(&der)?;
    Ok(Jwk {
        usage: "sig",
        kty: "RSA",
        kid: key_id(&der),
        alg: "RS256",
        n: URL_SAFE_NO_PAD.encode(n),
        e: URL_SAFE_NO_PAD.encode(e),
    })
}

/// Key id: unpadded URL-safe base64 of the SHA-256 of the DER public key
pub fn key_id(der: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(der))
}

fn decode_pem(pem: &str, label: &str) -> Result<Vec<u8>> {
    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");
    let Some((_, rest)) = pem.split_once(&begin) else {
        bail!("no {begin} block");
    };
    let Some((body, _)) = rest.split_once(&end) else {
        bail!("unterminated {label} block");
    };
    let body: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD.decode(body).context("invalid base64 in PEM block")
}

/// Minimal DER reader for a SubjectPublicKeyInfo
struct Der<'a> {
    data: &'a [u8],
}

impl<'a> Der<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.data.len() < len {
            bail!("truncated DER");
        }
        let (head, rest) = self.data.split_at(len);
        self.data = rest;
        Ok(head)
    }

    fn length(&mut self) -> Result<usize> {
        let first = self.take(1)?[0];
        if first < 0x80 {
            return Ok(usize::from(first));
        }
        let count = usize::from(first & 0x7f);
        if count == 0 || count > 4 {
            bail!("unsupported DER length encoding");
        }
        Ok(self
            .take(count)?
            .iter()
            .fold(0, |len, byte| (len << 8) | usize::from(*byte)))
    }

    /// Contents of the next element, which must carry `tag`
    fn element(&mut self, tag: u8) -> Result<&'a [u8]> {
        let found = self.take(1)?[0];
        if found != tag {
            bail!("expected DER tag {tag:#04x}, found {found:#04x}");
        }
        let len = self.length()?;
        self.take(len)
    }

    fn integer(&mut self) -> Result<&'a [u8]> {
        let value = self.element(0x02)?;
        let start = value.iter().position(|b| *b != 0).unwrap_or(value.len());
        Ok(&value[start..])
    }
}

const SEQUENCE: u8 = 0x30;
const OBJECT_ID: u8 = 0x06;
const BIT_STRING: u8 = 0x03;

/// Modulus and exponent of an RSA SubjectPublicKeyInfo
fn parse_rsa_public_key(der: &[u8]) -> Result<(&[u8], &[u8])> {
    let spki = Der::new(der).element(SEQUENCE)?;
    let mut spki = Der::new(spki);

    let mut algorithm = Der::new(spki.element(SEQUENCE)?);
    if algorithm.element(OBJECT_ID)? != RSA_ENCRYPTION_OID {
        bail!("not an RSA public key");
    }

    let bits = spki.element(BIT_STRING)?;
    let Some((&0, key)) = bits.split_first() else {
        bail!("unexpected padding in public key bit string");
    };
    let mut key = Der::new(Der::new(key).element(SEQUENCE)?);
    let n = key.integer()?;
    let e = key.integer()?;
    if n.is_empty() || e.is_empty() {
        bail!("empty RSA modulus or exponent");
    }
    Ok((n, e))
}
