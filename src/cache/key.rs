//! Cache key generation.

use crate::types::GenerationRequest;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Model identifier used in the key when the request leaves model choice to the router.
pub const AUTO_MODEL: &str = "auto";

/// Bumped whenever the canonical layout below changes, so old entries stop matching.
const KEY_FORMAT_VERSION: &str = "v2";

/// Hex-encoded SHA-256 fingerprint (256 bits) of a canonical request encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap an already-derived fingerprint (e.g. read back from storage or the CLI).
    pub fn from_hex(hash: impl Into<String>) -> Result<Self> {
        let hash = hash.into();
        if hash.len() != 64 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::invalid_input_with_context(
                "cache key must be 64 hex characters",
                ErrorContext::new()
                    .with_field_path("key")
                    .with_details(format!("got {} characters", hash.len())),
            ));
        }
        Ok(Self(hash.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stable shard selector derived from the leading fingerprint bits.
    pub(crate) fn shard_hint(&self) -> u64 {
        u64::from_str_radix(&self.0[..16], 16).unwrap_or(0)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Derives [`CacheKey`]s from requests.
///
/// Prompt normalization trims surrounding whitespace and collapses every
/// internal whitespace run into a single space. Casing is preserved, so
/// `"Hello"` and `"hello"` are different keys. The system instruction gets the
/// same treatment.
///
/// Every field is written as `<len>:<bytes>` in a fixed order, and optional
/// fields carry a presence tag first, which keeps the encoding injective: no
/// two distinct field tuples can concatenate to the same byte string. Floats
/// are encoded by their IEEE-754 bit pattern.
#[derive(Debug, Clone, Default)]
pub struct CacheKeyGenerator {
    salt: Option<String>,
}

impl CacheKeyGenerator {
    pub fn new() -> Self {
        Self { salt: None }
    }

    /// Namespace every key, e.g. per deployment.
    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = Some(salt.into());
        self
    }

    pub fn generate(&self, request: &GenerationRequest) -> Result<CacheKey> {
        let prompt = normalize(&request.prompt);
        if prompt.is_empty() {
            return Err(Error::invalid_input_with_context(
                "prompt must not be empty",
                ErrorContext::new()
                    .with_field_path("prompt")
                    .with_source("cache_key"),
            ));
        }
        let system = request.system.as_deref().map(normalize).unwrap_or_default();
        let params = &request.params;

        let mut hasher = Sha256::new();
        let mut field = |value: &[u8]| {
            hasher.update(value.len().to_string().as_bytes());
            hasher.update(b":");
            hasher.update(value);
        };
        field(KEY_FORMAT_VERSION.as_bytes());
        // An empty salt namespaces nothing.
        optional(&mut field, self.salt.as_deref().filter(|s| !s.is_empty()).map(str::as_bytes));
        field(prompt.as_bytes());
        field(system.as_bytes());
        field(request.model.as_deref().unwrap_or(AUTO_MODEL).as_bytes());
        field(request.kind.as_str().as_bytes());
        field(&params.temperature.to_bits().to_be_bytes());
        field(&params.top_p.to_bits().to_be_bytes());
        field(&params.max_tokens.to_be_bytes());
        optional(&mut field, params.seed.map(u64::to_be_bytes).as_ref().map(|b| &b[..]));
        optional(&mut field, request.cache_scope.as_deref().map(str::as_bytes));

        let hash: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        Ok(CacheKey(hash))
    }
}

/// Presence tag, then the value when there is one.
fn optional(field: &mut impl FnMut(&[u8]), value: Option<&[u8]>) {
    match value {
        Some(bytes) => {
            field(b"\x01");
            field(bytes);
        }
        None => field(b"\x00"),
    }
}

/// Trim and collapse whitespace runs.
pub fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GenerationParams, RequestKind};

    fn key(req: &GenerationRequest) -> CacheKey {
        CacheKeyGenerator::new().generate(req).unwrap()
    }

    #[test]
    fn identical_requests_share_a_key() {
        let a = GenerationRequest::chat("explain TCP handshake").with_model("llama3.2");
        let b = GenerationRequest::chat("explain TCP handshake").with_model("llama3.2");
        assert_eq!(key(&a), key(&b));
        assert_eq!(key(&a).as_str().len(), 64);
    }

    #[test]
    fn whitespace_is_normalized_but_case_is_not() {
        let base = key(&GenerationRequest::chat("explain TCP handshake"));
        let spaced = key(&GenerationRequest::chat("  explain \n TCP\thandshake  "));
        let upper = key(&GenerationRequest::chat("Explain TCP handshake"));
        assert_eq!(base, spaced);
        assert_ne!(base, upper);
    }

    #[test]
    fn every_parameter_changes_the_key() {
        let base = GenerationRequest::chat("hello");
        let k = key(&base);

        let variants = vec![
            base.clone().with_model("other"),
            base.clone().with_temperature(0.1),
            base.clone().with_max_tokens(16),
            base.clone().with_system("be brief"),
            base.clone().with_cache_scope("conv-1"),
            base.clone().with_params(GenerationParams {
                top_p: 0.5,
                ..GenerationParams::default()
            }),
            base.clone().with_params(GenerationParams {
                seed: Some(7),
                ..GenerationParams::default()
            }),
            GenerationRequest::new(RequestKind::Completion, "hello"),
        ];
        for v in variants {
            assert_ne!(k, key(&v), "variant {:?} collided", v);
        }
    }

    #[test]
    fn conversation_id_and_bypass_do_not_affect_the_key() {
        let base = GenerationRequest::chat("hello");
        let other = base
            .clone()
            .with_conversation(uuid::Uuid::new_v4())
            .bypass_cache(true);
        assert_eq!(key(&base), key(&other));
    }

    #[test]
    fn field_boundaries_are_unambiguous() {
        let a = GenerationRequest::chat("ab").with_system("c");
        let b = GenerationRequest::chat("a").with_system("bc");
        assert_ne!(key(&a), key(&b));
    }

    #[test]
    fn absent_optional_fields_differ_from_any_present_value() {
        let base = GenerationRequest::chat("hello");
        let k = key(&base);
        for scope in ["-", "", "\x00"] {
            assert_ne!(k, key(&base.clone().with_cache_scope(scope)), "scope {:?}", scope);
        }
        let seeded = base.clone().with_params(GenerationParams {
            seed: Some(0),
            ..GenerationParams::default()
        });
        assert_ne!(k, key(&seeded));
    }

    #[test]
    fn empty_salt_matches_no_salt() {
        let req = GenerationRequest::chat("hello");
        assert_eq!(
            CacheKeyGenerator::new().generate(&req).unwrap(),
            CacheKeyGenerator::new().with_salt("").generate(&req).unwrap()
        );
    }

    #[test]
    fn salt_namespaces_keys() {
        let req = GenerationRequest::chat("hello");
        let plain = CacheKeyGenerator::new().generate(&req).unwrap();
        let salted = CacheKeyGenerator::new().with_salt("prod").generate(&req).unwrap();
        assert_ne!(plain, salted);
    }

    #[test]
    fn empty_prompt_is_rejected() {
        let err = CacheKeyGenerator::new()
            .generate(&GenerationRequest::chat("  \n\t "))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput { .. }));
    }

    #[test]
    fn from_hex_validates_shape() {
        let k = key(&GenerationRequest::chat("hello"));
        assert_eq!(CacheKey::from_hex(k.as_str()).unwrap(), k);
        assert!(CacheKey::from_hex("abc").is_err());
        assert!(CacheKey::from_hex("z".repeat(64)).is_err());
    }
}
