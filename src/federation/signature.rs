//! HTTP Signatures for ActivityPub
//!
//! Implements signing and verification per:
//! https://docs.joinmastodon.org/spec/security/
//!
//! Outbound requests sign `(request-target) date host digest`; fetches
//! without a body leave out `digest`.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rsa::RsaPublicKey;
use rsa::pkcs1v15::{Signature as Pkcs1v15Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};

use super::actor::{ActorResolver, RemoteActor};
use super::keys::ActorKey;
use crate::error::AppError;

/// Format of the `Date` header
pub const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Key identifier published for an actor
pub fn key_id_for(actor_iri: &str) -> String {
    format!("{}#main-key", actor_iri)
}

/// Strip the fragment of a key identifier to get the owning actor
pub fn actor_from_key_id(key_id: &str) -> &str {
    key_id.split('#').next().unwrap_or(key_id)
}

/// Headers to add for signed request
#[derive(Debug, Clone)]
pub struct SignatureHeaders {
    /// Signature header value
    pub signature: String,
    /// Date header value
    pub date: String,
    /// Host header value (authority including a non-default port)
    pub host: String,
    /// Digest header value (if body present)
    pub digest: Option<String>,
}

/// Signs outbound requests with the instance key
///
/// The RSA blinding step draws from a shared RNG, so the signature
/// computation runs under a lock. Building the signing string and the
/// network call happen outside of it.
pub struct RequestSigner {
    key: Arc<ActorKey>,
    signing_key: SigningKey<Sha256>,
    rng: Mutex<StdRng>,
}

impl RequestSigner {
    pub fn new(key: Arc<ActorKey>) -> Self {
        let signing_key = SigningKey::<Sha256>::new(key.private_key().clone());
        Self {
            key,
            signing_key,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Instance key used by this signer
    pub fn key(&self) -> &Arc<ActorKey> {
        &self.key
    }

    /// Sign a request for the actor owning `key_id`, dated now
    ///
    /// # Arguments
    /// * `method` - HTTP method (e.g., "POST")
    /// * `url` - Full URL being requested
    /// * `body` - Request body (for digest)
    /// * `key_id` - Full URL to the public key (actor#main-key)
    ///
    /// # Example
    /// ```ignore
    /// let headers = signer.sign(
    ///     "POST",
    ///     "https://remote.server/inbox",
    ///     Some(&body),
    ///     "https://my.server/blog#main-key",
    /// )?;
    /// ```
    pub fn sign(
        &self,
        method: &str,
        url: &str,
        body: Option<&[u8]>,
        key_id: &str,
    ) -> Result<SignatureHeaders, AppError> {
        self.sign_at(method, url, body, key_id, Utc::now())
    }

    /// Sign a request with an explicit `Date`
    pub fn sign_at(
        &self,
        method: &str,
        url: &str,
        body: Option<&[u8]>,
        key_id: &str,
        date: DateTime<Utc>,
    ) -> Result<SignatureHeaders, AppError> {
        let parsed_url =
            url::Url::parse(url).map_err(|e| AppError::Validation(format!("Invalid URL: {}", e)))?;

        let host = request_host(&parsed_url)?;
        let path_and_query = match parsed_url.query() {
            Some(query) => format!("{}?{}", parsed_url.path(), query),
            None => parsed_url.path().to_string(),
        };

        let date = date.format(HTTP_DATE_FORMAT).to_string();
        let digest = body.map(generate_digest);

        let mut signing_parts = vec![
            format!(
                "(request-target): {} {}",
                method.to_lowercase(),
                path_and_query
            ),
            format!("date: {}", date),
            format!("host: {}", host),
        ];
        let mut headers_list = vec!["(request-target)", "date", "host"];

        if let Some(ref digest_value) = digest {
            signing_parts.push(format!("digest: {}", digest_value));
            headers_list.push("digest");
        }

        let signing_string = signing_parts.join("\n");

        let signature = {
            let mut rng = self
                .rng
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            self.signing_key
                .try_sign_with_rng(&mut *rng, signing_string.as_bytes())
                .map_err(|e| AppError::Crypto(format!("Signing failed: {}", e)))?
        };

        let signature_header = format!(
            "keyId=\"{}\",algorithm=\"rsa-sha256\",headers=\"{}\",signature=\"{}\"",
            key_id,
            headers_list.join(" "),
            BASE64.encode(signature.to_bytes())
        );

        Ok(SignatureHeaders {
            signature: signature_header,
            date,
            host,
            digest,
        })
    }
}

/// `Host` value for a URL: host plus port when it is not the scheme default
fn request_host(url: &url::Url) -> Result<String, AppError> {
    let host = url
        .host_str()
        .ok_or_else(|| AppError::Validation("Missing host in URL".to_string()))?;

    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Parsed Signature header
#[derive(Debug, Clone)]
pub struct ParsedSignature {
    /// Key ID (URL to public key)
    pub key_id: String,
    /// Algorithm (usually rsa-sha256)
    pub algorithm: String,
    /// Signed header names
    pub headers: Vec<String>,
    /// Base64-encoded signature
    pub signature: String,
}

/// Parse Signature header value
///
/// # Format
/// ```text
/// keyId="...",algorithm="...",headers="...",signature="..."
/// ```
///
/// `algorithm` defaults to `hs2019` and `headers` to `date` when absent.
pub fn parse_signature_header(header: &str) -> Result<ParsedSignature, AppError> {
    let mut key_id = None;
    let mut algorithm = None;
    let mut headers = None;
    let mut signature = None;

    for part in header.split(',') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            let key = key.trim();
            let value = value.trim().trim_matches('"');

            match key {
                "keyId" => key_id = Some(value.to_string()),
                "algorithm" => algorithm = Some(value.to_string()),
                "headers" => {
                    headers = Some(
                        value
                            .split_whitespace()
                            .map(|s| s.to_ascii_lowercase())
                            .collect(),
                    )
                }
                "signature" => signature = Some(value.to_string()),
                _ => {}
            }
        }
    }

    Ok(ParsedSignature {
        key_id: key_id.ok_or_else(|| AppError::InvalidSignature("Missing keyId".to_string()))?,
        algorithm: algorithm.unwrap_or_else(|| "hs2019".to_string()),
        headers: headers.unwrap_or_else(|| vec!["date".to_string()]),
        signature: signature
            .ok_or_else(|| AppError::InvalidSignature("Missing signature".to_string()))?,
    })
}

/// Generate SHA-256 digest for body
///
/// # Returns
/// `SHA-256=base64(hash)`
pub fn generate_digest(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    format!("SHA-256={}", BASE64.encode(hasher.finalize()))
}

fn header_str<'a>(headers: &'a http::HeaderMap, name: &str) -> Result<&'a str, AppError> {
    headers
        .get(name)
        .ok_or_else(|| AppError::InvalidSignature(format!("Missing {} header", name)))?
        .to_str()
        .map_err(|_| AppError::InvalidSignature(format!("Invalid {} header", name)))
}

/// Check the parts of a signed request that need no key
///
/// Parses the `Signature` header, checks the algorithm and the signed
/// header list, the `Date` skew against `now` and the body digest.
///
/// # Returns
/// The parsed signature, ready for [`verify_parsed_signature`]
pub fn check_signed_request(
    headers: &http::HeaderMap,
    body: Option<&[u8]>,
    max_age_secs: i64,
    now: DateTime<Utc>,
) -> Result<ParsedSignature, AppError> {
    let parsed = parse_signature_header(header_str(headers, "signature")?)?;

    if parsed.algorithm != "rsa-sha256" && parsed.algorithm != "hs2019" {
        return Err(AppError::InvalidSignature(format!(
            "Unsupported signature algorithm: {}",
            parsed.algorithm
        )));
    }

    for required in ["(request-target)", "host", "date"] {
        if !parsed.headers.iter().any(|h| h == required) {
            return Err(AppError::InvalidSignature(format!(
                "Signed headers must include: {}",
                required
            )));
        }
    }

    let has_body = body.is_some_and(|b| !b.is_empty());
    if has_body && !parsed.headers.iter().any(|h| h == "digest") {
        return Err(AppError::InvalidSignature(
            "Signed headers must include: digest".to_string(),
        ));
    }

    let date = DateTime::parse_from_rfc2822(header_str(headers, "date")?)
        .map_err(|_| AppError::InvalidSignature("Invalid Date format".to_string()))?;
    if (now.timestamp() - date.timestamp()).abs() > max_age_secs {
        return Err(AppError::InvalidSignature(
            "Date header too old or in future".to_string(),
        ));
    }

    if let Some(body_data) = body.filter(|_| has_body) {
        if header_str(headers, "digest")? != generate_digest(body_data) {
            return Err(AppError::InvalidSignature("Digest mismatch".to_string()));
        }
    }

    Ok(parsed)
}

/// Verify a parsed signature against a public key
///
/// # Arguments
/// * `method` - HTTP method
/// * `path` - Request path including the query string
/// * `headers` - All request headers
/// * `public_key_pem` - SPKI PEM of the claimed signer
pub fn verify_parsed_signature(
    parsed: &ParsedSignature,
    method: &str,
    path: &str,
    headers: &http::HeaderMap,
    public_key_pem: &str,
) -> Result<(), AppError> {
    let mut signing_parts = Vec::with_capacity(parsed.headers.len());

    for header_name in &parsed.headers {
        let value = match header_name.as_str() {
            "(request-target)" => format!("{} {}", method.to_lowercase(), path),
            name => header_str(headers, name)?.to_string(),
        };
        signing_parts.push(format!("{}: {}", header_name, value));
    }

    let signing_string = signing_parts.join("\n");

    let signature_bytes = BASE64
        .decode(&parsed.signature)
        .map_err(|_| AppError::InvalidSignature("Invalid signature encoding".to_string()))?;

    let public_key = RsaPublicKey::from_public_key_pem(public_key_pem.trim())
        .map_err(|e| AppError::InvalidSignature(format!("Invalid public key: {}", e)))?;
    let verifier = VerifyingKey::<Sha256>::new(public_key);

    let signature = Pkcs1v15Signature::try_from(signature_bytes.as_slice())
        .map_err(|e| AppError::InvalidSignature(format!("Invalid signature format: {}", e)))?;

    verifier
        .verify(signing_string.as_bytes(), &signature)
        .map_err(|_| AppError::InvalidSignature("Signature verification failed".to_string()))
}

/// Verifies inbound requests against the claimed signer's published key
pub struct SignatureVerifier {
    resolver: Arc<ActorResolver>,
    max_age_secs: i64,
}

impl SignatureVerifier {
    pub fn new(resolver: Arc<ActorResolver>, max_age_secs: i64) -> Self {
        Self {
            resolver,
            max_age_secs,
        }
    }

    /// Verify an inbound request on behalf of a local blog
    ///
    /// The signer is resolved with a fetch signed as `blog_iri`. A cached
    /// actor whose key no longer verifies is fetched once more before the
    /// request is rejected.
    ///
    /// # Returns
    /// The resolved signer, whose id is the actor named by the key id
    ///
    /// # Errors
    /// `InvalidSignature` for every failure, including an unresolvable signer
    pub async fn verify(
        &self,
        method: &str,
        path: &str,
        headers: &http::HeaderMap,
        body: &[u8],
        blog_iri: &str,
    ) -> Result<RemoteActor, AppError> {
        let parsed = check_signed_request(headers, Some(body), self.max_age_secs, Utc::now())?;
        let actor_iri = actor_from_key_id(&parsed.key_id);

        let actor = self
            .resolver
            .resolve(actor_iri, blog_iri)
            .await
            .map_err(|e| AppError::InvalidSignature(format!("Signer not resolvable: {}", e)))?;

        if actor.id != actor_iri {
            return Err(AppError::InvalidSignature(format!(
                "Key {} does not belong to actor {}",
                parsed.key_id, actor.id
            )));
        }

        match verify_parsed_signature(&parsed, method, path, headers, &actor.public_key_pem) {
            Ok(()) => Ok(actor),
            Err(e) if self.resolver.caching_enabled() => {
                tracing::debug!(actor = %actor_iri, error = %e, "Cached key rejected, refetching signer");
                let actor = self.resolver.refresh(actor_iri, blog_iri).await.map_err(|e| {
                    AppError::InvalidSignature(format!("Signer not resolvable: {}", e))
                })?;
                verify_parsed_signature(&parsed, method, path, headers, &actor.public_key_pem)?;
                Ok(actor)
            }
            Err(e) => Err(e),
        }
    }
}
