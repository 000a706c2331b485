//! Bearer Assertions
//!
//! Signed JWT rendering of an access token. The assertion is only a signed
//! pointer: `jti` names the stored record, which stays authoritative for
//! revocation.

use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{OAuth2Error, SigningError, TokenError};
use crate::types::{AccessToken, TokenEntity};

/// Key used to sign assertions.
#[derive(Clone)]
pub struct SigningKey {
    pub algorithm: Algorithm,
    pub key: EncodingKey,
}

/// Key used to check assertion signatures.
#[derive(Clone)]
pub struct VerificationKey {
    pub algorithm: Algorithm,
    pub key: DecodingKey,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("algorithm", &self.algorithm)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl std::fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationKey")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Source of signing and verification key material.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Private key for signing.
    async fn signing_key(&self) -> Result<SigningKey, OAuth2Error>;

    /// Public key for verification.
    async fn verification_key(&self) -> Result<VerificationKey, OAuth2Error>;
}

enum KeyFamily {
    Rsa,
    Ec,
    Ed,
}

fn key_family(algorithm: Algorithm) -> Result<KeyFamily, OAuth2Error> {
    match algorithm {
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512 => Ok(KeyFamily::Rsa),
        Algorithm::ES256 | Algorithm::ES384 => Ok(KeyFamily::Ec),
        Algorithm::EdDSA => Ok(KeyFamily::Ed),
        other => Err(invalid_key(format!(
            "{:?} is symmetric; bearer assertions require an asymmetric algorithm",
            other
        ))),
    }
}

fn invalid_key(message: impl Into<String>) -> OAuth2Error {
    OAuth2Error::Signing(SigningError::InvalidKey {
        message: message.into(),
    })
}

/// Parse a PEM private key for `algorithm`.
pub fn signing_key_from_pem(algorithm: Algorithm, pem: &[u8]) -> Result<SigningKey, OAuth2Error> {
    let key = match key_family(algorithm)? {
        KeyFamily::Rsa => EncodingKey::from_rsa_pem(pem),
        KeyFamily::Ec => EncodingKey::from_ec_pem(pem),
        KeyFamily::Ed => EncodingKey::from_ed_pem(pem),
    }
    .map_err(|e| invalid_key(e.to_string()))?;

    Ok(SigningKey { algorithm, key })
}

/// Parse a PEM public key for `algorithm`.
pub fn verification_key_from_pem(
    algorithm: Algorithm,
    pem: &[u8],
) -> Result<VerificationKey, OAuth2Error> {
    let key = match key_family(algorithm)? {
        KeyFamily::Rsa => DecodingKey::from_rsa_pem(pem),
        KeyFamily::Ec => DecodingKey::from_ec_pem(pem),
        KeyFamily::Ed => DecodingKey::from_ed_pem(pem),
    }
    .map_err(|e| invalid_key(e.to_string()))?;

    Ok(VerificationKey { algorithm, key })
}

/// Keys parsed once at construction.
#[derive(Clone, Debug)]
pub struct StaticKeyProvider {
    signing: Option<SigningKey>,
    verification: VerificationKey,
}

impl StaticKeyProvider {
    /// Provider able to sign and verify.
    pub fn from_pem(
        algorithm: Algorithm,
        private_pem: &[u8],
        public_pem: &[u8],
    ) -> Result<Self, OAuth2Error> {
        Ok(Self {
            signing: Some(signing_key_from_pem(algorithm, private_pem)?),
            verification: verification_key_from_pem(algorithm, public_pem)?,
        })
    }

    /// Provider that can only verify, e.g. on a resource server.
    pub fn verify_only(algorithm: Algorithm, public_pem: &[u8]) -> Result<Self, OAuth2Error> {
        Ok(Self {
            signing: None,
            verification: verification_key_from_pem(algorithm, public_pem)?,
        })
    }
}

#[async_trait]
impl KeyProvider for StaticKeyProvider {
    async fn signing_key(&self) -> Result<SigningKey, OAuth2Error> {
        self.signing.clone().ok_or_else(|| {
            OAuth2Error::Signing(SigningError::KeyUnavailable {
                message: "provider holds no private key".to_string(),
            })
        })
    }

    async fn verification_key(&self) -> Result<VerificationKey, OAuth2Error> {
        Ok(self.verification.clone())
    }
}

/// Reads PEM files on every call, so rotated key files are picked up
/// without a restart.
#[derive(Clone, Debug)]
pub struct PemFileKeyProvider {
    algorithm: Algorithm,
    private_key_path: Option<PathBuf>,
    public_key_path: PathBuf,
}

impl PemFileKeyProvider {
    /// Create a provider over a key pair on disk.
    pub fn new(
        algorithm: Algorithm,
        private_key_path: impl Into<PathBuf>,
        public_key_path: impl Into<PathBuf>,
    ) -> Result<Self, OAuth2Error> {
        key_family(algorithm)?;
        Ok(Self {
            algorithm,
            private_key_path: Some(private_key_path.into()),
            public_key_path: public_key_path.into(),
        })
    }

    /// Create a verification-only provider.
    pub fn public_only(
        algorithm: Algorithm,
        public_key_path: impl Into<PathBuf>,
    ) -> Result<Self, OAuth2Error> {
        key_family(algorithm)?;
        Ok(Self {
            algorithm,
            private_key_path: None,
            public_key_path: public_key_path.into(),
        })
    }

    async fn read(path: &PathBuf) -> Result<Vec<u8>, OAuth2Error> {
        tokio::fs::read(path).await.map_err(|e| {
            OAuth2Error::Signing(SigningError::KeyUnavailable {
                message: format!("{}: {}", path.display(), e),
            })
        })
    }
}

#[async_trait]
impl KeyProvider for PemFileKeyProvider {
    async fn signing_key(&self) -> Result<SigningKey, OAuth2Error> {
        let path = self.private_key_path.as_ref().ok_or_else(|| {
            OAuth2Error::Signing(SigningError::KeyUnavailable {
                message: "no private key path configured".to_string(),
            })
        })?;
        let pem = Self::read(path).await?;
        signing_key_from_pem(self.algorithm, &pem)
    }

    async fn verification_key(&self) -> Result<VerificationKey, OAuth2Error> {
        let pem = Self::read(&self.public_key_path).await?;
        verification_key_from_pem(self.algorithm, &pem)
    }
}

/// Claims carried by a bearer assertion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionClaims {
    /// Access token identifier.
    pub jti: String,
    /// Client the token was issued to.
    pub aud: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl AssertionClaims {
    /// Claims for `token`, issued at `issued_at` (unix seconds).
    pub fn for_token(token: &AccessToken, issued_at: i64, issuer: Option<&str>) -> Self {
        Self {
            jti: token.identifier().to_string(),
            aud: token.client_id().to_string(),
            sub: token.user_id().map(String::from),
            iss: issuer.map(String::from),
            iat: issued_at,
            nbf: issued_at,
            exp: token.expires_at().timestamp(),
            scopes: token.scopes().iter().cloned().collect(),
        }
    }
}

/// Sign claims into a compact JWT.
pub fn encode_assertion(claims: &AssertionClaims, key: &SigningKey) -> Result<String, OAuth2Error> {
    let header = Header::new(key.algorithm);
    jsonwebtoken::encode(&header, claims, &key.key).map_err(|e| {
        OAuth2Error::Signing(SigningError::EncodeFailed {
            message: e.to_string(),
        })
    })
}

/// Check the signature and decode the claims.
///
/// Only the signature and algorithm are checked here; time claims are left to
/// the caller, which owns the clock.
pub fn decode_assertion(token: &str, key: &VerificationKey) -> Result<AssertionClaims, OAuth2Error> {
    let mut validation = Validation::new(key.algorithm);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    jsonwebtoken::decode::<AssertionClaims>(token, &key.key, &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                OAuth2Error::Token(TokenError::InvalidSignature)
            }
            ErrorKind::InvalidKeyFormat
            | ErrorKind::InvalidRsaKey(_)
            | ErrorKind::InvalidEcdsaKey => invalid_key(e.to_string()),
            _ => OAuth2Error::Token(TokenError::Malformed {
                message: e.to_string(),
            }),
        })
}
