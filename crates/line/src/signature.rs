use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;

pub const SIGNATURE_HEADER: &str = "x-line-signature";

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("request carries no {SIGNATURE_HEADER} header")]
    Missing,
    #[error("signature is not valid base64: {0}")]
    Encoding(String),
    #[error("signature does not match the request body")]
    Mismatch,
    #[error("channel secret cannot key hmac-sha256")]
    InvalidKey,
}

/// Checks that a webhook body was signed with the channel secret.
///
/// The signature must be computed over the raw body bytes exactly as received;
/// re-serialized JSON will not match.
#[derive(Clone)]
pub struct SignatureVerifier {
    keyed: HmacSha256,
}

impl SignatureVerifier {
    pub fn new(channel_secret: &SecretString) -> Result<Self, SignatureError> {
        let keyed = HmacSha256::new_from_slice(channel_secret.expose_secret().as_bytes())
            .map_err(|_| SignatureError::InvalidKey)?;
        Ok(Self { keyed })
    }

    pub fn verify(&self, body: &[u8], signature: Option<&str>) -> Result<(), SignatureError> {
        let signature = signature.map(str::trim).filter(|value| !value.is_empty());
        let Some(signature) = signature else {
            return Err(SignatureError::Missing);
        };
        let expected = STANDARD
            .decode(signature)
            .map_err(|error| SignatureError::Encoding(error.to_string()))?;

        self.mac(body).verify_slice(&expected).map_err(|_| SignatureError::Mismatch)
    }

    /// Base64 signature for `body`, as the platform would send it.
    pub fn sign(&self, body: &[u8]) -> String {
        STANDARD.encode(self.mac(body).finalize().into_bytes())
    }

    fn mac(&self, body: &[u8]) -> HmacSha256 {
        let mut mac = self.keyed.clone();
        mac.update(body);
        mac
    }
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier").field("keyed", &"[REDACTED]").finish()
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::{SignatureError, SignatureVerifier};

    fn verifier() -> SignatureVerifier {
        SignatureVerifier::new(&SecretString::from("channel-secret".to_owned())).expect("verifier")
    }

    #[test]
    fn signature_of_exact_body_is_accepted() {
        let body = br#"{"destination":"Ubot","events":[]}"#;
        let signature = verifier().sign(body);

        assert_eq!(verifier().verify(body, Some(&signature)), Ok(()));
    }

    #[test]
    fn known_vector_matches_hmac_sha256_base64() {
        // printf hello | openssl dgst -sha256 -hmac channel-secret -binary | base64
        let signature = "Shi6QMkHaorMtX1qnB247qQzuUGhVNyWmLzuIOnM7eE=";

        assert_eq!(verifier().sign(b"hello"), signature);
        assert_eq!(verifier().verify(b"hello", Some(signature)), Ok(()));
    }

    #[test]
    fn tampered_body_is_rejected() {
        let signature = verifier().sign(br#"{"events":[]}"#);

        assert_eq!(
            verifier().verify(br#"{"events":[{}]}"#, Some(&signature)),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn signature_from_another_secret_is_rejected() {
        let body = br#"{"events":[]}"#;
        let other = SignatureVerifier::new(&SecretString::from("other-secret".to_owned()))
            .expect("verifier");

        assert_eq!(verifier().verify(body, Some(&other.sign(body))), Err(SignatureError::Mismatch));
    }

    #[test]
    fn missing_or_blank_signature_is_rejected() {
        assert_eq!(verifier().verify(b"{}", None), Err(SignatureError::Missing));
        assert_eq!(verifier().verify(b"{}", Some("  ")), Err(SignatureError::Missing));
    }

    #[test]
    fn non_base64_signature_is_rejected() {
        assert!(matches!(
            verifier().verify(b"{}", Some("not*base64")),
            Err(SignatureError::Encoding(_))
        ));
    }

    #[test]
    fn debug_output_redacts_the_key() {
        assert_eq!(format!("{:?}", verifier()), r#"SignatureVerifier { keyed: "[REDACTED]" }"#);
    }
}
