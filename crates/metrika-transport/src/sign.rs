use crate::error::EnvelopeError;
use crate::pipeline::{Parcel, Transform};
use crate::HASH_HEADER;
use hmac::{Hmac, Mac};
use http::HeaderValue;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 of the plaintext body under a pre-shared secret.
#[derive(Clone)]
pub struct Sign {
    secret: Vec<u8>,
}

impl Sign {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self) -> Result<HmacSha256, EnvelopeError> {
        HmacSha256::new_from_slice(&self.secret).map_err(|e| EnvelopeError::Key(e.to_string()))
    }

    /// Hex digest of `body`.
    pub fn digest(&self, body: &[u8]) -> Result<String, EnvelopeError> {
        let mut mac = self.mac()?;
        mac.update(body);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Constant-time check of a hex digest against `body`.
    pub fn verify(&self, body: &[u8], signature: &str) -> Result<(), EnvelopeError> {
        let expected = hex::decode(signature).map_err(|_| EnvelopeError::UnsignedRequest)?;
        let mut mac = self.mac()?;
        mac.update(body);
        mac.verify_slice(&expected)
            .map_err(|_| EnvelopeError::UnsignedRequest)
    }
}

impl Transform for Sign {
    fn name(&self) -> &'static str {
        "sign"
    }

    fn seal(&self, parcel: &mut Parcel) -> Result<(), EnvelopeError> {
        if self.secret.is_empty() || parcel.body.is_empty() {
            return Ok(());
        }
        let digest = self.digest(&parcel.body)?;
        let value = HeaderValue::from_str(&digest).map_err(|e| EnvelopeError::Key(e.to_string()))?;
        parcel.headers.insert(HASH_HEADER, value);
        Ok(())
    }

    fn open(&self, parcel: &mut Parcel) -> Result<(), EnvelopeError> {
        if self.secret.is_empty() {
            return Ok(());
        }
        let Some(signature) = parcel.header_str(HASH_HEADER).filter(|s| !s.is_empty()) else {
            return Ok(());
        };
        self.verify(&parcel.body, signature)
    }
}

impl std::fmt::Debug for Sign {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sign").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderMap;
    use proptest::prelude::*;

    #[test]
    fn empty_body_is_not_signed() {
        let mut parcel = Parcel::new(HeaderMap::new(), "");
        Sign::new("secret").seal(&mut parcel).unwrap();
        assert!(!parcel.headers.contains_key(HASH_HEADER));
    }

    #[test]
    fn empty_secret_disables_signing() {
        let mut parcel = Parcel::new(HeaderMap::new(), "payload");
        Sign::new("").seal(&mut parcel).unwrap();
        assert!(!parcel.headers.contains_key(HASH_HEADER));
    }

    #[test]
    fn missing_header_is_accepted() {
        let mut parcel = Parcel::new(HeaderMap::new(), "payload");
        Sign::new("secret").open(&mut parcel).unwrap();
    }

    #[test]
    fn garbage_signature_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(HASH_HEADER, HeaderValue::from_static("not-hex"));
        let mut parcel = Parcel::new(headers, "payload");
        assert!(matches!(
            Sign::new("secret").open(&mut parcel),
            Err(EnvelopeError::UnsignedRequest)
        ));
    }

    #[test]
    fn known_digest() {
        // HMAC-SHA256("key", "The quick brown fox jumps over the lazy dog")
        let digest = Sign::new("key")
            .digest(b"The quick brown fox jumps over the lazy dog")
            .unwrap();
        assert_eq!(
            digest,
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    proptest! {
        #[test]
        fn signature_verifies_only_its_body(
            key in "[a-z]{1,16}",
            body in proptest::collection::vec(any::<u8>(), 1..256),
            other in proptest::collection::vec(any::<u8>(), 1..256),
        ) {
            let sign = Sign::new(&key);
            let digest = sign.digest(&body).unwrap();
            prop_assert!(sign.verify(&body, &digest).is_ok());
            if other != body {
                prop_assert!(sign.verify(&other, &digest).is_err());
            }
        }
    }
}
