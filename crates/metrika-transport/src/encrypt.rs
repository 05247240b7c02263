use crate::error::EnvelopeError;
use crate::pipeline::{Parcel, Transform};
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};

/// PKCS#1 v1.5 padding overhead per block.
const PKCS1_OVERHEAD: usize = 11;

/// RSA-PKCS1v15 body encryption.
///
/// Bodies longer than one block are split into `k - 11` byte chunks and the
/// `k` byte ciphertexts concatenated, where `k` is the modulus size.
#[derive(Clone, Default)]
pub struct Encrypt {
    public: Option<RsaPublicKey>,
    private: Option<RsaPrivateKey>,
}

impl Encrypt {
    pub fn sender(public: RsaPublicKey) -> Self {
        Self {
            public: Some(public),
            private: None,
        }
    }

    pub fn receiver(private: RsaPrivateKey) -> Self {
        Self {
            public: None,
            private: Some(private),
        }
    }

    pub fn encrypt(key: &RsaPublicKey, plain: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
        let k = key.size();
        if k <= PKCS1_OVERHEAD {
            return Err(EnvelopeError::Key(format!("modulus of {k} bytes is too small")));
        }
        let mut rng = rand::thread_rng();
        let mut out = Vec::with_capacity(plain.len().div_ceil(k - PKCS1_OVERHEAD) * k);
        for chunk in plain.chunks(k - PKCS1_OVERHEAD) {
            let block = key
                .encrypt(&mut rng, Pkcs1v15Encrypt, chunk)
                .map_err(|e| EnvelopeError::Encrypt(e.to_string()))?;
            out.extend_from_slice(&block);
        }
        Ok(out)
    }

    pub fn decrypt(key: &RsaPrivateKey, cipher: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
        let k = key.size();
        if cipher.len() % k != 0 {
            return Err(EnvelopeError::Decrypt(format!(
                "ciphertext of {} bytes is not a multiple of {k}",
                cipher.len()
            )));
        }
        let mut out = Vec::with_capacity(cipher.len());
        for block in cipher.chunks(k) {
            let plain = key
                .decrypt(Pkcs1v15Encrypt, block)
                .map_err(|e| EnvelopeError::Decrypt(e.to_string()))?;
            out.extend_from_slice(&plain);
        }
        Ok(out)
    }
}

impl Transform for Encrypt {
    fn name(&self) -> &'static str {
        "encrypt"
    }

    fn seal(&self, parcel: &mut Parcel) -> Result<(), EnvelopeError> {
        let Some(key) = &self.public else {
            return Ok(());
        };
        if parcel.body.is_empty() {
            return Ok(());
        }
        let cipher = Self::encrypt(key, &parcel.body)?;
        parcel.replace_body(cipher);
        Ok(())
    }

    fn open(&self, parcel: &mut Parcel) -> Result<(), EnvelopeError> {
        let Some(key) = &self.private else {
            return Ok(());
        };
        if parcel.body.is_empty() {
            return Ok(());
        }
        let plain = Self::decrypt(key, &parcel.body)?;
        parcel.replace_body(plain);
        Ok(())
    }
}

impl std::fmt::Debug for Encrypt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encrypt")
            .field("public", &self.public.is_some())
            .field("private", &self.private.is_some())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use http::HeaderMap;
    use std::sync::OnceLock;

    pub(crate) fn test_key() -> RsaPrivateKey {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| {
            RsaPrivateKey::new(&mut rand::thread_rng(), 1024).expect("generate test key")
        })
        .clone()
    }

    #[test]
    fn multi_block_round_trip() {
        let key = test_key();
        let plain: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let cipher = Encrypt::encrypt(&key.to_public_key(), &plain).unwrap();
        assert_eq!(cipher.len() % key.size(), 0);
        assert!(cipher.len() > key.size());
        assert_eq!(Encrypt::decrypt(&key, &cipher).unwrap(), plain);
    }

    #[test]
    fn empty_body_is_left_alone() {
        let key = test_key();
        let mut parcel = Parcel::new(HeaderMap::new(), "");
        Encrypt::sender(key.to_public_key())
            .seal(&mut parcel)
            .unwrap();
        assert!(parcel.body.is_empty());
    }

    #[test]
    fn truncated_ciphertext_is_rejected() {
        let key = test_key();
        let cipher = Encrypt::encrypt(&key.to_public_key(), b"hello").unwrap();
        assert!(matches!(
            Encrypt::decrypt(&key, &cipher[..cipher.len() - 1]),
            Err(EnvelopeError::Decrypt(_))
        ));
    }

    #[test]
    fn seal_updates_content_length() {
        let key = test_key();
        let mut parcel = Parcel::new(HeaderMap::new(), "hello");
        Encrypt::sender(key.to_public_key())
            .seal(&mut parcel)
            .unwrap();
        assert_eq!(
            parcel.header_str("content-length"),
            Some(key.size().to_string().as_str())
        );
    }
}
