//! PEM key loading. PKCS#8 is tried first, then PKCS#1.

use crate::error::EnvelopeError;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::path::Path;

fn read_pem(path: &Path) -> Result<String, EnvelopeError> {
    std::fs::read_to_string(path)
        .map_err(|e| EnvelopeError::Key(format!("read {}: {e}", path.display())))
}

pub fn parse_public_key(pem: &str) -> Result<RsaPublicKey, EnvelopeError> {
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| EnvelopeError::Key(format!("parse public key: {e}")))
}

pub fn parse_private_key(pem: &str) -> Result<RsaPrivateKey, EnvelopeError> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| EnvelopeError::Key(format!("parse private key: {e}")))
}

pub fn load_public_key(path: impl AsRef<Path>) -> Result<RsaPublicKey, EnvelopeError> {
    parse_public_key(&read_pem(path.as_ref())?)
}

pub fn load_private_key(path: impl AsRef<Path>) -> Result<RsaPrivateKey, EnvelopeError> {
    parse_private_key(&read_pem(path.as_ref())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encrypt::tests::test_key;
    use rsa::pkcs1::{EncodeRsaPrivateKey, EncodeRsaPublicKey};
    use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};

    #[test]
    fn loads_pkcs8_and_pkcs1() {
        let dir = tempfile::tempdir().unwrap();
        let key = test_key();

        let private8 = dir.path().join("private8.pem");
        std::fs::write(&private8, key.to_pkcs8_pem(LineEnding::LF).unwrap().as_bytes()).unwrap();
        let private1 = dir.path().join("private1.pem");
        std::fs::write(&private1, key.to_pkcs1_pem(LineEnding::LF).unwrap().as_bytes()).unwrap();

        let public = key.to_public_key();
        let public8 = dir.path().join("public8.pem");
        std::fs::write(&public8, public.to_public_key_pem(LineEnding::LF).unwrap()).unwrap();
        let public1 = dir.path().join("public1.pem");
        std::fs::write(&public1, public.to_pkcs1_pem(LineEnding::LF).unwrap()).unwrap();

        assert_eq!(load_private_key(&private8).unwrap(), key);
        assert_eq!(load_private_key(&private1).unwrap(), key);
        assert_eq!(load_public_key(&public8).unwrap(), public);
        assert_eq!(load_public_key(&public1).unwrap(), public);
    }

    #[test]
    fn missing_file_is_a_key_error() {
        assert!(matches!(
            load_public_key("/nonexistent/metrika.pem"),
            Err(EnvelopeError::Key(_))
        ));
    }
}
