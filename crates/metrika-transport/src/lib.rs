pub mod compress;
pub mod encrypt;
pub mod error;
pub mod keys;
pub mod pipeline;
pub mod sign;
pub mod subnet;

pub use compress::Compress;
pub use encrypt::Encrypt;
pub use error::EnvelopeError;
pub use pipeline::{Parcel, Pipeline, Transform};
pub use rsa::{RsaPrivateKey, RsaPublicKey};
pub use sign::Sign;
pub use subnet::TrustedSubnet;

/// Header carrying the hex HMAC-SHA256 of the plaintext body.
pub const HASH_HEADER: &str = "hashsha256";
/// Header carrying the caller's address for subnet admission.
pub const REAL_IP_HEADER: &str = "x-real-ip";
