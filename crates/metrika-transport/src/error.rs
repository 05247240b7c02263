#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("request signature does not match body")]
    UnsignedRequest,

    #[error("decrypt failed: {0}")]
    Decrypt(String),

    #[error("encrypt failed: {0}")]
    Encrypt(String),

    #[error("gzip decode failed: {0}")]
    Decompress(#[source] std::io::Error),

    #[error("gzip encode failed: {0}")]
    Compress(#[source] std::io::Error),

    #[error("key error: {0}")]
    Key(String),

    #[error("source address {0:?} is not in the trusted subnet")]
    UntrustedSubnet(String),
}
