use crate::error::EnvelopeError;
use crate::pipeline::{Parcel, Transform};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use http::header::{CONTENT_ENCODING, CONTENT_TYPE};
use http::HeaderValue;
use std::io::{Read, Write};

const COMPRESSIBLE: [&str; 2] = ["application/json", "text/html"];

/// Gzip for JSON and HTML bodies.
#[derive(Debug, Clone, Copy, Default)]
pub struct Compress;

impl Compress {
    pub fn is_compressible(content_type: Option<&str>) -> bool {
        content_type
            .and_then(|ct| ct.split(';').next())
            .map(|ct| COMPRESSIBLE.contains(&ct.trim()))
            .unwrap_or(false)
    }

    pub fn gzip(data: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).map_err(EnvelopeError::Compress)?;
        encoder.finish().map_err(EnvelopeError::Compress)
    }

    pub fn gunzip(data: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
        let mut decoder = GzDecoder::new(data);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(EnvelopeError::Decompress)?;
        Ok(out)
    }
}

impl Transform for Compress {
    fn name(&self) -> &'static str {
        "compress"
    }

    fn seal(&self, parcel: &mut Parcel) -> Result<(), EnvelopeError> {
        if !Self::is_compressible(parcel.header_str(CONTENT_TYPE.as_str())) {
            return Ok(());
        }
        let packed = Self::gzip(&parcel.body)?;
        parcel.replace_body(packed);
        parcel
            .headers
            .insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        Ok(())
    }

    fn open(&self, parcel: &mut Parcel) -> Result<(), EnvelopeError> {
        let gzipped = parcel
            .header_str(CONTENT_ENCODING.as_str())
            .map(|v| v.eq_ignore_ascii_case("gzip"))
            .unwrap_or(false);
        if !gzipped {
            return Ok(());
        }
        let plain = Self::gunzip(&parcel.body)?;
        parcel.replace_body(plain);
        parcel.headers.remove(CONTENT_ENCODING);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderMap;

    #[test]
    fn only_json_and_html_are_compressed() {
        assert!(Compress::is_compressible(Some("application/json")));
        assert!(Compress::is_compressible(Some("text/html; charset=utf-8")));
        assert!(!Compress::is_compressible(Some("text/plain")));
        assert!(!Compress::is_compressible(Some("application/grpc")));
        assert!(!Compress::is_compressible(None));
    }

    #[test]
    fn plain_text_passes_through() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        let mut parcel = Parcel::new(headers, "22.2");
        Compress.seal(&mut parcel).unwrap();
        assert_eq!(parcel.body.as_ref(), b"22.2");
        assert!(!parcel.headers.contains_key(CONTENT_ENCODING));
    }

    #[test]
    fn corrupt_gzip_is_an_error() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        let mut parcel = Parcel::new(headers, "definitely not gzip");
        assert!(matches!(
            Compress.open(&mut parcel),
            Err(EnvelopeError::Decompress(_))
        ));
    }
}
