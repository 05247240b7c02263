use crate::error::EnvelopeError;
use bytes::Bytes;
use http::header::CONTENT_LENGTH;
use http::{HeaderMap, HeaderValue};

/// A message body together with the headers the transforms read and write.
///
/// HTTP requests, HTTP responses and gRPC requests are all reduced to this
/// shape before sealing or opening, so one transform list serves every framing.
#[derive(Debug, Clone, Default)]
pub struct Parcel {
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Parcel {
    pub fn new(headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            headers,
            body: body.into(),
        }
    }

    /// Replaces the body and keeps `Content-Length` in step with it.
    pub fn replace_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
        self.headers
            .insert(CONTENT_LENGTH, HeaderValue::from(self.body.len()));
    }

    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// One reversible step of the envelope.
///
/// Each transform decides from the parcel's headers and its own configuration
/// whether it applies; an inactive transform leaves the parcel untouched.
pub trait Transform: Send + Sync {
    fn name(&self) -> &'static str;

    fn seal(&self, parcel: &mut Parcel) -> Result<(), EnvelopeError>;

    fn open(&self, parcel: &mut Parcel) -> Result<(), EnvelopeError>;
}

/// Ordered list of transforms. `seal` runs front to back, `open` back to front.
#[derive(Default)]
pub struct Pipeline {
    transforms: Vec<Box<dyn Transform>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, transform: impl Transform + 'static) -> Self {
        self.transforms.push(Box::new(transform));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.transforms.iter().map(|t| t.name()).collect()
    }

    pub fn seal(&self, parcel: &mut Parcel) -> Result<(), EnvelopeError> {
        for t in &self.transforms {
            t.seal(parcel)?;
        }
        Ok(())
    }

    pub fn open(&self, parcel: &mut Parcel) -> Result<(), EnvelopeError> {
        for t in self.transforms.iter().rev() {
            if let Err(e) = t.open(parcel) {
                tracing::debug!(transform = t.name(), error = %e, "envelope open failed");
                return Err(e);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
