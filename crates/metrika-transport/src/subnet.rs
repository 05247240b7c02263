use crate::error::EnvelopeError;
use crate::REAL_IP_HEADER;
use http::HeaderMap;
use ipnet::IpNet;
use std::net::IpAddr;
use std::str::FromStr;

/// CIDR allow-list checked against the `X-Real-IP` header.
///
/// An unconfigured subnet admits everything.
#[derive(Debug, Clone, Default)]
pub struct TrustedSubnet {
    net: Option<IpNet>,
}

impl TrustedSubnet {
    pub fn parse(cidr: &str) -> Result<Self, EnvelopeError> {
        let cidr = cidr.trim();
        if cidr.is_empty() {
            return Ok(Self::default());
        }
        let net = IpNet::from_str(cidr)
            .map_err(|e| EnvelopeError::Key(format!("invalid trusted subnet {cidr:?}: {e}")))?;
        Ok(Self { net: Some(net) })
    }

    pub fn is_enabled(&self) -> bool {
        self.net.is_some()
    }

    pub fn admit(&self, headers: &HeaderMap) -> Result<(), EnvelopeError> {
        let Some(net) = &self.net else {
            return Ok(());
        };
        let raw = headers
            .get(REAL_IP_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .trim();
        match raw.parse::<IpAddr>() {
            Ok(ip) if net.contains(&ip) => Ok(()),
            _ => Err(EnvelopeError::UntrustedSubnet(raw.to_string())),
        }
    }
}
