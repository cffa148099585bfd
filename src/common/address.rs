//! Address records as produced by the command line

use crate::error::{Error, Result};

/// A transport tag plus the transport-specific address text.
///
/// `UDP:127.0.0.1:9000` becomes tag `UDP` and text `127.0.0.1:9000`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AddressRecord {
    tag: String,
    text: String,
}

impl AddressRecord {
    pub fn new(tag: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            text: text.into(),
        }
    }

    /// Split a `TAG:ADDRESS` specification on its first colon
    pub fn parse(spec: &str) -> Result<Self> {
        match spec.split_once(':') {
            Some((tag, text)) if !tag.is_empty() => Ok(Self::new(tag, text)),
            _ => Err(Error::InvalidAddress(format!(
                "expected TAG:ADDRESS, got '{}'",
                spec
            ))),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Case-insensitive tag comparison
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tag.eq_ignore_ascii_case(tag)
    }
}

impl std::fmt::Display for AddressRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.tag, self.text)
    }
}

impl std::str::FromStr for AddressRecord {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_splits_on_first_colon() {
        let record = AddressRecord::parse("UDP:127.0.0.1:9000").unwrap();
        assert_eq!(record.tag(), "UDP");
        assert_eq!(record.text(), "127.0.0.1:9000");

        let record: AddressRecord = "udp-listen:9000".parse().unwrap();
        assert!(record.has_tag("UDP-LISTEN"));
        assert_eq!(record.text(), "9000");
        assert_eq!(record.to_string(), "udp-listen:9000");
    }

    #[test]
    fn test_parse_rejects_missing_tag() {
        assert!(AddressRecord::parse("9000").is_err());
        assert!(AddressRecord::parse(":9000").is_err());
    }
}
