//! Parsing and formatting of the `Disposition-Notification-Options` header.
//!
//! A sender that wants a signed receipt includes this header on the outbound
//! message, e.g.:
//!
//! ```text
//! signed-receipt-protocol=required,pkcs7-signature; signed-receipt-micalg=required,sha1
//! ```
//!
//! Each attribute carries an importance token (`required` or `optional`)
//! followed by one or more values. Serialization normalizes whitespace to a
//! single space after commas and semicolons.

/// Attribute names defined for signed receipts.
const SIGNED_RECEIPT_PROTOCOL: &str = "signed-receipt-protocol";
const SIGNED_RECEIPT_MICALG: &str = "signed-receipt-micalg";

/// Parsed `Disposition-Notification-Options` value.
///
/// Both attributes are optional; an empty header parses to a value with no
/// protocol and no micalg, which means an unsigned receipt is acceptable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispositionOptions {
    protocol_importance: Option<String>,
    protocol: Option<String>,
    micalg_importance: Option<String>,
    micalgs: Vec<String>,
}

impl DispositionOptions {
    /// Build options requesting a signed receipt over the given micalg.
    pub fn signed(protocol: impl Into<String>, micalg: impl Into<String>) -> Self {
        Self {
            protocol_importance: Some("required".to_owned()),
            protocol: Some(protocol.into()),
            micalg_importance: Some("required".to_owned()),
            micalgs: vec![micalg.into()],
        }
    }

    /// Parse a header value.
    ///
    /// Attributes are separated by `;`, the attribute name from its value
    /// list by `=`, and list entries by `,`. Unknown attribute names are
    /// skipped: real-world peers attach vendor extensions here and rejecting
    /// them would break otherwise valid exchanges. All tokens are lower-cased.
    pub fn parse(text: &str) -> Result<Self, OptionsFormatError> {
        let mut parsed = Self::default();
        for attribute in text.split(';') {
            let attribute = attribute.trim();
            if attribute.is_empty() {
                continue;
            }
            let (name, value_list) = attribute
                .split_once('=')
                .ok_or_else(|| OptionsFormatError::new(attribute))?;

            let mut values = value_list
                .split(',')
                .map(|v| v.trim().to_ascii_lowercase())
                .filter(|v| !v.is_empty());
            let importance = values
                .next()
                .ok_or_else(|| OptionsFormatError::new(attribute))?;

            match name.trim().to_ascii_lowercase().as_str() {
                SIGNED_RECEIPT_PROTOCOL => {
                    let protocol = values
                        .next()
                        .ok_or_else(|| OptionsFormatError::new(attribute))?;
                    parsed.protocol_importance = Some(importance);
                    parsed.protocol = Some(protocol);
                }
                SIGNED_RECEIPT_MICALG => {
                    let micalgs: Vec<String> = values.collect();
                    if micalgs.is_empty() {
                        return Err(OptionsFormatError::new(attribute));
                    }
                    parsed.micalg_importance = Some(importance);
                    parsed.micalgs = micalgs;
                }
                _ => {}
            }
        }
        Ok(parsed)
    }

    pub fn protocol_importance(&self) -> Option<&str> {
        self.protocol_importance.as_deref()
    }

    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    pub fn micalg_importance(&self) -> Option<&str> {
        self.micalg_importance.as_deref()
    }

    /// All requested micalg values, preferred first.
    pub fn micalgs(&self) -> &[String] {
        &self.micalgs
    }

    /// The preferred micalg, if any was requested.
    pub fn first_micalg(&self) -> Option<&str> {
        self.micalgs.first().map(String::as_str)
    }

    /// True when a signed receipt was requested at all.
    pub fn signing_requested(&self) -> bool {
        self.protocol.is_some()
    }
}

impl std::fmt::Display for DispositionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        if let (Some(importance), Some(protocol)) = (&self.protocol_importance, &self.protocol) {
            write!(f, "{SIGNED_RECEIPT_PROTOCOL}={importance}, {protocol}")?;
            first = false;
        }
        if let Some(importance) = &self.micalg_importance {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "{SIGNED_RECEIPT_MICALG}={importance}")?;
            for micalg in &self.micalgs {
                write!(f, ", {micalg}")?;
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for DispositionOptions {
    type Err = OptionsFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Error returned for a malformed options attribute.
#[derive(Debug)]
pub struct OptionsFormatError {
    attribute: String,
}

impl OptionsFormatError {
    fn new(attribute: &str) -> Self {
        Self {
            attribute: attribute.to_owned(),
        }
    }
}

impl std::fmt::Display for OptionsFormatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "malformed disposition-notification-options attribute '{}'",
            self.attribute
        )
    }
}

impl std::error::Error for OptionsFormatError {}
