//! MDN disposition construction, parsing, and classification.
//!
//! The disposition is the structured outcome field inside an MDN: it tells
//! the original sender whether its message was processed, and if not, why.
//! This module implements:
//!
//! - [`DispositionType`]: the five-field disposition value with strict
//!   parse/format rules
//! - [`DispositionOutcome`]: success/warning/error classification callers
//!   match on instead of catching exceptions
//! - [`options::DispositionOptions`]: the `Disposition-Notification-Options`
//!   request header (signed-receipt protocol and micalg)
//!
//! ## Wire format
//!
//! ```text
//! action/mdn-action; status[/modifier[: description]]
//! ```
//!
//! Action, mdn-action, and status are mandatory; modifier and description are
//! optional but a description is only meaningful together with a modifier.
//! All tokens except the description are lower-cased on parse.

pub mod options;

use tracing::warn;
use tracing_error::SpanTrace;

/// The disposition action/mdn-action pair used for automatically generated
/// receipts.
const AUTOMATIC_ACTION: &str = "automatic-action";
const MDN_SENT_AUTOMATICALLY: &str = "MDN-sent-automatically";

/// Status value meaning the message was handled successfully.
const STATUS_PROCESSED: &str = "processed";

/// Status modifier spellings with defined semantics.
const MODIFIER_ERROR: &str = "error";
const MODIFIER_WARNING: &str = "warning";

/// A parsed or constructed MDN disposition.
///
/// Immutable once constructed. Use [`DispositionType::success`] and
/// [`DispositionType::error`] for outbound receipts and
/// [`DispositionType::parse`] for inbound ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispositionType {
    action: String,
    mdn_action: String,
    status: String,
    status_modifier: Option<String>,
    status_description: Option<String>,
}

impl DispositionType {
    /// Disposition for a successfully processed message:
    /// `automatic-action/MDN-sent-automatically; processed`.
    pub fn success() -> Self {
        Self {
            action: AUTOMATIC_ACTION.to_owned(),
            mdn_action: MDN_SENT_AUTOMATICALLY.to_owned(),
            status: STATUS_PROCESSED.to_owned(),
            status_modifier: None,
            status_description: None,
        }
    }

    /// Disposition for a rejected message, with the caller-supplied
    /// human-readable description:
    /// `automatic-action/MDN-sent-automatically; processed/Error: <description>`.
    pub fn error(description: impl Into<String>) -> Self {
        Self {
            action: AUTOMATIC_ACTION.to_owned(),
            mdn_action: MDN_SENT_AUTOMATICALLY.to_owned(),
            status: STATUS_PROCESSED.to_owned(),
            status_modifier: Some("Error".to_owned()),
            status_description: Some(description.into()),
        }
    }

    /// Parse a disposition header value.
    ///
    /// Tokens are separated by `/`, `;`, and `:` in strict order. The three
    /// mandatory tokens must be present and non-empty; the modifier and
    /// description are optional. A `:` appearing without a preceding `/`
    /// modifier separator is rejected rather than silently swallowed.
    pub fn parse(text: &str) -> Result<Self, DispositionFormatError> {
        let text = text.trim();

        let (action, rest) = text
            .split_once('/')
            .ok_or_else(|| DispositionFormatError::missing("mdn-action separator '/'", text))?;
        let (mdn_action, rest) = rest
            .split_once(';')
            .ok_or_else(|| DispositionFormatError::missing("status separator ';'", text))?;

        let (status, status_modifier, status_description) = match rest.split_once('/') {
            None => {
                if rest.contains(':') {
                    return Err(DispositionFormatError::garbage(
                        "description without a status modifier",
                        text,
                    ));
                }
                (rest, None, None)
            }
            Some((status, modifier_rest)) => match modifier_rest.split_once(':') {
                None => (status, Some(modifier_rest), None),
                Some((modifier, description)) => {
                    (status, Some(modifier), Some(description.trim().to_owned()))
                }
            },
        };

        let action = lowered_token(action)
            .ok_or_else(|| DispositionFormatError::missing("action token", text))?;
        let mdn_action = lowered_token(mdn_action)
            .ok_or_else(|| DispositionFormatError::missing("mdn-action token", text))?;
        let status = lowered_token(status)
            .ok_or_else(|| DispositionFormatError::missing("status token", text))?;
        let status_modifier = match status_modifier {
            Some(modifier) => Some(lowered_token(modifier).ok_or_else(|| {
                DispositionFormatError::missing("status-modifier token", text)
            })?),
            None => None,
        };

        Ok(Self {
            action,
            mdn_action,
            status,
            status_modifier,
            status_description,
        })
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn mdn_action(&self) -> &str {
        &self.mdn_action
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn status_modifier(&self) -> Option<&str> {
        self.status_modifier.as_deref()
    }

    pub fn status_description(&self) -> Option<&str> {
        self.status_description.as_deref()
    }

    /// Classify this disposition.
    ///
    /// - modifier `Error` → [`DispositionOutcome::Error`], regardless of the
    ///   status text
    /// - status other than `processed` → [`DispositionOutcome::Error`], even
    ///   with no modifier set
    /// - modifier `Warning` → [`DispositionOutcome::Warning`]
    /// - anything else → [`DispositionOutcome::Success`]
    pub fn outcome(&self) -> DispositionOutcome {
        let text = || {
            self.status_description
                .clone()
                .unwrap_or_else(|| self.to_string())
        };

        if self
            .status_modifier
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case(MODIFIER_ERROR))
        {
            return DispositionOutcome::Error(text());
        }
        if !self.status.eq_ignore_ascii_case(STATUS_PROCESSED) {
            return DispositionOutcome::Error(text());
        }
        if self
            .status_modifier
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case(MODIFIER_WARNING))
        {
            return DispositionOutcome::Warning(text());
        }
        DispositionOutcome::Success
    }

    /// Check whether this disposition acknowledges successful delivery.
    ///
    /// Warnings are logged and treated as success; an `Error` modifier or any
    /// status other than `processed` is returned as a [`DispositionError`]
    /// for the caller to translate into a failed delivery.
    pub fn validate(&self, context: &str) -> Result<(), DispositionError> {
        match self.outcome() {
            DispositionOutcome::Success => Ok(()),
            DispositionOutcome::Warning(text) => {
                warn!(disposition = %self, context, warning = %text, "MDN carried a warning");
                Ok(())
            }
            DispositionOutcome::Error(text) => {
                Err(DispositionError::new(self.clone(), text, context))
            }
        }
    }
}

impl std::fmt::Display for DispositionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}; {}", self.action, self.mdn_action, self.status)?;
        if let Some(modifier) = &self.status_modifier {
            write!(f, "/{modifier}")?;
            if let Some(description) = &self.status_description {
                write!(f, ": {description}")?;
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for DispositionType {
    type Err = DispositionFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn lowered_token(raw: &str) -> Option<String> {
    let token = raw.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_ascii_lowercase())
    }
}

/// Classification of a disposition, matched by callers instead of caught.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispositionOutcome {
    /// `processed` with no failure modifier.
    Success,
    /// `Warning` modifier: logged, not propagated as a failure.
    Warning(String),
    /// `Error` modifier or a non-`processed` status.
    Error(String),
}

/// Error returned when a disposition string is malformed.
#[derive(Debug)]
pub struct DispositionFormatError {
    what: &'static str,
    input: String,
    garbage: bool,
}

impl DispositionFormatError {
    fn missing(what: &'static str, input: &str) -> Self {
        Self {
            what,
            input: input.to_owned(),
            garbage: false,
        }
    }

    fn garbage(what: &'static str, input: &str) -> Self {
        Self {
            what,
            input: input.to_owned(),
            garbage: true,
        }
    }
}

impl std::fmt::Display for DispositionFormatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.garbage {
            write!(
                f,
                "invalid disposition '{}': unexpected {}",
                self.input, self.what
            )
        } else {
            write!(f, "invalid disposition '{}': missing {}", self.input, self.what)
        }
    }
}

impl std::error::Error for DispositionFormatError {}

/// Error derived from an MDN that signals failed delivery.
///
/// Carries the full [`DispositionType`] and the human-readable text so
/// callers can decide between retry and escalation.
#[derive(Debug)]
pub struct DispositionError {
    context: SpanTrace,
    disposition: DispositionType,
    text: String,
    subject: String,
}

impl DispositionError {
    fn new(disposition: DispositionType, text: String, subject: &str) -> Self {
        Self {
            context: SpanTrace::capture(),
            disposition,
            text,
            subject: subject.to_owned(),
        }
    }

    /// The disposition that produced this error.
    pub fn disposition(&self) -> &DispositionType {
        &self.disposition
    }

    /// The human-readable failure text.
    pub fn text(&self) -> &str {
        &self.text
    }
}

impl std::fmt::Display for DispositionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "disposition signals failure ({}): {} [{}]",
            self.disposition, self.text, self.subject
        )?;
        self.context.fmt(f)
    }
}

impl std::error::Error for DispositionError {}
