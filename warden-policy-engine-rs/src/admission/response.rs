use super::types::{AdmissionResponse, ResponseStatus};

/// HTTP-style status code carried by a denial
pub const DENIED_CODE: u16 = 403;
/// Status code carried by an allowed response that has warnings
pub const WARNED_CODE: u16 = 200;
/// Status code for requests that could not be decoded
pub const MALFORMED_CODE: u16 = 400;

/// Builder for constructing admission responses
#[derive(Debug)]
pub struct ResponseBuilder {
    uid: String,
    allowed: bool,
    code: Option<u16>,
    messages: Vec<String>,
    warnings: Vec<String>,
}

impl ResponseBuilder {
    /// Start an allowing response for the given request uid
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            allowed: true,
            code: None,
            messages: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Mark this response as a denial
    pub fn deny(mut self) -> Self {
        self.allowed = false;
        self
    }

    /// Override the status code
    pub fn code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    /// Append a status message
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }

    /// Append a warning
    pub fn warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    /// Build the final response.
    ///
    /// Denials carry their messages; allowed responses with warnings carry the
    /// warnings as their message. Clean allows carry no status.
    pub fn build(self) -> AdmissionResponse {
        let status = if !self.allowed {
            Some(ResponseStatus {
                code: self.code.unwrap_or(DENIED_CODE),
                message: self.messages.join("; "),
            })
        } else if !self.warnings.is_empty() {
            Some(ResponseStatus {
                code: self.code.unwrap_or(WARNED_CODE),
                message: self.warnings.join("; "),
            })
        } else {
            None
        };

        AdmissionResponse {
            uid: self.uid,
            allowed: self.allowed,
            status,
            warnings: self.warnings,
        }
    }
}
