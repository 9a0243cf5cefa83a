//! Frame decoding
//!
//! One line on the wire is one frame. Responses start with a status token,
//! followed by zero or more `:` separated parameters.

use super::{Command, ProtocolError, DELIMITER, STATUS_OK, TERMINATOR};

/// A decoded response line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    /// Status token, `OK` on success
    pub status: String,
    /// Response parameters in order
    pub params: Vec<String>,
}

impl ResponseFrame {
    /// Successful response carrying `params`
    pub fn ok<I, S>(params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            status: STATUS_OK.to_string(),
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    /// Error response with a single detail parameter
    pub fn error(token: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            status: token.into(),
            params: vec![detail.into()],
        }
    }

    /// Decode one response line. A trailing terminator (and `\r`) is optional.
    pub fn parse(line: &[u8]) -> Result<Self, ProtocolError> {
        let text = line_to_str(line)?;

        let (status, params) = match text.split_once(DELIMITER) {
            Some((status, rest)) => (
                status.to_string(),
                rest.split(DELIMITER).map(str::to_string).collect(),
            ),
            None => (text.to_string(), Vec::new()),
        };

        Ok(Self { status, params })
    }

    /// Whether the DUT reported success
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }

    /// Turn an error status into [`ProtocolError::Device`] for `command`.
    ///
    /// The first parameter is the DUT supplied detail; a bare error token
    /// yields an empty detail.
    pub fn into_result(self, command: &str) -> Result<Self, ProtocolError> {
        if self.is_ok() {
            return Ok(self);
        }
        let detail = self.params.into_iter().next().unwrap_or_default();
        Err(ProtocolError::device(command, detail))
    }

    /// Encode as a wire line, used by the DUT side of the protocol
    pub fn encode(&self) -> Vec<u8> {
        let mut line = self.status.clone();
        for param in &self.params {
            line.push(DELIMITER);
            line.push_str(param);
        }
        line.push(TERMINATOR);
        line.into_bytes()
    }
}

/// Decode a request line back into a [`Command`].
///
/// This is the DUT side of [`Command::encode`]: the first field is the command
/// name, every further field a parameter.
pub fn decode_request(line: &[u8]) -> Result<Command, ProtocolError> {
    let text = line_to_str(line)?;
    let mut fields = text.split(DELIMITER);
    let name = fields.next().unwrap_or_default();
    if name.is_empty() {
        return Err(ProtocolError::InvalidResponse("empty request line".into()));
    }
    Ok(Command::new(name).params(fields))
}

fn line_to_str(line: &[u8]) -> Result<&str, ProtocolError> {
    let line = line.strip_suffix(&[TERMINATOR as u8]).unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    if !line.is_ascii() {
        return Err(ProtocolError::InvalidResponse(format!(
            "non-ASCII line: {}",
            String::from_utf8_lossy(line)
        )));
    }
    std::str::from_utf8(line).map_err(|e| ProtocolError::InvalidResponse(e.to_string()))
}
