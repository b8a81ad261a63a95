//! JSON result envelopes written to stdout.

use fleetops_control::{Allowlist, ControlError};
use fleetops_provider::User;
use serde::Serialize;
use serde_json::{json, Value};

/// A user as reported by `find-user`.
#[derive(Debug, Serialize)]
pub struct UserView {
    /// The provider record.
    #[serde(flatten)]
    pub user: User,
    /// Whether the user is on the privileged allowlist.
    pub privileged: bool,
}

impl UserView {
    /// Attach the allowlist flag to a user.
    #[must_use]
    pub fn new(user: User, allowlist: &Allowlist) -> Self {
        let privileged = allowlist.contains(user.uid);
        Self { user, privileged }
    }
}

/// What a command produced: a result value and, for fleet-wide commands with
/// failures, the aggregate error alongside it.
#[derive(Debug)]
pub struct CommandOutput {
    /// Serialized result.
    pub result: Value,
    /// Error to report with the result.
    pub error: Option<ControlError>,
}

impl CommandOutput {
    /// A successful result.
    pub fn ok(result: &impl Serialize) -> serde_json::Result<Self> {
        Ok(Self {
            result: serde_json::to_value(result)?,
            error: None,
        })
    }

    /// A result that still carries an error, e.g. a partial fleet failure.
    pub fn with_error(result: &impl Serialize, error: ControlError) -> serde_json::Result<Self> {
        Ok(Self {
            result: serde_json::to_value(result)?,
            error: Some(error),
        })
    }

    /// Process exit status for this output.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        self.error.as_ref().map_or(0, ControlError::exit_code)
    }

    /// Render the envelope.
    #[must_use]
    pub fn render(&self) -> Value {
        match &self.error {
            None => json!({ "ok": true, "result": self.result }),
            Some(err) => json!({
                "ok": false,
                "result": self.result,
                "error": error_body(err),
            }),
        }
    }
}

/// Render the envelope for a command that failed outright.
#[must_use]
pub fn render_error(err: &ControlError) -> Value {
    json!({ "ok": false, "error": error_body(err) })
}

fn error_body(err: &ControlError) -> Value {
    json!({
        "kind": err.kind(),
        "message": err.to_string(),
        "retriable": err.is_retriable(),
    })
}
