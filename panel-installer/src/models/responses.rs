// Result values returned to the host.

use serde::Serialize;

/// Binary outcome reported to the installer host for one invoked action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ActionResult {
    Success,
    Failure,
}

impl ActionResult {
    pub fn exit_code(self) -> i32 {
        match self {
            ActionResult::Success => 0,
            ActionResult::Failure => 1,
        }
    }

    pub fn is_success(self) -> bool {
        self == ActionResult::Success
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CheckStatus {
    Success,
    Warning,
    Failure,
}

/// One prerequisite finding: a status plus the text appended to the diagnostic log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub status: CheckStatus,
    pub message: String,
}

impl CheckResult {
    pub fn new(status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CheckStatus::Success
    }
}

/// Outcome of a user-input validation. Never an error; always a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub ok: bool,
    pub message: String,
}

impl ValidationOutcome {
    pub fn valid() -> Self {
        Self {
            ok: true,
            message: String::new(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

/// Progress record emitted to the host during the deferred phase.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase", tag = "kind")]
pub enum ProgressEvent {
    /// Start a new bar of `total` ticks.
    Reset { correlation_id: String, total: u32 },
    Increment { correlation_id: String, by: u32 },
    /// Label shown before a unit of work starts.
    ActionText {
        correlation_id: String,
        action: String,
        message: String,
    },
    /// Announces how many ticks a later deferred run will add to the host's estimate.
    Reserve { correlation_id: String, ticks: u32 },
    Error {
        correlation_id: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        elapsed_ms: Option<u128>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_binary() {
        assert_eq!(ActionResult::Success.exit_code(), 0);
        assert_eq!(ActionResult::Failure.exit_code(), 1);
    }

    #[test]
    fn progress_events_serialize_with_kind_tag() {
        let json = serde_json::to_value(ProgressEvent::Increment {
            correlation_id: "c1".into(),
            by: 1,
        })
        .expect("serialize");
        assert_eq!(json["kind"], "increment");
        assert_eq!(json["correlationId"], "c1");
    }
}
