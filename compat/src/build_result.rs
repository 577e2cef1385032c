use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

/// Outcome of a single derivation build. On the wire this is a JSON
/// integer, so the discriminants are part of the protocol.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    IntoPrimitive,
    TryFromPrimitive,
    Serialize,
    Deserialize,
)]
#[repr(u8)]
#[serde(into = "u8", try_from = "u8")]
pub enum BuildStatus {
    Built = 0,
    Substituted = 1,
    AlreadyValid = 2,
    PermanentFailure = 3,
    TransientFailure = 4,
    InputRejected = 5,
    MiscFailure = 6,
    DependencyFailed = 7,
    LogLimitExceeded = 8,
    NotDeterministic = 9,
}

impl BuildStatus {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            BuildStatus::Built | BuildStatus::Substituted | BuildStatus::AlreadyValid
        )
    }
}

/// What a worker reports back after attempting a build.
///
/// `start_time` and `stop_time` are Unix timestamps in seconds;
/// `start_time <= stop_time` always holds for values built through the
/// constructors. `error_msg` is empty exactly when the status is a
/// success status.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    pub status: BuildStatus,

    #[serde(rename = "errorMsg")]
    pub error_msg: String,

    #[serde(rename = "startTime")]
    pub start_time: i64,

    #[serde(rename = "stopTime")]
    pub stop_time: i64,
}

impl BuildResult {
    pub fn success(status: BuildStatus, start_time: i64, stop_time: i64) -> Self {
        debug_assert!(status.is_success());
        BuildResult {
            status,
            error_msg: String::new(),
            start_time,
            stop_time: stop_time.max(start_time),
        }
    }

    pub fn failure(
        status: BuildStatus,
        error_msg: impl Into<String>,
        start_time: i64,
        stop_time: i64,
    ) -> Self {
        debug_assert!(!status.is_success());
        BuildResult {
            status,
            error_msg: error_msg.into(),
            start_time,
            stop_time: stop_time.max(start_time),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_travels_as_integer() {
        let result = BuildResult::success(BuildStatus::Built, 100, 110);
        assert_eq!(
            r#"{"status":0,"errorMsg":"","startTime":100,"stopTime":110}"#,
            serde_json::to_string(&result).expect("must serialize")
        );
    }

    #[test]
    fn misc_failure_is_status_six() {
        let result =
            BuildResult::failure(BuildStatus::MiscFailure, "builder aborted", 100, 102);
        let encoded = serde_json::to_string(&result).expect("must serialize");
        assert!(encoded.contains("\"status\":6"));

        let decoded: BuildResult = serde_json::from_str(&encoded).expect("must parse");
        assert_eq!(result, decoded);
    }

    #[test]
    fn unknown_status_is_rejected() {
        let res: Result<BuildResult, _> = serde_json::from_str(
            r#"{"status":23,"errorMsg":"","startTime":0,"stopTime":0}"#,
        );
        res.expect_err("must fail");
    }

    #[test]
    fn stop_time_never_precedes_start_time() {
        let result = BuildResult::failure(BuildStatus::MiscFailure, "oops", 100, 50);
        assert!(result.start_time <= result.stop_time);
    }
}
