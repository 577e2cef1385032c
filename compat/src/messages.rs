use serde::{Deserialize, Serialize};

use crate::build_result::BuildResult;
use crate::derivation::Derivation;
use crate::escape::unescape_transport;
use crate::store_path::StorePath;
use crate::FormatError;

/// One unit of work on the shared build queue: the derivation to
/// build, the path naming it, and the private queue the worker replies
/// on. A work message is owned by one broker until the worker deletes
/// it after a successful reply.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkMessage {
    #[serde(rename = "drvPath")]
    pub drv_path: StorePath,

    pub drv: Derivation,

    #[serde(rename = "resultQueue")]
    pub result_queue: String,
}

impl WorkMessage {
    pub fn to_wire(&self) -> String {
        serde_json::to_string(self).expect("work message serialization is infallible")
    }

    /// Decode a message body as received from the queue, undoing the
    /// transport's HTML escaping first.
    pub fn from_wire(body: &str) -> Result<Self, FormatError> {
        Ok(serde_json::from_str(&unescape_transport(body))?)
    }
}

impl BuildResult {
    pub fn to_wire(&self) -> String {
        serde_json::to_string(self).expect("build result serialization is infallible")
    }

    pub fn from_wire(body: &str) -> Result<Self, FormatError> {
        Ok(serde_json::from_str(&unescape_transport(body))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_result::BuildStatus;
    use crate::derivation::Output;
    use std::collections::BTreeMap;

    fn work_message() -> WorkMessage {
        let out_path =
            StorePath::from_absolute_path("/nix/store/00bgd045z0d4icpbc2yyz4gx48ak44la-hello-2.10")
                .unwrap();

        WorkMessage {
            drv_path: StorePath::from_absolute_path(
                "/nix/store/77ykv7rp25zpn8zxnbyl0adgdzyfamjj-hello-2.10.drv",
            )
            .unwrap(),
            drv: Derivation {
                platform: "x86_64-linux".to_string(),
                builder: "/bin/sh".to_string(),
                outputs: BTreeMap::from([(
                    "out".to_string(),
                    Output {
                        path: out_path,
                        hash_algo: String::new(),
                        hash: String::new(),
                    },
                )]),
                ..Default::default()
            },
            result_queue: "memory://nix-build-tmp-1-1".to_string(),
        }
    }

    #[test]
    fn wire_roundtrip() {
        let msg = work_message();
        assert_eq!(msg, WorkMessage::from_wire(&msg.to_wire()).expect("must parse"));
    }

    /// An escaped payload decodes to the same tree as if the literal
    /// characters had been on the wire.
    #[test]
    fn html_escaped_body_is_unescaped_before_parsing() {
        let msg = work_message();
        let escaped = msg.to_wire().replace("/bin/sh", "/bin/x&lt;&gt;y");
        let plain = msg.to_wire().replace("/bin/sh", "/bin/x<>y");

        assert_eq!(
            WorkMessage::from_wire(&plain).expect("must parse"),
            WorkMessage::from_wire(&escaped).expect("must parse"),
        );
        assert_eq!(
            "/bin/x<>y",
            WorkMessage::from_wire(&escaped).unwrap().drv.builder
        );
    }

    #[test]
    fn missing_result_queue_is_rejected() {
        let mut tree: serde_json::Value =
            serde_json::from_str(&work_message().to_wire()).unwrap();
        tree.as_object_mut().unwrap().remove("resultQueue");
        WorkMessage::from_wire(&tree.to_string()).expect_err("must fail");
    }

    #[test]
    fn build_result_wire_roundtrip() {
        let result = BuildResult::failure(BuildStatus::MiscFailure, "x < y", 100, 102);
        assert_eq!(
            result,
            BuildResult::from_wire(&result.to_wire()).expect("must parse")
        );
    }
}
