use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::store_path::StorePath;

/// A build recipe, in the "basic" form exchanged over the wire: input
/// derivations are already resolved to concrete store paths, so
/// `input_derivations` is usually empty.
///
/// The derivation's identity is fully determined by its canonical
/// encoding ([Derivation::to_canonical_json]): all maps and sets are
/// ordered, so two derivations with equal encodings are
/// interchangeable.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Derivation {
    pub platform: String,

    pub builder: String,

    #[serde(rename = "args")]
    pub arguments: Vec<String>,

    #[serde(rename = "env")]
    pub environment: BTreeMap<String, String>,

    #[serde(rename = "inputSrcs")]
    pub input_sources: BTreeSet<StorePath>,

    #[serde(
        rename = "inputDrvs",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub input_derivations: BTreeMap<StorePath, BTreeSet<String>>,

    pub outputs: BTreeMap<String, Output>,
}

/// A single derivation output. The hash fields are only set for
/// fixed-output derivations and default to empty strings on the wire.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Output {
    pub path: StorePath,

    #[serde(rename = "hashAlgo", default)]
    pub hash_algo: String,

    #[serde(default)]
    pub hash: String,
}

impl Output {
    pub fn is_fixed(&self) -> bool {
        !self.hash.is_empty()
    }
}

impl Derivation {
    /// The store paths this derivation produces, in output-name order.
    pub fn output_paths(&self) -> Vec<StorePath> {
        self.outputs.values().map(|o| o.path.clone()).collect()
    }

    pub fn is_fixed_output(&self) -> bool {
        self.outputs.len() == 1 && self.outputs.values().all(|o| o.is_fixed())
    }

    /// The canonical encoding naming this derivation. serde_json emits
    /// map keys in their BTreeMap order, so the output is stable.
    pub fn to_canonical_json(&self) -> String {
        serde_json::to_string(self).expect("derivation serialization is infallible")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FormatError;
    use rstest::rstest;

    fn example() -> Derivation {
        let out_path =
            StorePath::from_absolute_path("/nix/store/00bgd045z0d4icpbc2yyz4gx48ak44la-hello-2.10")
                .unwrap();
        let src_path = StorePath::from_absolute_path(
            "/nix/store/77ykv7rp25zpn8zxnbyl0adgdzyfamjj-hello-2.10.tar.gz",
        )
        .unwrap();

        Derivation {
            platform: "x86_64-linux".to_string(),
            builder: "/nix/store/4xw8n979xpivdc46a9ndcvyhwgif00hz-bash-5.2/bin/bash".to_string(),
            arguments: vec!["-e".to_string(), "builder.sh".to_string()],
            environment: BTreeMap::from([
                ("out".to_string(), out_path.to_absolute_path()),
                ("name".to_string(), "hello-2.10".to_string()),
            ]),
            input_sources: BTreeSet::from([src_path]),
            input_derivations: BTreeMap::new(),
            outputs: BTreeMap::from([(
                "out".to_string(),
                Output {
                    path: out_path,
                    hash_algo: String::new(),
                    hash: String::new(),
                },
            )]),
        }
    }

    #[test]
    fn json_roundtrip() {
        let drv = example();
        let encoded = serde_json::to_string(&drv).expect("must serialize");
        let decoded: Derivation = serde_json::from_str(&encoded).expect("must parse");
        assert_eq!(drv, decoded);
    }

    #[test]
    fn encoding_is_canonical() {
        assert_eq!(
            example().to_canonical_json(),
            example().to_canonical_json()
        );
    }

    #[test]
    fn output_hash_fields_default_to_empty() {
        let json = r#"{"path": "/nix/store/00bgd045z0d4icpbc2yyz4gx48ak44la-hello-2.10"}"#;
        let output: Output = serde_json::from_str(json).expect("must parse");
        assert!(!output.is_fixed());
        assert_eq!("", output.hash_algo);
        assert_eq!("", output.hash);
    }

    #[test]
    fn encoded_output_spells_out_hash_fields() {
        let encoded = serde_json::to_string(&example().outputs["out"]).expect("must serialize");
        assert!(encoded.contains("\"hashAlgo\":\"\""));
        assert!(encoded.contains("\"hash\":\"\""));
    }

    #[test]
    fn args_preserve_order() {
        let drv = example();
        let decoded: Derivation =
            serde_json::from_str(&serde_json::to_string(&drv).unwrap()).unwrap();
        assert_eq!(vec!["-e", "builder.sh"], decoded.arguments);
    }

    #[rstest]
    #[case::missing_builder(r#"{"platform": "x86_64-linux", "args": [], "env": {}, "inputSrcs": [], "outputs": {}}"#)]
    #[case::wrong_args_type(r#"{"platform": "x86_64-linux", "builder": "/bin/sh", "args": "-e", "env": {}, "inputSrcs": [], "outputs": {}}"#)]
    #[case::invalid_store_path(r#"{"platform": "x86_64-linux", "builder": "/bin/sh", "args": [], "env": {}, "inputSrcs": ["/not/a/store/path"], "outputs": {}}"#)]
    fn decode_rejects(#[case] json: &str) {
        let res: Result<Derivation, FormatError> =
            serde_json::from_str(json).map_err(FormatError::from);
        res.expect_err("must fail");
    }
}
