use serde::Deserialize;

/// Tunables of the dispatch plane. Field names follow the option
/// names of the original store configuration, so an existing options
/// file deserializes directly.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Credentials profile; empty selects the default provider chain.
    pub profile: String,

    /// Object store / queue service region.
    pub region: String,

    /// Part size for multipart uploads, in bytes.
    #[serde(rename = "buffer-size")]
    pub buffer_size: usize,

    /// Name of the shared work queue.
    #[serde(rename = "sqs-queue")]
    pub queue_name: String,

    /// Compression method for `.narinfo` uploads; empty disables.
    #[serde(rename = "narinfo-compression")]
    pub narinfo_compression: String,

    /// Compression method for `.ls` uploads; empty disables.
    #[serde(rename = "ls-compression")]
    pub ls_compression: String,

    /// Compression method for `log/*` uploads; empty disables.
    #[serde(rename = "log-compression")]
    pub log_compression: String,

    /// Initial (and renewed) lease on a received work message, in
    /// seconds.
    #[serde(rename = "visibility-timeout")]
    pub visibility_timeout: u64,

    /// Bound on a single long-poll receive, in seconds. Keeps
    /// interrupt latency bounded.
    #[serde(rename = "receive-wait")]
    pub receive_wait: u64,

    /// After this many deliveries of one work message, the worker
    /// reports a failure instead of building again, so a poison
    /// message cannot loop forever.
    #[serde(rename = "max-deliveries")]
    pub max_deliveries: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig {
            profile: String::new(),
            region: "us-east-1".to_string(),
            buffer_size: 5 * 1024 * 1024,
            queue_name: "nix-build-queue".to_string(),
            narinfo_compression: String::new(),
            ls_compression: String::new(),
            log_compression: String::new(),
            visibility_timeout: 1800,
            receive_wait: 20,
            max_deliveries: 5,
        }
    }
}
