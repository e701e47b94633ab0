use opwire_core::WireFormat;

/// Server-level configuration for operation dispatch.
///
/// Controls timeouts, concurrency limits, restriction enforcement and the
/// one-way queue.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Unique identifier for this server node.
    pub node_id: String,
    /// Default timeout for a dispatch in milliseconds.
    pub default_operation_timeout_ms: u64,
    /// Maximum number of concurrent dispatches before load shedding.
    pub max_concurrent_operations: u32,
    /// When false, restriction rules are recorded but not enforced.
    pub enable_access_restrictions: bool,
    /// Format used when neither attributes, route nor headers name one.
    pub default_format: WireFormat,
    /// Reject operations whose direction cannot be inferred instead of
    /// defaulting them to reply.
    pub strict_verb_inference: bool,
    /// Capacity of the one-way queue channel.
    pub one_way_queue_capacity: usize,
    /// How long a correlated caller waits by default, in milliseconds.
    pub correlation_timeout_ms: u64,
    /// Number of dead letters retained for inspection.
    pub dead_letter_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            default_operation_timeout_ms: 30_000,
            max_concurrent_operations: 1000,
            enable_access_restrictions: true,
            default_format: WireFormat::Json,
            strict_verb_inference: false,
            one_way_queue_capacity: 256,
            correlation_timeout_ms: 30_000,
            dead_letter_capacity: 100,
        }
    }
}
