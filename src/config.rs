use serde::{Deserialize, Serialize};

/// Engine-wide configuration. Every field is optional; defaults are applied
/// at the point of use.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Worker threads in the real-time pool. Default: available parallelism.
    pub worker_threads: Option<usize>,
    /// Capacity of the pool's ready-task queue. Default: unbounded.
    pub task_queue_capacity: Option<usize>,
    /// Concurrency bound applied by [`Flow::fan_out_default`]. Default: none
    /// (unbounded fan-out).
    ///
    /// [`Flow::fan_out_default`]: crate::flow::Flow::fan_out_default
    pub fan_out_limit: Option<usize>,
    /// How long the real-mode verification harness waits on a single script
    /// step before reporting a timeout, in milliseconds. Default: 5000.
    pub step_timeout_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_partial_config() {
        let cfg: EngineConfig =
            serde_json::from_value(serde_json::json!({"worker_threads": 2})).unwrap();
        assert_eq!(cfg.worker_threads, Some(2));
        assert_eq!(cfg.task_queue_capacity, None);
        assert_eq!(cfg.fan_out_limit, None);
    }
}
