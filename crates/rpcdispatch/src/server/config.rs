/// Configuration for the RPC server.
#[derive(Debug, Clone, bon::Builder)]
pub struct RpcServerConfig {
    /// Contain panics raised by hooks and handlers, failing only that call
    /// with `INTERNAL`. When false a panic unwinds out of `run`.
    #[builder(default = true)]
    pub catch_panics: bool,

    /// Skip the method handler when a `before` hook already finished the
    /// call. `after` hooks still run.
    #[builder(default = true)]
    pub skip_handler_if_finished: bool,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RpcServerConfig::default();
        assert!(config.catch_panics);
        assert!(config.skip_handler_if_finished);
    }

    #[test]
    fn test_builder_overrides() {
        let config = RpcServerConfig::builder()
            .catch_panics(false)
            .skip_handler_if_finished(false)
            .build();
        assert!(!config.catch_panics);
        assert!(!config.skip_handler_if_finished);
    }
}
