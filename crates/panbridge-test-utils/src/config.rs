//! Configuration builders for tests.
//!
//! Use [`TestConfigBuilder`] to create customised [`AppConfig`] values without
//! repeating boilerplate across crate boundaries.

use panbridge_config::{AppConfig, ServerConfig};

/// Fluent builder for [`AppConfig`] in tests.
///
/// Starts from a fast tick (10 ms) with notifications off, so tests do not
/// depend on a desktop notification server.
///
/// # Example
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .server("home", "https://matrix.example.org")
///     .notifications(true)
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let mut config = AppConfig::default();
        config.bridge.tick_interval_ms = 10;
        config.notifications.enabled = false;
        Self { config }
    }

    pub fn tick_interval_ms(mut self, ms: u64) -> Self {
        self.config.bridge.tick_interval_ms = ms;
        self
    }

    pub fn signal_history(mut self, n: usize) -> Self {
        self.config.bridge.signal_history = n;
        self
    }

    pub fn notifications(mut self, enabled: bool) -> Self {
        self.config.notifications.enabled = enabled;
        self
    }

    pub fn socket_path(mut self, path: &str) -> Self {
        self.config.ipc.socket_path = Some(path.to_string());
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    pub fn server(mut self, name: &str, homeserver: &str) -> Self {
        self.config.servers.push(ServerConfig {
            name: name.to_string(),
            homeserver: homeserver.to_string(),
        });
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
