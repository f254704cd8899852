//! Registry configuration

/// Stream registry configuration options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Close every connection when the page is hidden or unloaded and reopen
    /// them when it is restored from the back/forward cache
    pub auto_lifecycle: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            auto_lifecycle: true,
        }
    }
}

impl RegistryConfig {
    /// Enable or disable page lifecycle wiring
    pub fn auto_lifecycle(mut self, enabled: bool) -> Self {
        self.auto_lifecycle = enabled;
        self
    }

    /// Configuration without page lifecycle wiring
    pub fn manual() -> Self {
        Self::default().auto_lifecycle(false)
    }
}
