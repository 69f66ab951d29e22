//! Engine configuration.

use url::Url;

/// Configuration for a [`crate::CrdtEngine`].
#[derive(Clone, Debug)]
pub struct CrdtConfig {
    /// Database name; names the meta store and its key.
    pub name: String,
    /// Meta store address. Without one the engine never persists its head.
    pub meta_url: Option<Url>,
    /// Subscribe to pushes for the meta branch.
    pub remote: bool,
    /// Meta branch the head is loaded from and saved to.
    pub branch: String,
}

impl CrdtConfig {
    pub fn persists(&self) -> bool {
        self.meta_url.is_some()
    }
}

/// Builder for engine configuration.
pub struct CrdtConfigBuilder {
    config: CrdtConfig,
}

impl CrdtConfigBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            config: CrdtConfig {
                name: name.into(),
                meta_url: None,
                remote: false,
                branch: "main".to_string(),
            },
        }
    }

    pub fn meta_url(mut self, url: Url) -> Self {
        self.config.meta_url = Some(url);
        self
    }

    pub fn remote(mut self, remote: bool) -> Self {
        self.config.remote = remote;
        self
    }

    pub fn branch(mut self, branch: impl Into<String>) -> Self {
        self.config.branch = branch.into();
        self
    }

    pub fn build(self) -> CrdtConfig {
        self.config
    }
}
