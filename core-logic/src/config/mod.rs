use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
        }
    }
}

// Credentials stay out of logs.
impl fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***REDACTED***"))
            .finish()
    }
}

/// Read-only binding of identity positions to proxies.
///
/// Identity `i` always uses `proxies[i % len]`; an empty list means every
/// identity connects directly.
#[derive(Debug, Clone, Default)]
pub struct ProxyAssignment {
    proxies: Arc<Vec<ProxyConfig>>,
}

impl ProxyAssignment {
    pub fn new(proxies: Vec<ProxyConfig>) -> Self {
        Self {
            proxies: Arc::new(proxies),
        }
    }

    pub fn direct() -> Self {
        Self::default()
    }

    pub fn for_index(&self, index: usize) -> Option<&ProxyConfig> {
        if self.proxies.is_empty() {
            None
        } else {
            self.proxies.get(index % self.proxies.len())
        }
    }

    /// Display id used in log prefixes: 1-based proxy slot, `000` when direct.
    pub fn label_for_index(&self, index: usize) -> String {
        if self.proxies.is_empty() {
            "000".to_string()
        } else {
            format!("{:03}", index % self.proxies.len() + 1)
        }
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }
}
