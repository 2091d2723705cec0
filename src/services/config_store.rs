use std::sync::Arc;

use parking_lot::RwLock;

use crate::business_logic::config::SignalConfig;
use crate::errors::SignalError;

/// Current signal config. Readers take an `Arc` snapshot that stays fixed for
/// the whole calculation even if an update lands mid-flight.
///
/// Every accepted update bumps `version`, so results derived from an older
/// snapshot can be told apart from current ones.
#[derive(Debug)]
pub struct ConfigStore {
    current: RwLock<(u64, Arc<SignalConfig>)>,
}

impl ConfigStore {
    pub fn snapshot(&self) -> Arc<SignalConfig> {
        Arc::clone(&self.current.read().1)
    }

    /// Snapshot together with the version it was published under.
    pub fn versioned(&self) -> (u64, Arc<SignalConfig>) {
        let current = self.current.read();
        (current.0, Arc::clone(&current.1))
    }

    pub fn version(&self) -> u64 {
        self.current.read().0
    }

    /// Replace the config. An invalid config is rejected and the previous one
    /// stays in force.
    pub fn update(&self, config: SignalConfig) -> Result<Arc<SignalConfig>, SignalError> {
        if let Err(err) = config.check() {
            tracing::warn!("rejected config update: {}", err);
            return Err(err);
        }
        let config = Arc::new(config);
        let version = {
            let mut current = self.current.write();
            current.0 += 1;
            current.1 = Arc::clone(&config);
            current.0
        };
        tracing::info!("signal config updated to version {}", version);
        Ok(config)
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self {
            current: RwLock::new((0, Arc::new(SignalConfig::default()))),
        }
    }
}
