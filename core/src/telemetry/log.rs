use log::{debug, info, warn};

/// Component-tagged wrapper over the `log` facade, one per engine.
#[derive(Debug, Clone, Copy)]
pub struct LogManager {
    component: &'static str,
}

impl LogManager {
    pub fn new(component: &'static str) -> Self {
        Self { component }
    }

    pub fn record(&self, message: &str) {
        info!("{}: {}", self.component, message);
    }

    pub fn detail(&self, message: &str) {
        debug!("{}: {}", self.component, message);
    }

    pub fn warn(&self, message: &str) {
        warn!("{}: {}", self.component, message);
    }
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new("doacore")
    }
}
