// ABOUTME: Client configuration with builder-style setters
// ABOUTME: Covers PIN handling, timeouts, polling cadence and storage hygiene

use std::time::Duration;

/// Configuration for a modem client.
///
/// The defaults suit a SIM800 module on a real serial line; tests shrink the
/// timeouts.
#[derive(Debug, Clone)]
pub struct Sim800Config {
    /// SIM PIN, applied when the modem reports the SIM as locked.
    pub pin: Option<String>,
    /// Skip the startup storage wipe and per-message deletes.
    pub prevent_wipe: bool,
    /// How long to wait for the serial port to report open.
    pub open_timeout: Duration,
    /// Registration poll cadence while the network gate is closed.
    pub network_poll_interval: Duration,
    /// Delay before the startup storage wipe check runs.
    pub wipe_grace: Duration,
    /// `AT+CNMI` argument controlling how the modem announces new messages.
    pub cnmi_mode: String,
}

impl Default for Sim800Config {
    fn default() -> Self {
        Sim800Config {
            pin: None,
            prevent_wipe: false,
            open_timeout: Duration::from_secs(5),
            network_poll_interval: Duration::from_secs(5),
            wipe_grace: Duration::from_secs(10),
            cnmi_mode: "2,1,0,1,0".to_string(),
        }
    }
}

impl Sim800Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pin(mut self, pin: impl Into<String>) -> Self {
        self.pin = Some(pin.into());
        self
    }

    pub fn with_prevent_wipe(mut self, prevent: bool) -> Self {
        self.prevent_wipe = prevent;
        self
    }

    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    pub fn with_network_poll_interval(mut self, interval: Duration) -> Self {
        self.network_poll_interval = interval;
        self
    }

    pub fn with_wipe_grace(mut self, grace: Duration) -> Self {
        self.wipe_grace = grace;
        self
    }

    pub fn with_cnmi_mode(mut self, mode: impl Into<String>) -> Self {
        self.cnmi_mode = mode.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = Sim800Config::new()
            .with_pin("1234")
            .with_prevent_wipe(true)
            .with_network_poll_interval(Duration::from_millis(50));
        assert_eq!(config.pin.as_deref(), Some("1234"));
        assert!(config.prevent_wipe);
        assert_eq!(config.network_poll_interval, Duration::from_millis(50));
        assert_eq!(config.cnmi_mode, "2,1,0,1,0");
    }
}
