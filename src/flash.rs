//! Illumination LED control.
//!
//! One process-wide on/off state, independent of any streaming session.

use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlashCommand {
    On,
    Off,
    Toggle,
}

impl FlashCommand {
    /// Read the `onoff` parameter from a raw query string. Missing or unknown values toggle.
    pub fn from_query(query: Option<&str>) -> Self {
        let value = query.and_then(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .find(|(key, _)| key == "onoff")
                .map(|(_, value)| value.into_owned())
        });
        match value.as_deref() {
            Some("on") => FlashCommand::On,
            Some("off") => FlashCommand::Off,
            _ => FlashCommand::Toggle,
        }
    }
}

/// Output driving the LED.
pub trait FlashPin {
    fn set(&mut self, on: bool) -> Result<()>;
}

/// Pin for boards without a flash LED. Accepts every write.
#[derive(Debug, Default)]
pub struct NullPin;

impl FlashPin for NullPin {
    fn set(&mut self, _on: bool) -> Result<()> {
        Ok(())
    }
}

/// GPIO line exported through the sysfs interface.
#[derive(Debug)]
pub struct SysfsGpioPin {
    value_path: PathBuf,
}

impl SysfsGpioPin {
    pub fn new(gpio: u32) -> Self {
        Self::with_value_path(PathBuf::from(format!("/sys/class/gpio/gpio{}/value", gpio)))
    }

    pub fn with_value_path(value_path: PathBuf) -> Self {
        Self { value_path }
    }
}

impl FlashPin for SysfsGpioPin {
    fn set(&mut self, on: bool) -> Result<()> {
        let level = if on { "1" } else { "0" };
        std::fs::write(&self.value_path, level)
            .with_context(|| format!("failed to write {}", self.value_path.display()))
    }
}

pub struct Flash {
    state: AtomicBool,
    pin: Mutex<Box<dyn FlashPin + Send>>,
}

impl Flash {
    /// Starts off. The pin is not written until the first command.
    pub fn new(pin: Box<dyn FlashPin + Send>) -> Self {
        Self {
            state: AtomicBool::new(false),
            pin: Mutex::new(pin),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Box::new(NullPin))
    }

    pub fn is_on(&self) -> bool {
        self.state.load(Ordering::Acquire)
    }

    /// Apply `command` and return the resulting state. The stored state only changes when
    /// the pin write succeeds.
    pub fn apply(&self, command: FlashCommand) -> Result<bool> {
        let mut pin = self
            .pin
            .lock()
            .map_err(|_| anyhow!("flash pin lock poisoned"))?;
        let next = match command {
            FlashCommand::On => true,
            FlashCommand::Off => false,
            FlashCommand::Toggle => !self.state.load(Ordering::Acquire),
        };
        pin.set(next)?;
        self.state.store(next, Ordering::Release);
        log::debug!("flash {}", if next { "on" } else { "off" });
        Ok(next)
    }
}

impl std::fmt::Debug for Flash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flash").field("on", &self.is_on()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenPin;

    impl FlashPin for BrokenPin {
        fn set(&mut self, _on: bool) -> Result<()> {
            Err(anyhow!("gpio unavailable"))
        }
    }

    #[test]
    fn parses_onoff_parameter() {
        assert_eq!(FlashCommand::from_query(Some("onoff=on")), FlashCommand::On);
        assert_eq!(FlashCommand::from_query(Some("x=1&onoff=off")), FlashCommand::Off);
        assert_eq!(FlashCommand::from_query(Some("onoff=toggle")), FlashCommand::Toggle);
        assert_eq!(FlashCommand::from_query(Some("onoff=blink")), FlashCommand::Toggle);
        assert_eq!(FlashCommand::from_query(None), FlashCommand::Toggle);
    }

    #[test]
    fn toggle_flips_state() -> Result<()> {
        let flash = Flash::disabled();
        assert!(!flash.is_on());
        assert!(flash.apply(FlashCommand::Toggle)?);
        assert!(!flash.apply(FlashCommand::Toggle)?);
        assert!(flash.apply(FlashCommand::On)?);
        assert!(flash.apply(FlashCommand::On)?);
        assert!(!flash.apply(FlashCommand::Off)?);
        Ok(())
    }

    #[test]
    fn pin_failure_keeps_previous_state() {
        let flash = Flash::new(Box::new(BrokenPin));
        assert!(flash.apply(FlashCommand::On).is_err());
        assert!(!flash.is_on());
    }

    #[test]
    fn sysfs_pin_writes_level() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let value = dir.path().join("value");
        let mut pin = SysfsGpioPin::with_value_path(value.clone());
        pin.set(true)?;
        assert_eq!(std::fs::read_to_string(&value)?, "1");
        pin.set(false)?;
        assert_eq!(std::fs::read_to_string(&value)?, "0");
        Ok(())
    }
}
