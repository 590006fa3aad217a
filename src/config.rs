//! Bench configuration using Figment.
//!
//! Strongly-typed settings for a bench of instruments, loaded from:
//! 1. `benchtop.toml` (base configuration)
//! 2. Environment variables prefixed with `BENCHTOP_`
//!
//! The crate does not build sessions from this by itself -- instrument
//! discovery and selection belong to the calling layer. The types here give
//! that layer validated selectors and pacing values to hand to
//! [`crate::session::SessionBuilder`].
//!
//! # Example
//!
//! ```toml
//! [[instruments]]
//! id = "scope"
//! kind = "oscilloscope"
//! vendor_id = "0x1AB1"
//! product_id = "0x04CE"
//! address = "192.168.1.101"
//! query_delay_s = 0.1
//!
//! [[instruments]]
//! id = "supply"
//! kind = "power_supply"
//! vendor_id = "0x0483"
//! product_id = "0x7540"
//! serial = "SPD3XGC1234"
//! safety_voltage = 9.0
//! ```

use crate::hardware::ResourceSelector;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration load error: {0}")]
    Load(#[from] figment::Error),
    #[error("configuration validation error: {0}")]
    Validation(String),
}

/// Top-level bench configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BenchConfig {
    /// Instrument definitions.
    #[serde(default)]
    pub instruments: Vec<InstrumentSettings>,
}

/// Instrument classes the bench knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    Oscilloscope,
    PowerSupply,
    Multimeter,
}

/// One instrument definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentSettings {
    /// Unique name within the bench.
    pub id: String,
    pub kind: InstrumentKind,
    /// USB vendor id, hex-like (`"0x1AB1"` or `"1AB1"`).
    pub vendor_id: String,
    /// USB product id, hex-like.
    pub product_id: String,
    #[serde(default)]
    pub serial: Option<String>,
    /// TCP/IP address fallback for instruments invisible to USB listing.
    #[serde(default)]
    pub address: Option<String>,
    /// Transaction pacing in seconds; the session default applies when
    /// omitted.
    #[serde(default)]
    pub query_delay_s: Option<f64>,
    /// Client-side voltage ceiling for power supplies.
    #[serde(default)]
    pub safety_voltage: Option<f64>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

fn parse_hex_id(field: &str, raw: &str) -> Result<u16, ConfigError> {
    let digits = raw.trim().trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(digits, 16)
        .map_err(|_| ConfigError::Validation(format!("{field} must be hex-like, got {raw:?}")))
}

impl InstrumentSettings {
    /// Build the resource selector this definition describes.
    pub fn selector(&self) -> Result<ResourceSelector, ConfigError> {
        let vendor_id = parse_hex_id("vendor_id", &self.vendor_id)?;
        let product_id = parse_hex_id("product_id", &self.product_id)?;
        let mut selector = ResourceSelector::new(vendor_id, product_id);
        if let Some(serial) = &self.serial {
            selector = selector.with_serial(serial.clone());
        }
        if let Some(address) = &self.address {
            selector = selector.with_address(address.clone());
        }
        Ok(selector)
    }
}

impl BenchConfig {
    /// Load from `benchtop.toml` and `BENCHTOP_`-prefixed environment
    /// variables, then validate.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("benchtop.toml")
    }

    /// Load from a specific TOML file (plus environment overrides).
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: BenchConfig = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("BENCHTOP_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that parse but cannot be right.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for instrument in &self.instruments {
            if !seen.insert(&instrument.id) {
                return Err(ConfigError::Validation(format!(
                    "duplicate instrument id {:?}",
                    instrument.id
                )));
            }
            instrument.selector()?;
            if let Some(delay) = instrument.query_delay_s {
                if !(delay >= 0.0) {
                    return Err(ConfigError::Validation(format!(
                        "query_delay_s for {:?} must be >= 0",
                        instrument.id
                    )));
                }
            }
            if let Some(voltage) = instrument.safety_voltage {
                if !(voltage >= 0.0) {
                    return Err(ConfigError::Validation(format!(
                        "safety_voltage for {:?} must be >= 0",
                        instrument.id
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [[instruments]]
        id = "scope"
        kind = "oscilloscope"
        vendor_id = "0x1AB1"
        product_id = "04CE"
        address = "192.168.1.101"
        query_delay_s = 0.1

        [[instruments]]
        id = "supply"
        kind = "power_supply"
        vendor_id = "0x0483"
        product_id = "0x7540"
        serial = "SPD3XGC1234"
        safety_voltage = 9.0
    "#;

    fn parse(toml: &str) -> Result<BenchConfig, ConfigError> {
        let config: BenchConfig = Figment::new()
            .merge(Toml::string(toml))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn sample_config_parses_and_validates() {
        let config = parse(SAMPLE).unwrap();
        assert_eq!(config.instruments.len(), 2);

        let scope = &config.instruments[0];
        assert_eq!(scope.kind, InstrumentKind::Oscilloscope);
        let selector = scope.selector().unwrap();
        assert_eq!(selector.vendor_id, 0x1AB1);
        assert_eq!(selector.product_id, 0x04CE);
        assert_eq!(selector.address.as_deref(), Some("192.168.1.101"));

        let supply = &config.instruments[1];
        assert_eq!(supply.selector().unwrap().fragment(), "0x0483::0x7540::SPD3XGC1234");
        assert!(supply.enabled);
    }

    #[test]
    fn bad_hex_id_fails_validation() {
        let toml = r#"
            [[instruments]]
            id = "dmm"
            kind = "multimeter"
            vendor_id = "keysight"
            product_id = "0x0201"
        "#;
        assert!(matches!(parse(toml), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn duplicate_ids_fail_validation() {
        let toml = r#"
            [[instruments]]
            id = "a"
            kind = "multimeter"
            vendor_id = "0x2A8D"
            product_id = "0x0201"

            [[instruments]]
            id = "a"
            kind = "multimeter"
            vendor_id = "0x0957"
            product_id = "0x0000"
        "#;
        assert!(matches!(parse(toml), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn negative_query_delay_fails_validation() {
        let toml = r#"
            [[instruments]]
            id = "scope"
            kind = "oscilloscope"
            vendor_id = "0x1AB1"
            product_id = "0x04CE"
            query_delay_s = -0.5
        "#;
        assert!(matches!(parse(toml), Err(ConfigError::Validation(_))));
    }
}
