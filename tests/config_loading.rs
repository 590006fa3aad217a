//! Bench configuration loading from disk.

use anyhow::Result;
use benchtop::config::{BenchConfig, InstrumentKind};
use std::io::Write;

#[test]
fn load_from_reads_and_validates_a_bench_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("benchtop.toml");
    let mut file = std::fs::File::create(&path)?;
    write!(
        file,
        r#"
        [[instruments]]
        id = "scope"
        kind = "oscilloscope"
        vendor_id = "0x1AB1"
        product_id = "0x04CE"
        address = "192.168.1.101"

        [[instruments]]
        id = "dmm"
        kind = "multimeter"
        vendor_id = "0x2A8D"
        product_id = "0x0201"
        enabled = false
        "#
    )?;

    let config = BenchConfig::load_from(&path)?;
    assert_eq!(config.instruments.len(), 2);
    assert_eq!(config.instruments[0].kind, InstrumentKind::Oscilloscope);
    assert!(!config.instruments[1].enabled);

    let selector = config.instruments[0].selector()?;
    assert_eq!(selector.vendor_id, 0x1AB1);
    assert_eq!(selector.address.as_deref(), Some("192.168.1.101"));
    Ok(())
}

#[test]
fn a_missing_file_yields_an_empty_bench() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = BenchConfig::load_from(dir.path().join("absent.toml"))?;
    assert!(config.instruments.is_empty());
    Ok(())
}
