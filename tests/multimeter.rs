//! Keysight/Agilent 344xx multimeter integration tests: mode/range
//! validation and the bounded settling poll.

use benchtop::error::BenchError;
use benchtop::hardware::{MockOpener, MockTransport};
use benchtop::instruments::{Kt344xx, AGILENT_344XXA, KEYSIGHT_344XXA};
use benchtop::traits::MultiMeter;
use benchtop::types::{MeterMode, MeterRange};
use std::time::Duration;

async fn dmm() -> (Kt344xx, MockTransport) {
    let mock = MockTransport::identified("Keysight Technologies,34465A,MY57700000,A.02.14");
    let opener = MockOpener::new(mock.clone());
    let meter = Kt344xx::connect(&opener, KEYSIGHT_344XXA, None, None)
        .await
        .unwrap();
    mock.clear_writes();
    (meter, mock)
}

#[tokio::test]
async fn both_brands_share_the_adapter() {
    let mock = MockTransport::identified("Agilent Technologies,34460A,MY00000001,A.01.09");
    let opener = MockOpener::new(mock.clone());
    let meter = Kt344xx::connect(&opener, AGILENT_344XXA, None, None)
        .await
        .unwrap();
    assert_eq!(meter.vendor(), "Agilent");
}

#[tokio::test]
async fn set_mode_range_commands_configure_and_immediate_trigger() {
    let (mut meter, mock) = dmm().await;
    meter
        .set_mode_range(MeterRange::Value(10.0), MeterMode::DcVolt)
        .await
        .unwrap();

    assert_eq!(
        mock.writes(),
        vec!["CONFigure:VOLTage:DC 10", "TRIGger:SOURce:IMMediate"]
    );
}

#[tokio::test]
async fn symbolic_ranges_spell_per_mode() {
    let (mut meter, mock) = dmm().await;
    meter
        .set_mode_range(MeterRange::Auto, MeterMode::Resistance)
        .await
        .unwrap();
    meter
        .set_mode_range(MeterRange::Default, MeterMode::Frequency)
        .await
        .unwrap();

    let writes = mock.writes();
    assert!(writes.contains(&"CONFigure:RESistance AUTO".to_string()));
    // Frequency takes the short DEF spelling, not DEFAULT.
    assert!(writes.contains(&"CONFigure:FREquency DEF".to_string()));
}

#[tokio::test]
async fn invalid_ranges_fail_before_any_transaction() {
    let (mut meter, mock) = dmm().await;

    assert!(matches!(
        meter
            .set_mode_range(MeterRange::Value(42.0), MeterMode::DcVolt)
            .await,
        Err(BenchError::ValueOutOfRange { .. })
    ));
    assert!(matches!(
        meter
            .set_mode_range(MeterRange::Value(1.0), MeterMode::Frequency)
            .await,
        Err(BenchError::ValueOutOfRange { .. })
    ));
    assert!(matches!(
        meter
            .set_mode_range(MeterRange::Auto, MeterMode::Period)
            .await,
        Err(BenchError::Contract(_))
    ));
    assert!(mock.writes().is_empty());
}

#[tokio::test]
async fn mode_range_decodes_the_configure_response() {
    let (mut meter, mock) = dmm().await;
    mock.respond("CONFigure?", "\"VOLT +1.000000E+01,+3.000000E-06\"");

    assert_eq!(
        meter.mode_range().await.unwrap(),
        Some((MeterMode::DcVolt, MeterRange::Value(10.0)))
    );

    mock.respond("CONFigure?", "\"FREQ MAX,+3.000000E-06\"");
    assert_eq!(
        meter.mode_range().await.unwrap(),
        Some((MeterMode::Frequency, MeterRange::Max))
    );
}

#[tokio::test]
async fn unanswered_configure_query_reads_as_none() {
    let (mut meter, _mock) = dmm().await;
    assert_eq!(meter.mode_range().await.unwrap(), None);
}

#[tokio::test]
async fn read_parses_the_reading() {
    let (mut meter, mock) = dmm().await;
    mock.respond("READ?", "+4.998741E+00");
    assert_eq!(meter.read().await.unwrap(), Some(4.998741));
}

#[tokio::test]
async fn read_until_converges_inside_tolerance() {
    let (mut meter, mock) = dmm().await;
    mock.respond_once("READ?", "4.0");
    mock.respond("READ?", "5.02");
    meter.set_settling_delay(Duration::from_millis(500));

    assert!(meter.read_until(5.0, 0.1).await.unwrap());
}

#[tokio::test]
async fn read_until_times_out_against_a_stuck_reading() {
    let (mut meter, mock) = dmm().await;
    mock.respond("READ?", "9.0");
    meter.set_settling_delay(Duration::from_millis(50));

    let started = std::time::Instant::now();
    assert!(!meter.read_until(5.0, 0.1).await.unwrap());
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn read_until_treats_missing_answers_as_out_of_band() {
    let (mut meter, _mock) = dmm().await;
    meter.set_settling_delay(Duration::from_millis(30));
    assert!(!meter.read_until(5.0, 0.1).await.unwrap());
}
