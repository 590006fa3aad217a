//! Rigol DS1000Z adapter integration tests: trigger sequencing, bounded
//! measurement polling, and the chunked ASCII waveform transfer.

use benchtop::error::BenchError;
use benchtop::hardware::{MockOpener, MockTransport};
use benchtop::instruments::Ds1000z;
use benchtop::traits::oscilloscope::{MeasureRequest, Oscilloscope};
use benchtop::types::{DataEncoding, MeasurementKind, TriggerEdge, TriggerStatus, TriggerSweep};
use benchtop::waveform::WaveSource;
use std::time::Duration;

const IDN: &str = "RIGOL TECHNOLOGIES,DS1054Z,DS1ZA0001,00.04.04";

async fn scope() -> (Ds1000z, MockTransport) {
    let mock = MockTransport::identified(IDN);
    let opener = MockOpener::new(mock.clone());
    let scope = Ds1000z::connect(&opener, None, None).await.unwrap();
    mock.clear_writes();
    (scope, mock)
}

fn ascii_chunk(values: impl Iterator<Item = f64>) -> String {
    let payload = values
        .map(|v| format!("{v}"))
        .collect::<Vec<_>>()
        .join(",");
    format!("#9{:09}{payload}", payload.len())
}

#[tokio::test]
async fn display_round_trip() {
    let (mut scope, mock) = scope().await;
    mock.respond(":CHANnel1:DISPlay?", "1");

    assert_eq!(scope.display(1).await.unwrap(), Some(true));
    scope.set_display(1, false).await.unwrap();
    assert!(mock
        .writes()
        .contains(&":CHANnel1:DISPlay OFF".to_string()));
}

#[tokio::test]
async fn channel_out_of_range_fails_before_any_transaction() {
    let (mut scope, mock) = scope().await;

    let err = scope.display(5).await.unwrap_err();
    assert!(matches!(
        err,
        BenchError::ChannelOutOfRange { channel: 5, max: 4 }
    ));
    let err = scope.set_vertical_scale(0, 0.1).await.unwrap_err();
    assert!(matches!(err, BenchError::ChannelOutOfRange { .. }));
    let err = scope
        .data(WaveSource::Channel(9), None, DataEncoding::Ascii)
        .await
        .unwrap_err();
    assert!(matches!(err, BenchError::ChannelOutOfRange { .. }));

    assert!(mock.writes().is_empty(), "no traffic expected");
}

#[tokio::test]
async fn horizontal_position_inverts_the_vendor_sign() {
    let (mut scope, mock) = scope().await;
    mock.respond(":TIMebase:MAIN:OFFSet?", "-0.002");

    scope.set_horizontal_position(0.002).await.unwrap();
    assert!(mock
        .writes()
        .contains(&":TIMebase:MAIN:OFFSet -0.002".to_string()));
    // Positive external convention reads back positive.
    assert_eq!(scope.horizontal_position().await.unwrap(), Some(0.002));
}

#[tokio::test]
async fn trigger_edge_configuration_order() {
    let (mut scope, mock) = scope().await;
    scope
        .set_trigger_edge(2, TriggerEdge::Falling, 0.5)
        .await
        .unwrap();

    let writes = mock.writes();
    assert_eq!(
        writes,
        vec![
            ":TRIGger:EDGe:LEVel 0.0",
            ":TRIGger:MODE EDGE",
            ":TRIGger:EDGe:SOURce CHANnel2",
            ":TRIGger:EDGe:SLOPe NEGative",
            ":TRIGger:EDGe:LEVel 0.5",
        ]
    );
}

#[tokio::test]
async fn run_commands_run_before_sweep() {
    let (mut scope, mock) = scope().await;
    scope.run(TriggerSweep::Single).await.unwrap();

    let writes = mock.writes();
    assert_eq!(writes, vec![":RUN", ":TRIGger:SWEep SING"]);
}

#[tokio::test]
async fn wait_for_trigger_status_times_out_with_last_status() {
    let (mut scope, mock) = scope().await;
    mock.respond(":TRIGger:STATus?", "WAIT");

    let started = std::time::Instant::now();
    let status = scope
        .wait_for_trigger_status(&[TriggerStatus::Triggered], Duration::from_millis(50))
        .await
        .unwrap();

    assert_eq!(status, Some(TriggerStatus::Waiting));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn wait_for_trigger_status_returns_on_target() {
    let (mut scope, mock) = scope().await;
    mock.respond_once(":TRIGger:STATus?", "WAIT");
    mock.respond(":TRIGger:STATus?", "TD");

    let status = scope
        .wait_for_trigger_status(&[TriggerStatus::Triggered], Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(status, Some(TriggerStatus::Triggered));
}

#[tokio::test]
async fn measure_n_rounds_replaces_out_of_band_with_nan() {
    let (mut scope, mock) = scope().await;
    mock.respond_once(":MEASure:ITEM? VMAX", "1.0");
    mock.respond_once(":MEASure:ITEM? VMAX", "99.0");
    mock.respond_once(":MEASure:ITEM? VMAX", "2.5");

    let request = MeasureRequest::channel(1)
        .kinds(&[MeasurementKind::VMax])
        .samples(3)
        .delay(Duration::ZERO)
        .threshold(5.0);
    let result = scope.measure(&request).await.unwrap();

    let samples = &result[&MeasurementKind::VMax];
    assert_eq!(samples.len(), 3);
    assert_eq!(samples[0], 1.0);
    assert!(samples[1].is_nan(), "out-of-band sample must become NaN");
    assert_eq!(samples[2], 2.5);

    assert!(mock.writes().contains(&":MEASure:CLEar ALL".to_string()));
}

#[tokio::test]
async fn measure_missing_answers_become_nan_entries() {
    let (mut scope, _mock) = scope().await;
    // Nothing scripted: every sample query comes back unanswered.
    let request = MeasureRequest::channel(1)
        .kinds(&[MeasurementKind::Frequency])
        .samples(2)
        .delay(Duration::ZERO);
    let result = scope.measure(&request).await.unwrap();

    let samples = &result[&MeasurementKind::Frequency];
    assert_eq!(samples.len(), 2);
    assert!(samples.iter().all(|v| v.is_nan()));
}

#[tokio::test]
async fn measure_polling_discards_out_of_band_then_records_first_good() {
    let (mut scope, mock) = scope().await;
    mock.respond_once(":MEASure:ITEM? FREQuency", "9.9e37");
    mock.respond(":MEASure:ITEM? FREQuency", "1000.0");

    let request = MeasureRequest::channel(1)
        .kinds(&[MeasurementKind::Frequency])
        .samples(0)
        .delay(Duration::ZERO)
        .timeout(Duration::from_millis(500))
        .threshold(1.0e6);
    let result = scope.measure(&request).await.unwrap();

    assert_eq!(result[&MeasurementKind::Frequency], vec![1000.0]);
}

#[tokio::test]
async fn measure_polling_timeout_pads_a_single_nan() {
    let (mut scope, mock) = scope().await;
    mock.respond(":MEASure:ITEM? VMAX", "9.9e37"); // never inside threshold

    let request = MeasureRequest::channel(1)
        .kinds(&[MeasurementKind::VMax])
        .samples(0)
        .delay(Duration::ZERO)
        .timeout(Duration::from_millis(30))
        .threshold(1.0);
    let result = scope.measure(&request).await.unwrap();

    let samples = &result[&MeasurementKind::VMax];
    assert_eq!(samples.len(), 1);
    assert!(samples[0].is_nan());
}

#[tokio::test]
async fn measure_polling_rejects_multiple_kinds() {
    let (mut scope, mock) = scope().await;
    let request = MeasureRequest::channel(1)
        .kinds(&[MeasurementKind::VMax, MeasurementKind::VMin])
        .samples(0);
    assert!(matches!(
        scope.measure(&request).await,
        Err(BenchError::Contract(_))
    ));
    assert!(mock.writes().is_empty());
}

#[tokio::test]
async fn chunked_ascii_transfer_single_window_issues_one_request() {
    let (mut scope, mock) = scope().await;
    mock.respond(
        ":WAVeform:PREamble?",
        "0,2,1200,1,1.000000E-6,-5.000000E-4,0,4.132813E-2,0,122",
    );
    mock.respond_once(
        ":WAVeform:DATA?",
        &ascii_chunk((0..1200).map(|i| i as f64 / 100.0)),
    );

    let data = scope
        .data(WaveSource::Channel(1), Some((1, 1200)), DataEncoding::Ascii)
        .await
        .unwrap();

    assert_eq!(data.values.len(), 1200);
    assert_eq!(data.time.len(), 1200);
    assert_eq!(data.values[100], 1.0);

    let starts: Vec<_> = mock
        .writes()
        .into_iter()
        .filter(|w| w.starts_with(":WAVeform:STARt"))
        .collect();
    assert_eq!(starts, vec![":WAVeform:STARt 1"], "exactly one chunk request");
}

#[tokio::test]
async fn chunked_ascii_transfer_advances_until_record_exhausted() {
    let (mut scope, mock) = scope().await;
    mock.respond(
        ":WAVeform:PREamble?",
        "0,2,2000,1,1.000000E-6,0,0,4.132813E-2,0,122",
    );
    mock.respond_once(":WAVeform:DATA?", &ascii_chunk((0..1500).map(|i| i as f64)));
    mock.respond_once(":WAVeform:DATA?", &ascii_chunk((1500..2000).map(|i| i as f64)));

    let data = scope
        .data(WaveSource::Channel(1), None, DataEncoding::Ascii)
        .await
        .unwrap();

    assert_eq!(data.values.len(), 2000);
    assert_eq!(data.values[1999], 1999.0);
    // Time axis is i * xincr, with the x-origin offset knowingly unapplied.
    assert_eq!(data.time[0], 0.0);
    assert!((data.time[1999] - 1999.0e-6).abs() < 1e-12);

    let starts: Vec<_> = mock
        .writes()
        .into_iter()
        .filter(|w| w.starts_with(":WAVeform:STARt"))
        .collect();
    assert_eq!(
        starts,
        vec![":WAVeform:STARt 1", ":WAVeform:STARt 1501"]
    );
}

#[tokio::test]
async fn transfer_treats_unanswered_chunk_as_end_of_data() {
    let (mut scope, mock) = scope().await;
    mock.respond(
        ":WAVeform:PREamble?",
        "0,2,5000,1,1.000000E-6,0,0,4.132813E-2,0,122",
    );
    mock.respond_once(":WAVeform:DATA?", &ascii_chunk((0..1500).map(|i| i as f64)));
    // Second chunk request gets no answer: partial result, not an error.

    let data = scope
        .data(WaveSource::Channel(1), None, DataEncoding::Ascii)
        .await
        .unwrap();
    assert_eq!(data.values.len(), 1500);
}

#[tokio::test]
async fn missing_preamble_is_a_parse_error() {
    let (mut scope, _mock) = scope().await;
    let err = scope
        .data(WaveSource::Channel(1), None, DataEncoding::Ascii)
        .await
        .unwrap_err();
    assert!(matches!(err, BenchError::Waveform(_)));
}

#[tokio::test]
async fn unsupported_encoding_is_a_contract_error() {
    let (mut scope, mock) = scope().await;
    let err = scope
        .data(WaveSource::Channel(1), None, DataEncoding::Float32Be)
        .await
        .unwrap_err();
    assert!(matches!(err, BenchError::Contract(_)));
    assert!(mock.writes().is_empty());
}

#[tokio::test]
async fn byte_encoded_transfer_scales_codes_to_physical_units() {
    let (mut scope, mock) = scope().await;
    mock.respond(
        ":WAVeform:PREamble?",
        "0,2,4,1,1.000000E-6,0,0,0.01,0,122",
    );
    mock.respond_raw_once(":WAVeform:DATA?", b"#14\x7A\x7B\x7C\x7D");

    let data = scope
        .data(WaveSource::Channel(1), Some((1, 4)), DataEncoding::Uint8)
        .await
        .unwrap();

    // Codes 122..=125 against yref=122, yincr=0.01, yorig=0.
    let expected = [0.0, 0.01, 0.02, 0.03];
    assert_eq!(data.values.len(), 4);
    for (value, expected) in data.values.iter().zip(expected) {
        assert!((value - expected).abs() < 1e-12);
    }
}

#[tokio::test]
async fn math_window_is_clamped_to_its_limit() {
    let (mut scope, mock) = scope().await;
    mock.respond(
        ":WAVeform:PREamble?",
        "0,2,1200,1,1.000000E-6,0,0,4.132813E-2,0,122",
    );
    mock.respond_once(":WAVeform:DATA?", &ascii_chunk((0..1200).map(|i| i as f64)));

    let data = scope
        .data(WaveSource::Math, Some((1, 100_000)), DataEncoding::Ascii)
        .await
        .unwrap();
    assert_eq!(data.values.len(), 1200);

    let writes = mock.writes();
    assert!(writes.contains(&":WAVeform:MODE NORMal".to_string()));
    assert!(writes.contains(&":WAVeform:STOP 1200".to_string()));
}

#[tokio::test]
async fn screen_capture_rejects_unknown_extensions() {
    // A real (unsimulated) transport reaches the extension check.
    let mock = MockTransport::identified(IDN).unsimulated();
    let opener = MockOpener::new(mock.clone());
    let mut scope = Ds1000z::connect(&opener, None, None).await.unwrap();
    scope.session_mut().set_query_delay(Duration::ZERO);

    let err = scope
        .screen_capture(std::path::Path::new("shot.svg"))
        .await
        .unwrap_err();
    assert!(matches!(err, BenchError::FileType(_)));
}

#[tokio::test]
async fn screen_capture_is_refused_in_simulation() {
    let (mut scope, mock) = scope().await;
    // The mock is a simulated backend by default.
    let captured = scope
        .screen_capture(std::path::Path::new("shot.png"))
        .await
        .unwrap();
    assert!(!captured);
    assert!(mock.writes().is_empty());
}
