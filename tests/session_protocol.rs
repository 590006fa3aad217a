//! Protocol session integration tests: connect/identify lifecycle and the
//! soft-failure policy of the query primitives.

use benchtop::error::BenchError;
use benchtop::hardware::{MockOpener, MockTransport, ResourceSelector};
use benchtop::session::SessionBuilder;
use std::time::Duration;

fn selector() -> ResourceSelector {
    ResourceSelector::new(0x1AB1, 0x04CE)
}

/// Surface the session's degraded-path warnings when RUST_LOG is set.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[tokio::test]
async fn connect_fails_with_lookup_when_nothing_matches() {
    let opener = MockOpener::empty();
    let err = SessionBuilder::new(selector()).open(&opener).await.unwrap_err();
    assert!(matches!(err, BenchError::Lookup(_)), "got {err:?}");
}

#[tokio::test]
async fn connect_fails_with_connection_when_open_refused() {
    let opener = MockOpener::refusing();
    let err = SessionBuilder::new(selector()).open(&opener).await.unwrap_err();
    assert!(matches!(err, BenchError::Connection(_)), "got {err:?}");
}

#[tokio::test]
async fn connect_fails_with_connection_when_identification_never_answers() {
    // Resource opens fine but nothing answers *IDN?.
    let opener = MockOpener::new(MockTransport::new());
    let err = SessionBuilder::new(selector()).open(&opener).await.unwrap_err();
    assert!(matches!(err, BenchError::Connection(_)), "got {err:?}");
}

#[tokio::test]
async fn connect_identifies_and_decodes_identity() {
    let mock = MockTransport::identified("RIGOL TECHNOLOGIES,DS1054Z,DS1ZA0001,00.04.04");
    let opener = MockOpener::new(mock);
    let session = SessionBuilder::new(selector()).open(&opener).await.unwrap();

    assert!(session.is_identified());
    let identity = session.identity().unwrap();
    assert_eq!(identity.manufacturer, "RIGOL TECHNOLOGIES");
    assert_eq!(identity.model, "DS1054Z");
    assert_eq!(identity.serial_number, "DS1ZA0001");
    assert_eq!(identity.firmware, "00.04.04");
}

#[tokio::test]
async fn connect_survives_two_flaky_identification_attempts() {
    init_tracing();
    let mock = MockTransport::identified("ACME,M1,SN1,1.0");
    mock.inject_failures(2);
    let opener = MockOpener::new(mock);
    let session = SessionBuilder::new(selector()).open(&opener).await.unwrap();
    assert!(session.is_identified());
}

#[tokio::test]
async fn flaky_query_degrades_to_none_and_session_keeps_working() {
    init_tracing();
    let mock = MockTransport::identified("ACME,M1,SN1,1.0");
    mock.respond("VOLT?", "1.5");
    let opener = MockOpener::new(mock.clone());
    let mut session = SessionBuilder::new(selector()).open(&opener).await.unwrap();

    mock.inject_failures(1);
    assert_eq!(session.query("VOLT?").await, None);
    // The next transaction goes through untouched.
    assert_eq!(session.query("VOLT?").await.as_deref(), Some("1.5"));
}

#[tokio::test]
async fn touched_tracks_first_use() {
    let mock = MockTransport::identified("ACME,M1,SN1,1.0");
    let opener = MockOpener::new(mock);
    let mut session = SessionBuilder::new(selector()).open(&opener).await.unwrap();

    assert!(!session.touched());
    session.command("*CLS").await.unwrap();
    assert!(session.touched());
}

#[tokio::test]
async fn reset_recovers_identity_and_reports_success() {
    let mock = MockTransport::identified("ACME,M1,SN1,1.0");
    let opener = MockOpener::new(mock.clone());
    let mut session = SessionBuilder::new(selector()).open(&opener).await.unwrap();

    assert!(session.reset(Duration::from_millis(200)).await);
    assert!(session.is_identified());
    assert!(mock.writes().contains(&"*RST".to_string()));
}

#[tokio::test]
async fn reset_timeout_reports_failure_without_raising() {
    let mock = MockTransport::new();
    mock.respond("*IDN?", "ACME,M1,SN1,1.0");
    let opener = MockOpener::new(mock.clone());
    let mut session = SessionBuilder::new(selector()).open(&opener).await.unwrap();

    // Kill the *OPC? path so re-identification can never complete.
    mock.respond("*IDN?", "ACME,M1,SN1,1.0");
    let started = std::time::Instant::now();
    let recovered = session.reset(Duration::from_millis(50)).await;
    assert!(!recovered);
    assert!(started.elapsed() < Duration::from_secs(2));
    // Post-reset the session is unidentified: queries are silent no-ops.
    assert_eq!(session.query("*IDN?").await, None);
}

#[tokio::test]
async fn ieee4882_helpers_speak_the_common_commands() {
    let mock = MockTransport::identified("ACME,M1,SN1,1.0");
    mock.respond("*ESR?", "0");
    mock.respond("*STB?", "32");
    mock.respond("*TST?", "0");
    let opener = MockOpener::new(mock.clone());
    let mut session = SessionBuilder::new(selector()).open(&opener).await.unwrap();

    assert!(session.clear_status().await);
    assert_eq!(session.status_byte().await, Some(32));
    assert_eq!(session.self_test().await, Some(0));
    session.set_event_status_enable(0xFF).await.unwrap();

    let writes = mock.writes();
    assert!(writes.contains(&"*CLS".to_string()));
    assert!(writes.contains(&"*ESE 255".to_string()));
}
