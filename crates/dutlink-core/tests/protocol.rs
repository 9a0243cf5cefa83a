use dutlink_core::ber::BitErrorCounter;
use dutlink_core::config::ConnectionConfig;
use dutlink_core::dut::DutSession;
use dutlink_core::protocol::{
    commands::CommandKind, Command, Connection, ConnectionState, ProtocolError, Transport,
};
use pretty_assertions::assert_eq;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the mock DUT saw and what it will answer
#[derive(Default)]
struct Wire {
    sent: Vec<String>,
    replies: VecDeque<io::Result<Vec<u8>>>,
    fail_on_send: bool,
}

/// Mock transport for testing
struct MockTransport {
    wire: Arc<Mutex<Wire>>,
}

impl Transport for MockTransport {
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        let mut wire = self.wire.lock().unwrap();
        if wire.fail_on_send {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write failed"));
        }
        wire.sent.push(String::from_utf8(frame.to_vec()).unwrap());
        Ok(())
    }

    fn read_line(&mut self) -> io::Result<Vec<u8>> {
        self.wire
            .lock()
            .unwrap()
            .replies
            .pop_front()
            .unwrap_or_else(|| Err(io::Error::new(io::ErrorKind::TimedOut, "no response")))
    }

    fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

fn session_with(replies: &[&str]) -> (DutSession, Arc<Mutex<Wire>>) {
    let wire = Arc::new(Mutex::new(Wire {
        replies: replies.iter().map(|r| Ok(r.as_bytes().to_vec())).collect(),
        ..Wire::default()
    }));
    let session = DutSession::new(ConnectionConfig::default());
    let handle = Arc::clone(&wire);
    session
        .connection()
        .connect_with(move |_| Ok(Box::new(MockTransport { wire: handle })))
        .unwrap();
    (session, wire)
}

fn sent(wire: &Arc<Mutex<Wire>>) -> Vec<String> {
    wire.lock().unwrap().sent.clone()
}

#[test]
fn test_get_ber_split_scenario() {
    let (session, wire) = session_with(&["OK:10:20:1:0\n"]);

    let delta = session.get_ber("Lane1").unwrap();
    assert_eq!(delta, BitErrorCounter::split(10, 20, 1, 0));
    assert_eq!(BitErrorCounter::empty().merge(delta), delta);
    assert_eq!(sent(&wire), vec!["DUT_getBER:Lane1\n"]);
}

#[test]
fn test_get_ber_simple_shape() {
    let (session, _wire) = session_with(&["OK:1000000:7\n"]);
    assert_eq!(session.get_ber("Lane1").unwrap(), BitErrorCounter::simple(1_000_000, 7));
}

#[test]
fn test_get_ber_bad_payload_leaves_total_untouched() {
    let (session, _wire) = session_with(&["OK:1:2:3\n"]);
    assert!(matches!(
        session.poll_ber("Lane1"),
        Err(ProtocolError::InvalidResponse(_))
    ));
    assert!(session.ber_total().is_zero());
}

#[test]
fn test_get_ber_unknown_location_skips_exchange() {
    let (session, wire) = session_with(&[]);
    let counter = session.get_ber("Lane42").unwrap();
    assert_eq!(counter, BitErrorCounter::empty());
    assert!(sent(&wire).is_empty());
}

#[test]
fn test_set_device_mode_scenario() {
    let (session, wire) = session_with(&["OK\n"]);
    session.set_device_mode("Mode1").unwrap();
    assert_eq!(sent(&wire), vec!["DUT_setDeviceMode:Mode1\n"]);
}

#[test]
fn test_init_device_error_scenario() {
    let (session, wire) = session_with(&["ERR:bad argument\n"]);
    match session.init("Lane1", "argX") {
        Err(ProtocolError::Device { command, detail }) => {
            assert_eq!(command, "DUT_Init");
            assert_eq!(detail, "bad argument");
        }
        other => panic!("Expected device error, got {:?}", other),
    }
    assert_eq!(sent(&wire), vec!["DUT_Init:Lane1:argX\n"]);
}

#[test]
fn test_device_error_without_detail() {
    let (session, _wire) = session_with(&["NAK\n"]);
    match session.sync_pattern("Lane1") {
        Err(ProtocolError::Device { command, detail }) => {
            assert_eq!(command, "DUT_syncPattern");
            assert_eq!(detail, "");
        }
        other => panic!("Expected device error, got {:?}", other),
    }
}

#[test]
fn test_delimiter_in_param_never_reaches_transport() {
    let (session, wire) = session_with(&["OK\n"]);
    assert!(matches!(
        session.init("Lane1", "a:b"),
        Err(ProtocolError::Encoding(_))
    ));
    assert!(matches!(
        session
            .connection()
            .send_and_receive(&Command::new("DUT_custom").param("x\ny")),
        Err(ProtocolError::Encoding(_))
    ));
    assert!(sent(&wire).is_empty());
}

#[test]
fn test_closed_connection_is_reported_before_framing() {
    let conn = Connection::new(ConnectionConfig::default());
    let err = conn
        .send_and_receive(&Command::of(CommandKind::Init).param("a:b"))
        .unwrap_err();
    assert!(matches!(err, ProtocolError::NotConnected));
    assert_eq!(conn.counters().tx_frames, 0);
}

#[test]
fn test_read_timeout_keeps_connection_state() {
    let (session, _wire) = session_with(&[]);
    let err = session.sync_pattern("Lane1").unwrap_err();
    assert!(matches!(err, ProtocolError::Transport(_)));
    assert!(err.is_timeout());
    assert_eq!(session.state(), ConnectionState::Connected);
}

#[test]
fn test_write_failure_is_transport_error() {
    let (session, wire) = session_with(&["OK\n"]);
    wire.lock().unwrap().fail_on_send = true;
    let err = session.set_device_mode("Mode2").unwrap_err();
    assert!(matches!(err, ProtocolError::Transport(_)));
    assert!(!err.is_timeout());
    // no retry: the queued reply is still unread
    assert_eq!(wire.lock().unwrap().replies.len(), 1);
}

#[test]
fn test_simulated_error_ratio_frame() {
    let (session, wire) = session_with(&["OK\n"]);
    session.set_simulated_error_ratio(4.2e-9).unwrap();
    assert_eq!(sent(&wire), vec!["DUT_setSimulatedErrorRatio:4.2e-9\n"]);
}

#[test]
fn test_disconnect_when_closed_is_silent() {
    let conn = Connection::new(ConnectionConfig::default());
    conn.disconnect();
    assert_eq!(conn.state(), ConnectionState::Disconnected);
}

#[test]
fn test_disconnect_releases_even_on_device_error() {
    let (session, wire) = session_with(&["ERR:busy\n"]);
    session.disconnect();
    assert!(!session.is_connected());
    assert_eq!(sent(&wire), vec!["DUT_disconnect:\n"]);

    // second disconnect does not talk to the DUT again
    session.disconnect();
    assert_eq!(sent(&wire).len(), 1);
}

#[test]
fn test_not_connected() {
    let session = DutSession::new(ConnectionConfig::default());
    assert!(matches!(
        session.sync_pattern("Lane1"),
        Err(ProtocolError::NotConnected)
    ));
}

#[test]
fn test_connect_failure_is_connect_error() {
    let conn = Connection::new(ConnectionConfig::default());
    let err = conn
        .connect_with(|_| Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused")))
        .unwrap_err();
    assert!(matches!(err, ProtocolError::Connect(_)));
    assert!(!conn.is_connected());
}

#[test]
fn test_concurrent_callers_are_serialized() {
    let replies: Vec<String> = (0..32).map(|_| "OK:1:0\n".to_string()).collect();
    let replies: Vec<&str> = replies.iter().map(String::as_str).collect();
    let (session, wire) = session_with(&replies);
    let session = Arc::new(session);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let session = Arc::clone(&session);
            std::thread::spawn(move || {
                for _ in 0..8 {
                    session.poll_ber("Lane1").unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(session.ber_total(), BitErrorCounter::simple(32, 0));
    assert_eq!(sent(&wire).len(), 32);
    // every scripted reply was consumed exactly once
    let err = session
        .connection()
        .send_and_receive(&Command::of(CommandKind::GetBer).param("Lane1"))
        .unwrap_err();
    assert!(err.is_timeout());
}
