//! Ghost session client against a scripted Mirage peer over loopback TCP.

use std::io::BufReader;
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use edge_core::{AckStatus, Event, EventAck, FrameLimits, Outcome, read_frame, write_frame};
use edge_session::control::{read_registration, write_registration_ack};
use edge_session::security::server_tls_config;
use edge_session::{
    CancelToken, Conn, MirageClient, MirageClientConfig, RegistrationAck, SeedInfo,
    SessionConfig, SessionError, TlsConfig,
};
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};

#[derive(Clone, Copy)]
enum Script {
    AcceptAll,
    RejectRegistration,
    DropFirstEventThenAck,
    RejectEvents,
    HangUpAfterRegistration,
}

fn fast_session() -> SessionConfig {
    let mut cfg = SessionConfig::default();
    cfg.connect_timeout_ms = 1_000;
    cfg.handshake_timeout_ms = 1_000;
    cfg.read_timeout_ms = 500;
    cfg.write_timeout_ms = 500;
    cfg.ack_timeout_ms = 3_000;
    cfg.backoff.initial_delay_ms = 10;
    cfg.backoff.max_delay_ms = 50;
    cfg.backoff.jitter = false;
    cfg
}

fn ack_for(event: &Event, status: AckStatus) -> EventAck {
    EventAck {
        event_id: event.event_id.clone(),
        command_id: event.command_id.clone(),
        ghost_id: event.ghost_id.clone(),
        ack_status: status,
        ack_code: if status == AckStatus::Accepted { 0 } else { 409 },
        timestamp_ms: 1_700_000_000_000,
    }
}

fn serve_session(conn: Conn, script: Script) {
    let mut reader = BufReader::new(conn);
    let reg = read_registration(&mut reader).expect("registration");
    let accepted = !matches!(script, Script::RejectRegistration);
    let ack = RegistrationAck {
        status: if accepted { "accepted" } else { "rejected" }.into(),
        code: if accepted { 0 } else { 403 },
        message: if accepted { "registered" } else { "identity mismatch" }.into(),
        ghost_id: reg.ghost_id.clone(),
        timestamp_ms: 1,
    };
    write_registration_ack(reader.get_mut(), &ack).expect("ack");
    if !accepted || matches!(script, Script::HangUpAfterRegistration) {
        return;
    }

    let mut dropped = false;
    while let Ok(frame) = read_frame(&mut reader, FrameLimits::default()) {
        let event = Event::decode_frame(&frame).expect("event frame");
        if matches!(script, Script::DropFirstEventThenAck) && !dropped {
            dropped = true;
            continue;
        }
        let status = match script {
            Script::RejectEvents => AckStatus::Rejected,
            _ => AckStatus::Accepted,
        };
        let reply = ack_for(&event, status).encode_frame(frame.header.message_id).unwrap();
        if write_frame(reader.get_mut(), &reply, FrameLimits::default()).is_err() {
            return;
        }
    }
}

fn spawn_plain_mirage(script: Script) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        serve_session(Conn::Plain(stream), script);
    });
    (addr, handle)
}

fn event(event_id: &str) -> Event {
    Event {
        event_id: event_id.into(),
        command_id: "cmd.intent.1.0".into(),
        intent_id: "intent.1".into(),
        ghost_id: "ghost.alpha".into(),
        seed_id: "seed.flow".into(),
        outcome: Outcome::Success,
        timestamp_ms: 0,
    }
}

fn client(addr: &str, session: SessionConfig) -> MirageClient {
    MirageClient::new(MirageClientConfig {
        address: addr.into(),
        ghost_id: "ghost.alpha".into(),
        seed_list: vec![SeedInfo {
            id: "seed.flow".into(),
            name: "Flow".into(),
            description: "Deterministic flow seed".into(),
        }],
        session,
        max_connect_attempts: 3,
        ..MirageClientConfig::default()
    })
    .unwrap()
}

#[test]
fn new_requires_address_and_ghost_id() {
    let err = MirageClient::new(MirageClientConfig::default()).unwrap_err();
    assert!(matches!(err, SessionError::AddressRequired));
    let err = MirageClient::new(MirageClientConfig {
        address: "127.0.0.1:9000".into(),
        ..MirageClientConfig::default()
    })
    .unwrap_err();
    assert!(matches!(err, SessionError::GhostIdRequired));

    let ok = MirageClient::new(MirageClientConfig {
        address: "127.0.0.1:9000".into(),
        ghost_id: "ghost.alpha".into(),
        ..MirageClientConfig::default()
    })
    .unwrap();
    assert_eq!(ok.config().peer_identity, "ghost.alpha");
}

#[test]
fn event_is_acked_and_outbox_drained() {
    let (addr, mirage) = spawn_plain_mirage(Script::AcceptAll);
    let cancel = CancelToken::new();
    let mut session = client(&addr, fast_session())
        .connect_and_register(&cancel)
        .unwrap();

    let ack = session.send_event_with_ack(&cancel, event("evt.1")).unwrap();
    assert_eq!(ack.event_id, "evt.1");
    assert!(ack.is_accepted());
    assert!(session.outbox_snapshot().is_empty());

    session.close();
    mirage.join().unwrap();
}

#[test]
fn probe_notices_mirage_hangup() {
    let (addr, mirage) = spawn_plain_mirage(Script::AcceptAll);
    let cancel = CancelToken::new();
    let mut live = client(&addr, fast_session())
        .connect_and_register(&cancel)
        .unwrap();
    assert!(live.probe());
    live.close();
    assert!(!live.probe());
    mirage.join().unwrap();

    let (addr, mirage) = spawn_plain_mirage(Script::HangUpAfterRegistration);
    let mut session = client(&addr, fast_session())
        .connect_and_register(&cancel)
        .unwrap();
    mirage.join().unwrap();
    thread::sleep(Duration::from_millis(50));
    assert!(!session.probe());
    assert!(session.is_closed());
}

#[test]
fn lost_ack_is_retried_on_the_same_session() {
    let (addr, mirage) = spawn_plain_mirage(Script::DropFirstEventThenAck);
    let cancel = CancelToken::new();
    let mut session = client(&addr, fast_session())
        .connect_and_register(&cancel)
        .unwrap();

    let ack = session.send_event_with_ack(&cancel, event("evt.2")).unwrap();
    assert_eq!(ack.event_id, "evt.2");
    assert!(session.outbox_snapshot().is_empty());

    session.close();
    mirage.join().unwrap();
}

#[test]
fn rejected_ack_is_not_retried() {
    let (addr, mirage) = spawn_plain_mirage(Script::RejectEvents);
    let cancel = CancelToken::new();
    let mut session = client(&addr, fast_session())
        .connect_and_register(&cancel)
        .unwrap();

    let err = session.send_event_with_ack(&cancel, event("evt.3")).unwrap_err();
    assert!(matches!(
        err,
        SessionError::AckRejected {
            status: AckStatus::Rejected,
            code: 409
        }
    ));
    assert!(session.outbox_snapshot().is_empty());

    session.close();
    mirage.join().unwrap();
}

#[test]
fn rejected_registration_is_terminal() {
    let (addr, mirage) = spawn_plain_mirage(Script::RejectRegistration);
    let cancel = CancelToken::new();
    let err = client(&addr, fast_session())
        .connect_and_register(&cancel)
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::RegistrationRejected { code: 403, .. }
    ));
    mirage.join().unwrap();
}

#[test]
fn dial_gives_up_after_max_attempts() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let cancel = CancelToken::new();
    let err = client(&addr, fast_session())
        .connect_and_register(&cancel)
        .unwrap_err();
    assert!(matches!(err, SessionError::Io(_)));
}

#[test]
fn ack_timeout_when_mirage_never_answers() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let mirage = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(Conn::Plain(stream));
        let reg = read_registration(&mut reader).unwrap();
        let ack = RegistrationAck {
            status: "accepted".into(),
            code: 0,
            message: "registered".into(),
            ghost_id: reg.ghost_id,
            timestamp_ms: 1,
        };
        write_registration_ack(reader.get_mut(), &ack).unwrap();
        // Swallow frames without acking until the client gives up.
        while read_frame(&mut reader, FrameLimits::default()).is_ok() {}
    });

    let mut cfg = fast_session();
    cfg.read_timeout_ms = 100;
    cfg.ack_timeout_ms = 400;
    let cancel = CancelToken::new();
    let mut session = client(&addr, cfg).connect_and_register(&cancel).unwrap();
    let err = session.send_event_with_ack(&cancel, event("evt.4")).unwrap_err();
    match err {
        SessionError::AckTimeout { event_id, attempts } => {
            assert_eq!(event_id, "evt.4");
            assert!(attempts >= 2);
        }
        other => panic!("unexpected error: {other}"),
    }
    let pending = session.outbox_snapshot();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].last_error.is_some());

    session.close();
    mirage.join().unwrap();
}

struct Pki {
    _dir: tempfile::TempDir,
    ca: std::path::PathBuf,
    server_cert: std::path::PathBuf,
    server_key: std::path::PathBuf,
    client_cert: std::path::PathBuf,
    client_key: std::path::PathBuf,
}

fn write(path: &Path, contents: String) {
    std::fs::write(path, contents).unwrap();
}

fn generate_pki() -> Pki {
    let dir = tempfile::tempdir().unwrap();
    let ca_key = KeyPair::generate().unwrap();
    let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params
        .distinguished_name
        .push(DnType::CommonName, "edge test ca");
    let ca_cert = ca_params.self_signed(&ca_key).unwrap();

    let server_key = KeyPair::generate().unwrap();
    let server_cert = CertificateParams::new(vec!["localhost".to_string()])
        .unwrap()
        .signed_by(&server_key, &ca_cert, &ca_key)
        .unwrap();
    let client_key = KeyPair::generate().unwrap();
    let client_cert = CertificateParams::new(vec!["ghost.alpha".to_string()])
        .unwrap()
        .signed_by(&client_key, &ca_cert, &ca_key)
        .unwrap();

    let pki = Pki {
        ca: dir.path().join("ca.pem"),
        server_cert: dir.path().join("server.pem"),
        server_key: dir.path().join("server.key"),
        client_cert: dir.path().join("client.pem"),
        client_key: dir.path().join("client.key"),
        _dir: dir,
    };
    write(&pki.ca, ca_cert.pem());
    write(&pki.server_cert, server_cert.pem());
    write(&pki.server_key, server_key.serialize_pem());
    write(&pki.client_cert, client_cert.pem());
    write(&pki.client_key, client_key.serialize_pem());
    pki
}

#[test]
fn mutual_tls_session_delivers_events() {
    let pki = generate_pki();
    let server_tls = TlsConfig {
        enabled: true,
        mutual: true,
        ca_file: Some(pki.ca.clone()),
        cert_file: Some(pki.server_cert.clone()),
        key_file: Some(pki.server_key.clone()),
        ..TlsConfig::default()
    };
    let server_config = server_tls_config(&server_tls).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let mirage = thread::spawn(move || {
        let (stream, _): (TcpStream, _) = listener.accept().unwrap();
        let conn = Conn::accept_tls(stream, Arc::clone(&server_config), Duration::from_secs(2))
            .expect("tls accept");
        serve_session(conn, Script::AcceptAll);
    });

    let mut session_cfg = fast_session();
    session_cfg.tls = TlsConfig {
        enabled: true,
        mutual: true,
        ca_file: Some(pki.ca.clone()),
        cert_file: Some(pki.client_cert.clone()),
        key_file: Some(pki.client_key.clone()),
        server_name: Some("localhost".into()),
        insecure_skip_verify: false,
    };
    let cancel = CancelToken::new();
    let mut session = client(&addr, session_cfg)
        .connect_and_register(&cancel)
        .unwrap();
    assert!(session.is_tls());
    let ack = session.send_event_with_ack(&cancel, event("evt.tls")).unwrap();
    assert!(ack.is_accepted());

    session.close();
    mirage.join().unwrap();
}
