use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use camctl::daemon::command::{parse_line, Command, Format};
use camctl::daemon::emulator::Emulator;
use camctl::daemon::session::{ControlSession, SessionConfig, SessionError, SessionState};
use camctl::daemon::status::{DecodeError, RecorderState, StatusSnapshot};
use camctl::daemon::transport::{ensure_fifo, PipePair, TransportError};
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio::net::unix::pipe;
use tokio::task::JoinHandle;
use tokio_test::{assert_err, assert_ok};

const STATUS_TIMEOUT: Duration = Duration::from_secs(3);

fn session_config(dir: &Path, unique: bool) -> SessionConfig {
    SessionConfig {
        pipes: PipePair::new(dir.join("camogm_cmd"), dir.join("camogm.state")),
        unique_status_pipes: unique,
        pipe_mode: 0o777,
        send_timeout: Duration::from_millis(500),
        poll_interval: Duration::from_millis(10),
    }
}

async fn wait_for(path: &Path) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while !path.exists() {
        assert!(Instant::now() < deadline, "{:?} never appeared", path);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn spawn_emulator(dir: &Path) -> (PathBuf, JoinHandle<()>) {
    let command_pipe = dir.join("camogm_cmd");
    let pipe = command_pipe.clone();
    let handle = tokio::spawn(async move {
        let mut emulator = Emulator::new(pipe).with_poll_interval(Duration::from_millis(10));
        emulator.run().await.expect("emulator failed");
    });
    wait_for(&command_pipe).await;
    (command_pipe, handle)
}

/// Listen on a fresh command pipe the way the recorder does, without answering.
fn listen(command_pipe: &Path) -> pipe::Receiver {
    ensure_fifo(command_pipe, 0o777).unwrap();
    pipe::OpenOptions::new()
        .read_write(true)
        .open_receiver(command_pipe)
        .unwrap()
}

async fn read_line(listener: &mut pipe::Receiver) -> String {
    let mut line = Vec::new();
    while !line.ends_with(b"\n") {
        let mut chunk = [0u8; 256];
        let n = listener.read(&mut chunk).await.unwrap();
        line.extend_from_slice(&chunk[..n]);
    }
    String::from_utf8(line).unwrap()
}

/// Run one status cycle against a recorder that answers with `reply`.
async fn status_answered_with(
    dir: &TempDir,
    reply: &'static [u8],
) -> Result<Option<StatusSnapshot>, SessionError> {
    let config = session_config(dir.path(), true);
    let mut listener = listen(&config.pipes.command);

    let mut session = ControlSession::new(config);
    let request =
        tokio::spawn(async move { session.execute(&[], true, STATUS_TIMEOUT).await });

    let line = read_line(&mut listener).await;
    let target = parse_line(&line)
        .into_iter()
        .find(|clause| clause.name == "xstatus")
        .and_then(|clause| clause.value)
        .expect("status request names a pipe");
    // Blocks until the session opens its end.
    tokio::fs::write(&target, reply).await.unwrap();

    request.await.unwrap()
}

fn leftover_status_pipes(dir: &TempDir) -> Vec<String> {
    std::fs::read_dir(dir.path())
        .expect("read temp dir")
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("camogm.state"))
        .collect()
}

#[tokio::test]
async fn status_reflects_commands_in_the_same_batch() {
    let dir = tempfile::tempdir().unwrap();
    let (_, emulator) = spawn_emulator(dir.path()).await;
    let mut session = ControlSession::new(session_config(dir.path(), true));

    let snapshot = session
        .execute(
            &[
                Command::SetPrefix("/var/hdd/".to_string()),
                Command::SetFormat(Format::Mov),
                Command::Start,
            ],
            true,
            STATUS_TIMEOUT,
        )
        .await
        .unwrap()
        .expect("status requested");

    assert_eq!(snapshot.state, RecorderState::Running);
    assert_eq!(snapshot.prefix(), Some("/var/hdd/"));
    assert_eq!(snapshot.format(), Some("mov"));
    assert!(snapshot.file_name.starts_with("/var/hdd/"));
    assert_eq!(snapshot.channels.len(), 4);
    assert_eq!(session.state(), SessionState::Done);
    assert!(leftover_status_pipes(&dir).is_empty());

    assert_ok!(session.execute(&[Command::Exit], false, STATUS_TIMEOUT).await);
    emulator.await.unwrap();
}

#[tokio::test]
async fn fire_and_forget_then_status() {
    let dir = tempfile::tempdir().unwrap();
    let (_, emulator) = spawn_emulator(dir.path()).await;
    let mut session = ControlSession::new(session_config(dir.path(), true));

    let none = session
        .execute(&[Command::SetDuration(300), Command::SetTimelapse(5)], false, STATUS_TIMEOUT)
        .await
        .unwrap();
    assert!(none.is_none());
    assert_eq!(session.state(), SessionState::Done);

    let snapshot = session
        .execute(&[], true, STATUS_TIMEOUT)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.state, RecorderState::Stopped);
    assert_eq!(snapshot.param("max_duration"), Some("300"));
    assert_eq!(snapshot.param("seconds_skip_left"), Some("5"));

    assert_ok!(session.execute(&[Command::Exit], false, STATUS_TIMEOUT).await);
    emulator.await.unwrap();
}

#[tokio::test]
async fn shared_status_pipe_replaces_stale_entry() {
    let dir = tempfile::tempdir().unwrap();
    let (_, emulator) = spawn_emulator(dir.path()).await;
    std::fs::write(dir.path().join("camogm.state"), "<stale/>").unwrap();

    let mut session = ControlSession::new(session_config(dir.path(), false));
    let snapshot = session
        .execute(&[Command::Stop], true, STATUS_TIMEOUT)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.state, RecorderState::Stopped);

    // The shared pipe stays for the next caller.
    assert_eq!(leftover_status_pipes(&dir), vec!["camogm.state".to_string()]);

    assert_ok!(session.execute(&[Command::Exit], false, STATUS_TIMEOUT).await);
    emulator.await.unwrap();
}

#[tokio::test]
async fn raw_document_is_returned_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let (_, emulator) = spawn_emulator(dir.path()).await;
    let mut session = ControlSession::new(session_config(dir.path(), true));

    let document = session.execute_raw(&[], STATUS_TIMEOUT).await.unwrap();
    assert!(document.starts_with("<?xml"));
    assert!(document.contains("<state>\"stopped\"</state>"));

    assert_ok!(session.execute(&[Command::Exit], false, STATUS_TIMEOUT).await);
    emulator.await.unwrap();
}

#[tokio::test]
async fn after_exit_the_recorder_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let (command_pipe, emulator) = spawn_emulator(dir.path()).await;
    let mut session = ControlSession::new(session_config(dir.path(), true));

    assert_ok!(session.execute(&[Command::Exit], false, STATUS_TIMEOUT).await);
    emulator.await.unwrap();
    assert!(!command_pipe.exists());

    let err = assert_err!(session.execute(&[], true, STATUS_TIMEOUT).await);
    assert!(matches!(
        err,
        SessionError::SendFailed(TransportError::Unavailable { .. })
    ));
}

#[tokio::test]
async fn silent_recorder_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let config = session_config(dir.path(), true);
    // Reads commands but never answers.
    let _listener = listen(&config.pipes.command);

    let mut session = ControlSession::new(config);
    let limit = Duration::from_millis(200);
    let started = Instant::now();
    let err = assert_err!(session.execute(&[], true, limit).await);

    assert!(matches!(
        err,
        SessionError::ReceiveFailed(TransportError::Timeout { .. })
    ));
    assert!(started.elapsed() < limit + Duration::from_secs(2));
    assert!(leftover_status_pipes(&dir).is_empty());
}

#[tokio::test]
async fn status_request_is_the_last_clause() {
    let dir = tempfile::tempdir().unwrap();
    let config = session_config(dir.path(), false);
    let mut listener = listen(&config.pipes.command);
    let status_pipe = config.pipes.status.clone();

    let mut session = ControlSession::new(config);
    let request = tokio::spawn(async move {
        session
            .execute(
                &[
                    Command::SetPrefix("/a".to_string()),
                    Command::SetFormat(Format::Mov),
                ],
                true,
                Duration::from_millis(300),
            )
            .await
    });

    let line = read_line(&mut listener).await;
    assert_eq!(
        line,
        format!("prefix=/a;format=mov;xstatus={};\n", status_pipe.display())
    );

    // Nobody answers, so the request ends in a timeout.
    assert!(matches!(
        request.await.unwrap(),
        Err(SessionError::ReceiveFailed(TransportError::Timeout { .. }))
    ));
}

#[tokio::test]
async fn geotagging_settings_come_back_under_daemon_names() {
    let dir = tempfile::tempdir().unwrap();
    let (_, emulator) = spawn_emulator(dir.path()).await;
    let mut session = ControlSession::new(session_config(dir.path(), true));

    let snapshot = session
        .execute(
            &[
                Command::Raw("kml_hhf=20".to_string()),
                Command::Raw("kml_alt=gps".to_string()),
                Command::Raw("no_such_setting=1".to_string()),
            ],
            true,
            STATUS_TIMEOUT,
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(snapshot.param("kml_horHalfFov"), Some("20.000000"));
    assert_eq!(snapshot.param("kml_height_mode"), Some("GPS altitude"));
    assert_eq!(snapshot.param("sensor_port_0.circbuf_rp"), Some("0"));
    assert_eq!(snapshot.param("kml_hhf"), None);
    assert_eq!(snapshot.param("kml_alt"), None);
    assert_eq!(snapshot.param("no_such_setting"), None);

    assert_ok!(session.execute(&[Command::Exit], false, STATUS_TIMEOUT).await);
    emulator.await.unwrap();
}

#[tokio::test]
async fn garbage_reply_is_a_decode_failure() {
    let dir = tempfile::tempdir().unwrap();

    let err = assert_err!(status_answered_with(&dir, b"camogm: bad command").await);
    assert!(
        matches!(err, SessionError::DecodeFailed(DecodeError::Malformed(_))),
        "unexpected error: {:?}",
        err
    );
    assert!(leftover_status_pipes(&dir).is_empty());
}

#[tokio::test]
async fn reply_without_state_is_missing_a_field() {
    let dir = tempfile::tempdir().unwrap();

    let reply = b"<camogm_state><file_name>\"/var/hdd/1.mov\"</file_name></camogm_state>";
    let err = assert_err!(status_answered_with(&dir, reply).await);
    assert!(
        matches!(err, SessionError::DecodeFailed(DecodeError::MissingField(ref f)) if f == "state"),
        "unexpected error: {:?}",
        err
    );
    assert!(leftover_status_pipes(&dir).is_empty());
}

#[tokio::test]
async fn non_utf8_reply_is_a_receive_failure() {
    let dir = tempfile::tempdir().unwrap();

    let reply = b"<camogm_state><state>\"stopped\"</state>\
                  <file_name>\"\xfe\"</file_name></camogm_state>";
    let err = assert_err!(status_answered_with(&dir, reply).await);
    match err {
        SessionError::ReceiveFailed(TransportError::Io { source, .. }) => {
            assert_eq!(source.kind(), std::io::ErrorKind::InvalidData)
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(leftover_status_pipes(&dir).is_empty());
}
