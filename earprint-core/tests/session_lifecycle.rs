use std::thread;
use std::time::{Duration, Instant};

use earprint_core::audio::stub::{StubBackend, StubCapture};
use earprint_core::engine::{RenderSession, StreamOptions};
use earprint_core::events::{SessionStatus, SessionStatusEvent};
use earprint_core::render::{Brir, OrientationKey, RealTimeConvolver, RenderConfig};
use earprint_core::EarprintError;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

const FS: u32 = 48_000;
const BLOCK: usize = 64;

fn convolver(brirs: Vec<Brir>) -> RealTimeConvolver {
    RealTimeConvolver::from_brirs(brirs, FS, &RenderConfig::new(BLOCK)).expect("convolver")
}

fn passthrough() -> RealTimeConvolver {
    convolver(vec![Brir::new(OrientationKey::Yaw(0.0), vec![1.0], vec![1.0])])
}

fn ramp(len: usize, scale: f32) -> Vec<f32> {
    (0..len).map(|i| scale * (i % 97) as f32 / 97.0).collect()
}

fn wait_for(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    done()
}

fn wait_for_callbacks(capture: &StubCapture, n: usize) {
    assert!(
        wait_for(Duration::from_secs(5), || capture.callbacks() >= n),
        "timed out waiting for {n} callbacks"
    );
}

fn recv_status_with_timeout(
    rx: &mut broadcast::Receiver<SessionStatusEvent>,
    timeout: Duration,
) -> SessionStatusEvent {
    let start = Instant::now();
    loop {
        match rx.try_recv() {
            Ok(ev) => return ev,
            Err(TryRecvError::Empty) => {
                if start.elapsed() >= timeout {
                    panic!("timed out waiting for status event");
                }
                thread::sleep(Duration::from_millis(2));
            }
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Closed) => panic!("status channel closed unexpectedly"),
        }
    }
}

#[test]
fn start_stop_lifecycle() {
    let source = vec![ramp(BLOCK * 4, 1.0), ramp(BLOCK * 4, -0.5)];
    let backend = StubBackend::new(source.clone());
    let capture = backend.capture();
    let spec = backend.spec_handle();
    let session = RenderSession::new(passthrough(), Box::new(backend));
    let mut status_rx = session.subscribe_status();

    assert_eq!(session.status(), SessionStatus::Idle);
    session.start(StreamOptions::default()).expect("start");
    assert_eq!(session.status(), SessionStatus::Running);
    assert!(session.is_running());
    assert_eq!(
        recv_status_with_timeout(&mut status_rx, Duration::from_secs(1)).status,
        SessionStatus::Running
    );

    let opened = spec.lock().clone().expect("spec recorded");
    assert_eq!(opened.sample_rate, FS);
    assert_eq!(opened.block_size, BLOCK);
    assert_eq!(opened.input_channels, 2);

    assert!(matches!(
        session.start(StreamOptions::default()),
        Err(EarprintError::AlreadyRunning)
    ));

    wait_for_callbacks(&capture, 4);
    session.stop().expect("stop");
    assert_eq!(session.status(), SessionStatus::Idle);
    assert!(!session.is_running());
    assert_eq!(
        recv_status_with_timeout(&mut status_rx, Duration::from_secs(1)).status,
        SessionStatus::Idle
    );

    // No callback fires once stop() has returned.
    let after_stop = capture.callbacks();
    thread::sleep(Duration::from_millis(30));
    assert_eq!(capture.callbacks(), after_stop);

    let diagnostics = session.diagnostics_snapshot();
    assert_eq!(diagnostics.blocks_processed, after_stop);
    assert_eq!(diagnostics.shape_errors, 0);

    let [left, right] = capture.output();
    for i in 0..BLOCK * 4 {
        assert!((left[i] - source[0][i]).abs() < 1e-5, "left sample {i}");
        assert!((right[i] - source[1][i]).abs() < 1e-5, "right sample {i}");
    }

    assert!(matches!(session.stop(), Err(EarprintError::NotRunning)));
}

#[test]
fn failed_open_reports_error_and_allows_retry() {
    let session = RenderSession::new(passthrough(), Box::new(StubBackend::failing()));
    let mut status_rx = session.subscribe_status();

    let err = session.start(StreamOptions::default()).unwrap_err();
    assert!(matches!(err, EarprintError::AudioDevice(_)));
    assert_eq!(session.status(), SessionStatus::Error);
    let event = recv_status_with_timeout(&mut status_rx, Duration::from_secs(1));
    assert_eq!(event.status, SessionStatus::Error);
    assert!(event.detail.is_some());
    assert!(!session.is_running());

    // The backend is handed back, so a second attempt reaches it again.
    let again = session.start(StreamOptions::default()).unwrap_err();
    assert!(matches!(again, EarprintError::AudioDevice(_)));
    assert!(matches!(session.stop(), Err(EarprintError::NotRunning)));
}

#[test]
fn duration_closes_stream_by_itself() {
    let backend = StubBackend::new(Vec::new());
    let capture = backend.capture();
    let session = RenderSession::new(passthrough(), Box::new(backend));

    session
        .start(StreamOptions {
            duration: Some(Duration::from_millis(30)),
            ..StreamOptions::default()
        })
        .expect("start");

    assert!(wait_for(Duration::from_secs(5), || !session.is_running()));
    assert_eq!(session.status(), SessionStatus::Idle);
    let after = capture.callbacks();
    assert!(after > 0);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(capture.callbacks(), after);

    // A finished session can be started again without an explicit stop.
    session.start(StreamOptions::default()).expect("restart");
    assert!(session.is_running());
    session.stop().expect("stop");
}

#[test]
fn orientation_updates_reach_running_stream() {
    let brirs = vec![
        Brir::new(OrientationKey::Yaw(0.0), vec![1.0], vec![0.0]),
        Brir::new(OrientationKey::Yaw(90.0), vec![0.0], vec![1.0]),
    ];
    let source = vec![vec![1.0; BLOCK * 1_000], vec![1.0; BLOCK * 1_000]];
    let backend = StubBackend::new(source);
    let capture = backend.capture();
    let session = RenderSession::new(convolver(brirs), Box::new(backend));
    session.set_orientation(90.0, 0.0, 0.0);

    session.start(StreamOptions::default()).expect("start");
    wait_for_callbacks(&capture, 3);
    session.stop().expect("stop");

    let [left, right] = capture.output();
    assert!(left[..BLOCK * 3].iter().all(|v| v.abs() < 1e-5));
    assert!(right[..BLOCK * 3].iter().all(|v| (v - 1.0).abs() < 1e-5));
}

#[test]
fn held_convolver_yields_silence_and_counts_misses() {
    let source = vec![vec![1.0; BLOCK * 1_000], vec![1.0; BLOCK * 1_000]];
    let backend = StubBackend::new(source);
    let capture = backend.capture();
    let session = RenderSession::new(passthrough(), Box::new(backend));

    session.start(StreamOptions::default()).expect("start");
    session.with_convolver(|_| {
        let held_from = capture.callbacks();
        wait_for_callbacks(&capture, held_from + 3);
    });
    session.stop().expect("stop");

    let diagnostics = session.diagnostics_snapshot();
    assert!(diagnostics.contention_misses >= 2);
    let [left, _] = capture.output();
    assert!(left.iter().any(|v| *v == 0.0));
}
