use super::*;

use std::sync::atomic::AtomicUsize;
use std::thread;

use parking_lot::Mutex as PlMutex;

struct RecordingHandler {
    label: &'static str,
    log: Arc<PlMutex<Vec<(&'static str, usize, u32)>>>,
}

impl IoHandler for RecordingHandler {
    fn on_io_completed(&self, bytes_transferred: usize, error: u32) {
        self.log.lock().push((self.label, bytes_transferred, error));
    }
}

fn recording_pump() -> (IoPump, Arc<PlMutex<Vec<(&'static str, usize, u32)>>>) {
    let pump = IoPump::new();
    let log = Arc::new(PlMutex::new(Vec::new()));
    pump.register_io_handler(
        1,
        Arc::new(RecordingHandler {
            label: "a",
            log: log.clone(),
        }),
    )
    .unwrap();
    pump.register_io_handler(
        2,
        Arc::new(RecordingHandler {
            label: "b",
            log: log.clone(),
        }),
    )
    .unwrap();
    (pump, log)
}

#[test]
fn test_port_poll_on_empty_returns_none() {
    let port = CompletionPort::new();
    assert!(port.wait(Some(Duration::ZERO)).is_none());
}

#[test]
fn test_port_delivers_in_fifo_order() {
    let port = CompletionPort::new();
    for n in 0..3 {
        port.post(CompletionPacket {
            token: 7,
            bytes_transferred: n,
            error: 0,
        });
    }
    for n in 0..3 {
        let packet = port.wait(Some(Duration::ZERO)).unwrap();
        assert_eq!(packet.bytes_transferred, n);
    }
}

#[test]
fn test_port_wakes_cross_thread() {
    let port = Arc::new(CompletionPort::new());
    let poster = port.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        poster.post(CompletionPacket {
            token: 3,
            bytes_transferred: 9,
            error: 0,
        });
    });
    let packet = port.wait(None).unwrap();
    assert_eq!(packet.token, 3);
    handle.join().unwrap();
}

#[test]
fn test_register_rejects_reserved_and_duplicate_tokens() {
    let (pump, log) = recording_pump();
    assert!(matches!(
        pump.register_io_handler(
            0,
            Arc::new(RecordingHandler {
                label: "x",
                log: log.clone()
            })
        ),
        Err(RunLoopError::TokenInUse(0))
    ));
    assert!(matches!(
        pump.register_io_handler(
            1,
            Arc::new(RecordingHandler {
                label: "x",
                log
            })
        ),
        Err(RunLoopError::TokenInUse(1))
    ));
}

#[test]
fn test_completion_dispatches_to_handler() {
    let (pump, log) = recording_pump();
    pump.port().post(CompletionPacket {
        token: 1,
        bytes_transferred: 64,
        error: 0,
    });
    assert!(pump.wait_for_io(Some(Duration::ZERO), None));
    assert_eq!(log.lock().as_slice(), &[("a", 64, 0)]);
    // Nothing left.
    assert!(!pump.wait_for_io(Some(Duration::ZERO), None));
}

#[test]
fn test_filtered_wait_buffers_other_tokens() {
    let (pump, log) = recording_pump();
    let port = pump.port();
    port.post(CompletionPacket {
        token: 1,
        bytes_transferred: 10,
        error: 0,
    });
    port.post(CompletionPacket {
        token: 2,
        bytes_transferred: 20,
        error: 0,
    });

    // Waiting for token 2 first buffers token 1's completion.
    assert!(pump.wait_for_io(Some(Duration::ZERO), Some(2)));
    assert!(pump.wait_for_io(Some(Duration::ZERO), Some(2)));
    assert_eq!(log.lock().as_slice(), &[("b", 20, 0)]);

    // The buffered completion replays on the next unfiltered call.
    assert!(pump.wait_for_io(Some(Duration::ZERO), None));
    assert_eq!(log.lock().as_slice(), &[("b", 20, 0), ("a", 10, 0)]);
}

#[test]
fn test_filtered_requery_preserves_per_token_order() {
    let (pump, log) = recording_pump();
    let port = pump.port();
    // Two completions for token 1 arrive while we wait for token 2.
    port.post(CompletionPacket {
        token: 1,
        bytes_transferred: 1,
        error: 0,
    });
    port.post(CompletionPacket {
        token: 1,
        bytes_transferred: 2,
        error: 0,
    });
    port.post(CompletionPacket {
        token: 2,
        bytes_transferred: 3,
        error: 0,
    });

    while log.lock().is_empty() {
        assert!(pump.wait_for_io(Some(Duration::ZERO), Some(2)));
    }
    assert!(pump.wait_for_io(Some(Duration::ZERO), Some(1)));
    assert!(pump.wait_for_io(Some(Duration::ZERO), Some(1)));
    assert_eq!(
        log.lock().as_slice(),
        &[("b", 3, 0), ("a", 1, 0), ("a", 2, 0)]
    );
}

#[test]
fn test_schedule_work_coalesces_wake_packets() {
    let (pump, _log) = recording_pump();
    pump.schedule_work();
    pump.schedule_work();
    pump.schedule_work();

    // Exactly one internal wake packet was posted.
    assert!(pump.wait_for_io(Some(Duration::ZERO), None));
    assert!(!pump.wait_for_io(Some(Duration::ZERO), None));

    // Once consumed, the next schedule_work posts a fresh one.
    pump.schedule_work();
    assert!(pump.wait_for_io(Some(Duration::ZERO), None));
}

#[test]
fn test_io_observers_bracket_dispatch() {
    struct Bracket {
        will: AtomicUsize,
        did: AtomicUsize,
    }
    impl IoObserver for Bracket {
        fn will_process_io_event(&self) {
            self.will.fetch_add(1, Ordering::SeqCst);
        }
        fn did_process_io_event(&self) {
            self.did.fetch_add(1, Ordering::SeqCst);
        }
    }

    let (pump, _log) = recording_pump();
    let bracket = Arc::new(Bracket {
        will: AtomicUsize::new(0),
        did: AtomicUsize::new(0),
    });
    pump.add_io_observer("bracket", bracket.clone());

    pump.port().post(CompletionPacket {
        token: 1,
        bytes_transferred: 5,
        error: 0,
    });
    assert!(pump.wait_for_io(Some(Duration::ZERO), None));
    assert_eq!(bracket.will.load(Ordering::SeqCst), 1);
    assert_eq!(bracket.did.load(Ordering::SeqCst), 1);

    pump.remove_io_observer("bracket");
    pump.port().post(CompletionPacket {
        token: 2,
        bytes_transferred: 5,
        error: 0,
    });
    assert!(pump.wait_for_io(Some(Duration::ZERO), None));
    assert_eq!(bracket.will.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unregistered_token_is_dropped_but_consumed() {
    let (pump, log) = recording_pump();
    pump.port().post(CompletionPacket {
        token: 99,
        bytes_transferred: 1,
        error: 0,
    });
    assert!(pump.wait_for_io(Some(Duration::ZERO), None));
    assert!(log.lock().is_empty());
}
