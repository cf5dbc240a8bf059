use crate::{RunLoop, RunLoopConfig, RunLoopError};

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

#[test]
fn test_public_api_smoke() {
    let run_loop = RunLoop::new(RunLoopConfig::default());
    let counter = Arc::new(AtomicU32::new(0));

    let proxy = run_loop.proxy();
    let handle = {
        let counter = counter.clone();
        std::thread::spawn(move || {
            proxy
                .post(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        })
    };
    handle.join().unwrap();

    {
        let counter = counter.clone();
        run_loop
            .post(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
    }

    run_loop.run_until_idle();
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[test]
fn test_error_display() {
    assert_eq!(
        RunLoopError::Terminated.to_string(),
        "run loop has been terminated"
    );
}
