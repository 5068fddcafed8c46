//! End-to-end fupool scenarios: a pool of worker-backed futures driven
//! through `wait_all`/`wait_any` the way a fan-out request handler would.

use corebase::fupool::AnyOutcome;
use std::thread;
use std::time::Duration;

const WORKERS: usize = 16;

#[test]
fn wait_all_observes_every_one_of_sixteen_workers() {
    let pool = corebase::fupool::FuturePool::<u32>::new();
    let mut handles = Vec::with_capacity(WORKERS);
    let mut seqs = Vec::with_capacity(WORKERS);

    for i in 0..WORKERS {
        let h = pool.alloc(i as u32);
        seqs.push(h.seq());
        let worker_pool = pool.clone();
        let seq = h.seq();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis((i as u64 * 3) % 50));
            let mut promise = worker_pool.promise_start(seq);
            let doubled = promise.data_mut().map(|v| *v * 2).unwrap_or(0);
            promise.commit(doubled as i32);
        });
        handles.push(h);
    }

    let outcome = pool.wait_all(&seqs, Some(Duration::from_secs(5)));
    assert_eq!(outcome, corebase::fupool::AllOutcome::Ready);

    for (i, h) in handles.into_iter().enumerate() {
        assert!(h.is_ready());
        assert_eq!(h.wait(None), corebase::fupool::WaitOutcome::Ready((i as i32) * 2));
        h.free();
    }
    assert_eq!(pool.wait_all(&seqs, None), corebase::fupool::AllOutcome::AllNull);
}

#[test]
fn wait_any_loop_drains_every_worker_to_all_null() {
    let pool = corebase::fupool::FuturePool::<()>::new();
    let mut handles: Vec<Option<_>> = Vec::with_capacity(WORKERS);
    let mut seqs = Vec::with_capacity(WORKERS);

    for i in 0..WORKERS {
        let h = pool.alloc(());
        seqs.push(h.seq());
        let worker_pool = pool.clone();
        let seq = h.seq();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis((i as u64 * 5) % 80));
            worker_pool.promise_start(seq).commit(0);
        });
        handles.push(Some(h));
    }

    let mut freed = 0usize;
    loop {
        match pool.wait_any(&seqs, Some(Duration::from_secs(5))) {
            AnyOutcome::ReadyAt(idx, _retcode) => {
                if let Some(h) = handles[idx].take() {
                    h.free();
                    freed += 1;
                }
            }
            AnyOutcome::AllNull => break,
            AnyOutcome::TimedOut => panic!("workers did not complete in time"),
        }
    }

    assert_eq!(freed, WORKERS);
    assert!(handles.iter().all(|h| h.is_none()));
}
