//! End-to-end front-end behavior: order, drain-on-drop, commit visibility,
//! and back-pressure through a deliberately tiny ring.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use scriv::{Config, Log, Record};

struct Tagged {
    tag: usize,
    out: Arc<Mutex<Vec<usize>>>,
}

impl Record for Tagged {
    fn emit(self) {
        self.out.lock().unwrap().push(self.tag);
    }
}

struct Pair {
    thread: usize,
    seq: usize,
    out: Arc<Mutex<Vec<(usize, usize)>>>,
}

impl Record for Pair {
    fn emit(self) {
        self.out.lock().unwrap().push((self.thread, self.seq));
    }
}

#[test]
fn records_arrive_in_post_order() {
    let out = Arc::new(Mutex::new(Vec::new()));
    let log = Log::new(Config::new().with_ring_size(4096)).unwrap();
    for tag in 0..100 {
        log.write(Tagged {
            tag,
            out: out.clone(),
        })
        .unwrap();
    }
    // Dropping the log drains the calling thread's ring first.
    drop(log);
    assert_eq!(*out.lock().unwrap(), (0..100).collect::<Vec<_>>());
}

#[test]
fn uncommitted_records_stay_invisible() {
    let out = Arc::new(Mutex::new(Vec::new()));
    let log = Log::new(Config::default()).unwrap();
    log.post(Tagged {
        tag: 1,
        out: out.clone(),
    })
    .unwrap();
    thread::sleep(Duration::from_millis(200));
    assert!(out.lock().unwrap().is_empty());
    log.commit().unwrap();
    drop(log);
    assert_eq!(*out.lock().unwrap(), vec![1]);
}

#[test]
fn tiny_ring_backpressure_loses_nothing() {
    let out = Arc::new(Mutex::new(Vec::new()));
    // Three 64-byte frames of capacity; every further post waits for the
    // output thread.
    let log = Log::new(Config::new().with_ring_size(256)).unwrap();
    for tag in 0..1000 {
        log.write(Tagged {
            tag,
            out: out.clone(),
        })
        .unwrap();
    }
    drop(log);
    let got = out.lock().unwrap();
    assert_eq!(*got, (0..1000).collect::<Vec<_>>());
}

#[test]
fn per_thread_order_is_preserved() {
    let out = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::new(Log::new(Config::new().with_ring_size(1024)).unwrap());
    let mut handles = Vec::new();
    for t in 0..4 {
        let log = log.clone();
        let out = out.clone();
        handles.push(thread::spawn(move || {
            for seq in 0..200 {
                log.write(Pair {
                    thread: t,
                    seq,
                    out: out.clone(),
                })
                .unwrap();
            }
        }));
    }
    for handle in handles {
        // Thread exit drains that thread's ring before join returns.
        handle.join().unwrap();
    }
    let got = out.lock().unwrap().clone();
    assert_eq!(got.len(), 800);
    for t in 0..4 {
        let seqs: Vec<_> = got
            .iter()
            .filter(|(owner, _)| *owner == t)
            .map(|(_, seq)| *seq)
            .collect();
        assert_eq!(seqs, (0..200).collect::<Vec<_>>());
    }
}

#[test]
fn drop_with_no_posts_terminates_cleanly() {
    let log = Log::new(Config::default()).unwrap();
    drop(log);
}
