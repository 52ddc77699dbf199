use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use drawables::{DrawablesPacketPool, PacketMarker, PacketPoolCreateInfo};

mod common;

fn pool() -> DrawablesPacketPool {
    common::init_tracing();
    DrawablesPacketPool::new(PacketPoolCreateInfo::default())
}

#[test]
fn markers_increase_monotonically() {
    let pool = pool();
    let a = pool.acquire();
    let b = pool.acquire();
    let c = pool.acquire();
    assert_eq!(a.marker(), PacketMarker::new(1));
    assert_eq!(b.marker(), PacketMarker::new(2));
    assert_eq!(c.marker(), PacketMarker::new(3));
    drop((a, b, c));

    // recycled packets still get fresh markers
    let d = pool.acquire();
    assert_eq!(d.marker(), PacketMarker::new(4));
    assert_eq!(pool.stats().free_packets, 2);
    pool.release(d);
    assert_eq!(pool.retired(), PacketMarker::new(4));
}

#[test]
fn deferred_destruction_waits_for_outstanding_packets() {
    let pool = pool();
    let p1 = pool.acquire();
    let p2 = pool.acquire();
    let p3 = pool.acquire();

    let destroyed = Arc::new(AtomicBool::new(false));
    let flag = destroyed.clone();
    pool.protected_destroy_with("shared geometry", move |_| flag.store(true, Ordering::SeqCst));
    assert_eq!(pool.stats().pending_destroy, 1);

    let p4 = pool.acquire();
    let p5 = pool.acquire();

    for p in [p5, p4, p2, p1] {
        pool.release(p);
        assert!(!destroyed.load(Ordering::SeqCst));
    }
    assert_eq!(pool.retired(), PacketMarker::new(2));

    pool.release(p3);
    assert!(destroyed.load(Ordering::SeqCst));
    assert_eq!(pool.retired(), PacketMarker::new(5));
    assert_eq!(pool.stats().pending_destroy, 0);
}

#[test]
fn immediate_destruction_when_idle() {
    let pool = pool();
    drop(pool.acquire());

    let object = Arc::new(42);
    pool.protected_destroy(object.clone());
    assert_eq!(Arc::strong_count(&object), 1);
}

#[test]
fn destruction_tagged_with_highest_issued_marker() {
    let pool = pool();
    let p1 = pool.acquire();
    let object = Arc::new(());
    pool.protected_destroy(object.clone());

    // packets acquired after the destroy request don't delay it
    let p2 = pool.acquire();
    drop(p1);
    assert_eq!(Arc::strong_count(&object), 1);
    drop(p2);
}

#[test]
fn release_from_other_threads() {
    let pool = pool();
    let packets: Vec<_> = (0..16).map(|_| pool.acquire()).collect();
    let object = Arc::new(());
    pool.protected_destroy(object.clone());

    let threads: Vec<_> = packets
        .into_iter()
        .map(|p| thread::spawn(move || drop(p)))
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    let stats = pool.stats();
    assert_eq!(stats.retired, stats.highest_issued);
    assert_eq!(stats.outstanding, 0);
    assert_eq!(stats.free_packets, 16);
    assert_eq!(Arc::strong_count(&object), 1);
}

#[test]
fn initial_free_packets() {
    let pool = DrawablesPacketPool::new(PacketPoolCreateInfo {
        initial_free_packets: 4,
        ..Default::default()
    });
    assert_eq!(pool.stats().free_packets, 4);
    let p = pool.acquire();
    assert_eq!(pool.stats().free_packets, 3);
    assert_eq!(pool.stats().outstanding, 1);
    drop(p);
}
