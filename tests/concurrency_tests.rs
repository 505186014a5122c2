//! Integration tests for the bridge under concurrent use.

mod test_harness;

use std::sync::Arc;
use std::sync::Barrier;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use objbridge::*;
use test_harness::{Fixture, h};

fn assert_send_sync<T: Send + Sync>() {}

#[test]
fn test_public_handles_are_thread_safe() {
    assert_send_sync::<Bridge>();
    assert_send_sync::<Wrapper>();
    assert_send_sync::<SharedRef>();
    assert_send_sync::<Connection>();
    assert_send_sync::<HostFn>();
}

#[test]
fn test_concurrent_wrap_yields_one_wrapper() {
    let fx = Fixture::new();
    let barrier = Barrier::new(8);

    let wrappers: Vec<Wrapper> = thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    fx.bridge.wrap(h(0x10), fx.widget, Ownership::Native).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|t| t.join().unwrap()).collect()
    });

    assert!(wrappers.iter().all(|w| Wrapper::ptr_eq(w, &wrappers[0])));
}

#[test]
fn test_resolve_during_destruction() {
    let fx = Fixture::new();
    let handles: Vec<NativeHandle> = (1..=200).map(|i| h(i * 0x10)).collect();
    let wrappers: Vec<Wrapper> = handles
        .iter()
        .map(|handle| fx.bridge.wrap(*handle, fx.widget, Ownership::Native).unwrap())
        .collect();
    let barrier = Barrier::new(5);

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                barrier.wait();
                for _ in 0..20 {
                    for handle in &handles {
                        // whatever is returned must be the registered wrapper
                        if let Some(found) = fx.bridge.resolve(*handle) {
                            assert_eq!(found.handle(), *handle);
                        }
                    }
                }
            });
        }
        s.spawn(|| {
            barrier.wait();
            for handle in &handles {
                fx.bridge.notify_destroyed(*handle);
            }
        });
    });

    for (handle, wrapper) in handles.iter().zip(&wrappers) {
        assert!(!wrapper.is_valid());
        assert!(fx.bridge.resolve(*handle).is_none());
    }
}

#[test]
fn test_collection_on_many_threads_destroys_each_once() {
    let fx = Fixture::new();
    let wrappers: Vec<Wrapper> = (1..=100)
        .map(|i| fx.bridge.construct(h(i * 0x10), fx.widget).unwrap())
        .collect();

    let chunks: Vec<Vec<Wrapper>> = wrappers.chunks(10).map(<[Wrapper]>::to_vec).collect();
    drop(wrappers);
    assert!(fx.runtime.destroyed().is_empty());

    thread::scope(|s| {
        for chunk in chunks {
            s.spawn(move || drop(chunk));
        }
    });

    let mut destroyed = fx.runtime.destroyed();
    destroyed.sort();
    destroyed.dedup();
    assert_eq!(destroyed.len(), 100);
    assert_eq!(fx.runtime.destroyed().len(), 100);
}

#[test]
fn test_emission_races_disconnect() {
    let fx = Fixture::new();
    let source = fx.native_widget(0x10);
    let hits = Arc::new(AtomicUsize::new(0));

    let counter = hits.clone();
    let connection = fx
        .bridge
        .connect(
            &source,
            "clicked",
            HostFn::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Void)
            }),
        )
        .unwrap();
    let barrier = Barrier::new(2);

    thread::scope(|s| {
        s.spawn(|| {
            barrier.wait();
            for _ in 0..500 {
                fx.bridge.emit(&source, "clicked", &[Value::Bool(true)]).unwrap();
            }
        });
        s.spawn(|| {
            barrier.wait();
            fx.bridge.disconnect(&connection);
        });
    });

    let after = hits.load(Ordering::SeqCst);
    assert!(after <= 500);
    assert_eq!(fx.bridge.emit(&source, "clicked", &[Value::Bool(true)]).unwrap(), 0);
    assert_eq!(hits.load(Ordering::SeqCst), after);
}

#[test]
fn test_shared_references_released_across_threads() {
    let fx = Fixture::new();
    let wrapper = fx.bridge.wrap(h(0x10), fx.widget, Ownership::Shared).unwrap();
    let refs: Vec<SharedRef> = (0..16).map(|_| fx.bridge.share(&wrapper).unwrap()).collect();
    drop(wrapper);

    thread::scope(|s| {
        for r in refs {
            s.spawn(move || drop(r));
        }
    });

    assert_eq!(fx.runtime.destroyed(), vec![h(0x10)]);
}
