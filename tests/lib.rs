use hazrc::*;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};

struct CountDrops(Arc<AtomicUsize>);
impl Drop for CountDrops {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn counted(drops: &Arc<AtomicUsize>) -> RcPtr<(usize, CountDrops)> {
    RcPtr::new((42, CountDrops(Arc::clone(drops))))
}

#[test]
fn clones_share_one_object() {
    let drops = Arc::new(AtomicUsize::new(0));

    let a = counted(&drops);
    assert_eq!(a.strong_count(), Some(1));
    assert_eq!(a.weak_count(), Some(1));

    let b = a.clone();
    assert_eq!(a.strong_count(), Some(2));
    assert_eq!(a.peek_obj(), b.peek_obj());
    // The strong handles jointly hold a single implicit weak share.
    assert_eq!(a.weak_count(), Some(1));

    drop(b);
    assert_eq!(a.strong_count(), Some(1));
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    drop(a);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn weak_observes_release() {
    let drops = Arc::new(AtomicUsize::new(0));

    let strong = counted(&drops);
    let weak = strong.downgrade();
    assert_eq!(strong.strong_count(), Some(1));
    assert_eq!(strong.weak_count(), Some(2));

    assert!(!weak.is_released());
    let again = weak.upgrade().expect("object is alive");
    assert_eq!(again.get().expect("non-null").0, 42);
    drop(again);

    drop(strong);
    // The value is destroyed the moment the last strong count goes, even
    // though the weak handle keeps the allocation alive.
    assert_eq!(drops.load(Ordering::SeqCst), 1);
    assert!(weak.is_released());
    assert!(weak.get_obj().is_null());

    drop(weak);
    Registry::global().eager_reclaim();
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn released_objects_stay_released() {
    let drops = Arc::new(AtomicUsize::new(0));

    let strong = counted(&drops);
    let w1 = strong.downgrade();
    let w2 = w1.clone();
    drop(strong);

    // No sequence of weak operations brings the object back.
    assert!(w1.upgrade().is_none());
    let w3 = w2.clone();
    assert!(w3.upgrade().is_none());
    assert!(w1.is_released());

    drop(w1);
    drop(w2);
    drop(w3);
    Registry::global().eager_reclaim();
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn moves_transfer_without_count_traffic() {
    let drops = Arc::new(AtomicUsize::new(0));

    let mut a = counted(&drops);
    let obj = a.peek_obj();

    let b = a.take();
    assert!(a.is_null());
    assert_eq!(b.peek_obj(), obj);
    assert_eq!(b.strong_count(), Some(1));

    let mut c = RcPtr::null();
    let mut b = b;
    b.swap(&mut c);
    assert!(b.is_null());
    assert_eq!(c.peek_obj(), obj);
    assert_eq!(c.strong_count(), Some(1));

    let old = c.exchange(RcPtr::null());
    assert!(c.is_null());
    assert_eq!(old.strong_count(), Some(1));

    assert_eq!(drops.load(Ordering::SeqCst), 0);
    drop(old);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn disown_and_adopt_round_trip() {
    let drops = Arc::new(AtomicUsize::new(0));

    let mut a = counted(&drops);
    let obj = a.peek_obj();
    let desc = a.disown();
    assert!(a.is_null());
    assert!(!desc.is_null());
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    // Safety: disown handed us the count the handle held.
    let b = unsafe { RcPtr::from_raw_parts(obj, desc) };
    assert_eq!(b.strong_count(), Some(1));
    drop(b);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn on_released_fires_exactly_once() {
    let drops = Arc::new(AtomicUsize::new(0));
    let fired = Arc::new(AtomicUsize::new(0));

    let strong = counted(&drops);
    let weak = strong.downgrade();
    {
        let fired = Arc::clone(&fired);
        strong.on_released(move |_, already| {
            assert!(!already);
            fired.fetch_add(1, Ordering::SeqCst);
        });
    }
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    drop(strong);
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    // Registering after release runs inline and says so.
    {
        let fired = Arc::clone(&fired);
        weak.on_released(move |_, already| {
            assert!(already);
            fired.fetch_add(1, Ordering::SeqCst);
        });
    }
    assert_eq!(fired.load(Ordering::SeqCst), 2);
}

#[test]
fn cell_exchange_hands_off_exactly_once() {
    let drops = Arc::new(AtomicUsize::new(0));

    let original = counted(&drops);
    let probe = original.clone();
    let cell = AtomicRcPtr::new(original);

    let replacement = RcPtr::new((7, CountDrops(Arc::clone(&drops))));
    let old = cell.swap(replacement);
    assert_eq!(old, probe);
    assert_eq!(probe.strong_count(), Some(2));

    drop(old);
    drop(probe);
    assert_eq!(drops.load(Ordering::SeqCst), 1);

    drop(cell);
    assert_eq!(drops.load(Ordering::SeqCst), 2);
    Registry::global().eager_reclaim();
}

#[test]
fn concurrent_exchanges_return_distinct_values() {
    let drops = Arc::new(AtomicUsize::new(0));

    let cell = Arc::new(AtomicRcPtr::new(RcPtr::new((
        0,
        CountDrops(Arc::clone(&drops)),
    ))));
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = (1..=2)
        .map(|i| {
            let cell = Arc::clone(&cell);
            let drops = Arc::clone(&drops);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                let new = RcPtr::new((i, CountDrops(drops)));
                barrier.wait();
                let old = cell.swap(new);
                old.get().expect("cell never holds null here").0
            })
        })
        .collect();

    let mut seen: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    seen.sort_unstable();

    // Each stored value is displaced into exactly one thread: the two olds
    // are distinct, and together with the final contents they cover all
    // three values.
    assert_ne!(seen[0], seen[1]);
    let last = cell.load().get().expect("non-null").0;
    let mut all = vec![seen[0], seen[1], last];
    all.sort_unstable();
    assert_eq!(all, vec![0, 1, 2]);

    drop(cell);
    Registry::global().eager_reclaim();
    assert_eq!(drops.load(Ordering::SeqCst), 3);
}

#[test]
fn concurrent_compare_exchange_has_one_winner() {
    let drops = Arc::new(AtomicUsize::new(0));

    let initial = RcPtr::new((0, CountDrops(Arc::clone(&drops))));
    let comparand = initial.clone();
    let cell = Arc::new(AtomicRcPtr::new(initial));
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = (1..=2)
        .map(|i| {
            let cell = Arc::clone(&cell);
            let drops = Arc::clone(&drops);
            let barrier = Arc::clone(&barrier);
            let comparand = comparand.clone();
            std::thread::spawn(move || {
                let new = RcPtr::new((i, CountDrops(drops)));
                barrier.wait();
                cell.compare_exchange(new, &comparand).is_ok()
            })
        })
        .collect();

    let wins: usize = handles
        .into_iter()
        .map(|h| usize::from(h.join().unwrap()))
        .sum();
    assert_eq!(wins, 1);

    drop(comparand);
    drop(cell);
    Registry::global().eager_reclaim();
    assert_eq!(drops.load(Ordering::SeqCst), 3);
}

#[test]
fn load_swap_stress_conserves_counts() {
    const THREADS: usize = 4;
    const OPS: usize = 512;

    let drops = Arc::new(AtomicUsize::new(0));
    let cell = Arc::new(AtomicRcPtr::new(RcPtr::new((
        0,
        CountDrops(Arc::clone(&drops)),
    ))));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let cell = Arc::clone(&cell);
            let drops = Arc::clone(&drops);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                for i in 0..OPS {
                    if t % 2 == 0 {
                        let got = cell.load();
                        let inner = got.get().expect("cell never holds null");
                        assert!(inner.0 < THREADS * OPS + 1);
                    } else {
                        let new = RcPtr::new((t * OPS + i + 1, CountDrops(Arc::clone(&drops))));
                        drop(cell.swap(new));
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    // Two writer threads made OPS values each, plus the initial one; every
    // value but the final occupant has been dropped exactly once.
    drop(cell);
    Registry::global().eager_reclaim();
    assert_eq!(drops.load(Ordering::SeqCst), 2 * OPS + 1);
}

#[test]
fn weak_cell_races_with_final_release() {
    let drops = Arc::new(AtomicUsize::new(0));

    for _ in 0..64 {
        let strong = counted(&drops);
        let cell = Arc::new(AtomicRcWeak::new(strong.downgrade()));
        let barrier = Arc::new(Barrier::new(2));

        let reader = {
            let cell = Arc::clone(&cell);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                match cell.upgrade() {
                    Some(strong) => strong.get().expect("non-null").0,
                    None => usize::MAX,
                }
            })
        };

        barrier.wait();
        drop(strong);
        let seen = reader.join().unwrap();
        assert!(seen == 42 || seen == usize::MAX);
    }

    Registry::global().eager_reclaim();
    assert_eq!(drops.load(Ordering::SeqCst), 64);
}

#[test]
fn rcref_stays_non_null() {
    let r = RcRef::new(String::from("hello"));
    assert_eq!(*r, "hello");

    let p: RcPtr<String> = r.clone().into_ptr();
    assert_eq!(p.strong_count(), Some(2));

    let back = RcRef::try_from(p).expect("non-null converts");
    assert_eq!(*back, "hello");

    assert!(RcRef::try_from(RcPtr::<String>::null()).is_err());
}
