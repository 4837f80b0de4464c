use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use kinetic::{Barrier, Entity, Read, Scheduler, SchedulerConfig, Store, TypeRegistry, Write};

mod common;
use common::*;

fn scheduler(workers: usize) -> Scheduler {
    init_tracing();
    Scheduler::new(SchedulerConfig::default().with_workers(workers).with_watchdog(None))
}

/// Shadow counters checked on entry to every instrumented task.
#[derive(Default)]
struct Occupancy {
    readers: AtomicI32,
    writers: AtomicI32,
    violations: AtomicUsize,
}

impl Occupancy {
    fn read(&self, work: impl FnOnce()) {
        self.readers.fetch_add(1, Ordering::SeqCst);
        if self.writers.load(Ordering::SeqCst) > 0 {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
        work();
        self.readers.fetch_sub(1, Ordering::SeqCst);
    }

    fn write(&self, work: impl FnOnce()) {
        if self.writers.fetch_add(1, Ordering::SeqCst) > 0 || self.readers.load(Ordering::SeqCst) > 0 {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
        work();
        self.writers.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Counter(u64);
struct Left(u64);
struct Right(u64);

#[test]
fn reader_and_writer_of_one_resource_never_overlap() {
    let scheduler = scheduler(4);
    let context = scheduler.make_context(Arc::new(TypeRegistry::new()));
    let occupancy = Arc::new(Occupancy::default());

    for _ in 0..20 {
        for i in 0..4 {
            let occupied = Arc::clone(&occupancy);
            context
                .add_task(format!("reader {i}"), move |_| occupied.read(|| thread::sleep(Duration::from_micros(200))))
                .reads::<Position>();
            let occupied = Arc::clone(&occupancy);
            context
                .add_task(format!("writer {i}"), move |_| occupied.write(|| thread::sleep(Duration::from_micros(200))))
                .writes::<Position>();
        }
        scheduler.run_frame();
    }

    assert_eq!(occupancy.violations.load(Ordering::SeqCst), 0);
    assert_eq!(scheduler.frames_completed(), 20);
    assert_eq!(scheduler.pending(), 0);
}

#[test]
fn disjoint_writers_run_concurrently() {
    let scheduler = scheduler(3);
    let context = scheduler.make_context(Arc::new(TypeRegistry::new()));
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    for _ in 0..10 {
        for name in ["left", "right"] {
            let (active, peak) = (Arc::clone(&active), Arc::clone(&peak));
            let mut token = context.add_task(name, move |_| {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                let deadline = Instant::now() + Duration::from_millis(50);
                while active.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
                    thread::yield_now();
                }
                active.fetch_sub(1, Ordering::SeqCst);
            });
            if name == "left" {
                token.writes::<Left>();
            } else {
                token.writes::<Right>();
            }
        }
        scheduler.run_frame();
        if peak.load(Ordering::SeqCst) >= 2 {
            break;
        }
    }

    assert!(peak.load(Ordering::SeqCst) >= 2, "disjoint writers never overlapped");
}

#[test]
fn barriers_order_tasks() {
    let scheduler = scheduler(4);
    let context = scheduler.make_context(Arc::new(TypeRegistry::new()));
    let log = Arc::new(Mutex::new(Vec::new()));

    {
        let l = Arc::clone(&log);
        let mut first = context.add_task("first", move |_| {
            thread::sleep(Duration::from_millis(5));
            l.lock().push("first");
        });
        let l = Arc::clone(&log);
        let mut second = context.add_task("second", move |_| l.lock().push("second"));
        second.depends_on(&mut first);
        let l = Arc::clone(&log);
        let _third = second.then("third", move |_| l.lock().push("third"));
    }
    scheduler.run_frame();

    assert_eq!(*log.lock(), vec!["first", "second", "third"]);
}

#[test]
fn required_for_holds_a_barrier_closed() {
    let scheduler = scheduler(2);
    let context = scheduler.make_context(Arc::new(TypeRegistry::new()));
    let log = Arc::new(Mutex::new(Vec::new()));
    let gate = Barrier::new("gate");

    {
        let l = Arc::clone(&log);
        let mut waiter = context.add_task("waiter", move |_| l.lock().push("waiter"));
        waiter.depends_on(&gate);
        let l = Arc::clone(&log);
        let mut a = context.add_task("a", move |_| {
            thread::sleep(Duration::from_millis(5));
            l.lock().push("a");
        });
        a.required_for(&gate);
        let l = Arc::clone(&log);
        let mut b = context.add_task("b", move |_| l.lock().push("b"));
        b.required_for(gate.clone());
        assert_eq!(gate.count(), 2);
    }
    scheduler.run_frame();

    let log = log.lock();
    assert_eq!(log.last(), Some(&"waiter"));
    assert_eq!(log.len(), 3);
    assert!(gate.is_open());
}

#[test]
fn dump_reports_blocked_tasks() {
    let scheduler = scheduler(1);
    let context = scheduler.make_context(Arc::new(TypeRegistry::new()));
    let gate = Barrier::new("gate");
    {
        let mut holder = context.add_task("holder", |_| {});
        holder.required_for(&gate).writes::<Counter>();
        let mut waiter = context.add_task("waiter", |_| {});
        waiter.depends_on(&gate).reads::<Counter>();
    }

    let dump = scheduler.dump();
    assert_eq!(dump.pending, 2);
    assert!(!dump.frame_active);
    let queued = &dump.contexts[0].queued;
    assert_eq!(queued.len(), 2);
    let waiter = queued.iter().find(|t| t.name == "waiter").unwrap();
    assert!(!waiter.admissible);
    assert_eq!(waiter.waits, vec![("gate".to_string(), 1)]);
    let text = dump.to_string();
    assert!(text.contains("queued `waiter`"));
    assert!(text.contains("[blocked]"));

    scheduler.run_frame();
    assert_eq!(scheduler.dump().pending, 0);
}

#[test]
fn tasks_queued_between_frames_wait_for_the_next_frame() {
    let scheduler = scheduler(2);
    let context = scheduler.make_context(Arc::new(TypeRegistry::new()));
    let runs = Arc::new(AtomicUsize::new(0));
    let r = Arc::clone(&runs);
    context.add_task("later", move |_| {
        r.fetch_add(1, Ordering::SeqCst);
    });

    thread::sleep(Duration::from_millis(20));
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(context.queued(), 1);
    scheduler.run_frame();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn nested_tasks_finish_within_the_frame() {
    let scheduler = scheduler(2);
    let context = scheduler.make_context(Arc::new(TypeRegistry::new()));
    let runs = Arc::new(AtomicUsize::new(0));
    let r = Arc::clone(&runs);
    context.add_task("parent", move |scope| {
        for i in 0..8 {
            let r = Arc::clone(&r);
            scope.add_task(format!("child {i}"), move |_| {
                r.fetch_add(1, Ordering::SeqCst);
            });
        }
    });
    scheduler.run_frame();
    assert_eq!(runs.load(Ordering::SeqCst), 8);
}

#[test]
fn context_resources_follow_declarations() {
    let scheduler = scheduler(2);
    let context = scheduler.make_context(Arc::new(TypeRegistry::new()));
    context.set_resource(Counter(0));
    context.set_resource(Left(5));

    for i in 0..10 {
        context
            .add_task(format!("bump {i}"), |scope| {
                let left = scope.resource::<Left>().0;
                scope.resource_mut::<Counter>().0 += left;
            })
            .writes::<Counter>()
            .reads::<Left>();
    }
    scheduler.run_frame();

    assert_eq!(context.with_resource::<Counter, _>(|c| c.0), Some(50));
    assert!(context.has_resource::<Left>());
    assert_eq!(context.take_resource::<Left>().map(|l| l.0), Some(5));
    assert!(!context.has_resource::<Left>());
}

#[test]
#[should_panic(expected = "without declaring it")]
fn undeclared_resource_access_panics() {
    let scheduler = scheduler(1);
    let context = scheduler.make_context(Arc::new(TypeRegistry::new()));
    context.set_resource(Counter(0));
    context.set_resource(Right(0));
    context
        .add_task("sneaky", |scope| {
            scope.resource_mut::<Right>().0 += 1;
        })
        .writes::<Counter>();
    scheduler.run_frame();
}

#[test]
#[should_panic(expected = "boom")]
fn task_panics_surface_on_the_frame_owner() {
    let scheduler = scheduler(2);
    let context = scheduler.make_context(Arc::new(TypeRegistry::new()));
    context.add_task("fine", |_| {});
    context.add_task("broken", |_| panic!("boom"));
    scheduler.run_frame();
}

#[test]
fn scheduler_survives_a_panicking_frame() {
    let scheduler = scheduler(2);
    let context = scheduler.make_context(Arc::new(TypeRegistry::new()));
    context.add_task("broken", |_| panic!("boom")).writes::<Counter>();
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| scheduler.run_frame()));
    assert!(outcome.is_err());

    let runs = Arc::new(AtomicUsize::new(0));
    let r = Arc::clone(&runs);
    context
        .add_task("after", move |_| {
            r.fetch_add(1, Ordering::SeqCst);
        })
        .writes::<Counter>();
    scheduler.run_frame();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn view_tasks_update_the_store() {
    let scheduler = scheduler(3);
    let registry = Arc::new(TypeRegistry::new());
    let context = scheduler.make_context(Arc::clone(&registry));
    let mut store = Store::new(Arc::clone(&registry));
    let ids: Vec<Entity> = (0..2000).map(|i| store.create((pos(i as f32), vel(1.0), Health(1)))).collect();
    context.set_resource(store);

    let occupancy = Arc::new(Occupancy::default());
    for frame in 0..3 {
        let occupied = Arc::clone(&occupancy);
        let mut integrate = context.add_view_task::<(Write<Position>, Read<Velocity>), _>("integrate", move |mut view, scope| {
            occupied.write(|| view.query::<(&mut Position, &Velocity)>().for_each_parallel(scope, |(p, v)| p.x += v.x));
        });
        let occupied = Arc::clone(&occupancy);
        let mut measure = context.add_view_task::<Read<Position>, _>("measure", move |mut view, _| {
            occupied.read(|| assert_eq!(view.query::<&Position>().count(), 2000));
        });
        measure.depends_on(&mut integrate);
        drop(measure);
        drop(integrate);
        // Health is disjoint from Position, so this task may overlap with both.
        context.add_view_task::<Write<Health>, _>("heal", move |mut view, _| {
            view.query::<&mut Health>().for_each(|h| h.0 += frame);
        });
        scheduler.run_frame();
    }

    assert_eq!(occupancy.violations.load(Ordering::SeqCst), 0);
    let store = context.take_resource::<Store>().unwrap();
    for (i, &e) in ids.iter().enumerate() {
        assert_eq!(store.get::<Position>(e), Some(&pos(i as f32 + 3.0)));
        assert_eq!(store.get::<Health>(e), Some(&Health(1 + 0 + 1 + 2)));
    }
}

#[test]
fn edit_tasks_change_structure() {
    let scheduler = scheduler(2);
    let registry = Arc::new(TypeRegistry::new());
    let context = scheduler.make_context(Arc::clone(&registry));
    context.set_resource(Store::new(Arc::clone(&registry)));

    {
        let mut spawn = context.add_edit_task::<Read<Health>, _>("spawn", |mut edit, _| {
            for i in 0..100 {
                edit.create((Health(i),));
            }
        });
        let mut cull = context.add_edit_task::<Read<Health>, _>("cull", |mut edit, _| {
            let odd = edit.query::<&Health>().ids_if(|h| h.0 % 2 == 1);
            edit.erase_many(&odd);
        });
        cull.depends_on(&mut spawn);
        context.add_view_task::<Read<Health>, _>("count", |mut view, _| {
            assert_eq!(view.query::<&Health>().count(), 50);
        })
        .depends_on(&mut cull);
    }
    scheduler.run_frame();

    assert_eq!(context.with_resource::<Store, _>(|s| s.size()), Some(50));
}

#[test]
#[should_panic(expected = "open store views through add_view_task")]
fn store_cannot_be_borrowed_as_plain_resource() {
    let scheduler = scheduler(1);
    let registry = Arc::new(TypeRegistry::new());
    let context = scheduler.make_context(Arc::clone(&registry));
    context.set_resource(Store::new(registry));
    context
        .add_task("peek", |scope| {
            let _ = scope.resource::<Store>().size();
        })
        .reads::<Store>();
    scheduler.run_frame();
}

#[test]
fn deferred_parallel_for_blocks_dependents() {
    let scheduler = scheduler(3);
    let context = scheduler.make_context(Arc::new(TypeRegistry::new()));
    let hits: Arc<Vec<AtomicUsize>> = Arc::new((0..5000).map(|_| AtomicUsize::new(0)).collect());
    let checked = Arc::new(AtomicUsize::new(0));

    {
        let h = Arc::clone(&hits);
        let c = Arc::clone(&checked);
        let mut issue = context.add_task("issue", move |scope| {
            let work = Arc::clone(&h);
            let done = scope.parallel().for_each_deferred(0..5000, 64, move |i| {
                work[i].fetch_add(1, Ordering::SeqCst);
            });
            let (h, c) = (Arc::clone(&h), Arc::clone(&c));
            scope
                .add_task("inner check", move |_| {
                    assert!(h.iter().all(|hit| hit.load(Ordering::SeqCst) == 1));
                    c.fetch_add(1, Ordering::SeqCst);
                })
                .depends_on(done);
        });
        let h = Arc::clone(&hits);
        let c = Arc::clone(&checked);
        let _after = issue.then("after", move |_| {
            assert!(h.iter().all(|hit| hit.load(Ordering::SeqCst) == 1));
            c.fetch_add(1, Ordering::SeqCst);
        });
    }
    scheduler.run_frame();

    assert_eq!(checked.load(Ordering::SeqCst), 2);
}

#[test]
fn blocking_parallel_for_sums_borrowed_data() {
    let scheduler = scheduler(4);
    let context = scheduler.make_context(Arc::new(TypeRegistry::new()));
    let total = Arc::new(AtomicUsize::new(0));
    let t = Arc::clone(&total);
    context.add_task("sum", move |scope| {
        let values: Vec<usize> = (0..10_000).collect();
        scope.parallel().for_each_chunk(0..values.len(), 128, &|range: std::ops::Range<usize>| {
            let part: usize = values[range].iter().sum();
            t.fetch_add(part, Ordering::SeqCst);
        });
    });
    scheduler.run_frame();
    assert_eq!(total.load(Ordering::SeqCst), (0..10_000).sum::<usize>());
}

#[test]
#[should_panic(expected = "chunk failed")]
fn parallel_for_panics_reach_the_frame_owner() {
    let scheduler = scheduler(2);
    let context = scheduler.make_context(Arc::new(TypeRegistry::new()));
    context.add_task("explode", |scope| {
        scope.parallel().for_each(0..100, 10, |i| {
            if i == 57 {
                panic!("chunk failed");
            }
        });
    });
    scheduler.run_frame();
}

#[test]
fn watchdog_tolerates_slow_frames() {
    init_tracing();
    let scheduler = Scheduler::new(SchedulerConfig::default().with_workers(1).with_watchdog(Some(Duration::from_millis(5))));
    let context = scheduler.make_context(Arc::new(TypeRegistry::new()));
    context.add_task("slow", |_| thread::sleep(Duration::from_millis(40)));
    scheduler.run_frame();
    scheduler.run_frame();
    assert_eq!(scheduler.frames_completed(), 2);
}

#[test]
#[should_panic(expected = "share one type registry")]
fn store_from_another_registry_is_rejected() {
    let scheduler = scheduler(1);
    let context = scheduler.make_context(Arc::new(TypeRegistry::new()));
    context.set_resource(Store::new(Arc::new(TypeRegistry::new())));
}
