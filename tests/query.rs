use kinetic::{Entity, Read, Write};

mod common;
use common::*;

#[test]
fn partial_sweep_covers_every_row_once() {
    let mut store = new_store();
    for i in 0..10 {
        store.create((Health(i),));
    }
    for i in 10..17 {
        store.create((Health(i), pos(0.0)));
    }

    let mut seen = Vec::new();
    let mut window = 0..4;
    let mut view = store.view::<Read<Health>>();
    for _ in 0..5 {
        window = view.query::<&Health>().for_each_partial(window, |h| seen.push(h.0));
    }

    // 17 rows in windows of 4: the fifth window runs past the end and wraps.
    assert_eq!(window, 0..4);
    seen.sort_unstable();
    assert_eq!(seen, (0..17).collect::<Vec<_>>());
}

#[test]
fn partial_sweep_wraps_at_end() {
    let mut store = new_store();
    for i in 0..6 {
        store.create((Health(i),));
    }
    let mut view = store.view::<Read<Health>>();
    let mut seen = Vec::new();
    let next = view.query::<&Health>().for_each_partial(4..8, |h| seen.push(h.0));
    assert_eq!(seen, vec![4, 5]);
    assert_eq!(next, 0..4);
}

#[test]
fn ids_if_filters_rows() {
    let mut store = new_store();
    let ids: Vec<Entity> = (0..10).map(|i| store.create((Health(i),))).collect();
    let mut view = store.view::<Read<Health>>();
    let even = view.query::<&Health>().ids_if(|h| h.0 % 2 == 0);
    assert_eq!(even, ids.iter().copied().step_by(2).collect::<Vec<_>>());
}

#[test]
fn entity_fetch_pairs_ids_with_values() {
    let mut store = new_store();
    let ids: Vec<Entity> = (0..4).map(|i| store.create((Health(i * 10),))).collect();
    let mut view = store.view::<Read<Health>>();
    let pairs = view.query::<(Entity, &Health)>().gather(|(e, h)| (e, h.0));
    for (i, &e) in ids.iter().enumerate() {
        assert!(pairs.contains(&(e, i as u32 * 10)));
    }
}

#[test]
fn with_value_selects_segregated_partition() {
    let mut store = new_store();
    for i in 0..9u32 {
        store.create((Health(i), Team((i % 3) as u8)));
    }

    let mut view = store.view::<(Read<Health>, Read<Team>)>();
    let mut red: Vec<u32> = view.query::<&Health>().with_value(&Team(1)).gather(|h| h.0);
    red.sort_unstable();
    assert_eq!(red, vec![1, 4, 7]);
    assert_eq!(view.query::<&Team>().with_value(&Team(2)).gather(|t| t.0), vec![2, 2, 2]);
    assert_eq!(view.query::<Entity>().with_value(&Team(9)).count(), 0);
}

#[test]
fn without_any_excludes_each_member() {
    let mut store = new_store();
    store.create((Health(0),));
    store.create((Health(1), Frozen));
    store.create((Health(2), vel(0.0)));
    let mut view = store.view::<Read<Health>>();
    assert_eq!(view.query::<&Health>().without_any::<(Frozen, Velocity)>().gather(|h| h.0), vec![0]);
}

#[test]
fn sort_by_orders_rows_and_keeps_directory() {
    let mut store = new_store();
    let values = [5u32, 3, 9, 1, 7, 2];
    let ids: Vec<Entity> = values.iter().map(|&v| store.create((Health(v), pos(v as f32)))).collect();

    let mut edit = store.edit::<(Read<Health>, Read<Position>)>();
    edit.sort_by::<Health, _, _, _>(|h| h.0);
    let sorted = edit.query::<&Health>().gather(|h| h.0);
    assert_eq!(sorted, vec![1, 2, 3, 5, 7, 9]);
    let xs = edit.query::<&Position>().gather(|p| p.x as u32);
    assert_eq!(xs, sorted);

    for (&e, &v) in ids.iter().zip(&values) {
        assert_eq!(store.get::<Health>(e), Some(&Health(v)));
    }
    store.validate().unwrap();
}

#[test]
fn sort_by_spans_several_categories() {
    let mut store = new_store();
    let mut expected = Vec::new();
    for v in [8u32, 4, 11, 0, 6, 2, 9, 5, 1, 10, 3, 7] {
        let e = match v % 3 {
            0 => store.create((Health(v),)),
            1 => store.create((Health(v), pos(v as f32))),
            _ => store.create((Health(v), vel(v as f32), Frozen)),
        };
        expected.push((e, v));
    }

    let mut edit = store.edit::<(Read<Health>, Read<Position>, Read<Velocity>)>();
    edit.sort_by::<Health, _, _, _>(|h| h.0);
    for part in [
        edit.query::<&Health>().without_any::<(Position, Velocity)>().gather(|h| h.0),
        edit.query::<(&Health, &Position)>().gather(|(h, _)| h.0),
        edit.query::<(&Health, &Velocity)>().gather(|(h, _)| h.0),
    ] {
        assert!(part.windows(2).all(|w| w[0] <= w[1]), "unsorted category: {part:?}");
        assert_eq!(part.len(), 4);
    }
    let moved = edit.query::<(&Health, &Velocity)>().gather(|(h, v)| (h.0, v.x as u32));
    assert!(moved.iter().all(|(h, x)| h == x));

    store.validate().unwrap();
    for (e, v) in expected {
        assert_eq!(store.get::<Health>(e), Some(&Health(v)));
    }
}

#[test]
fn sort_steps_converge() {
    let mut store = new_store();
    for v in [4u32, 3, 2, 1, 0] {
        store.create((Health(v),));
    }
    let mut edit = store.edit::<Read<Health>>();
    let mut passes = 0;
    while edit.sort_step_by::<Health, _, _, _>(|h| h.0) > 0 {
        passes += 1;
        assert!(passes <= 5);
    }
    assert_eq!(edit.query::<&Health>().gather(|h| h.0), vec![0, 1, 2, 3, 4]);
    store.validate().unwrap();
}

#[test]
fn edit_view_structural_changes() {
    let mut store = new_store();
    let mut edit = store.edit::<(Write<Health>, Read<Position>)>();
    let a = edit.create((Health(1),));
    let b = edit.create((Health(2),));
    edit.attach(a, pos(3.0));
    if let Some(h) = edit.get_mut::<Health, _>(b) {
        h.0 = 20;
    }
    edit.erase_many(&[b]);
    assert_eq!(edit.size(), 1);
    assert!(edit.exists(a));
    assert_eq!(edit.get::<Position, _>(a), Some(&pos(3.0)));
    edit.remove::<Position>(a);
    assert_eq!(edit.get::<Position, _>(a), None);
    store.validate().unwrap();
}
