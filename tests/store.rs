use kinetic::engine::types::Signature;
use kinetic::{Entity, Read, Write};

mod common;
use common::*;

#[test]
fn attach_moves_entity_into_wider_category() {
    let mut store = new_store();
    let e = store.create((pos(1.0), vel(2.0)));
    store.attach(e, Health(10));

    let mut view = store.view::<(Read<Position>, Read<Velocity>, Read<Health>)>();
    assert_eq!(view.query::<(&Position, &Velocity, &Health)>().count(), 1);
    assert_eq!(view.query::<&Position>().without::<Health>().count(), 0);
    assert_eq!(view.query::<Entity>().with_all::<(Position, Velocity, Health)>().ids(), vec![e]);
    store.validate().unwrap();
}

#[test]
fn counts_split_population() {
    let mut store = new_store();
    for i in 0..1000 {
        if i % 2 == 0 {
            store.create((pos(i as f32),));
        } else {
            store.create((pos(i as f32), vel(1.0)));
        }
    }

    let mut view = store.view::<Read<Position>>();
    assert_eq!(view.query::<&Position>().count(), 1000);
    assert_eq!(view.query::<Entity>().with::<Velocity>().count(), 500);
    assert_eq!(view.query::<Entity>().without::<Velocity>().count(), 500);
    assert_eq!(store.size(), 1000);
}

#[test]
fn remove_moves_row_to_narrower_category() {
    let mut store = new_store();
    let registry = store.registry().clone();
    let entities: Vec<Entity> = (0..10).map(|i| store.create((pos(i as f32), vel(1.0)))).collect();

    let both = Signature::from_ids(&[registry.component::<Position>(), registry.component::<Velocity>()]);
    let only = Signature::from_ids(&[registry.component::<Position>()]);
    assert_eq!(store.category_by_signature(&both).map(|c| c.len()), Some(10));

    store.remove::<Velocity>(entities[3]);

    assert_eq!(store.category_by_signature(&both).map(|c| c.len()), Some(9));
    assert_eq!(store.category_by_signature(&only).map(|c| c.ids().to_vec()), Some(vec![entities[3]]));
    assert_eq!(store.signature_of(entities[3]), Some(&only));
    assert_eq!(store.get::<Position>(entities[3]), Some(&pos(3.0)));
    store.validate().unwrap();
}

#[test]
fn migration_preserves_shared_values() {
    let mut store = new_store();
    let a = store.create((pos(1.0), vel(5.0)));
    let b = store.create((pos(2.0), vel(6.0)));
    let c = store.create((pos(3.0), vel(7.0)));

    // Moving the first row swaps the last one into its place.
    store.attach(a, Health(1));
    store.remove::<Velocity>(b);

    assert_eq!(store.get::<Position>(a), Some(&pos(1.0)));
    assert_eq!(store.get::<Velocity>(a), Some(&vel(5.0)));
    assert_eq!(store.get::<Health>(a), Some(&Health(1)));
    assert_eq!(store.get::<Position>(b), Some(&pos(2.0)));
    assert_eq!(store.get::<Velocity>(b), None);
    assert_eq!(store.get::<Position>(c), Some(&pos(3.0)));
    assert_eq!(store.get::<Velocity>(c), Some(&vel(7.0)));
    store.validate().unwrap();
}

#[test]
fn erase_recycles_index_with_new_generation() {
    let mut store = new_store();
    let first = store.create((pos(0.0),));
    let keep = store.create((pos(1.0),));
    store.erase(first);

    assert!(!store.exists(first));
    assert!(store.exists(keep));
    assert_eq!(store.get::<Position>(keep), Some(&pos(1.0)));

    let second = store.create((pos(2.0),));
    assert_eq!(second.index(), first.index());
    assert_ne!(second, first);
    assert!(!store.exists(first));
    assert_eq!(store.get::<Position>(first), None);
    store.validate().unwrap();
}

#[test]
fn entity_zero_is_never_handed_out() {
    let mut store = new_store();
    let e = store.create((pos(0.0),));
    assert!(e.is_valid());
    assert_ne!(e, Entity::INVALID);
    assert!(!store.exists(Entity::INVALID));
}

#[test]
fn removing_last_component_keeps_entity_alive() {
    let mut store = new_store();
    let e = store.create((pos(0.0),));
    store.remove::<Position>(e);

    assert!(store.exists(e));
    assert_eq!(store.signature_of(e), Some(&Signature::new()));
    store.erase(e);
    assert!(!store.exists(e));
    assert_eq!(store.size(), 0);
}

#[test]
fn tags_have_no_table() {
    let mut store = new_store();
    let e = store.create((pos(0.0), Frozen));
    let other = store.create((pos(1.0),));
    store.attach(other, Frozen);

    assert!(store.has::<Frozen>(e));
    let frozen = store.registry().component::<Frozen>();
    let category = store.categories().iter().find(|c| c.signature().has(frozen)).unwrap();
    assert_eq!(category.len(), 2);
    assert!(category.table(frozen).is_none());

    store.remove::<Frozen>(e);
    assert!(!store.has::<Frozen>(e));
    store.validate().unwrap();
}

#[test]
fn bulk_creation_zips_columns() {
    let mut store = new_store();
    let ids = store.create_n((vec![pos(0.0), pos(1.0), pos(2.0)], vec![Health(0), Health(1), Health(2)]));
    assert_eq!(ids.len(), 3);
    for (i, &e) in ids.iter().enumerate() {
        assert_eq!(store.get::<Health>(e), Some(&Health(i as u32)));
    }
}

#[test]
#[should_panic(expected = "bulk creation arrays must share one length")]
fn bulk_creation_rejects_ragged_columns() {
    let mut store = new_store();
    store.create_n((vec![pos(0.0), pos(1.0)], vec![Health(0)]));
}

#[test]
#[should_panic(expected = "already has")]
fn double_attach_panics() {
    let mut store = new_store();
    let e = store.create((Health(1),));
    store.attach(e, Health(2));
}

#[test]
#[should_panic(expected = "has no")]
fn remove_of_absent_panics() {
    let mut store = new_store();
    let e = store.create((Health(1),));
    store.remove::<Velocity>(e);
}

#[test]
#[should_panic]
fn erase_of_dead_entity_panics() {
    let mut store = new_store();
    let e = store.create((Health(1),));
    store.erase(e);
    store.erase(e);
}

#[test]
fn empty_categories_are_reclaimed_lazily() {
    let mut store = new_store();
    let a = store.create((pos(0.0), vel(0.0)));
    let b = store.create((Health(3),));
    store.erase(a);

    let before = store.category_count();
    assert_eq!(before, 2);
    assert_eq!(store.reclaim_empty_categories(), 1);
    assert_eq!(store.category_count(), 1);
    assert_eq!(store.get::<Health>(b), Some(&Health(3)));
    assert_eq!(store.locate(b).map(|at| at.category), Some(0));
    store.validate().unwrap();
}

#[test]
fn clear_drops_everything() {
    let mut store = new_store();
    let e = store.create((pos(0.0), Team(1)));
    store.create((pos(0.0), Team(2)));
    assert_eq!(store.distinct_values::<Team>(), 2);

    store.clear();
    assert_eq!(store.size(), 0);
    assert_eq!(store.category_count(), 0);
    assert_eq!(store.distinct_values::<Team>(), 0);
    assert!(!store.exists(e));

    let again = store.create((pos(0.0), Team(1)));
    assert!(store.exists(again));
    store.validate().unwrap();
}

#[test]
fn writable_view_updates_in_place() {
    let mut store = new_store();
    for i in 0..8 {
        store.create((pos(i as f32), vel(1.0)));
    }

    let mut view = store.view_mut::<(Write<Position>, Read<Velocity>)>();
    view.query::<(&mut Position, &Velocity)>().for_each(|(p, v)| p.x += v.x);
    let target = view.query::<Entity>().ids()[0];
    if let Some(p) = view.get_mut::<Position, _>(target) {
        p.y = 9.0;
    }

    let total: f32 = store.view::<Read<Position>>().query::<&Position>().gather(|p| p.x).into_iter().sum();
    assert_eq!(total, (1..=8).sum::<i32>() as f32);
    assert_eq!(store.get::<Position>(target).map(|p| p.y), Some(9.0));
}

#[test]
#[should_panic(expected = "mutably more than once")]
fn aliasing_fetch_panics() {
    let mut store = new_store();
    store.create((pos(0.0),));
    let mut view = store.view_mut::<Write<Position>>();
    view.query::<(&mut Position, &Position)>().count();
}
