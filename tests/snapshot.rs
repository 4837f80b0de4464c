use std::collections::HashMap;
use std::sync::Arc;

use kinetic::{Entity, Read, SnapshotError, Store, TypeRegistry};

mod common;
use common::*;

/// (position, velocity, health, team) of every entity, ignoring handles.
fn contents(store: &Store) -> Vec<String> {
    let mut view = store.view::<(Read<Position>, Read<Velocity>, Read<Health>, Read<Team>)>();
    let mut rows: Vec<String> = view
        .query::<(Entity, &Position)>()
        .gather(|(e, p)| format!("{p:?} {:?} {:?} {:?}", store.get::<Velocity>(e), store.get::<Health>(e), store.get::<Team>(e)));
    rows.sort();
    rows
}

#[test]
fn round_trip_preserves_categories_and_values() {
    let mut store = new_store();
    for i in 0..20 {
        match i % 4 {
            0 => store.create((pos(i as f32),)),
            1 => store.create((pos(i as f32), vel(1.0))),
            2 => store.create((pos(i as f32), Health(i), Team((i % 3) as u8))),
            _ => store.create((pos(i as f32), vel(2.0), Health(i))),
        };
    }

    let bytes = store.serialize().unwrap();
    let restored = Store::deserialize(Arc::clone(store.registry()), &bytes).unwrap();

    assert_eq!(restored.size(), store.size());
    assert_eq!(contents(&restored), contents(&store));
    assert_eq!(restored.distinct_values::<Team>(), 3);
    restored.validate().unwrap();
}

#[test]
fn round_trip_remaps_entity_references() {
    let mut store = new_store();
    let mut names = HashMap::new();
    let root = store.create((Health(0),));
    names.insert(root, 0u32);
    let mut previous = root;
    for i in 1..6 {
        let child = store.create((Health(i), Parent(previous)));
        names.insert(child, i);
        previous = child;
    }
    let orphan = store.create((Health(99), Parent(Entity::INVALID)));
    store.erase(root);
    names.remove(&root);
    let _ = orphan;

    let bytes = store.serialize().unwrap();
    let restored = Store::deserialize(Arc::clone(store.registry()), &bytes).unwrap();

    let mut view = restored.view::<(Read<Health>, Read<Parent>)>();
    let links = view.query::<(&Health, &Parent)>().gather(|(h, p)| (h.0, p.0));
    assert_eq!(links.len(), 6);
    for (health, parent) in links {
        match health {
            // Dangling and invalid references both load as invalid.
            1 | 99 => assert_eq!(parent, Entity::INVALID),
            n => {
                assert!(restored.exists(parent));
                assert_eq!(restored.get::<Health>(parent), Some(&Health(n - 1)));
            }
        }
    }
}

#[test]
fn source_store_is_unchanged_by_serialize() {
    let mut store = new_store();
    let a = store.create((Health(1),));
    let b = store.create((Health(2), Parent(a)));
    store.serialize().unwrap();
    assert_eq!(store.get::<Parent>(b), Some(&Parent(a)));
}

#[test]
fn types_without_codec_are_skipped() {
    let mut store = new_store();
    store.create((Health(1), Scratch(vec![1, 2, 3])));
    store.create((Health(2),));

    let bytes = store.serialize().unwrap();
    let restored = Store::deserialize(Arc::clone(store.registry()), &bytes).unwrap();
    assert_eq!(restored.size(), 2);
    let mut view = restored.view::<Read<Health>>();
    assert_eq!(view.query::<Entity>().with::<Scratch>().count(), 0);
    restored.validate().unwrap();
}

#[test]
fn unknown_type_names_are_rejected() {
    let mut store = new_store();
    store.create((Health(1),));
    let bytes = store.serialize().unwrap();

    let fresh = Arc::new(TypeRegistry::new());
    match Store::deserialize(fresh, &bytes) {
        Err(SnapshotError::UnknownType(name)) => assert!(name.contains("Health")),
        other => panic!("expected UnknownType, got {:?}", other.map(|s| s.size())),
    }
}

#[test]
fn registered_types_load_into_a_fresh_registry() {
    let mut store = new_store();
    store.create((Health(4), pos(1.0)));
    let bytes = store.serialize().unwrap();

    let target = Store::new(Arc::new(TypeRegistry::new()));
    target.register::<Health>();
    target.register::<Position>();
    let restored = Store::deserialize(Arc::clone(target.registry()), &bytes).unwrap();
    assert_eq!(restored.size(), 1);
}

#[test]
fn garbage_fails_to_decode() {
    let registry = Arc::new(TypeRegistry::new());
    assert!(matches!(Store::deserialize(registry, &[0xc1, 0x00, 0x13]), Err(SnapshotError::Decode(_))));
}
