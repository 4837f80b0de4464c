#![allow(dead_code)]

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use kinetic::engine::component::{Component, Dense};
use kinetic::engine::snapshot::Codec;
use kinetic::{component, Entity, Store, TypeRegistry};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Velocity {
    pub x: f32,
    pub y: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health(pub u32);

#[derive(Clone, Copy, Debug, Default)]
pub struct Frozen;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Team(pub u8);

/// Not serialized; used to check that codec-less types are skipped.
#[derive(Clone, Debug, PartialEq)]
pub struct Scratch(pub Vec<u8>);

/// Reference to another entity, rewritten by snapshots.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Parent(pub Entity);

component!(serde Position, Velocity, Health);
component!(tag Frozen);
component!(segregated serde Team);
component!(Scratch);

impl Component for Parent {
    type Storage = Dense;

    fn codec() -> Option<Codec<Self>> {
        Some(Codec::serde())
    }

    fn for_each_id_field(&mut self, visit: &mut dyn FnMut(&mut Entity)) {
        visit(&mut self.0);
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn new_store() -> Store {
    init_tracing();
    Store::new(Arc::new(TypeRegistry::new()))
}

pub fn pos(x: f32) -> Position {
    Position { x, y: 0.0 }
}

pub fn vel(x: f32) -> Velocity {
    Velocity { x, y: 0.0 }
}
