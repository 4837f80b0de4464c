#![allow(dead_code)]

use std::sync::Arc;

use kinetic::{component, Store, TypeRegistry};

pub const AGENTS_SMALL: usize = 100_000;
pub const AGENTS_MED: usize = 1_000_000;

#[derive(Clone, Copy)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

#[derive(Clone, Copy)]
pub struct Wealth {
    pub value: f32,
}

#[derive(Clone, Copy)]
pub struct Productivity {
    pub rate: f32,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region(pub u8);

component!(Position, Wealth, Productivity);
component!(segregated Region);

pub fn make_store() -> Store {
    Store::new(Arc::new(TypeRegistry::new()))
}

/// Every agent gets position, wealth and productivity; every other agent also a region.
pub fn populate(store: &mut Store, agents: usize) {
    for i in 0..agents {
        let base = (Position { x: i as f32, y: 0.0 }, Wealth { value: 100.0 }, Productivity { rate: 1.0 });
        if i % 2 == 0 {
            store.create(base);
        } else {
            let (p, w, r) = base;
            store.create((p, w, r, Region((i % 8) as u8)));
        }
    }
}
