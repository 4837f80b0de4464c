//! Random operation sequences against the directory/category lockstep.

use proptest::prelude::*;

use kinetic::{Entity, Read};

mod common;
use common::*;

#[derive(Clone, Debug)]
enum Op {
    Create(u8),
    AttachHealth(usize, u32),
    RemoveHealth(usize),
    AttachVelocity(usize),
    RemoveVelocity(usize),
    AttachTeam(usize, u8),
    Erase(usize),
    Reclaim,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u8..4).prop_map(Op::Create),
        2 => (any::<usize>(), any::<u32>()).prop_map(|(i, v)| Op::AttachHealth(i, v)),
        1 => any::<usize>().prop_map(Op::RemoveHealth),
        2 => any::<usize>().prop_map(Op::AttachVelocity),
        1 => any::<usize>().prop_map(Op::RemoveVelocity),
        1 => (any::<usize>(), 0u8..3).prop_map(|(i, t)| Op::AttachTeam(i, t)),
        2 => any::<usize>().prop_map(Op::Erase),
        1 => Just(Op::Reclaim),
    ]
}

/// Expected component values of one live entity.
#[derive(Clone, Debug, Default)]
struct Shadow {
    position: f32,
    health: Option<u32>,
    velocity: bool,
    team: Option<u8>,
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn directory_and_categories_stay_in_lockstep(ops in proptest::collection::vec(op(), 1..120)) {
        let mut store = new_store();
        let mut live: Vec<(Entity, Shadow)> = Vec::new();
        let mut counter = 0.0f32;

        for op in ops {
            match op {
                Op::Create(kind) => {
                    counter += 1.0;
                    let shadow = Shadow { position: counter, ..Shadow::default() };
                    let e = match kind {
                        0 => store.create((pos(counter),)),
                        1 => store.create((pos(counter), Frozen)),
                        2 => {
                            let e = store.create((pos(counter), vel(0.0)));
                            live.push((e, Shadow { velocity: true, ..shadow }));
                            continue;
                        }
                        _ => {
                            let e = store.create((pos(counter), Health(7)));
                            live.push((e, Shadow { health: Some(7), ..shadow }));
                            continue;
                        }
                    };
                    live.push((e, shadow));
                }
                Op::AttachHealth(i, v) if !live.is_empty() => {
                    let idx = i % live.len();
                    let (e, shadow) = &mut live[idx];
                    if shadow.health.is_none() {
                        store.attach(*e, Health(v));
                        shadow.health = Some(v);
                    }
                }
                Op::RemoveHealth(i) if !live.is_empty() => {
                    let idx = i % live.len();
                    let (e, shadow) = &mut live[idx];
                    if shadow.health.take().is_some() {
                        store.remove::<Health>(*e);
                    }
                }
                Op::AttachVelocity(i) if !live.is_empty() => {
                    let idx = i % live.len();
                    let (e, shadow) = &mut live[idx];
                    if !shadow.velocity {
                        store.attach(*e, vel(1.0));
                        shadow.velocity = true;
                    }
                }
                Op::RemoveVelocity(i) if !live.is_empty() => {
                    let idx = i % live.len();
                    let (e, shadow) = &mut live[idx];
                    if shadow.velocity {
                        store.remove::<Velocity>(*e);
                        shadow.velocity = false;
                    }
                }
                Op::AttachTeam(i, t) if !live.is_empty() => {
                    let idx = i % live.len();
                    let (e, shadow) = &mut live[idx];
                    if shadow.team.is_none() {
                        store.attach(*e, Team(t));
                        shadow.team = Some(t);
                    }
                }
                Op::Erase(i) if !live.is_empty() => {
                    let (e, _) = live.swap_remove(i % live.len());
                    store.erase(e);
                    prop_assert!(!store.exists(e));
                }
                Op::Reclaim => {
                    store.reclaim_empty_categories();
                }
                _ => {}
            }
            prop_assert_eq!(store.validate(), Ok(()));
        }

        prop_assert_eq!(store.size(), live.len());
        for (e, shadow) in &live {
            prop_assert!(store.exists(*e));
            prop_assert_eq!(store.get::<Position>(*e).map(|p| p.x), Some(shadow.position));
            prop_assert_eq!(store.get::<Health>(*e).map(|h| h.0), shadow.health);
            prop_assert_eq!(store.has::<Velocity>(*e), shadow.velocity);
            prop_assert_eq!(store.get::<Team>(*e).map(|t| t.0), shadow.team);
        }

        let mut view = store.view::<Read<Position>>();
        prop_assert_eq!(view.query::<&Position>().count(), live.len());
        let with_health = live.iter().filter(|(_, s)| s.health.is_some()).count();
        prop_assert_eq!(view.query::<Entity>().with::<Health>().count(), with_health);
    }
}
