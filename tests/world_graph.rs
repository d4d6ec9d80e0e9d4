//! Exit-graph invariants for dig and delete, including under concurrency.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::test_world;
use gridmud::lock::LockToken;
use gridmud::mud::Session;
use gridmud::world::{Direction, Room, World, WorldError, WorldStore};
use rand::Rng;

/// A logged-out session parked in `room`, enough to be an occupant.
async fn occupant(world: &World, room: &Arc<Room>, name: &str) -> Arc<Session> {
    let (session, _inbox) = Session::new(name);
    session.with_player(|p| p.name = name.to_string());
    session.move_to(world, room.clone()).await.unwrap();
    session
}

/// Every exit in the registry that names a target must name a registered room.
fn dangling_exits(world: &World) -> Vec<(String, String)> {
    let mut dangling = Vec::new();
    for room in world.rooms() {
        let data = room.data();
        for exit in data.direction_exits.iter().chain(data.other_exits.values()) {
            if let Some(target) = &exit.target {
                if world.room_by_id(target).is_none() {
                    dangling.push((room.id().to_string(), target.clone()));
                }
            }
        }
    }
    dangling
}

#[tokio::test]
async fn dig_links_both_ways_and_walls_the_rest() {
    let (world, _tmp) = test_world();
    let token = LockToken::generate();
    let alpha = world.room_at(0, 0, 0).unwrap();

    for dir in Direction::ALL {
        let (dx, dy, dz) = dir.offset();
        let created = alpha.dig(&world, &token, dir).await.unwrap();
        assert_eq!(created.coordinates(), (dx, dy, dz));
        assert_eq!(alpha.exit(dir).target.as_deref(), Some(created.id()));
        assert_eq!(
            created.exit(dir.inverse()).target.as_deref(),
            Some(alpha.id())
        );
        assert!(alpha.can_traverse(&world, dir));
        assert!(created.can_traverse(&world, dir.inverse()));
        for other in Direction::ALL {
            if other != dir.inverse() {
                assert!(created.exit(other).wall, "{} of new room should be walled", other);
                assert!(!created.can_traverse(&world, other));
            }
        }
        assert!(matches!(
            alpha.dig(&world, &token, dir).await,
            Err(WorldError::RoomExists(d)) if d == dir
        ));
    }
    assert_eq!(world.rooms().len(), 7);
    assert_eq!(world.store().load_rooms().unwrap().len(), 7);
}

#[tokio::test]
async fn delete_unlinks_neighbours_and_evacuates() {
    let (world, _tmp) = test_world();
    let token = LockToken::generate();
    let alpha = world.room_at(0, 0, 0).unwrap();
    let north = alpha.dig(&world, &token, Direction::North).await.unwrap();
    let east = north.dig(&world, &token, Direction::East).await.unwrap();
    // (1,0,0) touches `east` physically but has no exit to it.
    let se = alpha.dig(&world, &token, Direction::East).await.unwrap();
    assert!(se.physical_room(&world, Direction::North).is_some());

    let a = occupant(&world, &north, "a").await;
    let b = occupant(&world, &north, "b").await;

    let target = north.delete(&world, &token).await.unwrap().unwrap();
    // South is the lowest-index linked neighbour (north of `north` is walled).
    assert!(Arc::ptr_eq(&target, &alpha));

    assert!(world.room_by_id(north.id()).is_none());
    assert!(world.room_at(0, 1, 0).is_none());
    assert!(world.store().load_room(north.id()).unwrap().is_none());
    assert!(dangling_exits(&world).is_empty());
    assert!(alpha.exit(Direction::North).wall);
    assert!(east.exit(Direction::West).wall);

    for s in [&a, &b] {
        assert!(Arc::ptr_eq(&s.room().await.unwrap(), &alpha));
        assert!(alpha.has_player(&token, s.id()).await);
        assert!(!north.has_player(&token, s.id()).await);
    }

    // The deleted room refuses further structure changes.
    assert!(matches!(
        north.dig(&world, &token, Direction::Up).await,
        Err(WorldError::RoomGone(_))
    ));
    assert!(matches!(
        north.delete(&world, &token).await,
        Err(WorldError::RoomGone(_))
    ));
    // Its coordinate can be dug again.
    let again = alpha.dig(&world, &token, Direction::North).await.unwrap();
    assert_eq!(again.coordinates(), (0, 1, 0));
}

#[tokio::test]
async fn delete_of_isolated_room_leaves_occupants_in_place() {
    let (world, _tmp) = test_world();
    let token = LockToken::generate();
    let alpha = world.room_at(0, 0, 0).unwrap();
    let s = occupant(&world, &alpha, "solo").await;

    assert!(alpha.delete(&world, &token).await.unwrap().is_none());
    assert!(world.rooms().is_empty());
    assert!(Arc::ptr_eq(&s.room().await.unwrap(), &alpha));
    assert!(matches!(
        s.move_to(&world, alpha.clone()).await,
        Err(WorldError::RoomGone(_))
    ));
}

#[tokio::test]
async fn world_reloads_from_store() {
    let (world, tmp) = test_world();
    let token = LockToken::generate();
    let alpha = world.room_at(0, 0, 0).unwrap();
    let up = alpha.dig(&world, &token, Direction::Up).await.unwrap();
    up.set_name(&world, &token, "Loft").await.unwrap();

    let store = WorldStore::open(tmp.path()).unwrap();
    let reloaded = World::new(store, Default::default());
    assert_eq!(reloaded.load().unwrap(), 2);
    let loft = reloaded.room_at(0, 0, 1).unwrap();
    assert_eq!(loft.name(), "Loft");
    assert_eq!(loft.exit(Direction::Down).target.as_deref(), Some(alpha.id()));
    assert!(reloaded.room_at(0, 0, 0).unwrap().can_traverse(&reloaded, Direction::Up));
}

#[tokio::test]
async fn deleted_room_is_never_written_back() {
    let (world, tmp) = test_world();
    let token = LockToken::generate();
    let alpha = world.room_at(0, 0, 0).unwrap();
    assert!(alpha.delete(&world, &token).await.unwrap().is_none());

    assert!(matches!(
        alpha.set_name(&world, &token, "Ghost").await,
        Err(WorldError::RoomGone(_))
    ));
    assert!(matches!(
        alpha.save(&world, &token).await,
        Err(WorldError::RoomGone(_))
    ));
    assert!(matches!(
        alpha
            .update_exit(&world, &token, Direction::North, |exit| exit.wall = false)
            .await,
        Err(WorldError::RoomGone(_))
    ));
    assert_eq!(alpha.name(), "The Alpha");
    assert!(world.store().load_room(alpha.id()).unwrap().is_none());

    // A fresh load only sees the new bootstrap room, not the deleted one.
    let reloaded = World::new(WorldStore::open(tmp.path()).unwrap(), Default::default());
    assert_eq!(reloaded.load().unwrap(), 1);
    let origin = reloaded.room_at(0, 0, 0).unwrap();
    assert_ne!(origin.id(), alpha.id());
    assert_ne!(origin.name(), "Ghost");
}

#[tokio::test]
async fn exit_updates_persist() {
    let (world, _tmp) = test_world();
    let token = LockToken::generate();
    let alpha = world.room_at(0, 0, 0).unwrap();
    alpha.dig(&world, &token, Direction::East).await.unwrap();

    alpha
        .update_exit(&world, &token, Direction::East, |exit| {
            exit.door = true;
            exit.closed = true;
        })
        .await
        .unwrap();
    assert!(!alpha.can_traverse(&world, Direction::East));
    assert!(alpha.linked_room(&world, Direction::East).is_some());
    let stored = world.store().load_room(alpha.id()).unwrap().unwrap();
    assert!(stored.exit(Direction::East).closed);
}

#[tokio::test]
async fn for_each_player_callbacks_may_change_membership() {
    let (world, _tmp) = test_world();
    let alpha = world.room_at(0, 0, 0).unwrap();
    let a = occupant(&world, &alpha, "a").await;
    let b = occupant(&world, &alpha, "b").await;
    let (late, _inbox) = Session::new("late");

    // The callbacks lock the room with a different token; they would hang
    // if the room lock were still held while visiting.
    let caller = LockToken::generate();
    let other = LockToken::generate();
    let visited = Mutex::new(Vec::new());
    let (room, late_ref, visited_ref, other_ref) = (&alpha, &late, &visited, &other);
    tokio::time::timeout(
        Duration::from_secs(5),
        alpha.for_each_player(&caller, move |s| async move {
            visited_ref.lock().unwrap().push(s.id().to_string());
            room.remove_player(other_ref, s.id()).await;
            room.add_player(other_ref, late_ref.clone()).await;
        }),
    )
    .await
    .expect("for_each_player held the room lock during callbacks");

    // Only the occupants present when the walk started were visited.
    let mut visited = visited.into_inner().unwrap();
    visited.sort();
    let mut expected = vec![a.id().to_string(), b.id().to_string()];
    expected.sort();
    assert_eq!(visited, expected);

    assert!(!alpha.has_player(&caller, a.id()).await);
    assert!(!alpha.has_player(&caller, b.id()).await);
    assert!(alpha.has_player(&caller, late.id()).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_dig_delete_move_leaves_no_dangling_exits() {
    const WORKERS: usize = 8;
    const OPS_PER_WORKER: usize = 250;

    let (world, _tmp) = test_world();
    let alpha = world.room_at(0, 0, 0).unwrap();

    // Everyone is placed before any worker can delete the start room.
    let mut sessions = Vec::new();
    for worker in 0..WORKERS {
        sessions.push(occupant(&world, &alpha, &format!("w{}", worker)).await);
    }

    let mut tasks = Vec::new();
    for session in sessions {
        let world = world.clone();
        tasks.push(tokio::spawn(async move {
            let token = session.token().clone();
            for _ in 0..OPS_PER_WORKER {
                let Some(here) = session.room().await else {
                    break;
                };
                let (op, dir) = {
                    let mut rng = rand::thread_rng();
                    (rng.gen_range(0..10), Direction::ALL[rng.gen_range(0..6)])
                };
                match op {
                    0..=3 => {
                        let _ = here.dig(&world, &token, dir).await;
                    }
                    4 => {
                        if let Some(next) = here.linked_room(&world, dir) {
                            let _ = next.delete(&world, &token).await;
                        }
                    }
                    5 => {
                        let _ = here.set_name(&world, &token, "Trampled").await;
                    }
                    _ => {
                        if here.can_traverse(&world, dir) {
                            if let Some(next) = here.linked_room(&world, dir) {
                                let _ = session.move_to(&world, next).await;
                            }
                        }
                    }
                }
                tokio::task::yield_now().await;
            }
        }));
    }
    for task in tasks {
        tokio::time::timeout(Duration::from_secs(120), task)
            .await
            .expect("stress workers deadlocked")
            .unwrap();
    }

    assert!(dangling_exits(&world).is_empty(), "{:?}", dangling_exits(&world));
    for room in world.rooms() {
        let (x, y, z) = room.coordinates();
        assert!(Arc::ptr_eq(&world.room_at(x, y, z).unwrap(), &room));
    }

    // The store holds exactly the registered rooms: no deleted room was resaved.
    let mut stored: Vec<String> = world
        .store()
        .load_rooms()
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    let mut live: Vec<String> = world.rooms().iter().map(|r| r.id().to_string()).collect();
    stored.sort();
    live.sort();
    assert_eq!(stored, live);
}
