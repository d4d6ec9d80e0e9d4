//! Breadth-first map projection.
//!
//! The walk follows traversable exits rather than scanning coordinates, so
//! walls and closed doors hide rooms that physically exist next door.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use super::registry::World;
use super::room::Room;
use super::types::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cell {
    Blank,
    Room,
    Center,
}

impl Cell {
    fn glyph(self) -> &'static str {
        match self {
            Cell::Blank => " ",
            Cell::Room => "#",
            Cell::Center => "{r*{x",
        }
    }
}

/// Render a `(2 * radius + 1)` square map centred on `center`. North is up.
pub fn render_map(world: &World, center: &Arc<Room>, radius: usize) -> String {
    let size = radius * 2 + 1;
    let mut grid = vec![vec![Cell::Blank; size]; size];
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<(Arc<Room>, usize, usize)> = VecDeque::new();

    visited.insert(center.id().to_string());
    queue.push_back((center.clone(), radius, radius));

    while let Some((room, col, row)) = queue.pop_front() {
        for dir in Direction::HORIZONTAL {
            if !room.can_traverse(world, dir) {
                continue;
            }
            let Some(next) = room.linked_room(world, dir) else {
                continue;
            };
            if visited.contains(next.id()) {
                continue;
            }
            let (dx, dy, _) = dir.offset();
            let next_col = col as i64 + dx;
            let next_row = row as i64 - dy;
            if next_col < 0 || next_row < 0 || next_col >= size as i64 || next_row >= size as i64 {
                continue;
            }
            let (next_col, next_row) = (next_col as usize, next_row as usize);
            visited.insert(next.id().to_string());
            grid[next_row][next_col] = Cell::Room;
            queue.push_back((next, next_col, next_row));
        }
    }

    grid[radius][radius] = Cell::Center;

    grid.iter()
        .map(|row| {
            let mut line = String::from("  ");
            for cell in row {
                line.push_str(cell.glyph());
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::strip;
    use crate::world::registry::WorldSettings;
    use crate::world::storage::WorldStoreBuilder;
    use crate::world::types::{Exit, RoomData};
    use tempfile::TempDir;

    fn walled(id: &str, x: i64, y: i64) -> RoomData {
        let mut data = RoomData::new(id, "").with_walls().with_coordinates(x, y, 0);
        data.id = id.to_string();
        data
    }

    fn link(a: &mut RoomData, dir: Direction, b: &mut RoomData) {
        *a.exit_mut(dir) = Exit::to(&b.id);
        *b.exit_mut(dir.inverse()) = Exit::to(&a.id);
    }

    fn world_of(rooms: Vec<RoomData>) -> (TempDir, World) {
        let dir = TempDir::new().unwrap();
        let store = WorldStoreBuilder::new(dir.path()).open().unwrap();
        let world = World::new(store, WorldSettings::default());
        for data in rooms {
            world.add_room(Room::new(data));
        }
        (dir, world)
    }

    fn rows(world: &World, radius: usize) -> Vec<String> {
        let center = world.room_at(0, 0, 0).unwrap();
        strip(&render_map(world, &center, radius))
            .lines()
            .map(|l| l.to_string())
            .collect()
    }

    #[test]
    fn lone_room_is_just_the_marker() {
        let (_dir, world) = world_of(vec![walled("a", 0, 0)]);
        assert_eq!(rows(&world, 1), vec!["     ", "   * ", "     "]);
        assert!(render_map(&world, &world.room_at(0, 0, 0).unwrap(), 0).contains("{r*{x"));
    }

    #[test]
    fn walls_occlude_physical_neighbours() {
        let mut a = walled("a", 0, 0);
        let mut north = walled("n", 0, 1);
        let east = walled("e", 1, 0);
        link(&mut a, Direction::North, &mut north);

        // East exists physically but is walled off.
        let (_dir, world) = world_of(vec![a, north, east]);
        assert_eq!(rows(&world, 1), vec!["   # ", "   * ", "     "]);
    }

    #[test]
    fn closed_doors_occlude_and_edges_clip() {
        let mut a = walled("a", 0, 0);
        let mut west = walled("w", -1, 0);
        let mut s1 = walled("s1", 0, -1);
        let mut s2 = walled("s2", 0, -2);
        link(&mut a, Direction::West, &mut west);
        a.exit_mut(Direction::West).closed = true;
        a.exit_mut(Direction::West).door = true;
        link(&mut a, Direction::South, &mut s1);
        link(&mut s1, Direction::South, &mut s2);

        let (_dir, world) = world_of(vec![a, west, s1, s2]);

        // S2 falls outside a radius-1 grid; the closed door hides the west room.
        assert_eq!(rows(&world, 1), vec!["     ", "   * ", "   # "]);
        let wide = rows(&world, 2);
        assert_eq!(wide[2], "    *  ");
        assert_eq!(wide[3], "    #  ");
        assert_eq!(wide[4], "    #  ");
    }

    #[test]
    fn unregistered_targets_are_not_drawn() {
        let mut a = walled("a", 0, 0);
        *a.exit_mut(Direction::East) = Exit::to("ghost");
        let (_dir, world) = world_of(vec![a]);
        assert_eq!(rows(&world, 1)[1], "   * ");
    }
}
