//! Go board: placement legality, captures and liberties
//!
//! Flood fills use a `BitVec` visited set indexed by `y * size + x`.

use bitvec::prelude::*;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::game::state::Color;

/// Board intersection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: u8,
    pub y: u8,
}

impl Point {
    pub const fn new(x: u8, y: u8) -> Self {
        Self { x, y }
    }
}

/// Why a placement was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PlacementError {
    #[error("point is outside the board")]
    OutOfBounds,
    #[error("point is occupied")]
    Occupied,
    #[error("move would capture its own group")]
    Suicide,
    #[error("point is forbidden this move")]
    Forbidden,
}

/// Result of a successful placement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placement {
    /// Opposing stones removed by the move
    pub captured: Vec<Point>,
    /// Point the opponent may not play next (single-stone recapture)
    pub forbidden_next: Option<Point>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    size: u8,
    cells: Vec<Option<Color>>,
}

impl Board {
    pub fn new(size: u8) -> Self {
        let n = size as usize;
        Self {
            size,
            cells: vec![None; n * n],
        }
    }

    pub fn size(&self) -> u8 {
        self.size
    }

    /// Raw rows for snapshots
    pub fn rows(&self) -> Vec<Vec<Option<Color>>> {
        self.cells
            .chunks(self.size as usize)
            .map(|row| row.to_vec())
            .collect()
    }

    #[inline]
    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && x < self.size as i32 && y < self.size as i32
    }

    #[inline]
    fn index(&self, p: Point) -> usize {
        p.y as usize * self.size as usize + p.x as usize
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x < self.size && p.y < self.size
    }

    pub fn get(&self, p: Point) -> Option<Color> {
        if !self.contains(p) {
            return None;
        }
        self.cells[self.index(p)]
    }

    pub fn set(&mut self, p: Point, value: Option<Color>) {
        if self.contains(p) {
            let idx = self.index(p);
            self.cells[idx] = value;
        }
    }

    pub fn clear(&mut self) {
        self.cells.iter_mut().for_each(|c| *c = None);
    }

    pub fn count(&self, color: Color) -> usize {
        self.cells.iter().filter(|c| **c == Some(color)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(|c| c.is_none())
    }

    pub fn neighbors(&self, p: Point) -> SmallVec<[Point; 4]> {
        let mut out = SmallVec::new();
        let (x, y) = (p.x as i32, p.y as i32);
        for (dx, dy) in [(0, -1), (1, 0), (0, 1), (-1, 0)] {
            let (nx, ny) = (x + dx, y + dy);
            if self.in_bounds(nx, ny) {
                out.push(Point::new(nx as u8, ny as u8));
            }
        }
        out
    }

    /// Stones of the group at `p` and its liberty count
    pub fn group(&self, p: Point) -> (Vec<Point>, usize) {
        let Some(color) = self.get(p) else {
            return (Vec::new(), 0);
        };
        let n = self.size as usize * self.size as usize;
        let mut visited = bitvec![0; n];
        let mut counted = bitvec![0; n];
        let mut stones = Vec::new();
        let mut liberties = 0;
        let mut stack = vec![p];
        visited.set(self.index(p), true);

        while let Some(current) = stack.pop() {
            stones.push(current);
            for next in self.neighbors(current) {
                let idx = self.index(next);
                match self.cells[idx] {
                    None => {
                        if !counted[idx] {
                            counted.set(idx, true);
                            liberties += 1;
                        }
                    }
                    Some(c) if c == color && !visited[idx] => {
                        visited.set(idx, true);
                        stack.push(next);
                    }
                    _ => {}
                }
            }
        }
        (stones, liberties)
    }

    /// Empty points adjacent to any stone of `color`
    pub fn liberties_of(&self, color: Color) -> Vec<Point> {
        let n = self.size as usize * self.size as usize;
        let mut seen = bitvec![0; n];
        let mut out = Vec::new();
        for y in 0..self.size {
            for x in 0..self.size {
                let p = Point::new(x, y);
                if self.get(p) != Some(color) {
                    continue;
                }
                for next in self.neighbors(p) {
                    let idx = self.index(next);
                    if self.cells[idx].is_none() && !seen[idx] {
                        seen.set(idx, true);
                        out.push(next);
                    }
                }
            }
        }
        out
    }

    /// Place a stone following capture and suicide rules
    ///
    /// Nothing is mutated when an error is returned.
    pub fn place(
        &mut self,
        p: Point,
        color: Color,
        forbidden: Option<Point>,
        allow_suicide: bool,
    ) -> Result<Placement, PlacementError> {
        if !self.contains(p) {
            return Err(PlacementError::OutOfBounds);
        }
        if self.get(p).is_some() {
            return Err(PlacementError::Occupied);
        }
        if forbidden == Some(p) {
            return Err(PlacementError::Forbidden);
        }

        self.set(p, Some(color));

        let mut captured = Vec::new();
        for next in self.neighbors(p) {
            if self.get(next) != Some(color.opposite()) {
                continue;
            }
            let (stones, liberties) = self.group(next);
            if liberties == 0 {
                for stone in stones {
                    if self.get(stone).is_some() {
                        self.set(stone, None);
                        captured.push(stone);
                    }
                }
            }
        }

        let (own, own_liberties) = self.group(p);
        if own_liberties == 0 {
            if !allow_suicide {
                self.set(p, None);
                return Err(PlacementError::Suicide);
            }
            for &stone in &own {
                self.set(stone, None);
            }
        }

        let forbidden_next = if captured.len() == 1 && own.len() == 1 && own_liberties == 1 {
            Some(captured[0])
        } else {
            None
        };

        Ok(Placement {
            captured,
            forbidden_next,
        })
    }

    /// Remove whichever of `color`'s groups have no liberties left
    pub fn remove_dead(&mut self, color: Color) -> Vec<Point> {
        let mut removed = Vec::new();
        for y in 0..self.size {
            for x in 0..self.size {
                let p = Point::new(x, y);
                if self.get(p) != Some(color) {
                    continue;
                }
                let (stones, liberties) = self.group(p);
                if liberties == 0 {
                    for stone in stones {
                        self.set(stone, None);
                        removed.push(stone);
                    }
                }
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: u8, y: u8) -> Point {
        Point::new(x, y)
    }

    #[test]
    fn test_place_on_empty() {
        let mut board = Board::new(9);
        let placement = board.place(p(2, 2), Color::Black, None, false).unwrap();

        assert!(placement.captured.is_empty());
        assert_eq!(board.get(p(2, 2)), Some(Color::Black));
        assert_eq!(board.count(Color::Black), 1);
    }

    #[test]
    fn test_occupied_and_out_of_bounds() {
        let mut board = Board::new(9);
        board.place(p(0, 0), Color::Black, None, false).unwrap();

        assert_eq!(
            board.place(p(0, 0), Color::White, None, false),
            Err(PlacementError::Occupied)
        );
        assert_eq!(
            board.place(p(9, 0), Color::White, None, false),
            Err(PlacementError::OutOfBounds)
        );
    }

    #[test]
    fn test_corner_capture() {
        let mut board = Board::new(9);
        board.place(p(0, 0), Color::White, None, false).unwrap();
        board.place(p(1, 0), Color::Black, None, false).unwrap();
        let placement = board.place(p(0, 1), Color::Black, None, false).unwrap();

        assert_eq!(placement.captured, vec![p(0, 0)]);
        assert_eq!(board.get(p(0, 0)), None);
    }

    #[test]
    fn test_group_liberties() {
        let mut board = Board::new(9);
        board.place(p(4, 4), Color::Black, None, false).unwrap();
        board.place(p(4, 5), Color::Black, None, false).unwrap();

        let (stones, liberties) = board.group(p(4, 4));
        assert_eq!(stones.len(), 2);
        assert_eq!(liberties, 6);
    }

    #[test]
    fn test_suicide_rejected_without_mutation() {
        let mut board = Board::new(9);
        board.place(p(1, 0), Color::Black, None, false).unwrap();
        board.place(p(0, 1), Color::Black, None, false).unwrap();

        let before = board.clone();
        assert_eq!(
            board.place(p(0, 0), Color::White, None, false),
            Err(PlacementError::Suicide)
        );
        assert_eq!(board, before);
    }

    #[test]
    fn test_suicide_allowed_removes_own_group() {
        let mut board = Board::new(9);
        board.place(p(1, 0), Color::Black, None, false).unwrap();
        board.place(p(0, 1), Color::Black, None, false).unwrap();

        let placement = board.place(p(0, 0), Color::White, None, true).unwrap();
        assert!(placement.captured.is_empty());
        assert_eq!(placement.forbidden_next, None);
        assert_eq!(board.get(p(0, 0)), None);
    }

    #[test]
    fn test_suicide_allowed_removes_whole_group() {
        let mut board = Board::new(9);
        board.place(p(0, 0), Color::White, None, false).unwrap();
        for q in [p(2, 0), p(0, 1), p(1, 1)] {
            board.place(q, Color::Black, None, false).unwrap();
        }

        board.place(p(1, 0), Color::White, None, true).unwrap();
        assert_eq!(board.get(p(0, 0)), None);
        assert_eq!(board.get(p(1, 0)), None);
        assert_eq!(board.count(Color::White), 0);
        assert_eq!(board.count(Color::Black), 3);
    }

    #[test]
    fn test_capture_beats_suicide() {
        let mut board = Board::new(9);
        board.place(p(0, 0), Color::White, None, false).unwrap();
        board.place(p(1, 0), Color::Black, None, false).unwrap();
        board.place(p(1, 1), Color::White, None, false).unwrap();
        board.place(p(0, 2), Color::White, None, false).unwrap();

        let placement = board.place(p(0, 1), Color::Black, None, false).unwrap();
        assert_eq!(placement.captured, vec![p(0, 0)]);
        assert_eq!(placement.forbidden_next, Some(p(0, 0)));
    }

    #[test]
    fn test_forbidden_point() {
        let mut board = Board::new(9);
        assert_eq!(
            board.place(p(3, 3), Color::White, Some(p(3, 3)), false),
            Err(PlacementError::Forbidden)
        );
        assert!(board.place(p(3, 4), Color::White, Some(p(3, 3)), false).is_ok());
    }

    #[test]
    fn test_liberties_of_color() {
        let mut board = Board::new(5);
        board.place(p(0, 0), Color::White, None, false).unwrap();
        let libs = board.liberties_of(Color::White);

        assert_eq!(libs.len(), 2);
        assert!(libs.contains(&p(1, 0)));
        assert!(libs.contains(&p(0, 1)));
    }

    #[test]
    fn test_rows_shape() {
        let board = Board::new(7);
        let rows = board.rows();
        assert_eq!(rows.len(), 7);
        assert!(rows.iter().all(|r| r.len() == 7));
    }
}
