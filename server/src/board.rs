use std::collections::VecDeque;

use minesweep_common::models::{MaskedBoard, MaskedCell};
use rand::Rng;

/// Authoritative cell state. Never serialized directly; clients only ever
/// see the masked view produced by [`Board::mask`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cell {
    pub mine: bool,
    pub revealed: bool,
    pub flagged: bool,
    pub adjacent_mines: u8,
}

/// Immutable minesweeper board. Every operation returns a new board, which
/// lets a session swap its board reference atomically under its lock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Board {
    rows: usize,
    cols: usize,
    mines: usize,
    cells: Vec<Cell>,
}

fn neighbors(rows: usize, cols: usize, row: usize, col: usize) -> Vec<(usize, usize)> {
    let mut out = Vec::with_capacity(8);
    for dr in -1i32..=1 {
        for dc in -1i32..=1 {
            if dr == 0 && dc == 0 {
                continue;
            }

            let nr = row as i32 + dr;
            let nc = col as i32 + dc;
            if nr >= 0 && nr < rows as i32 && nc >= 0 && nc < cols as i32 {
                out.push((nr as usize, nc as usize));
            }
        }
    }
    out
}

impl Board {
    /// Build a board with mines at the given coordinates. `adjacent_mines`
    /// is computed here once and never recomputed.
    pub fn with_mines(rows: usize, cols: usize, mines: &[(usize, usize)]) -> Self {
        let mut cells = vec![Cell::default(); rows * cols];
        for &(r, c) in mines {
            cells[r * cols + c].mine = true;
        }

        for r in 0..rows {
            for c in 0..cols {
                if cells[r * cols + c].mine {
                    continue;
                }
                cells[r * cols + c].adjacent_mines = neighbors(rows, cols, r, c)
                    .into_iter()
                    .filter(|&(nr, nc)| cells[nr * cols + nc].mine)
                    .count() as u8;
            }
        }

        Self {
            rows,
            cols,
            mines: mines.len(),
            cells,
        }
    }

    /// Generate a board with `mine_count` mines at distinct uniformly random
    /// coordinates. Requires `mine_count < rows * cols` or placement would
    /// never terminate.
    pub fn generate(rows: usize, cols: usize, mine_count: usize) -> Self {
        debug_assert!(mine_count < rows * cols);

        let mut rng = rand::rng();
        let mut occupied = vec![false; rows * cols];
        let mut coords = Vec::with_capacity(mine_count);

        while coords.len() < mine_count {
            let r = rng.random_range(0..rows);
            let c = rng.random_range(0..cols);
            if !occupied[r * cols + c] {
                occupied[r * cols + c] = true;
                coords.push((r, c));
            }
        }

        Self::with_mines(rows, cols, &coords)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn mine_count(&self) -> usize {
        self.mines
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&Cell> {
        self.index(row, col).map(|i| &self.cells[i])
    }

    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.iter()
    }

    fn index(&self, row: usize, col: usize) -> Option<usize> {
        (row < self.rows && col < self.cols).then(|| row * self.cols + col)
    }

    /// Reveal the cell at (row, col), returning the next board and whether a
    /// mine was hit. Revealed, flagged and out-of-bounds targets are no-ops.
    ///
    /// Revealing a zero-adjacency cell expands breadth-first: unrevealed,
    /// unflagged non-mine neighbors are revealed, and only freshly revealed
    /// zero cells propagate further.
    pub fn reveal(&self, row: usize, col: usize) -> (Self, bool) {
        let mut next = self.clone();
        let Some(idx) = next.index(row, col) else {
            return (next, false);
        };

        {
            let cell = &mut next.cells[idx];
            if cell.revealed || cell.flagged {
                return (next, false);
            }
            cell.revealed = true;
            if cell.mine {
                return (next, true);
            }
        }

        if next.cells[idx].adjacent_mines == 0 {
            let mut queue = VecDeque::from([(row, col)]);
            while let Some((r, c)) = queue.pop_front() {
                for (nr, nc) in neighbors(next.rows, next.cols, r, c) {
                    let neighbor = &mut next.cells[nr * next.cols + nc];
                    if !neighbor.revealed && !neighbor.flagged && !neighbor.mine {
                        neighbor.revealed = true;
                        if neighbor.adjacent_mines == 0 {
                            queue.push_back((nr, nc));
                        }
                    }
                }
            }
        }

        (next, false)
    }

    /// Toggle the flag on an unrevealed cell. Revealed and out-of-bounds
    /// targets are no-ops.
    pub fn toggle_flag(&self, row: usize, col: usize) -> Self {
        let mut next = self.clone();
        if let Some(idx) = next.index(row, col)
            && !next.cells[idx].revealed
        {
            next.cells[idx].flagged = !next.cells[idx].flagged;
        }
        next
    }

    /// A board is won when every non-mine cell is revealed. Flags are not
    /// consulted.
    pub fn check_win(&self) -> bool {
        self.cells.iter().all(|cell| cell.mine || cell.revealed)
    }

    /// Information-hiding view: unrevealed cells lose their `mine` attribute
    /// and report zero adjacency no matter what the real values are.
    pub fn mask(&self) -> MaskedBoard {
        self.cells
            .chunks(self.cols)
            .map(|row| {
                row.iter()
                    .map(|cell| MaskedCell {
                        revealed: cell.revealed,
                        flagged: cell.flagged,
                        adjacent_mines: if cell.revealed { cell.adjacent_mines } else { 0 },
                        mine: (cell.revealed && cell.mine).then_some(true),
                    })
                    .collect()
            })
            .collect()
    }
}
