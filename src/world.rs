//! Spatial world model.
//!
//! The map is a rectangular array of cells addressed by [`Pos`]. Distances and
//! radius queries depend on the [`Topology`]: a bounded grid, or a torus whose
//! edges wrap around on both axes.

use crate::agent::AgentId;
use crate::config::WorldConfig;
use anyhow::{Result, ensure};
use rand::prelude::*;
use rand::seq::index;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Fish quantity of an ordinary cell.
const BASE_FISH_QUANTITY: f64 = 0.5;

/// Fish quantity of a spawning ground.
const SPAWNING_FISH_QUANTITY: f64 = 1.0;

/// Grid coordinate of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pos {
    pub x: usize,
    pub y: usize,
}

impl Pos {
    pub fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    Grid,
    Torus,
}

/// Neighbourhood type of the map. Reported to front ends only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Neighbourhood {
    VonNeumann,
    #[default]
    Moore,
}

/// How aquaculture damage falls off with distance from the farm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DamageDecay {
    /// From the full proportion at distance 0 down to nothing at the damage radius.
    #[default]
    Linear,
    /// The full proportion everywhere inside the damage radius.
    Flat,
}

/// A single cell of the map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    fish_quantity: f64,
    spawning: bool,
    blocked: bool,
    has_aquaculture: bool,
    occupants: Vec<AgentId>,
}

impl Cell {
    fn new() -> Self {
        Self {
            fish_quantity: BASE_FISH_QUANTITY,
            spawning: false,
            blocked: false,
            has_aquaculture: false,
            occupants: Vec::new(),
        }
    }

    pub fn fish_quantity(&self) -> f64 {
        self.fish_quantity
    }

    pub fn is_spawning(&self) -> bool {
        self.spawning
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    pub fn has_aquaculture(&self) -> bool {
        self.has_aquaculture
    }

    pub fn occupants(&self) -> &[AgentId] {
        &self.occupants
    }

    /// Fishing output of this cell, shared evenly among its occupants.
    pub fn fishing_efficiency(&self) -> f64 {
        self.fish_quantity / self.occupants.len().max(1) as f64
    }

    fn set_spawning(&mut self) {
        self.spawning = true;
        self.fish_quantity = SPAWNING_FISH_QUANTITY;
    }

    fn block(&mut self) {
        self.blocked = true;
    }

    /// Remove a proportion (between 0 and 1) of the remaining fish.
    fn inflict_damage(&mut self, proportion: f64) {
        self.fish_quantity -= self.fish_quantity * proportion;
    }

    pub fn populate(&mut self, agent: AgentId) {
        if !self.occupants.contains(&agent) {
            self.occupants.push(agent);
        }
    }

    pub fn remove(&mut self, agent: AgentId) {
        self.occupants.retain(|&occupant| occupant != agent);
    }

    fn build_aquaculture(&mut self, agent: AgentId) {
        self.has_aquaculture = true;
        self.blocked = true;
        self.occupants = vec![agent];
    }
}

/// Observable state of a cell, as sent to front ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellView {
    pub pos: Pos,
    pub fish_quantity: f64,
    pub spawning: bool,
    pub blocked: bool,
    pub aquaculture: bool,
    pub occupants: usize,
}

/// The world map.
#[derive(Debug, Clone)]
pub struct WorldMap {
    width: usize,
    height: usize,
    cell_size: (f64, f64),
    topology: Topology,
    neighbourhood: Neighbourhood,
    blocking_radius: f64,
    damage_radius: f64,
    damage_proportion: f64,
    damage_decay: DamageDecay,
    cells: Vec<Cell>,
}

impl WorldMap {
    /// Create an empty map without spawning grounds.
    pub fn new(cfg: &WorldConfig) -> Self {
        let mut cells = Vec::new();
        cells.resize_with(cfg.width * cfg.height, Cell::new);
        Self {
            width: cfg.width,
            height: cfg.height,
            cell_size: (cfg.cell_width, cfg.cell_height),
            topology: cfg.topology,
            neighbourhood: cfg.neighbourhood,
            blocking_radius: cfg.blocking_radius,
            damage_radius: cfg.damage_radius,
            damage_proportion: cfg.damage_proportion,
            damage_decay: cfg.damage_decay,
            cells,
        }
    }

    /// Create a map and mark a random `good_spot_frequency` share of its cells as spawning grounds.
    pub fn generate(cfg: &WorldConfig, rng: &mut impl Rng) -> Self {
        let mut map = Self::new(cfg);
        let n_cells = map.cells.len();
        let n_good = ((cfg.good_spot_frequency * n_cells as f64) as usize).min(n_cells);
        for i_cell in index::sample(rng, n_cells, n_good) {
            map.cells[i_cell].set_spawning();
        }
        map
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn neighbourhood(&self) -> Neighbourhood {
        self.neighbourhood
    }

    fn index(&self, pos: Pos) -> usize {
        pos.y * self.width + pos.x
    }

    fn pos(&self, i_cell: usize) -> Pos {
        Pos::new(i_cell % self.width, i_cell / self.width)
    }

    /// Access a cell. `pos` must lie inside the map.
    pub fn cell(&self, pos: Pos) -> &Cell {
        &self.cells[self.index(pos)]
    }

    pub fn cell_mut(&mut self, pos: Pos) -> &mut Cell {
        let i_cell = self.index(pos);
        &mut self.cells[i_cell]
    }

    /// Positions of all cells in row-major order.
    pub fn all_cells(&self) -> Vec<Pos> {
        (0..self.cells.len()).map(|i_cell| self.pos(i_cell)).collect()
    }

    /// Positions of all cells satisfying `predicate`, in row-major order.
    pub fn cells_where<F>(&self, predicate: F) -> Vec<Pos>
    where
        F: Fn(&Cell) -> bool,
    {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, cell)| predicate(cell))
            .map(|(i_cell, _)| self.pos(i_cell))
            .collect()
    }

    /// Distance in meters between two cells.
    pub fn distance(&self, a: Pos, b: Pos) -> f64 {
        let (cell_w, cell_h) = self.cell_size;
        let dx = a.x as f64 - b.x as f64;
        let dy = a.y as f64 - b.y as f64;
        match self.topology {
            Topology::Grid => ((dx * cell_w).powi(2) + (dy * cell_h).powi(2)).sqrt(),
            Topology::Torus => {
                // Shortest distance over the 3x3 periodic images of `b`.
                let (w, h) = (self.width as f64, self.height as f64);
                let mut min_dist = f64::INFINITY;
                for shift_x in [-w, 0.0, w] {
                    for shift_y in [-h, 0.0, h] {
                        let dist = (((dx + shift_x) * cell_w).powi(2)
                            + ((dy + shift_y) * cell_h).powi(2))
                        .sqrt();
                        min_dist = min_dist.min(dist);
                    }
                }
                min_dist
            }
        }
    }

    /// Corner-to-corner distance of the map, used to normalize distances.
    pub fn max_distance(&self) -> f64 {
        let (cell_w, cell_h) = self.cell_size;
        let dx = (self.width - 1) as f64 * cell_w;
        let dy = (self.height - 1) as f64 * cell_h;
        (dx.powi(2) + dy.powi(2)).sqrt()
    }

    /// Cells within `r` meters of `center` along the axes and diagonals,
    /// `center` itself excluded.
    ///
    /// Steps of `floor(r / cell size)` are taken along each axis; every
    /// combination of axis offsets up to those steps is included.
    pub fn radius(&self, r: f64, center: Pos) -> Vec<Pos> {
        if !(r >= 0.0) {
            return Vec::new();
        }
        let (cell_w, cell_h) = self.cell_size;
        let steps_x = (r / cell_w).floor() as i64;
        let steps_y = (r / cell_h).floor() as i64;
        let (w, h) = (self.width as i64, self.height as i64);
        let (cx, cy) = (center.x as i64, center.y as i64);

        // Offsets past the map edge add nothing: the grid drops them and the
        // torus wraps them onto cells already covered.
        let (range_x, range_y) = match self.topology {
            Topology::Grid => (
                (-steps_x).max(-cx)..=steps_x.min(w - 1 - cx),
                (-steps_y).max(-cy)..=steps_y.min(h - 1 - cy),
            ),
            Topology::Torus => {
                let (steps_x, steps_y) = (steps_x.min(w / 2), steps_y.min(h / 2));
                (-steps_x..=steps_x, -steps_y..=steps_y)
            }
        };

        let mut seen = BTreeSet::new();
        let mut cells = Vec::new();
        for dx in range_x {
            for dy in range_y.clone() {
                if dx == 0 && dy == 0 {
                    continue;
                }
                let (x, y) = (cx + dx, cy + dy);
                let (x, y) = match self.topology {
                    Topology::Grid => {
                        if !(0..w).contains(&x) || !(0..h).contains(&y) {
                            continue;
                        }
                        (x, y)
                    }
                    Topology::Torus => (x.rem_euclid(w), y.rem_euclid(h)),
                };
                let pos = Pos::new(x as usize, y as usize);
                if pos != center && seen.insert(pos) {
                    cells.push(pos);
                }
            }
        }
        cells
    }

    /// Choose home cells for `n` agents, spawning grounds first.
    pub fn choose_homes(&self, n: usize, rng: &mut impl Rng) -> Result<Vec<Pos>> {
        let n_cells = self.cells.len();
        ensure!(
            n <= n_cells,
            "{n} agents need a home, but the map only contains {n_cells} cells"
        );
        let mut positions = self.all_cells();
        positions.shuffle(rng);
        let (good, bad): (Vec<_>, Vec<_>) = positions
            .into_iter()
            .partition(|&pos| self.cell(pos).is_spawning());
        Ok(good.into_iter().chain(bad).take(n).collect())
    }

    /// Build an aquaculture farm for `agent` at `pos`.
    ///
    /// Cells within the blocking radius are blocked and cells within the
    /// damage radius lose fish; the two effects are independent. Returns the
    /// sorted cells whose view differs afterwards, `pos` included.
    pub fn build_aquaculture(&mut self, agent: AgentId, pos: Pos) -> Vec<Pos> {
        let blocking = self.radius(self.blocking_radius, pos);
        let damage = self.aquaculture_damage(pos);

        let mut touched = BTreeSet::from([pos]);
        touched.extend(blocking.iter().copied());
        touched.extend(damage.iter().map(|&(other, _)| other));
        let before: Vec<_> = touched.iter().map(|&other| self.view(other)).collect();

        for &other in &blocking {
            self.cell_mut(other).block();
        }
        for &(other, proportion) in &damage {
            self.cell_mut(other).inflict_damage(proportion);
        }
        self.cell_mut(pos).build_aquaculture(agent);

        touched
            .into_iter()
            .zip(before)
            .filter(|(other, view)| self.view(*other) != *view)
            .map(|(other, _)| other)
            .collect()
    }

    fn aquaculture_damage(&self, pos: Pos) -> Vec<(Pos, f64)> {
        let max = self.damage_radius;
        let prop = self.damage_proportion;
        let mut damage: Vec<_> = self
            .radius(max, pos)
            .into_iter()
            .filter_map(|other| {
                let dist = self.distance(pos, other);
                if dist > max {
                    return None;
                }
                let proportion = match self.damage_decay {
                    DamageDecay::Linear => prop * (max - dist) / max,
                    DamageDecay::Flat => prop,
                };
                Some((other, proportion))
            })
            .collect();
        // The farm cell always takes the full proportion.
        damage.push((pos, prop));
        damage
    }

    pub fn view(&self, pos: Pos) -> CellView {
        let cell = self.cell(pos);
        CellView {
            pos,
            fish_quantity: cell.fish_quantity,
            spawning: cell.spawning,
            blocked: cell.blocked,
            aquaculture: cell.has_aquaculture,
            occupants: cell.occupants().len(),
        }
    }

    pub fn total_fish_quantity(&self) -> f64 {
        self.cells.iter().map(Cell::fish_quantity).sum()
    }

    pub fn n_unblocked(&self) -> usize {
        self.cells.iter().filter(|cell| !cell.is_blocked()).count()
    }

    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::ChaCha12Rng;

    fn world_cfg(width: usize, height: usize, cell_size: f64, topology: Topology) -> WorldConfig {
        WorldConfig {
            width,
            height,
            cell_width: cell_size,
            cell_height: cell_size,
            topology,
            neighbourhood: Neighbourhood::Moore,
            good_spot_frequency: 0.1,
            blocking_radius: 1.0,
            damage_radius: 2.0,
            damage_proportion: 0.5,
            damage_decay: DamageDecay::Linear,
        }
    }

    #[test]
    fn torus_distance_wraps_around_edges() {
        let map = WorldMap::new(&world_cfg(10, 10, 1.0, Topology::Torus));
        assert_eq!(map.distance(Pos::new(0, 0), Pos::new(9, 0)), 1.0);
        assert_eq!(map.distance(Pos::new(0, 0), Pos::new(9, 9)), 2.0_f64.sqrt());
        assert_eq!(map.distance(Pos::new(2, 3), Pos::new(4, 3)), 2.0);

        let grid = WorldMap::new(&world_cfg(10, 10, 1.0, Topology::Grid));
        assert_eq!(grid.distance(Pos::new(0, 0), Pos::new(9, 0)), 9.0);
    }

    #[test]
    fn distance_is_symmetric() {
        for topology in [Topology::Grid, Topology::Torus] {
            let map = WorldMap::new(&world_cfg(7, 5, 3.0, topology));
            for a in map.all_cells() {
                for b in map.all_cells() {
                    assert_eq!(map.distance(a, b), map.distance(b, a));
                }
            }
        }
    }

    #[test]
    fn torus_radius_wraps_and_excludes_center() {
        let map = WorldMap::new(&world_cfg(10, 10, 5.0, Topology::Torus));
        let cells: BTreeSet<_> = map.radius(10.0, Pos::new(0, 0)).into_iter().collect();
        assert_eq!(cells.len(), 24);
        assert!(cells.contains(&Pos::new(9, 9)));
        assert!(cells.contains(&Pos::new(8, 2)));
        assert!(!cells.contains(&Pos::new(0, 0)));

        assert_eq!(map.radius(11.0, Pos::new(0, 0)), map.radius(10.0, Pos::new(0, 0)));
        assert!(map.radius(0.0, Pos::new(0, 0)).is_empty());
    }

    #[test]
    fn grid_radius_is_clipped_at_bounds() {
        let map = WorldMap::new(&world_cfg(5, 5, 1.0, Topology::Grid));
        let corner = map.radius(1.0, Pos::new(0, 0));
        assert_eq!(corner.len(), 3);
        let middle = map.radius(1.0, Pos::new(2, 2));
        assert_eq!(middle.len(), 8);
    }

    #[test]
    fn radius_grows_monotonically() {
        for topology in [Topology::Grid, Topology::Torus] {
            let map = WorldMap::new(&world_cfg(6, 8, 2.0, topology));
            let center = Pos::new(1, 6);
            let radii = [0.0, 1.5, 2.0, 3.9, 4.0, 7.0, 30.0];
            for pair in radii.windows(2) {
                let small: BTreeSet<_> = map.radius(pair[0], center).into_iter().collect();
                let large: BTreeSet<_> = map.radius(pair[1], center).into_iter().collect();
                assert!(small.is_subset(&large), "{topology:?} {pair:?}");
            }
        }
    }

    #[test]
    fn huge_radius_covers_the_map_once() {
        for topology in [Topology::Grid, Topology::Torus] {
            let map = WorldMap::new(&world_cfg(5, 4, 1.0, topology));
            let center = Pos::new(2, 2);
            let cells = map.radius(1e9, center);
            assert_eq!(cells.len(), 19, "{topology:?}");
            let unique: BTreeSet<_> = cells.iter().copied().collect();
            assert_eq!(unique.len(), 19);
            assert!(!unique.contains(&center));
        }
    }

    #[test]
    fn generate_marks_spawning_grounds() {
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        let mut cfg = world_cfg(10, 10, 1.0, Topology::Grid);
        cfg.good_spot_frequency = 0.25;
        let map = WorldMap::generate(&cfg, &mut rng);
        let spawning = map.cells_where(Cell::is_spawning);
        assert_eq!(spawning.len(), 25);
        for pos in spawning {
            assert_eq!(map.cell(pos).fish_quantity(), SPAWNING_FISH_QUANTITY);
        }
    }

    #[test]
    fn build_aquaculture_blocks_and_damages() {
        let mut map = WorldMap::new(&world_cfg(5, 5, 1.0, Topology::Grid));
        let farm = AgentId::new(9);
        let fisher = AgentId::new(3);
        let center = Pos::new(2, 2);
        map.cell_mut(center).populate(fisher);

        let changed = map.build_aquaculture(farm, center);

        let cell = map.cell(center);
        assert!(cell.has_aquaculture() && cell.is_blocked());
        assert_eq!(cell.occupants(), &[farm]);
        assert_eq!(cell.fish_quantity(), BASE_FISH_QUANTITY * 0.5);

        // Blocking radius 1 blocks the 8 neighbours and nothing further out.
        assert!(map.cell(Pos::new(1, 1)).is_blocked());
        assert!(!map.cell(Pos::new(0, 2)).is_blocked());

        // Damage decays linearly: distance 1 loses 0.5 * (2 - 1) / 2.
        let neighbour = map.cell(Pos::new(2, 3)).fish_quantity();
        assert!((neighbour - BASE_FISH_QUANTITY * (1.0 - 0.25)).abs() < 1e-12);
        // Distance 2 is on the damage boundary and loses nothing.
        assert_eq!(map.cell(Pos::new(2, 0)).fish_quantity(), BASE_FISH_QUANTITY);
        // The corner of the damage square lies outside the damage radius.
        assert_eq!(map.cell(Pos::new(0, 0)).fish_quantity(), BASE_FISH_QUANTITY);

        assert!(changed.contains(&center));
        assert!(changed.contains(&Pos::new(1, 1)));
        // Reached by the damage radius but left untouched.
        assert!(!changed.contains(&Pos::new(2, 0)));
        assert!(changed.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn second_farm_reports_only_new_changes() {
        let mut cfg = world_cfg(7, 3, 1.0, Topology::Grid);
        cfg.damage_radius = 1.0;
        cfg.damage_proportion = 0.0;
        let mut map = WorldMap::new(&cfg);

        let first = map.build_aquaculture(AgentId::new(1), Pos::new(2, 1));
        assert_eq!(first.len(), 9);

        // (3, 0..=2) were already blocked by the first farm.
        let second = map.build_aquaculture(AgentId::new(2), Pos::new(4, 1));
        let expected: Vec<_> = [(4, 0), (4, 1), (4, 2), (5, 0), (5, 1), (5, 2)]
            .into_iter()
            .map(|(x, y)| Pos::new(x, y))
            .collect();
        assert_eq!(second, expected);
        for pos in second {
            assert_eq!(map.view(pos).fish_quantity, BASE_FISH_QUANTITY);
        }
    }

    #[test]
    fn fishing_efficiency_is_shared() {
        let mut map = WorldMap::new(&world_cfg(2, 2, 1.0, Topology::Grid));
        let pos = Pos::new(1, 0);
        map.cell_mut(pos).populate(AgentId::new(1));
        map.cell_mut(pos).populate(AgentId::new(2));
        map.cell_mut(pos).populate(AgentId::new(2));
        assert_eq!(map.cell(pos).fishing_efficiency(), BASE_FISH_QUANTITY / 2.0);
        map.cell_mut(pos).remove(AgentId::new(1));
        assert_eq!(map.cell(pos).fishing_efficiency(), BASE_FISH_QUANTITY);
    }

    #[test]
    fn homes_prefer_spawning_grounds() {
        let mut rng = ChaCha12Rng::seed_from_u64(3);
        let mut cfg = world_cfg(4, 4, 1.0, Topology::Grid);
        cfg.good_spot_frequency = 0.25;
        let map = WorldMap::generate(&cfg, &mut rng);
        let homes = map.choose_homes(4, &mut rng).unwrap();
        assert!(homes.iter().all(|&pos| map.cell(pos).is_spawning()));
        assert!(map.choose_homes(17, &mut rng).is_err());
    }
}
