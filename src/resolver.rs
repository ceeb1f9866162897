//! Moving agents onto a shared grid where each cell holds at most one agent.
//!
//! A move happens in three phases:
//!
//! 1. **Propose** – every agent works out which cell one step along its
//!    heading would put it in. Independent per agent, so it runs in parallel.
//! 2. **Arbitrate** – agents are visited in a freshly shuffled order and the
//!    first one to ask for a cell gets it. Everyone else (and everyone whose
//!    proposal left the grid) stays put and gets a new random heading. This
//!    is the only sequential part of a step, and it's the same code for every
//!    backend.
//! 3. **Commit** – accepted agents move and deposit trail; rejected agents
//!    adopt the heading they were given during arbitration.
//!
//! Because the order is redrawn every step, no agent index is favoured when
//! cells are contested.

use crate::{agent::Agent, random::RandomService, rect::Rect, trail::TrailField};
use log::trace;
use rayon::prelude::*;

/// Marks an agent that won't move this step.
pub const NO_DESTINATION: i32 = -1;

/// Which cells have already been claimed by an accepted move this step.
pub struct OccupancyMap {
    taken: Vec<bool>,
}

impl OccupancyMap {
    pub fn new(num_cells: usize) -> Self {
        Self {
            taken: vec![false; num_cells],
        }
    }

    pub fn reset(&mut self) {
        self.taken.iter_mut().for_each(|taken| *taken = false);
    }

    /// Claims `cell`, returning false if someone got there first.
    pub fn claim(&mut self, cell: usize) -> bool {
        match self.taken.get_mut(cell) {
            Some(taken) if !*taken => {
                *taken = true;
                true
            }
            _ => false,
        }
    }

    pub fn is_taken(&self, cell: usize) -> bool {
        self.taken.get(cell).copied().unwrap_or(false)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ArbitrationOutcome {
    pub accepted: usize,
    /// Proposals that lost their cell to an earlier agent
    pub blocked: usize,
    /// Proposals that would have left the grid
    pub out_of_bounds: usize,
}

/// The cell one step along `agent`'s heading, or [`NO_DESTINATION`] if that
/// step leaves the grid.
pub fn propose_move(agent: &Agent, bounds: &Rect, step_size: f32) -> i32 {
    bounds
        .cell_index(&agent.desired_location(step_size))
        .map_or(NO_DESTINATION, |cell| cell as i32)
}

pub fn propose_moves(agents: &[Agent], desired: &mut [i32], bounds: &Rect, step_size: f32) {
    desired
        .par_iter_mut()
        .zip_eq(agents.par_iter())
        .for_each(|(destination, agent)| *destination = propose_move(agent, bounds, step_size));
}

/// Decides which proposals in `desired` go ahead.
///
/// On return every rejected entry of `desired` is [`NO_DESTINATION`] and the
/// matching entry of `new_directions` holds a fresh random heading. Accepted
/// entries are left alone and are pairwise distinct. `move_order` is scratch
/// space for the permutation and must be as long as `desired`.
pub fn resolve_conflicts(
    desired: &mut [i32],
    new_directions: &mut [f32],
    occupancy: &mut OccupancyMap,
    move_order: &mut [u32],
    random: &mut RandomService,
) -> ArbitrationOutcome {
    assert_eq!(desired.len(), new_directions.len());
    assert_eq!(desired.len(), move_order.len());

    random.fill_move_order(move_order);
    occupancy.reset();

    let mut outcome = ArbitrationOutcome::default();

    for &agent_index in move_order.iter() {
        let agent_index = agent_index as usize;
        let destination = desired[agent_index];

        if destination == NO_DESTINATION {
            outcome.out_of_bounds += 1;
            new_directions[agent_index] = random.random_direction();
        } else if occupancy.claim(destination as usize) {
            outcome.accepted += 1;
        } else {
            outcome.blocked += 1;
            desired[agent_index] = NO_DESTINATION;
            new_directions[agent_index] = random.random_direction();
        }
    }

    trace!("arbitration finished: {:?}", outcome);

    outcome
}

/// Applies an arbitrated set of moves. Accepted agents step forward and
/// deposit; the rest turn to their new heading.
pub fn commit_moves(
    agents: &mut [Agent],
    desired: &[i32],
    new_directions: &[f32],
    trail: &mut TrailField,
    step_size: f32,
    deposition: f32,
) {
    agents
        .par_iter_mut()
        .zip_eq(desired.par_iter().zip_eq(new_directions.par_iter()))
        .for_each(|(agent, (destination, new_direction))| {
            if *destination == NO_DESTINATION {
                agent.direction = *new_direction;
            } else {
                let location = agent.desired_location(step_size);
                agent.move_to(location);
            }
        });

    // accepted cells are unique, so order doesn't matter here
    desired
        .iter()
        .filter(|destination| **destination != NO_DESTINATION)
        .for_each(|destination| trail.deposit(*destination as usize, deposition));
}

/// Owns the per-step scratch the three phases share. Everything here is
/// reset or overwritten every step; nothing carries over.
pub struct MoveResolver {
    occupancy: OccupancyMap,
    desired: Vec<i32>,
    new_directions: Vec<f32>,
    move_order: Vec<u32>,
}

impl MoveResolver {
    pub fn new(num_cells: usize, population: usize) -> Self {
        Self {
            occupancy: OccupancyMap::new(num_cells),
            desired: vec![NO_DESTINATION; population],
            new_directions: vec![0.0; population],
            move_order: vec![0; population],
        }
    }

    pub fn propose(&mut self, agents: &[Agent], bounds: &Rect, step_size: f32) {
        propose_moves(agents, &mut self.desired, bounds, step_size);
    }

    pub fn arbitrate(&mut self, random: &mut RandomService) -> ArbitrationOutcome {
        resolve_conflicts(
            &mut self.desired,
            &mut self.new_directions,
            &mut self.occupancy,
            &mut self.move_order,
            random,
        )
    }

    pub fn commit(
        &self,
        agents: &mut [Agent],
        trail: &mut TrailField,
        step_size: f32,
        deposition: f32,
    ) {
        commit_moves(
            agents,
            &self.desired,
            &self.new_directions,
            trail,
            step_size,
            deposition,
        );
    }

    pub fn desired(&self) -> &[i32] {
        &self.desired
    }

    pub fn desired_mut(&mut self) -> &mut [i32] {
        &mut self.desired
    }

    pub fn new_directions(&self) -> &[f32] {
        &self.new_directions
    }

    pub fn occupancy(&self) -> &OccupancyMap {
        &self.occupancy
    }
}
