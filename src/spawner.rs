use crate::agent::{AgentFactory, AgentId};
use crate::config::Config;
use crate::directory::{AgentFilter, Directory};
use crate::evolution::Encoding;
use crate::message::Message;
use crate::plan::CoastalPlan;
use crate::voting::{VotingKind, VotingMechanism};
use crate::world::{Pos, WorldMap};
use anyhow::{Context, Result};
use rand::prelude::*;

/// Places new aquaculture agents on planned sites.
#[derive(Debug, Clone)]
pub struct AquacultureSpawner {
    voting: VotingKind,
    encoding: Encoding,
    aquaculture_in_blocked: bool,
}

impl AquacultureSpawner {
    pub fn new(cfg: &Config) -> Self {
        Self {
            voting: cfg.aquaculture.voting,
            encoding: cfg.aquaculture.encoding.clone(),
            aquaculture_in_blocked: cfg.global.aquaculture_in_blocked,
        }
    }

    /// Pick a random planned aquaculture site that can still be built on.
    pub fn choose_cell(
        &self,
        plan: &CoastalPlan,
        world: &WorldMap,
        rng: &mut impl Rng,
    ) -> Option<Pos> {
        let sites: Vec<_> = plan
            .aquaculture_sites()
            .into_iter()
            .filter(|&pos| {
                let cell = world.cell(pos);
                !cell.has_aquaculture() && (self.aquaculture_in_blocked || !cell.is_blocked())
            })
            .collect();
        sites.choose(rng).copied()
    }

    /// Create an aquaculture agent at `cell`, build its farm and announce it.
    ///
    /// Returns the new agent and the cells changed by the farm.
    pub fn create(
        &self,
        factory: &mut AgentFactory,
        directory: &mut Directory,
        world: &mut WorldMap,
        cell: Pos,
        rng: &mut impl Rng,
    ) -> Result<(AgentId, Vec<Pos>)> {
        let mut agent = factory.aquaculture(cell, world)?;
        let mechanism = VotingMechanism::random(self.voting, &self.encoding, rng)
            .context("failed to create aquaculture voting mechanism")?;
        if let Some(voter) = agent.voter_mut() {
            voter.set_mechanism(mechanism);
        }
        let id = directory.register(agent)?;
        let changed = world.build_aquaculture(id, cell);

        let others = directory.ids(&AgentFilter {
            exclude: Some(id),
            ..AgentFilter::default()
        });
        directory
            .broadcast_message(Message::aquaculture_spawned(id, others, cell), rng)
            .context("failed to announce aquaculture")?;

        Ok((id, changed))
    }
}
