//! Government approval policies and municipality planning policies.

use crate::config::GovernmentConfig;
use crate::plan::{CoastalPlan, Complaint, PlanEntity};
use crate::world::{Cell, Pos, WorldMap};
use anyhow::Result;
use rand::RngCore;
use rand_distr::{Bernoulli, Distribution};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    Probability,
    MoreThanOne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanningKind {
    #[default]
    EverythingAquaculture,
}

/// Policy marking the complaints of a hearing as approved.
pub trait ApprovalMechanism: Debug {
    fn decide(
        &mut self,
        complaints: &mut BTreeMap<Pos, Complaint>,
        rng: &mut dyn RngCore,
    ) -> Result<()>;

    fn round_reset(&mut self) {}
}

/// Policy building the coastal plan.
pub trait PlanningMechanism: Debug {
    /// Create a new plan, or amend `previous` with the `approved` complaint cells.
    fn create_plan(
        &mut self,
        world: &WorldMap,
        previous: Option<&CoastalPlan>,
        approved: &[Pos],
    ) -> CoastalPlan;
}

pub fn approval_mechanism(cfg: &GovernmentConfig) -> Box<dyn ApprovalMechanism> {
    match cfg.approval {
        ApprovalKind::Probability => Box::new(ApproveProbability {
            probability: cfg.approval_probability,
        }),
        ApprovalKind::MoreThanOne => Box::new(ApproveMoreThanOne),
    }
}

pub fn planning_mechanism(
    kind: PlanningKind,
    aquaculture_in_blocked: bool,
) -> Box<dyn PlanningMechanism> {
    match kind {
        PlanningKind::EverythingAquaculture => Box::new(EverythingAquaculture {
            aquaculture_in_blocked,
        }),
    }
}

/// Approves a complaint when any of its votes wins a Bernoulli trial.
#[derive(Debug)]
pub struct ApproveProbability {
    probability: f64,
}

impl ApprovalMechanism for ApproveProbability {
    fn decide(
        &mut self,
        complaints: &mut BTreeMap<Pos, Complaint>,
        rng: &mut dyn RngCore,
    ) -> Result<()> {
        let trial = Bernoulli::new(self.probability)?;
        for complaint in complaints.values_mut() {
            if complaint.votes().iter().any(|_| trial.sample(rng)) {
                complaint.approved = true;
            }
        }
        Ok(())
    }
}

/// Approves every complaint raised by more than one vote.
#[derive(Debug)]
pub struct ApproveMoreThanOne;

impl ApprovalMechanism for ApproveMoreThanOne {
    fn decide(
        &mut self,
        complaints: &mut BTreeMap<Pos, Complaint>,
        _rng: &mut dyn RngCore,
    ) -> Result<()> {
        for complaint in complaints.values_mut() {
            if complaint.n_votes() > 1 {
                complaint.approved = true;
            }
        }
        Ok(())
    }
}

/// Offers every eligible cell for aquaculture, then reserves the cells of
/// approved complaints.
#[derive(Debug)]
pub struct EverythingAquaculture {
    aquaculture_in_blocked: bool,
}

impl EverythingAquaculture {
    fn eligible(&self, cell: &Cell) -> bool {
        if self.aquaculture_in_blocked {
            !cell.has_aquaculture()
        } else {
            !cell.is_blocked()
        }
    }
}

impl PlanningMechanism for EverythingAquaculture {
    fn create_plan(
        &mut self,
        world: &WorldMap,
        previous: Option<&CoastalPlan>,
        approved: &[Pos],
    ) -> CoastalPlan {
        let mut plan = match previous {
            Some(plan) => plan.clone(),
            None => {
                let mut plan = CoastalPlan::new();
                for pos in world.cells_where(|cell| self.eligible(cell)) {
                    plan.set(pos, PlanEntity::AquacultureSite);
                }
                plan
            }
        };
        for &pos in approved {
            plan.set(pos, PlanEntity::ReservedZone);
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentId;
    use crate::config::test_config;
    use crate::plan::Vote;
    use rand::SeedableRng;
    use rand_chacha::ChaCha12Rng;

    fn complaints(counts: &[(Pos, usize)]) -> BTreeMap<Pos, Complaint> {
        let mut complaints = BTreeMap::new();
        for &(pos, n) in counts {
            let mut complaint = Complaint::new(Vote::complaint(pos));
            for _ in 1..n {
                complaint.add(Vote::complaint(pos)).unwrap();
            }
            complaints.insert(pos, complaint);
        }
        complaints
    }

    #[test]
    fn more_than_one_needs_two_votes() {
        let mut rng = ChaCha12Rng::seed_from_u64(0);
        let mut complaints = complaints(&[(Pos::new(0, 0), 1), (Pos::new(1, 0), 2)]);
        ApproveMoreThanOne.decide(&mut complaints, &mut rng).unwrap();
        assert!(!complaints[&Pos::new(0, 0)].approved);
        assert!(complaints[&Pos::new(1, 0)].approved);
    }

    #[test]
    fn probability_extremes() {
        let mut rng = ChaCha12Rng::seed_from_u64(0);
        let counts = [(Pos::new(0, 0), 1), (Pos::new(1, 0), 3)];

        let mut all = complaints(&counts);
        let mut mech = ApproveProbability { probability: 1.0 };
        mech.decide(&mut all, &mut rng).unwrap();
        assert!(all.values().all(|c| c.approved));

        let mut none = complaints(&counts);
        let mut mech = ApproveProbability { probability: 0.0 };
        mech.decide(&mut none, &mut rng).unwrap();
        assert!(none.values().all(|c| !c.approved));
    }

    #[test]
    fn reserved_zones_are_never_reopened() {
        let cfg = test_config();
        let mut world = WorldMap::new(&cfg.world);
        world.build_aquaculture(AgentId::new(9), Pos::new(0, 0));

        let mut mech = EverythingAquaculture {
            aquaculture_in_blocked: false,
        };
        let first = mech.create_plan(&world, None, &[]);
        assert_eq!(first.len(), 25 - 4);
        assert_eq!(first.get(Pos::new(1, 1)), None);
        assert!(first.reserved_zones().is_empty());

        let reserved = Pos::new(3, 3);
        let second = mech.create_plan(&world, Some(&first), &[reserved]);
        assert_eq!(second.get(reserved), Some(PlanEntity::ReservedZone));
        let third = mech.create_plan(&world, Some(&second), &[Pos::new(4, 4)]);
        assert_eq!(third.get(reserved), Some(PlanEntity::ReservedZone));
        assert_eq!(third.reserved_zones().len(), 2);
        assert_eq!(third.len(), first.len());
    }

    #[test]
    fn blocked_cells_are_eligible_when_allowed() {
        let cfg = test_config();
        let mut world = WorldMap::new(&cfg.world);
        world.build_aquaculture(AgentId::new(9), Pos::new(0, 0));
        let mut mech = EverythingAquaculture {
            aquaculture_in_blocked: true,
        };
        let plan = mech.create_plan(&world, None, &[]);
        assert_eq!(plan.len(), 24);
        assert_eq!(plan.get(Pos::new(1, 1)), Some(PlanEntity::AquacultureSite));
    }
}
