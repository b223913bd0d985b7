use crate::world::Pos;
use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Designation of a cell in a coastal plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanEntity {
    AquacultureSite,
    ReservedZone,
}

/// Municipality plan assigning a designation to every eligible cell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoastalPlan {
    cells: BTreeMap<Pos, PlanEntity>,
}

impl CoastalPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, pos: Pos, entity: PlanEntity) {
        self.cells.insert(pos, entity);
    }

    pub fn get(&self, pos: Pos) -> Option<PlanEntity> {
        self.cells.get(&pos).copied()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// All planned cells in ascending position order.
    pub fn cells(&self) -> impl Iterator<Item = Pos> + '_ {
        self.cells.keys().copied()
    }

    pub fn aquaculture_sites(&self) -> Vec<Pos> {
        self.with_entity(PlanEntity::AquacultureSite)
    }

    pub fn reserved_zones(&self) -> Vec<Pos> {
        self.with_entity(PlanEntity::ReservedZone)
    }

    fn with_entity(&self, entity: PlanEntity) -> Vec<Pos> {
        self.cells()
            .filter(|&pos| self.get(pos) == Some(entity))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteValue {
    Approve,
    Disapprove,
}

/// A single opinion of an agent on one planned cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub cell: Pos,
    pub value: VoteValue,
}

impl Vote {
    pub fn complaint(cell: Pos) -> Self {
        Self {
            cell,
            value: VoteValue::Disapprove,
        }
    }

    pub fn is_complaint(&self) -> bool {
        self.value == VoteValue::Disapprove
    }
}

/// Disapprove votes gathered for one cell during a hearing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Complaint {
    cell: Pos,
    votes: Vec<Vote>,
    pub approved: bool,
}

impl Complaint {
    pub fn new(vote: Vote) -> Self {
        Self {
            cell: vote.cell,
            votes: vec![vote],
            approved: false,
        }
    }

    /// Add another vote on the same cell.
    pub fn add(&mut self, vote: Vote) -> Result<()> {
        ensure!(
            vote.cell == self.cell,
            "vote on {} added to complaint on {}",
            vote.cell,
            self.cell
        );
        self.votes.push(vote);
        Ok(())
    }

    pub fn cell(&self) -> Pos {
        self.cell
    }

    pub fn votes(&self) -> &[Vote] {
        &self.votes
    }

    pub fn n_votes(&self) -> usize {
        self.votes.len()
    }
}

/// Outcome of the government decision on a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Approve,
    Review,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_queries_split_by_entity() {
        let mut plan = CoastalPlan::new();
        plan.set(Pos::new(0, 0), PlanEntity::AquacultureSite);
        plan.set(Pos::new(1, 0), PlanEntity::ReservedZone);
        plan.set(Pos::new(0, 1), PlanEntity::AquacultureSite);
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.aquaculture_sites(), vec![Pos::new(0, 0), Pos::new(0, 1)]);
        assert_eq!(plan.reserved_zones(), vec![Pos::new(1, 0)]);
        assert_eq!(plan.get(Pos::new(5, 5)), None);
    }

    #[test]
    fn complaint_counts_votes_on_its_cell() {
        let cell = Pos::new(2, 3);
        let mut complaint = Complaint::new(Vote::complaint(cell));
        complaint.add(Vote::complaint(cell)).unwrap();
        complaint.add(Vote::complaint(cell)).unwrap();
        assert_eq!(complaint.n_votes(), 3);
        assert!(complaint.votes().iter().all(Vote::is_complaint));
        assert!(complaint.add(Vote::complaint(Pos::new(0, 0))).is_err());
        assert_eq!(complaint.n_votes(), 3);
        assert!(!complaint.approved);
    }
}
