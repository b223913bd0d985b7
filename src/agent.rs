//! Agents of the simulation.
//!
//! Every agent shares an identity, a capital and a set of weighted priorities.
//! What it can do depends on its [`Role`]: voters take part in hearings,
//! the government judges complaints and the municipality plans the coast.

use crate::config::{AgentConfig, Config};
use crate::decision::{
    ApprovalMechanism, PlanningMechanism, approval_mechanism, planning_mechanism,
};
use crate::message::{Message, Payload};
use crate::plan::{CoastalPlan, Complaint, Decision, Vote};
use crate::priority::{Priority, parse_weights};
use crate::voting::{VoteContext, VotingMechanism};
use crate::world::{Pos, WorldMap};
use anyhow::{Context, Result, bail};
use rand::prelude::*;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Known yield below which a fisherman gives up on its knowledge and explores.
const RELOCATION_THRESHOLD: f64 = 0.5;

/// Mean of the quality guessed for a complained-about cell.
const GUESS_MEAN: f64 = 0.6;

/// Standard deviation of the quality guessed for a complained-about cell.
const GUESS_STD_DEV: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId(u32);

impl AgentId {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a{:02}", self.0)
    }
}

/// Hands out agent identifiers in increasing order.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: u32,
}

impl IdAllocator {
    pub fn allocate(&mut self) -> AgentId {
        let id = AgentId::new(self.next);
        self.next += 1;
        id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AgentKind {
    Fisherman,
    Aquaculture,
    Civilian,
    Tourist,
    Government,
    Municipality,
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug)]
pub struct Agent {
    id: AgentId,
    kind: AgentKind,
    capital: f64,
    priorities: Vec<(Priority, f64)>,
    role: Role,
}

#[derive(Debug)]
pub enum Role {
    Voter(Voter),
    Government(Government),
    Municipality(Municipality),
}

impl Agent {
    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn kind(&self) -> AgentKind {
        self.kind
    }

    /// Identifier and kind, as shown in reports.
    pub fn label(&self) -> String {
        format!("{}:{}", self.id, self.kind)
    }

    pub fn capital(&self) -> f64 {
        self.capital
    }

    pub fn priorities(&self) -> &[(Priority, f64)] {
        &self.priorities
    }

    pub fn is_voter(&self) -> bool {
        matches!(self.role, Role::Voter(_))
    }

    pub fn voter(&self) -> Option<&Voter> {
        match &self.role {
            Role::Voter(voter) => Some(voter),
            _ => None,
        }
    }

    pub fn voter_mut(&mut self) -> Option<&mut Voter> {
        match &mut self.role {
            Role::Voter(voter) => Some(voter),
            _ => None,
        }
    }

    pub fn government(&self) -> Option<&Government> {
        match &self.role {
            Role::Government(gov) => Some(gov),
            _ => None,
        }
    }

    pub fn government_mut(&mut self) -> Option<&mut Government> {
        match &mut self.role {
            Role::Government(gov) => Some(gov),
            _ => None,
        }
    }

    pub fn municipality(&self) -> Option<&Municipality> {
        match &self.role {
            Role::Municipality(mun) => Some(mun),
            _ => None,
        }
    }

    pub fn municipality_mut(&mut self) -> Option<&mut Municipality> {
        match &mut self.role {
            Role::Municipality(mun) => Some(mun),
            _ => None,
        }
    }

    /// Handle a delivered message and return the messages sent in reply.
    ///
    /// `voters` are the voting agents currently in the directory.
    ///
    /// # Errors
    /// Returns an error if the message is not meant for an agent of this role.
    pub fn react(
        &mut self,
        msg: &Rc<Message>,
        voters: &[AgentId],
        rng: &mut impl Rng,
    ) -> Result<Vec<Message>> {
        match (msg.payload(), &mut self.role) {
            (Payload::Inform(_) | Payload::AquacultureSpawned { .. }, _) => Ok(Vec::new()),
            (Payload::PlanHearing { .. }, Role::Voter(voter)) => {
                voter.plan_hearing = Some(Rc::clone(msg));
                Ok(Vec::new())
            }
            (Payload::VoteResponseInform { reply_to }, Role::Voter(voter)) => {
                voter.learn_from_votes(reply_to, rng)?;
                Ok(Vec::new())
            }
            (Payload::VoteResponse { votes, .. }, Role::Government(gov)) => {
                gov.fold_votes(votes)?;
                let inform =
                    Message::vote_response_inform(self.id, voters.to_vec(), Rc::clone(msg))?;
                Ok(vec![inform])
            }
            (Payload::TaxPayment { amount }, Role::Municipality(mun)) => {
                self.capital += amount;
                mun.taxes.entry(msg.source()).or_default().push(*amount);
                let receipt = Message::inform(
                    self.id,
                    msg.source(),
                    format!("tax received {amount:.2} from {}", msg.source()),
                );
                Ok(vec![receipt])
            }
            _ => bail!("{}:{} cannot handle {} message", self.id, self.kind, msg.kind()),
        }
    }

    /// Produce this phase's output.
    pub fn work(&mut self, world: &WorldMap) {
        let Role::Voter(voter) = &mut self.role else {
            return;
        };
        match self.kind {
            AgentKind::Fisherman => {
                let Some(home) = voter.home else {
                    return;
                };
                let yield_ = world.cell(home).fishing_efficiency();
                voter.knowledge.insert(home, yield_);
                self.capital += yield_ * voter.efficiency;
            }
            AgentKind::Aquaculture => self.capital += voter.efficiency,
            _ => {}
        }
    }

    /// Deduct the tax due on the current capital.
    ///
    /// Returns the payment to send to `municipality`, if this agent pays taxes.
    pub fn pay_taxes(&mut self, municipality: AgentId) -> Option<Message> {
        let Role::Voter(voter) = &self.role else {
            return None;
        };
        if self.kind != AgentKind::Aquaculture {
            return None;
        }
        let amount = self.capital * voter.taxation;
        self.capital -= amount;
        Some(Message::tax_payment(self.id, municipality, amount))
    }

    /// Clear the state that only lives for one round.
    pub fn round_reset(&mut self) {
        self.capital = 0.0;
        match &mut self.role {
            Role::Voter(voter) => voter.plan_hearing = None,
            Role::Government(gov) => gov.round_reset(),
            Role::Municipality(mun) => mun.round_reset(),
        }
    }
}

/// Capabilities of the agents that vote in hearings.
#[derive(Debug)]
pub struct Voter {
    home: Option<Pos>,
    knowledge: BTreeMap<Pos, f64>,
    mechanism: VotingMechanism,
    plan_hearing: Option<Rc<Message>>,
    care_cells: Vec<Pos>,
    efficiency: f64,
    taxation: f64,
}

impl Voter {
    fn new(home: Option<Pos>, cfg: &AgentConfig, efficiency: f64) -> Self {
        Self {
            home,
            knowledge: BTreeMap::new(),
            mechanism: VotingMechanism::AlwaysApprove,
            plan_hearing: None,
            care_cells: Vec::new(),
            efficiency,
            taxation: cfg.taxation,
        }
    }

    pub fn home(&self) -> Option<Pos> {
        self.home
    }

    /// Believed quality of every cell the agent knows about.
    pub fn knowledge(&self) -> &BTreeMap<Pos, f64> {
        &self.knowledge
    }

    pub fn care_cells(&self) -> &[Pos] {
        &self.care_cells
    }

    pub fn mechanism(&self) -> &VotingMechanism {
        &self.mechanism
    }

    /// Replace the voting mechanism outright.
    pub fn set_mechanism(&mut self, mechanism: VotingMechanism) {
        self.mechanism = mechanism;
    }

    /// Decide the votes on the last plan received.
    ///
    /// Returns the plan hearing being answered together with the votes.
    ///
    /// # Errors
    /// Returns an error if no plan hearing has been received this round.
    pub fn hearing(
        &self,
        world: &WorldMap,
        max_complaints: usize,
        rng: &mut impl Rng,
    ) -> Result<(Rc<Message>, Vec<Vote>)> {
        let hearing = self
            .plan_hearing
            .clone()
            .context("no plan hearing received")?;
        let Payload::PlanHearing { plan } = hearing.payload() else {
            bail!("stored message is a {}, not a plan hearing", hearing.kind());
        };
        let ctx = VoteContext {
            home: self.home,
            knowledge: &self.knowledge,
            plan,
            world,
            max_complaints,
        };
        let votes = self.mechanism.decide_votes(&ctx, rng);
        Ok((hearing, votes))
    }

    /// Guess the quality of complained-about cells this voter knows nothing about.
    fn learn_from_votes(&mut self, response: &Message, rng: &mut impl Rng) -> Result<()> {
        let Some(votes) = response.votes() else {
            bail!("vote response inform forwards a {}", response.kind());
        };
        let guess = Normal::new(GUESS_MEAN, GUESS_STD_DEV)?;
        for vote in votes.iter().filter(|v| v.is_complaint()) {
            if !self.knowledge.contains_key(&vote.cell) {
                self.knowledge.insert(vote.cell, guess.sample(rng));
            }
        }
        Ok(())
    }

    /// Move to the best known unblocked cell, or explore the map when
    /// nothing good enough is known.
    ///
    /// Returns the new home, which may equal the old one.
    pub fn find_fishing_spot(
        &mut self,
        id: AgentId,
        world: &mut WorldMap,
        rng: &mut impl Rng,
    ) -> Option<Pos> {
        let mut known: Vec<_> = self.knowledge.iter().map(|(&pos, &q)| (pos, q)).collect();
        known.sort_by(|a, b| b.1.total_cmp(&a.1));
        let best = known
            .into_iter()
            .find(|&(pos, _)| !world.cell(pos).is_blocked());

        let target = match best {
            Some((pos, quality)) if quality >= RELOCATION_THRESHOLD => Some(pos),
            _ => {
                let mut cells = world.all_cells();
                cells.shuffle(rng);
                cells.into_iter().find(|&pos| !world.cell(pos).is_blocked())
            }
        }?;

        if let Some(home) = self.home {
            world.cell_mut(home).remove(id);
        }
        world.cell_mut(target).populate(id);
        self.home = Some(target);
        Some(target)
    }
}

/// Judges the complaints raised in hearings and hands out licenses.
#[derive(Debug)]
pub struct Government {
    complaints: BTreeMap<Pos, Complaint>,
    approval: Box<dyn ApprovalMechanism>,
    licenses: usize,
    hearing_count: usize,
    max_hearing_rounds: usize,
}

impl Government {
    /// Discard the complaints of the previous hearing.
    pub fn new_vote_round(&mut self) {
        self.complaints.clear();
    }

    /// Add the disapprove votes of one voter to the per-cell complaints.
    pub fn fold_votes(&mut self, votes: &[Vote]) -> Result<()> {
        for &vote in votes.iter().filter(|v| v.is_complaint()) {
            match self.complaints.get_mut(&vote.cell) {
                Some(complaint) => complaint.add(vote)?,
                None => {
                    self.complaints.insert(vote.cell, Complaint::new(vote));
                }
            }
        }
        Ok(())
    }

    /// Run the approval mechanism over the complaints of this hearing.
    ///
    /// Once `max_hearing_rounds` hearings have been judged this round, the
    /// plan is approved without looking at the complaints.
    pub fn voting_decision(&mut self, rng: &mut dyn RngCore) -> Result<Decision> {
        if self.hearing_count >= self.max_hearing_rounds {
            return Ok(Decision::Approve);
        }
        self.hearing_count += 1;
        self.approval
            .decide(&mut self.complaints, rng)
            .context("failed to judge complaints")?;
        if self.complaints.values().any(|c| c.approved) {
            Ok(Decision::Review)
        } else {
            Ok(Decision::Approve)
        }
    }

    pub fn complaints(&self) -> impl Iterator<Item = &Complaint> {
        self.complaints.values()
    }

    pub fn approved_complaints(&self) -> Vec<Pos> {
        self.complaints
            .values()
            .filter(|c| c.approved)
            .map(Complaint::cell)
            .collect()
    }

    pub fn distribute_licenses(&self) -> usize {
        self.licenses
    }

    pub fn hearing_count(&self) -> usize {
        self.hearing_count
    }

    fn round_reset(&mut self) {
        self.new_vote_round();
        self.hearing_count = 0;
        self.approval.round_reset();
    }
}

/// Owns the coastal plan and collects taxes.
#[derive(Debug)]
pub struct Municipality {
    plan: Option<Rc<CoastalPlan>>,
    planning: Box<dyn PlanningMechanism>,
    taxes: BTreeMap<AgentId, Vec<f64>>,
}

impl Municipality {
    /// Create a fresh plan or amend the current one with the approved complaints.
    pub fn coastal_planning(&mut self, world: &WorldMap, approved: &[Pos]) -> Rc<CoastalPlan> {
        let plan = self
            .planning
            .create_plan(world, self.plan.as_deref(), approved);
        let plan = Rc::new(plan);
        self.plan = Some(Rc::clone(&plan));
        plan
    }

    pub fn plan(&self) -> Option<&Rc<CoastalPlan>> {
        self.plan.as_ref()
    }

    /// Tax payments received this round, per payer.
    pub fn taxes(&self) -> &BTreeMap<AgentId, Vec<f64>> {
        &self.taxes
    }

    fn round_reset(&mut self) {
        self.plan = None;
        self.taxes.clear();
    }
}

/// Builds agents with fresh identifiers from the configuration.
#[derive(Debug)]
pub struct AgentFactory {
    ids: IdAllocator,
    cfg: Config,
}

impl AgentFactory {
    pub fn new(cfg: &Config) -> Self {
        Self {
            ids: IdAllocator::default(),
            cfg: cfg.clone(),
        }
    }

    fn agent(
        &mut self,
        kind: AgentKind,
        priorities: &BTreeMap<String, f64>,
        role: Role,
    ) -> Result<Agent> {
        Ok(Agent {
            id: self.ids.allocate(),
            kind,
            capital: 0.0,
            priorities: parse_weights(priorities)?,
            role,
        })
    }

    pub fn government(&mut self) -> Result<Agent> {
        let gov = &self.cfg.government;
        let role = Role::Government(Government {
            complaints: BTreeMap::new(),
            approval: approval_mechanism(gov),
            licenses: self.cfg.global.licenses,
            hearing_count: 0,
            max_hearing_rounds: self.cfg.global.max_hearing_rounds,
        });
        let priorities = gov.priorities.clone();
        self.agent(AgentKind::Government, &priorities, role)
    }

    pub fn municipality(&mut self) -> Result<Agent> {
        let mun = &self.cfg.municipality;
        let role = Role::Municipality(Municipality {
            plan: None,
            planning: planning_mechanism(mun.planning, self.cfg.global.aquaculture_in_blocked),
            taxes: BTreeMap::new(),
        });
        let priorities = mun.priorities.clone();
        self.agent(AgentKind::Municipality, &priorities, role)
    }

    /// Create a fisherman living and fishing at `home`.
    pub fn fisherman(
        &mut self,
        home: Pos,
        world: &mut WorldMap,
        rng: &mut impl Rng,
    ) -> Result<Agent> {
        let cfg = self.cfg.fisherman.clone();
        let mut voter = Voter::new(Some(home), &cfg, cfg.fishing_efficiency);
        voter.mechanism = VotingMechanism::random(cfg.voting, &cfg.encoding, rng)?;
        let mut agent = self.agent(AgentKind::Fisherman, &cfg.priorities, Role::Voter(voter))?;
        let cell = world.cell_mut(home);
        cell.populate(agent.id);
        let yield_ = cell.fishing_efficiency();
        if let Role::Voter(voter) = &mut agent.role {
            voter.knowledge.insert(home, yield_);
        }
        Ok(agent)
    }

    /// Create an aquaculture agent located at `home`.
    ///
    /// It votes with [`VotingMechanism::AlwaysApprove`] until a mechanism is attached.
    pub fn aquaculture(&mut self, home: Pos, world: &WorldMap) -> Result<Agent> {
        let cfg = self.cfg.aquaculture.clone();
        let mut voter = Voter::new(Some(home), &cfg, cfg.work_efficiency);
        voter.knowledge.insert(home, world.cell(home).fish_quantity());
        self.agent(AgentKind::Aquaculture, &cfg.priorities, Role::Voter(voter))
    }

    pub fn civilian(&mut self, rng: &mut impl Rng) -> Result<Agent> {
        let cfg = self.cfg.civilian.clone();
        let mut voter = Voter::new(None, &cfg, 0.0);
        voter.mechanism = VotingMechanism::random(cfg.voting, &cfg.encoding, rng)?;
        self.agent(AgentKind::Civilian, &cfg.priorities, Role::Voter(voter))
    }

    /// Create a tourist at `home` caring about the cells within its care radius.
    pub fn tourist(&mut self, home: Pos, world: &WorldMap, rng: &mut impl Rng) -> Result<Agent> {
        let cfg = self.cfg.tourist.clone();
        let mut voter = Voter::new(Some(home), &cfg, 0.0);
        voter.care_cells = world.radius(cfg.care_radius, home);
        voter.mechanism = VotingMechanism::random(cfg.voting, &cfg.encoding, rng)?;
        self.agent(AgentKind::Tourist, &cfg.priorities, Role::Voter(voter))
    }
}
