//! Phase graph of a simulation round.
//!
//! ```text
//! COASTPLAN -> HEARING -> GOVDECISION -(approve)-> FISHING1 -> BUILDING -> FISHING2 -> LEARNING
//!                              \-(review)-> COASTPLAN
//! ```
//!
//! Only the wrap-around from LEARNING to COASTPLAN completes a round.

use crate::agent::{AgentId, AgentKind};
use crate::directory::AgentFilter;
use crate::engine::State;
use crate::message::{Message, MessageSummary};
use crate::plan::{Complaint, Decision};
use crate::priority::Influences;
use crate::world::{CellView, Pos};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

pub const PLANNED_SITES: &str = "planned aquaculture sites";
pub const RESERVED_ZONES: &str = "reserved zones";
pub const AVG_COMPLAINTS: &str = "average number of complaints";
pub const COMPLAINED_CELLS: &str = "complained cells";
pub const HEARINGS: &str = "hearings";
pub const AVG_FISHERMAN_CAPITAL: &str = "average fisherman capital";
pub const TAXES_COLLECTED: &str = "taxes collected";
pub const TOTAL_FISH_QUANTITY: &str = "total fish quantity";
pub const N_AQUACULTURE: &str = "number of aquacultures";
pub const UNBLOCKED_CELLS: &str = "unblocked cells";
pub const AVG_FISHERMAN_FITNESS: &str = "average fisherman fitness";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    CoastPlan,
    Hearing,
    GovDecision,
    Fishing1,
    Building,
    Fishing2,
    Learning,
}

impl Phase {
    pub const START: Phase = Phase::CoastPlan;

    pub fn name(self) -> &'static str {
        match self {
            Phase::CoastPlan => "COASTPLAN",
            Phase::Hearing => "HEARING",
            Phase::GovDecision => "GOVDECISION",
            Phase::Fishing1 => "FISHING1",
            Phase::Building => "BUILDING",
            Phase::Fishing2 => "FISHING2",
            Phase::Learning => "LEARNING",
        }
    }

    /// Phase following this one. Only GOVDECISION looks at the decision.
    pub fn next(self, decision: Option<Decision>) -> Phase {
        match self {
            Phase::CoastPlan => Phase::Hearing,
            Phase::Hearing => Phase::GovDecision,
            Phase::GovDecision => match decision {
                Some(Decision::Review) => Phase::CoastPlan,
                _ => Phase::Fishing1,
            },
            Phase::Fishing1 => Phase::Building,
            Phase::Building => Phase::Fishing2,
            Phase::Fishing2 => Phase::Learning,
            Phase::Learning => Phase::START,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a phase statistic combines with earlier values of the same round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatMode {
    Accumulate,
    Set,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Statistic {
    pub mode: StatMode,
    pub value: f64,
}

pub type Statistics = BTreeMap<String, Statistic>;

fn set(stats: &mut Statistics, name: &str, value: f64) {
    let stat = Statistic {
        mode: StatMode::Set,
        value,
    };
    stats.insert(name.to_string(), stat);
}

fn accumulate(stats: &mut Statistics, name: &str, value: f64) {
    let stat = Statistic {
        mode: StatMode::Accumulate,
        value,
    };
    stats.insert(name.to_string(), stat);
}

/// Everything a front end needs to show one phase step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseReport {
    pub phase: Phase,
    pub round: usize,
    pub step: usize,
    /// System time once the phase completed.
    pub time: u64,
    pub messages: Vec<MessageSummary>,
    pub changed_cells: Vec<CellView>,
    pub statistics: Statistics,
    pub complaints: Vec<Complaint>,
    pub decision: Option<Decision>,
    pub next_phase: Phase,
    pub new_round: bool,
}

/// Summary written when a round completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round: usize,
    /// Number of hearings held, counting the ones sent back for review.
    pub hearings: usize,
    /// Round statistics folded over its phases.
    pub statistics: BTreeMap<String, f64>,
    pub avg_fisherman_fitness: f64,
    /// Average complaints per fisherman in the last hearing of the round.
    pub avg_fisherman_complaints: f64,
    pub unblocked_cells: usize,
    pub n_aquaculture: usize,
    pub total_fish_quantity: f64,
}

/// What a phase produced besides its messages.
#[derive(Debug, Default)]
struct Outcome {
    changed: Vec<Pos>,
    statistics: Statistics,
    complaints: Vec<Complaint>,
    decision: Option<Decision>,
    fisherman_complaints: Option<f64>,
    fisherman_fitness: Option<f64>,
}

/// Position in the phase graph and per-round bookkeeping.
#[derive(Debug)]
pub struct Round {
    number: usize,
    phase: Phase,
    step: usize,
    hearings: usize,
    statistics: BTreeMap<String, f64>,
    fisherman_complaints: f64,
    fisherman_fitness: f64,
}

impl Default for Round {
    fn default() -> Self {
        Self::new()
    }
}

impl Round {
    pub fn new() -> Self {
        Self {
            number: 0,
            phase: Phase::START,
            step: 0,
            hearings: 0,
            statistics: BTreeMap::new(),
            fisherman_complaints: f64::NAN,
            fisherman_fitness: f64::NAN,
        }
    }

    pub fn number(&self) -> usize {
        self.number
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Execute the current phase and advance the graph.
    ///
    /// Returns the phase report and, when the step completed a round, its record.
    pub fn step(&mut self, state: &mut State) -> Result<(PhaseReport, Option<RoundRecord>)> {
        let phase = self.phase;
        self.step += 1;
        log::debug!("round {} step {} {phase}", self.number, self.step);

        state.directory.start_recording()?;
        let outcome = run_phase(phase, state);
        let messages = state.directory.stop_recording()?;
        let outcome = outcome.with_context(|| format!("failed to run {phase}"))?;

        for (name, stat) in &outcome.statistics {
            let value = self.statistics.entry(name.clone()).or_insert(0.0);
            match stat.mode {
                StatMode::Accumulate => *value += stat.value,
                StatMode::Set => *value = stat.value,
            }
        }
        if phase == Phase::Hearing {
            self.hearings += 1;
        }
        if let Some(avg) = outcome.fisherman_complaints {
            self.fisherman_complaints = avg;
        }
        if let Some(avg) = outcome.fisherman_fitness {
            self.fisherman_fitness = avg;
        }

        let next_phase = phase.next(outcome.decision);
        let new_round = phase == Phase::Learning;

        let report = PhaseReport {
            phase,
            round: self.number,
            step: self.step,
            time: state.directory.time(),
            messages: messages.iter().map(|msg| state.directory.summarize(msg)).collect(),
            changed_cells: outcome
                .changed
                .iter()
                .map(|&pos| state.world.view(pos))
                .collect(),
            statistics: outcome.statistics,
            complaints: outcome.complaints,
            decision: outcome.decision,
            next_phase,
            new_round,
        };

        self.phase = next_phase;
        let record = if new_round {
            Some(self.new_round(state))
        } else {
            None
        };
        Ok((report, record))
    }

    /// Write the round record, reset every agent and move to the next round.
    fn new_round(&mut self, state: &mut State) -> RoundRecord {
        let n_aquaculture = state
            .directory
            .agents(&AgentFilter::kind(AgentKind::Aquaculture))
            .count();
        let record = RoundRecord {
            round: self.number,
            hearings: self.hearings,
            statistics: std::mem::take(&mut self.statistics),
            avg_fisherman_fitness: self.fisherman_fitness,
            avg_fisherman_complaints: self.fisherman_complaints,
            unblocked_cells: state.world.n_unblocked(),
            n_aquaculture,
            total_fish_quantity: state.world.total_fish_quantity(),
        };

        for agent in state.directory.all_agents() {
            agent.round_reset();
        }
        log::info!("completed round {}", self.number);

        self.number += 1;
        self.step = 0;
        self.hearings = 0;
        self.fisherman_complaints = f64::NAN;
        self.fisherman_fitness = f64::NAN;
        record
    }
}

fn run_phase(phase: Phase, state: &mut State) -> Result<Outcome> {
    match phase {
        Phase::CoastPlan => coastal_planning(state),
        Phase::Hearing => hearing(state),
        Phase::GovDecision => government_decision(state),
        Phase::Fishing1 | Phase::Fishing2 => fishing(state),
        Phase::Building => building(state),
        Phase::Learning => learning(state),
    }
}

fn coastal_planning(state: &mut State) -> Result<Outcome> {
    let approved = state.directory.government()?.approved_complaints();
    let mun_id = state.directory.municipality_id()?;
    let plan = state
        .directory
        .municipality_mut()?
        .coastal_planning(&state.world, &approved);
    if plan.is_empty() {
        log::warn!("coastal plan is empty");
    } else {
        log::debug!("coastal plan covers {} cells", plan.len());
    }

    let voters = state.directory.ids(&AgentFilter::voters());
    let hearing = Message::plan_hearing(mun_id, voters, Rc::clone(&plan));
    state
        .directory
        .broadcast_message(hearing, &mut state.rng)
        .context("failed to distribute plan")?;

    let mut outcome = Outcome::default();
    set(&mut outcome.statistics, PLANNED_SITES, plan.aquaculture_sites().len() as f64);
    set(&mut outcome.statistics, RESERVED_ZONES, plan.reserved_zones().len() as f64);
    Ok(outcome)
}

fn hearing(state: &mut State) -> Result<Outcome> {
    state.directory.government_mut()?.new_vote_round();
    let gov_id = state.directory.government_id()?;
    let max_complaints = state.cfg.global.max_complaints;

    let mut n_complaints = Vec::new();
    let mut n_fisherman_complaints = Vec::new();
    for id in state.directory.ids(&AgentFilter::voters()) {
        let agent = state.directory.agent(id).context("voter vanished")?;
        let kind = agent.kind();
        let voter = agent.voter().context("voter without voting role")?;
        let (plan_hearing, votes) = voter
            .hearing(&state.world, max_complaints, &mut state.rng)
            .with_context(|| format!("{id} failed to vote"))?;

        let n = votes.iter().filter(|v| v.is_complaint()).count() as f64;
        n_complaints.push(n);
        if kind == AgentKind::Fisherman {
            n_fisherman_complaints.push(n);
        }

        let response = Message::vote_response(id, gov_id, plan_hearing, votes)?;
        state.directory.send_message(response, &mut state.rng)?;
    }

    let complaints: Vec<_> = state.directory.government()?.complaints().cloned().collect();

    let mut outcome = Outcome::default();
    accumulate(&mut outcome.statistics, AVG_COMPLAINTS, mean(&n_complaints));
    set(&mut outcome.statistics, COMPLAINED_CELLS, complaints.len() as f64);
    outcome.complaints = complaints;
    outcome.fisherman_complaints = Some(mean(&n_fisherman_complaints));
    Ok(outcome)
}

fn government_decision(state: &mut State) -> Result<Outcome> {
    let gov = state.directory.government_mut()?;
    let decision = gov.voting_decision(&mut state.rng)?;
    log::debug!("government decision after hearing {}: {decision:?}", gov.hearing_count());

    let mut outcome = Outcome::default();
    set(&mut outcome.statistics, HEARINGS, gov.hearing_count() as f64);
    outcome.decision = Some(decision);
    Ok(outcome)
}

fn fishing(state: &mut State) -> Result<Outcome> {
    let mut changed = BTreeSet::new();

    let fishermen = state.directory.ids(&AgentFilter::kind(AgentKind::Fisherman));
    for &id in &fishermen {
        let voter = state
            .directory
            .agent_mut(id)
            .and_then(|agent| agent.voter_mut())
            .context("fisherman without voting role")?;
        let old_home = voter.home();
        let new_home = voter.find_fishing_spot(id, &mut state.world, &mut state.rng);
        if new_home.is_some() && new_home != old_home {
            changed.extend(old_home);
            changed.extend(new_home);
        }
    }

    let aquaculture = state.directory.ids(&AgentFilter::kind(AgentKind::Aquaculture));
    for id in fishermen.iter().chain(&aquaculture) {
        if let Some(agent) = state.directory.agent_mut(*id) {
            agent.work(&state.world);
        }
    }

    let mut outcome = Outcome::default();
    if !fishermen.is_empty() {
        let capital: Vec<_> = fishermen
            .iter()
            .filter_map(|&id| state.directory.agent(id))
            .map(|agent| agent.capital())
            .collect();
        set(&mut outcome.statistics, AVG_FISHERMAN_CAPITAL, mean(&capital));
    }

    let mun_id = state.directory.municipality_id()?;
    for &id in &aquaculture {
        let payment = state
            .directory
            .agent_mut(id)
            .and_then(|agent| agent.pay_taxes(mun_id));
        if let Some(payment) = payment {
            state.directory.send_message(payment, &mut state.rng)?;
        }
    }
    let taxes: f64 = state
        .directory
        .municipality()?
        .taxes()
        .values()
        .flatten()
        .sum();
    set(&mut outcome.statistics, TAXES_COLLECTED, taxes);

    outcome.changed = changed.into_iter().collect();
    Ok(outcome)
}

fn building(state: &mut State) -> Result<Outcome> {
    let licenses = state.directory.government()?.distribute_licenses();
    let plan = state
        .directory
        .municipality()?
        .plan()
        .cloned()
        .context("no coastal plan to build on")?;

    let mut changed = BTreeSet::new();
    for i_license in 0..licenses {
        let Some(cell) = state.spawner.choose_cell(&plan, &state.world, &mut state.rng) else {
            log::warn!("license {i_license} found no aquaculture site");
            continue;
        };
        let (id, cells) = state.spawner.create(
            &mut state.factory,
            &mut state.directory,
            &mut state.world,
            cell,
            &mut state.rng,
        )?;
        log::debug!("{id} built aquaculture at {cell}");
        changed.extend(cells);
    }

    let n_aquaculture = state
        .directory
        .agents(&AgentFilter::kind(AgentKind::Aquaculture))
        .count();

    let mut outcome = Outcome::default();
    set(&mut outcome.statistics, TOTAL_FISH_QUANTITY, state.world.total_fish_quantity());
    set(&mut outcome.statistics, N_AQUACULTURE, n_aquaculture as f64);
    set(&mut outcome.statistics, UNBLOCKED_CELLS, state.world.n_unblocked() as f64);
    outcome.changed = changed.into_iter().collect();
    Ok(outcome)
}

fn learning(state: &mut State) -> Result<Outcome> {
    let all = AgentFilter::all();
    let influences = Influences::gather(
        state.directory.agents(&all),
        &state.world,
        &state.cfg.market,
    );
    let fitness: BTreeMap<AgentId, f64> = state
        .directory
        .agents(&all)
        .map(|agent| (agent.id(), influences.fitness(agent, &state.world)))
        .collect();

    let mut outcome = Outcome::default();
    for kind in [
        AgentKind::Fisherman,
        AgentKind::Aquaculture,
        AgentKind::Civilian,
        AgentKind::Tourist,
    ] {
        let values: Vec<_> = state
            .directory
            .agents(&AgentFilter::kind(kind))
            .map(|agent| fitness[&agent.id()])
            .collect();
        if values.is_empty() {
            continue;
        }
        let avg = mean(&values);
        if kind == AgentKind::Fisherman {
            set(&mut outcome.statistics, AVG_FISHERMAN_FITNESS, avg);
            outcome.fisherman_fitness = Some(avg);
        } else {
            let name = format!("average {} fitness", kind.to_string().to_lowercase());
            set(&mut outcome.statistics, &name, avg);
        }
    }

    for group in &state.learning {
        let learned = group
            .learn(&mut state.directory, &fitness, &mut state.rng)
            .with_context(|| format!("failed to evolve {}", group.kind()))?;
        log::debug!(
            "{} learning: {} elites, {} offspring, {} crossovers, {} mutations",
            group.kind(),
            learned.elites.len(),
            learned.offspring.len(),
            learned.n_crossovers,
            learned.n_mutations
        );
        let kind = group.kind().to_string().to_lowercase();
        set(&mut outcome.statistics, &format!("{kind} crossovers"), learned.n_crossovers as f64);
        set(&mut outcome.statistics, &format!("{kind} mutations"), learned.n_mutations as f64);
    }

    Ok(outcome)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
