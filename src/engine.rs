use crate::agent::{AgentFactory, AgentKind};
use crate::config::Config;
use crate::directory::{AgentFilter, Directory};
use crate::evolution::GroupLearning;
use crate::phases::{Phase, PhaseReport, Round, RoundRecord};
use crate::spawner::AquacultureSpawner;
use crate::world::{CellView, Neighbourhood, Pos, Topology, WorldMap};
use anyhow::{Context, Result, ensure};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rmp_serde::encode;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

/// Shared simulation state every phase operates on.
pub struct State {
    pub cfg: Config,
    pub world: WorldMap,
    pub directory: Directory,
    pub factory: AgentFactory,
    pub spawner: AquacultureSpawner,
    pub learning: Vec<GroupLearning>,
    pub rng: ChaCha12Rng,
}

/// Full picture of a freshly initialized simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitialSnapshot {
    pub width: usize,
    pub height: usize,
    pub topology: Topology,
    pub neighbourhood: Neighbourhood,
    pub cells: Vec<CellView>,
    pub agents: Vec<AgentEntry>,
    pub phase: Phase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEntry {
    pub label: String,
    pub kind: AgentKind,
    pub home: Option<Pos>,
}

/// Simulation engine.
///
/// Owns the state and the position in the phase graph, and advances the
/// simulation one phase at a time.
pub struct Engine {
    state: State,
    round: Round,
    records: Vec<RoundRecord>,
}

impl Engine {
    /// Build the world and the initial agents from `cfg`.
    ///
    /// # Errors
    /// Returns an error if the configuration cannot produce a valid population.
    pub fn initialize(cfg: Config) -> Result<(Self, InitialSnapshot)> {
        let mut rng = match cfg.global.seed {
            Some(seed) => ChaCha12Rng::seed_from_u64(seed),
            None => ChaCha12Rng::try_from_os_rng()?,
        };

        let mut world = WorldMap::generate(&cfg.world, &mut rng);
        let mut factory = AgentFactory::new(&cfg);
        let mut directory = Directory::new();

        directory
            .register(factory.government()?)
            .context("failed to register government")?;
        directory
            .register(factory.municipality()?)
            .context("failed to register municipality")?;

        let homes = world
            .choose_homes(cfg.fisherman.num, &mut rng)
            .context("failed to place fishermen")?;
        for home in homes {
            let fisher = factory.fisherman(home, &mut world, &mut rng)?;
            directory.register(fisher)?;
        }

        for _ in 0..cfg.civilian.num {
            let civilian = factory.civilian(&mut rng)?;
            directory.register(civilian)?;
        }

        let cells = world.all_cells();
        for _ in 0..cfg.tourist.num {
            let &home = cells.choose(&mut rng).context("world has no cells")?;
            let tourist = factory.tourist(home, &world, &mut rng)?;
            directory.register(tourist)?;
        }

        let mut learning = Vec::new();
        for (kind, agent_cfg) in [
            (AgentKind::Fisherman, &cfg.fisherman),
            (AgentKind::Aquaculture, &cfg.aquaculture),
            (AgentKind::Civilian, &cfg.civilian),
            (AgentKind::Tourist, &cfg.tourist),
        ] {
            let Some(group) = GroupLearning::new(kind, agent_cfg) else {
                continue;
            };
            // Aquaculture agents are spawned later, so their group size is unknown.
            if kind != AgentKind::Aquaculture {
                let elitism = agent_cfg.learning.as_ref().map_or(0, |l| l.elitism);
                ensure!(
                    elitism <= agent_cfg.num,
                    "{kind} elitism {elitism} exceeds population {}",
                    agent_cfg.num
                );
            }
            learning.push(group);
        }

        let spawner = AquacultureSpawner::new(&cfg);

        let state = State {
            cfg,
            world,
            directory,
            factory,
            spawner,
            learning,
            rng,
        };
        let engine = Self {
            state,
            round: Round::new(),
            records: Vec::new(),
        };
        let snapshot = engine.snapshot();
        log::info!(
            "initialized {}x{} world with {} agents",
            snapshot.width,
            snapshot.height,
            engine.state.directory.len()
        );
        Ok((engine, snapshot))
    }

    fn snapshot(&self) -> InitialSnapshot {
        let world = &self.state.world;
        let directory = &self.state.directory;
        InitialSnapshot {
            width: world.width(),
            height: world.height(),
            topology: world.topology(),
            neighbourhood: world.neighbourhood(),
            cells: world.all_cells().into_iter().map(|pos| world.view(pos)).collect(),
            agents: directory
                .agents(&AgentFilter::all())
                .map(|agent| AgentEntry {
                    label: agent.label(),
                    kind: agent.kind(),
                    home: agent.voter().and_then(|v| v.home()),
                })
                .collect(),
            phase: self.round.phase(),
        }
    }

    pub fn current_phase(&self) -> Phase {
        self.round.phase()
    }

    /// Number of completed rounds.
    pub fn round(&self) -> usize {
        self.round.number()
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn round_records(&self) -> &[RoundRecord] {
        &self.records
    }

    /// Execute the current phase and move to the next one.
    pub fn step(&mut self) -> Result<PhaseReport> {
        let (report, record) = self.round.step(&mut self.state)?;
        if let Some(record) = record {
            self.records.push(record);
        }
        Ok(report)
    }

    /// Step until the current round completes.
    pub fn run_round(&mut self) -> Result<Vec<PhaseReport>> {
        let round = self.round.number();
        let mut reports = Vec::new();
        while self.round.number() == round {
            reports.push(self.step()?);
        }
        Ok(reports)
    }

    /// Run the configured number of rounds and save the results in `run_dir`.
    ///
    /// Phase reports are streamed to the trajectory file when enabled, and
    /// the round records are written at the end.
    pub fn perform_simulation<P: AsRef<Path>>(&mut self, run_dir: P) -> Result<()> {
        let run_dir = run_dir.as_ref();
        let n_rounds = self.state.cfg.output.rounds;

        let mut trajectory = if self.state.cfg.output.save_reports {
            let file = run_dir.join("trajectory.msgpack");
            let file = File::create(&file).with_context(|| format!("failed to create {file:?}"))?;
            Some(BufWriter::new(file))
        } else {
            None
        };

        for i_round in 0..n_rounds {
            let reports = self
                .run_round()
                .with_context(|| format!("failed to run round {i_round}"))?;
            if let Some(writer) = trajectory.as_mut() {
                for report in &reports {
                    encode::write(writer, report).context("failed to serialize report")?;
                }
            }

            let progress = 100.0 * (i_round + 1) as f64 / n_rounds as f64;
            log::info!("completed {progress:06.2}%");
        }

        if let Some(mut writer) = trajectory {
            writer.flush().context("failed to flush writer stream")?;
        }

        let file = run_dir.join("rounds.msgpack");
        let file = File::create(&file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);
        encode::write(&mut writer, &self.records).context("failed to serialize round records")?;
        writer.flush().context("failed to flush writer stream")?;

        Ok(())
    }
}

/// Write the initial snapshot of a run.
pub fn save_snapshot<P: AsRef<Path>>(snapshot: &InitialSnapshot, file: P) -> Result<()> {
    let file = file.as_ref();
    let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
    let mut writer = BufWriter::new(file);
    encode::write(&mut writer, snapshot).context("failed to serialize snapshot")?;
    writer.flush().context("failed to flush writer stream")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TEST_CONFIG, test_config};
    use crate::evolution::Genotype;
    use crate::phases::{AVG_COMPLAINTS, AVG_FISHERMAN_FITNESS, RESERVED_ZONES};
    use crate::plan::Decision;
    use crate::voting::{VotingKind, VotingMechanism};

    #[test]
    fn initial_population_follows_config() {
        let (engine, snapshot) = Engine::initialize(test_config()).unwrap();
        assert_eq!(snapshot.cells.len(), 25);
        assert_eq!(snapshot.agents.len(), 5);
        assert_eq!(snapshot.agents[0].kind, AgentKind::Government);
        assert_eq!(snapshot.agents[1].kind, AgentKind::Municipality);
        assert_eq!(snapshot.agents[2].label, "a02:Fisherman");
        assert_eq!(snapshot.phase, Phase::CoastPlan);
        assert_eq!(engine.current_phase(), Phase::CoastPlan);

        let homes: Vec<_> = snapshot.agents.iter().filter_map(|a| a.home).collect();
        assert_eq!(homes.len(), 3);
        for home in homes {
            assert_eq!(engine.state().world.cell(home).occupants().len(), 1);
        }
    }

    #[test]
    fn same_seed_same_run() {
        let run = || {
            let (mut engine, _) = Engine::initialize(test_config()).unwrap();
            engine.run_round().unwrap();
            engine.round_records().to_vec()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn excessive_elitism_is_rejected() {
        let text = TEST_CONFIG.replace("elitism = 1", "elitism = 4");
        let cfg = Config::from_toml(&text).unwrap();
        assert!(Engine::initialize(cfg).is_err());
    }

    #[test]
    fn full_round_on_small_grid() {
        let (mut engine, snapshot) = Engine::initialize(test_config()).unwrap();
        let spawning: Vec<_> = snapshot
            .cells
            .iter()
            .filter(|c| c.spawning)
            .map(|c| c.pos)
            .collect();

        let reports = engine.run_round().unwrap();
        let phases: Vec<_> = reports.iter().map(|r| r.phase).collect();
        assert_eq!(phases.first(), Some(&Phase::CoastPlan));
        assert_eq!(phases.last(), Some(&Phase::Learning));
        assert!(reports.last().unwrap().new_round);
        assert!(reports[..reports.len() - 1].iter().all(|r| !r.new_round));

        assert_eq!(engine.round(), 1);
        assert_eq!(engine.current_phase(), Phase::CoastPlan);
        let records = engine.round_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].round, 0);
        assert!(records[0].hearings >= 1);
        assert!(records[0].statistics.contains_key(AVG_COMPLAINTS));
        assert_eq!(
            records[0].statistics.get(AVG_FISHERMAN_FITNESS),
            Some(&records[0].avg_fisherman_fitness)
        );

        // The first plan offers every unblocked cell, so both licenses find a site.
        assert!(records[0].n_aquaculture >= 1);
        for pos in spawning {
            assert!(engine.state().world.cell(pos).is_spawning());
        }

        for agent in engine.state().directory.agents(&AgentFilter::all()) {
            assert_eq!(agent.capital(), 0.0);
        }
    }

    #[test]
    fn review_stays_in_round() {
        // Every fisherman complains about three cells and the government
        // accepts every complaint, so the first hearing is sent back.
        let text = TEST_CONFIG.replace("voting = \"network\"", "voting = \"rules\"").replace(
            "approval = \"more_than_one\"",
            "approval = \"probability\"\napproval_probability = 1.0",
        );
        let cfg = Config::from_toml(&text).unwrap();
        let (mut engine, _) = Engine::initialize(cfg).unwrap();

        let genotype = Genotype::new(vec![false, true, false]);
        let complain_max =
            VotingMechanism::from_genotype(VotingKind::Rules, genotype, &Default::default())
                .unwrap();
        for id in engine.state.directory.ids(&AgentFilter::voters()) {
            let agent = engine.state.directory.agent_mut(id).unwrap();
            agent.voter_mut().unwrap().set_mechanism(complain_max.clone());
        }

        let phases: Vec<_> = (0..3).map(|_| engine.step().unwrap()).collect();
        assert_eq!(phases[2].phase, Phase::GovDecision);
        assert_eq!(phases[2].decision, Some(Decision::Review));
        assert_eq!(phases[2].next_phase, Phase::CoastPlan);
        assert!(!phases[2].new_round);

        let replan = engine.step().unwrap();
        assert_eq!(replan.phase, Phase::CoastPlan);
        assert_eq!(replan.round, 0);
        assert!(replan.statistics[RESERVED_ZONES].value > 0.0);
        for agent in engine.state().directory.agents(&AgentFilter::voters()) {
            assert!(agent.capital() == 0.0);
        }

        // The second hearing reaches the cap and the plan is approved.
        engine.step().unwrap();
        let report = engine.step().unwrap();
        assert_eq!(report.phase, Phase::GovDecision);
        assert_eq!(report.decision, Some(Decision::Approve));
        assert_eq!(report.next_phase, Phase::Fishing1);
        assert_eq!(engine.round(), 0);
        assert!(engine.round_records().is_empty());
    }
}
