use crate::decision::{ApprovalKind, PlanningKind};
use crate::evolution::Encoding;
use crate::priority::parse_weights;
use crate::voting::VotingKind;
use crate::world::{DamageDecay, Neighbourhood, Topology};
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt::Debug, fs, ops::RangeBounds, path::Path};

/// Simulation configuration parameters.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Config {
    pub global: GlobalConfig,
    pub world: WorldConfig,
    #[serde(default)]
    pub market: MarketConfig,
    pub fisherman: AgentConfig,
    #[serde(default)]
    pub aquaculture: AgentConfig,
    #[serde(default)]
    pub civilian: AgentConfig,
    #[serde(default)]
    pub tourist: AgentConfig,
    pub government: GovernmentConfig,
    #[serde(default)]
    pub municipality: MunicipalityConfig,
    pub output: OutputConfig,
}

/// Parameters shared by every part of the simulation.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Seed of the random number generator (drawn from the OS if absent).
    #[serde(default)]
    pub seed: Option<u64>,
    /// Maximum number of complaints an agent may cast per hearing.
    pub max_complaints: usize,
    /// Number of hearings per round after which the plan is approved unconditionally.
    pub max_hearing_rounds: usize,
    /// Whether aquaculture may be planned and built on blocked cells.
    #[serde(default)]
    pub aquaculture_in_blocked: bool,
    /// Number of licenses distributed in every building phase.
    pub licenses: usize,
}

/// Geometry of the world map and the effect of aquaculture on it.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct WorldConfig {
    pub width: usize,
    pub height: usize,
    /// Physical width of a cell (meters).
    pub cell_width: f64,
    /// Physical height of a cell (meters).
    pub cell_height: f64,
    pub topology: Topology,
    #[serde(default)]
    pub neighbourhood: Neighbourhood,
    /// Fraction of cells that are fish spawning grounds.
    pub good_spot_frequency: f64,
    /// Radius (meters) around an aquaculture inside which cells get blocked.
    pub blocking_radius: f64,
    /// Radius (meters) around an aquaculture inside which fish are damaged.
    pub damage_radius: f64,
    /// Proportion of fish lost at the aquaculture cell itself.
    pub damage_proportion: f64,
    #[serde(default)]
    pub damage_decay: DamageDecay,
}

/// Fish prices seen by the price priorities.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    pub wild_fish_price: f64,
    pub farmed_fish_price: f64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            wild_fish_price: 1.0,
            farmed_fish_price: 1.0,
        }
    }
}

/// Parameters of one kind of voting agent.
///
/// Kind-specific fields are ignored by the kinds that do not use them.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Number of agents created at setup (aquaculture agents are spawned instead).
    #[serde(default)]
    pub num: usize,
    /// Priority name to weight.
    #[serde(default)]
    pub priorities: BTreeMap<String, f64>,
    #[serde(default)]
    pub voting: VotingKind,
    #[serde(default)]
    pub encoding: Encoding,
    #[serde(default)]
    pub learning: Option<LearningConfig>,
    #[serde(default = "default_efficiency")]
    pub fishing_efficiency: f64,
    #[serde(default = "default_efficiency")]
    pub work_efficiency: f64,
    #[serde(default = "default_taxation")]
    pub taxation: f64,
    /// Radius (meters) of the cells a tourist cares about.
    #[serde(default)]
    pub care_radius: f64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            num: 0,
            priorities: BTreeMap::new(),
            voting: VotingKind::default(),
            encoding: Encoding::default(),
            learning: None,
            fishing_efficiency: default_efficiency(),
            work_efficiency: default_efficiency(),
            taxation: default_taxation(),
            care_radius: 0.0,
        }
    }
}

fn default_efficiency() -> f64 {
    1.0
}

fn default_taxation() -> f64 {
    0.1
}

/// Parameters of the evolutionary learning of one agent kind.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    pub elitism: usize,
    pub crossover_rate: f64,
    pub mutation_rate: f64,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct GovernmentConfig {
    pub approval: ApprovalKind,
    #[serde(default = "default_approval_probability")]
    pub approval_probability: f64,
    #[serde(default)]
    pub priorities: BTreeMap<String, f64>,
}

fn default_approval_probability() -> f64 {
    0.5
}

#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
pub struct MunicipalityConfig {
    #[serde(default)]
    pub planning: PlanningKind,
    #[serde(default)]
    pub priorities: BTreeMap<String, f64>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Number of rounds simulated per run.
    pub rounds: usize,
    /// Whether every phase report is written to the trajectory file.
    #[serde(default)]
    pub save_reports: bool,
}

impl Config {
    /// Load a [`Config`] from a TOML file.
    ///
    /// Performs validation on all parameters before returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;
        Self::from_toml(&contents)
    }

    /// Parse and validate a [`Config`] from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let global = &self.global;
        check_num(global.max_complaints, 0..10_000).context("invalid max_complaints")?;
        check_num(global.max_hearing_rounds, 0..1_000).context("invalid max_hearing_rounds")?;
        check_num(global.licenses, 0..10_000).context("invalid number of licenses")?;

        let world = &self.world;
        check_num(world.width, 1..=1_000).context("invalid world width")?;
        check_num(world.height, 1..=1_000).context("invalid world height")?;
        check_num(world.cell_width, f64::MIN_POSITIVE..1e6).context("invalid cell width")?;
        check_num(world.cell_height, f64::MIN_POSITIVE..1e6).context("invalid cell height")?;
        check_num(world.good_spot_frequency, 0.0..=1.0)
            .context("invalid good spot frequency")?;
        check_num(world.blocking_radius, 0.0..1e9).context("invalid blocking radius")?;
        check_num(world.damage_radius, 0.0..1e9).context("invalid damage radius")?;
        check_num(world.damage_proportion, 0.0..=1.0).context("invalid damage proportion")?;

        let n_cells = world.width * world.height;
        check_num(self.fisherman.num, 0..=n_cells)
            .context("more fishermen than cells in the world")?;

        for (name, agent) in [
            ("fisherman", &self.fisherman),
            ("aquaculture", &self.aquaculture),
            ("civilian", &self.civilian),
            ("tourist", &self.tourist),
        ] {
            validate_agent(agent).with_context(|| format!("invalid {name} section"))?;
        }

        check_num(self.government.approval_probability, 0.0..=1.0)
            .context("invalid approval probability")?;
        parse_weights(&self.government.priorities).context("invalid government priorities")?;
        parse_weights(&self.municipality.priorities)
            .context("invalid municipality priorities")?;

        check_num(self.output.rounds, 1..1_000_000).context("invalid number of rounds")?;

        Ok(())
    }
}

fn validate_agent(agent: &AgentConfig) -> Result<()> {
    check_num(agent.num, 0..100_000).context("invalid number of agents")?;
    parse_weights(&agent.priorities).context("invalid priorities")?;
    agent.encoding.validate().context("invalid genome encoding")?;
    check_num(agent.fishing_efficiency, 0.0..1e6).context("invalid fishing efficiency")?;
    check_num(agent.work_efficiency, 0.0..1e6).context("invalid work efficiency")?;
    check_num(agent.taxation, 0.0..=1.0).context("invalid taxation")?;
    check_num(agent.care_radius, 0.0..1e9).context("invalid care radius")?;
    if let Some(learning) = &agent.learning {
        check_num(learning.elitism, 0..100_000).context("invalid elitism")?;
        check_num(learning.crossover_rate, 0.0..=1.0).context("invalid crossover rate")?;
        check_num(learning.mutation_rate, 0.0..=1.0).context("invalid mutation rate")?;
        if agent.voting == VotingKind::AlwaysApprove {
            bail!("learning requires a genome-encoded voting mechanism");
        }
    }
    Ok(())
}

pub fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}

#[cfg(test)]
pub const TEST_CONFIG: &str = r#"
[global]
seed = 7
max_complaints = 3
max_hearing_rounds = 1
licenses = 2

[world]
width = 5
height = 5
cell_width = 1.0
cell_height = 1.0
topology = "grid"
good_spot_frequency = 0.2
blocking_radius = 1.0
damage_radius = 2.0
damage_proportion = 0.5

[fisherman]
num = 3
voting = "network"
fishing_efficiency = 1.0

[fisherman.priorities]
OwnProfits = 10.0
NaturalFishHealth = 2.0

[fisherman.learning]
elitism = 1
crossover_rate = 0.5
mutation_rate = 0.5

[aquaculture]
work_efficiency = 2.0

[government]
approval = "more_than_one"

[output]
rounds = 2
"#;

#[cfg(test)]
pub fn test_config() -> Config {
    Config::from_toml(TEST_CONFIG).expect("test config must be valid")
}
