//! Voting decision mechanisms of the agents taking part in hearings.

use crate::evolution::{Encoding, Genotype};
use crate::plan::{CoastalPlan, Vote};
use crate::world::{Pos, WorldMap};
use anyhow::{Result, bail, ensure};
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Strength above which an evaluated cell becomes a complaint.
const COMPLAINT_THRESHOLD: f64 = 0.5;

/// Number of bits of a rule table genotype.
pub const RULES_GENOME_LEN: usize = 3;

const N_INPUTS: usize = 3;
const N_HIDDEN: usize = 6;

/// Number of network edge weights: inputs to hidden, hidden to output,
/// hidden self-loops and bias to hidden.
pub const N_NETWORK_WEIGHTS: usize = N_INPUTS * N_HIDDEN + N_HIDDEN + N_HIDDEN + N_HIDDEN;

/// Voting mechanism selector of an agent kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VotingKind {
    #[default]
    AlwaysApprove,
    Rules,
    Network,
}

/// What a voter knows when deciding its votes.
pub struct VoteContext<'a> {
    pub home: Option<Pos>,
    pub knowledge: &'a BTreeMap<Pos, f64>,
    pub plan: &'a CoastalPlan,
    pub world: &'a WorldMap,
    pub max_complaints: usize,
}

impl VoteContext<'_> {
    /// Distance from home to `cell` relative to the map size (0 without a home).
    fn norm_distance(&self, cell: Pos) -> f64 {
        let max = self.world.max_distance();
        match self.home {
            Some(home) if max > 0.0 => self.world.distance(home, cell) / max,
            _ => 0.0,
        }
    }

    fn known_quality(&self, cell: Option<Pos>) -> f64 {
        cell.and_then(|cell| self.knowledge.get(&cell))
            .copied()
            .unwrap_or(0.0)
    }
}

/// Behaviour selected by a rule table genotype.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Complain with a probability growing with the distance from home.
    DistanceProbability,
    /// Complain about `max_complaints` random planned cells.
    ComplainMax,
    /// Never complain.
    ApproveAll,
}

impl Rule {
    fn from_genotype(genotype: &Genotype) -> Self {
        match genotype.value(0..RULES_GENOME_LEN) / 2 {
            1 => Rule::ComplainMax,
            2 => Rule::ApproveAll,
            _ => Rule::DistanceProbability,
        }
    }
}

/// Small recurrent network scoring planned cells.
///
/// Inputs are the normalized distance from home, the known quality of home
/// and the known quality of the evaluated cell. Hidden neurons use `tanh` and
/// feed back into themselves; the single output uses a logistic activation.
#[derive(Debug, Clone, PartialEq)]
pub struct Network {
    input: [[f64; N_HIDDEN]; N_INPUTS],
    output: [f64; N_HIDDEN],
    recurrent: [f64; N_HIDDEN],
    bias: [f64; N_HIDDEN],
}

impl Network {
    fn from_weights(weights: &[f64]) -> Result<Self> {
        ensure!(
            weights.len() == N_NETWORK_WEIGHTS,
            "network needs {N_NETWORK_WEIGHTS} weights, got {}",
            weights.len()
        );
        let mut it = weights.iter().copied();
        let mut next = || it.next().unwrap_or_default();
        let mut network = Self {
            input: [[0.0; N_HIDDEN]; N_INPUTS],
            output: [0.0; N_HIDDEN],
            recurrent: [0.0; N_HIDDEN],
            bias: [0.0; N_HIDDEN],
        };
        for row in &mut network.input {
            row.iter_mut().for_each(|w| *w = next());
        }
        network.output.iter_mut().for_each(|w| *w = next());
        network.recurrent.iter_mut().for_each(|w| *w = next());
        network.bias.iter_mut().for_each(|w| *w = next());
        Ok(network)
    }

    /// Propagate `inputs` once, updating the hidden `state`, and return the output.
    fn update(&self, inputs: [f64; N_INPUTS], state: &mut [f64; N_HIDDEN]) -> f64 {
        let mut activation = 0.0;
        for i_hid in 0..N_HIDDEN {
            let mut sum = self.bias[i_hid] + self.recurrent[i_hid] * state[i_hid];
            for (i_inp, input) in inputs.iter().enumerate() {
                sum += self.input[i_inp][i_hid] * input;
            }
            state[i_hid] = sum.tanh();
            activation += self.output[i_hid] * state[i_hid];
        }
        1.0 / (1.0 + (-activation).exp())
    }
}

/// Voting decision mechanism of an agent.
#[derive(Debug, Clone, PartialEq)]
pub enum VotingMechanism {
    AlwaysApprove,
    Rules { genotype: Genotype, rule: Rule },
    Network { genotype: Genotype, network: Network },
}

impl VotingMechanism {
    /// Create a mechanism of the given kind with a random genome.
    pub fn random(kind: VotingKind, encoding: &Encoding, rng: &mut impl Rng) -> Result<Self> {
        match kind {
            VotingKind::AlwaysApprove => Ok(Self::AlwaysApprove),
            VotingKind::Rules => Self::from_genotype(
                kind,
                Genotype::random(RULES_GENOME_LEN, rng),
                encoding,
            ),
            VotingKind::Network => Self::from_genotype(
                kind,
                Genotype::random(encoding.genome_len(N_NETWORK_WEIGHTS), rng),
                encoding,
            ),
        }
    }

    /// Decode a genotype into a fresh mechanism.
    ///
    /// # Errors
    /// Returns an error if the genome length does not match the kind, or if the
    /// kind has no genome.
    pub fn from_genotype(
        kind: VotingKind,
        genotype: Genotype,
        encoding: &Encoding,
    ) -> Result<Self> {
        match kind {
            VotingKind::AlwaysApprove => bail!("always-approve voting has no genome"),
            VotingKind::Rules => {
                ensure!(
                    genotype.len() == RULES_GENOME_LEN,
                    "rule genome must have {RULES_GENOME_LEN} bits, got {}",
                    genotype.len()
                );
                let rule = Rule::from_genotype(&genotype);
                Ok(Self::Rules { genotype, rule })
            }
            VotingKind::Network => {
                let expected = encoding.genome_len(N_NETWORK_WEIGHTS);
                ensure!(
                    genotype.len() == expected,
                    "network genome must have {expected} bits, got {}",
                    genotype.len()
                );
                let network = Network::from_weights(&encoding.decode(&genotype))?;
                Ok(Self::Network { genotype, network })
            }
        }
    }

    pub fn genotype(&self) -> Option<&Genotype> {
        match self {
            Self::AlwaysApprove => None,
            Self::Rules { genotype, .. } | Self::Network { genotype, .. } => Some(genotype),
        }
    }

    /// Decide the complaints on a plan, strongest first, at most `max_complaints`.
    pub fn decide_votes(&self, ctx: &VoteContext, rng: &mut impl Rng) -> Vec<Vote> {
        match self {
            Self::AlwaysApprove => Vec::new(),
            Self::Rules { rule, .. } => match rule {
                Rule::DistanceProbability => {
                    let strengths = ctx
                        .plan
                        .aquaculture_sites()
                        .into_iter()
                        .map(|cell| (cell, rng.random::<f64>() * ctx.norm_distance(cell)))
                        .collect();
                    strongest_complaints(strengths, ctx.max_complaints)
                }
                Rule::ComplainMax => {
                    let cells: Vec<_> = ctx.plan.cells().collect();
                    cells
                        .choose_multiple(rng, ctx.max_complaints)
                        .map(|&cell| Vote::complaint(cell))
                        .collect()
                }
                Rule::ApproveAll => Vec::new(),
            },
            Self::Network { network, .. } => {
                let mut state = [0.0; N_HIDDEN];
                let home_quality = ctx.known_quality(ctx.home);
                let strengths = ctx
                    .plan
                    .aquaculture_sites()
                    .into_iter()
                    .map(|cell| {
                        let inputs = [
                            ctx.norm_distance(cell),
                            home_quality,
                            ctx.known_quality(Some(cell)),
                        ];
                        (cell, network.update(inputs, &mut state))
                    })
                    .collect();
                strongest_complaints(strengths, ctx.max_complaints)
            }
        }
    }
}

fn strongest_complaints(strengths: Vec<(Pos, f64)>, max_complaints: usize) -> Vec<Vote> {
    let mut strengths: Vec<_> = strengths
        .into_iter()
        .filter(|&(_, strength)| strength > COMPLAINT_THRESHOLD)
        .collect();
    strengths.sort_by(|a, b| b.1.total_cmp(&a.1));
    strengths
        .into_iter()
        .take(max_complaints)
        .map(|(cell, _)| Vote::complaint(cell))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::plan::PlanEntity;
    use rand_chacha::ChaCha12Rng;

    fn bits(text: &str) -> Genotype {
        Genotype::new(text.chars().map(|c| c == '1').collect())
    }

    fn full_plan(world: &WorldMap) -> CoastalPlan {
        let mut plan = CoastalPlan::new();
        for pos in world.all_cells() {
            plan.set(pos, PlanEntity::AquacultureSite);
        }
        plan
    }

    #[test]
    fn rule_table_maps_genome_pairs() {
        let enc = Encoding::default();
        let rule = |text| match VotingMechanism::from_genotype(VotingKind::Rules, bits(text), &enc)
        {
            Ok(VotingMechanism::Rules { rule, .. }) => rule,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(rule("000"), Rule::DistanceProbability);
        assert_eq!(rule("001"), Rule::DistanceProbability);
        assert_eq!(rule("010"), Rule::ComplainMax);
        assert_eq!(rule("101"), Rule::ApproveAll);
        assert_eq!(rule("111"), Rule::DistanceProbability);
        assert!(VotingMechanism::from_genotype(VotingKind::Rules, bits("01"), &enc).is_err());
        assert!(
            VotingMechanism::from_genotype(VotingKind::AlwaysApprove, bits("010"), &enc).is_err()
        );
    }

    #[test]
    fn votes_are_bounded_complaints() {
        let cfg = test_config();
        let mut rng = ChaCha12Rng::seed_from_u64(4);
        let world = WorldMap::generate(&cfg.world, &mut rng);
        let plan = full_plan(&world);
        let knowledge = BTreeMap::from([(Pos::new(0, 0), 0.9)]);
        let ctx = VoteContext {
            home: Some(Pos::new(0, 0)),
            knowledge: &knowledge,
            plan: &plan,
            world: &world,
            max_complaints: 3,
        };
        let enc = Encoding::default();

        let complain =
            VotingMechanism::from_genotype(VotingKind::Rules, bits("011"), &enc).unwrap();
        let votes = complain.decide_votes(&ctx, &mut rng);
        assert_eq!(votes.len(), 3);
        assert!(votes.iter().all(Vote::is_complaint));

        for kind in [VotingKind::Rules, VotingKind::Network] {
            for _ in 0..20 {
                let mech = VotingMechanism::random(kind, &enc, &mut rng).unwrap();
                let votes = mech.decide_votes(&ctx, &mut rng);
                assert!(votes.len() <= 3);
                assert!(votes.iter().all(Vote::is_complaint));
            }
        }
        assert!(VotingMechanism::AlwaysApprove.decide_votes(&ctx, &mut rng).is_empty());
    }

    #[test]
    fn saturated_network_complains_about_every_site() {
        let cfg = test_config();
        let mut rng = ChaCha12Rng::seed_from_u64(8);
        let world = WorldMap::generate(&cfg.world, &mut rng);
        let plan = full_plan(&world);
        let knowledge = BTreeMap::new();
        let ctx = VoteContext {
            home: None,
            knowledge: &knowledge,
            plan: &plan,
            world: &world,
            max_complaints: 100,
        };
        let enc = Encoding::default();
        let genotype = Genotype::new(vec![true; enc.genome_len(N_NETWORK_WEIGHTS)]);
        let mech = VotingMechanism::from_genotype(VotingKind::Network, genotype, &enc).unwrap();
        assert_eq!(mech.decide_votes(&ctx, &mut rng).len(), plan.len());

        // Same positive hidden layer, but every hidden to output weight at -1.
        let output_start = enc.genome_len(N_INPUTS * N_HIDDEN);
        let output_bits = output_start..output_start + enc.genome_len(N_HIDDEN);
        let genotype = Genotype::new(
            (0..enc.genome_len(N_NETWORK_WEIGHTS))
                .map(|i_bit| !output_bits.contains(&i_bit))
                .collect(),
        );
        let mech = VotingMechanism::from_genotype(VotingKind::Network, genotype, &enc).unwrap();
        assert!(mech.decide_votes(&ctx, &mut rng).is_empty());
    }
}
