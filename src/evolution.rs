//! Evolutionary learning of genome-encoded voting policies.

use crate::agent::{AgentId, AgentKind};
use crate::config::{AgentConfig, LearningConfig, check_num};
use crate::directory::{AgentFilter, Directory};
use crate::voting::{VotingKind, VotingMechanism};
use anyhow::{Context, Result, ensure};
use rand::prelude::*;
use rand_distr::weighted::WeightedIndex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Fixed-length bit string encoding a voting policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genotype(Vec<bool>);

impl Genotype {
    pub fn new(bits: Vec<bool>) -> Self {
        Self(bits)
    }

    pub fn random(len: usize, rng: &mut impl Rng) -> Self {
        Self((0..len).map(|_| rng.random_bool(0.5)).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn bits(&self) -> &[bool] {
        &self.0
    }

    /// Integer value of the bits in `range`, most significant bit first.
    pub fn value(&self, range: std::ops::Range<usize>) -> u64 {
        self.0[range]
            .iter()
            .fold(0, |acc, &bit| (acc << 1) | u64::from(bit))
    }

    /// Single-point crossover with probability `rate`.
    ///
    /// Both parents are cut at the same random point and their suffixes are
    /// swapped. Returns whether the parents were recombined.
    ///
    /// # Errors
    /// Returns an error if the parents have different lengths.
    pub fn crossover(
        first: &mut Genotype,
        second: &mut Genotype,
        rate: f64,
        rng: &mut impl Rng,
    ) -> Result<bool> {
        ensure!(
            first.len() == second.len(),
            "crossover of genotypes with lengths {} and {}",
            first.len(),
            second.len()
        );
        if first.is_empty() || rng.random::<f64>() >= rate {
            return Ok(false);
        }
        let point = rng.random_range(0..first.len());
        for i_bit in point..first.len() {
            std::mem::swap(&mut first.0[i_bit], &mut second.0[i_bit]);
        }
        Ok(true)
    }

    /// Flip one random bit with probability `rate`. Returns whether a bit was flipped.
    pub fn mutate(&mut self, rate: f64, rng: &mut impl Rng) -> bool {
        if self.is_empty() || rng.random::<f64>() >= rate {
            return false;
        }
        let i_bit = rng.random_range(0..self.len());
        self.0[i_bit] = !self.0[i_bit];
        true
    }
}

impl fmt::Display for Genotype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &bit in self.bits() {
            f.write_str(if bit { "1" } else { "0" })?;
        }
        Ok(())
    }
}

/// Fixed-point decoding of genome segments into real numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Encoding {
    /// Bits per decoded number.
    pub precision: usize,
    pub weight_min: f64,
    pub weight_max: f64,
}

impl Default for Encoding {
    fn default() -> Self {
        Self {
            precision: 8,
            weight_min: -1.0,
            weight_max: 1.0,
        }
    }
}

impl Encoding {
    pub fn validate(&self) -> Result<()> {
        check_num(self.precision, 1..=32).context("invalid precision")?;
        ensure!(
            self.weight_min < self.weight_max,
            "weight range [{}, {}] is empty",
            self.weight_min,
            self.weight_max
        );
        Ok(())
    }

    /// Genome length needed to encode `n_numbers` numbers.
    pub fn genome_len(&self, n_numbers: usize) -> usize {
        n_numbers * self.precision
    }

    /// Decode consecutive `precision`-bit segments by linear interpolation
    /// between the weight bounds. Trailing bits that do not fill a segment are ignored.
    pub fn decode(&self, genotype: &Genotype) -> Vec<f64> {
        let max_value = ((1u64 << self.precision) - 1) as f64;
        let span = self.weight_max - self.weight_min;
        (0..genotype.len() / self.precision)
            .map(|i_seg| {
                let start = i_seg * self.precision;
                let value = genotype.value(start..start + self.precision) as f64;
                self.weight_min + value / max_value * span
            })
            .collect()
    }
}

/// Member of a population taking part in one learning step.
#[derive(Debug, Clone)]
pub struct Individual {
    pub id: AgentId,
    pub fitness: f64,
    pub genotype: Genotype,
}

/// Result of one learning step.
#[derive(Debug, Clone, Default)]
pub struct Learned {
    /// Agents kept unchanged.
    pub elites: Vec<AgentId>,
    /// New genotypes of the remaining agents.
    pub offspring: Vec<(AgentId, Genotype)>,
    pub n_crossovers: usize,
    pub n_mutations: usize,
}

/// Rank selection, crossover and mutation over one agent group.
#[derive(Debug, Clone)]
pub struct Evolution {
    elitism: usize,
    crossover_rate: f64,
    mutation_rate: f64,
}

impl Evolution {
    pub fn new(cfg: &LearningConfig) -> Self {
        Self {
            elitism: cfg.elitism,
            crossover_rate: cfg.crossover_rate,
            mutation_rate: cfg.mutation_rate,
        }
    }

    pub fn learn(&self, mut population: Vec<Individual>, rng: &mut impl Rng) -> Result<Learned> {
        population.sort_by(|a, b| a.fitness.total_cmp(&b.fitness));

        let n_elites = self.elitism.min(population.len());
        let elites = population.split_off(population.len() - n_elites);
        let remainder = population;

        let mut selected = rank_selection(&remainder, rng)?;

        let mut n_crossovers = 0;
        for i in 0..selected.len() {
            for j in i + 1..selected.len() {
                let (head, tail) = selected.split_at_mut(j);
                if Genotype::crossover(&mut head[i], &mut tail[0], self.crossover_rate, rng)? {
                    n_crossovers += 1;
                }
            }
        }

        let mut n_mutations = 0;
        for genotype in &mut selected {
            if genotype.mutate(self.mutation_rate, rng) {
                n_mutations += 1;
            }
        }

        Ok(Learned {
            elites: elites.iter().map(|ind| ind.id).collect(),
            offspring: remainder.iter().map(|ind| ind.id).zip(selected).collect(),
            n_crossovers,
            n_mutations,
        })
    }
}

/// Sample `remainder.len()` genotypes with replacement, weighting the member
/// of rank `k` (1 = lowest fitness) with `k` tickets.
fn rank_selection(remainder: &[Individual], rng: &mut impl Rng) -> Result<Vec<Genotype>> {
    if remainder.is_empty() {
        return Ok(Vec::new());
    }
    let dist = WeightedIndex::new(1..=remainder.len())?;
    Ok((0..remainder.len())
        .map(|_| remainder[dist.sample(rng)].genotype.clone())
        .collect())
}

/// Learning mechanism of one agent kind.
///
/// Collects the genotypes of every agent of the kind, evolves them and writes
/// freshly decoded voting mechanisms back into the non-elite agents.
#[derive(Debug, Clone)]
pub struct GroupLearning {
    kind: AgentKind,
    voting: VotingKind,
    encoding: Encoding,
    evolution: Evolution,
}

impl GroupLearning {
    /// Create the learning mechanism of `kind`, if its configuration asks for one.
    pub fn new(kind: AgentKind, cfg: &AgentConfig) -> Option<Self> {
        let learning = cfg.learning.as_ref()?;
        Some(Self {
            kind,
            voting: cfg.voting,
            encoding: cfg.encoding.clone(),
            evolution: Evolution::new(learning),
        })
    }

    pub fn kind(&self) -> AgentKind {
        self.kind
    }

    pub fn learn(
        &self,
        directory: &mut Directory,
        fitness: &BTreeMap<AgentId, f64>,
        rng: &mut impl Rng,
    ) -> Result<Learned> {
        let mut population = Vec::new();
        for agent in directory.agents(&AgentFilter::kind(self.kind)) {
            let Some(genotype) = agent.voter().and_then(|v| v.mechanism().genotype()) else {
                continue;
            };
            let id = agent.id();
            population.push(Individual {
                id,
                fitness: fitness.get(&id).copied().unwrap_or_default(),
                genotype: genotype.clone(),
            });
        }

        let learned = self.evolution.learn(population, rng)?;

        for (id, genotype) in &learned.offspring {
            let mechanism =
                VotingMechanism::from_genotype(self.voting, genotype.clone(), &self.encoding)
                    .with_context(|| format!("failed to decode genotype of {id}"))?;
            if let Some(voter) = directory.agent_mut(*id).and_then(|a| a.voter_mut()) {
                voter.set_mechanism(mechanism);
            }
        }
        Ok(learned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::ChaCha12Rng;

    fn population(n: usize, len: usize, rng: &mut impl Rng) -> Vec<Individual> {
        (0..n)
            .map(|i| Individual {
                id: AgentId::new(i as u32),
                fitness: i as f64,
                genotype: Genotype::random(len, rng),
            })
            .collect()
    }

    fn evolution(elitism: usize, crossover_rate: f64, mutation_rate: f64) -> Evolution {
        Evolution::new(&LearningConfig {
            elitism,
            crossover_rate,
            mutation_rate,
        })
    }

    #[test]
    fn population_size_is_invariant() {
        let mut rng = ChaCha12Rng::seed_from_u64(11);
        for (n, elitism) in [(0, 2), (1, 2), (5, 2), (8, 0), (4, 4)] {
            let pop = population(n, 12, &mut rng);
            let learned = evolution(elitism, 0.5, 0.5).learn(pop, &mut rng).unwrap();
            assert_eq!(learned.elites.len() + learned.offspring.len(), n);
            assert_eq!(learned.elites.len(), elitism.min(n));
        }
    }

    #[test]
    fn elites_are_the_fittest() {
        let mut rng = ChaCha12Rng::seed_from_u64(5);
        let mut pop = population(6, 8, &mut rng);
        pop.reverse();
        let learned = evolution(2, 0.0, 0.0).learn(pop, &mut rng).unwrap();
        assert_eq!(learned.elites, vec![AgentId::new(4), AgentId::new(5)]);
        let offspring_ids: Vec<_> = learned.offspring.iter().map(|(id, _)| *id).collect();
        assert_eq!(offspring_ids, (0..4).map(AgentId::new).collect::<Vec<_>>());
    }

    #[test]
    fn full_crossover_rate_recombines_every_pair() {
        let mut rng = ChaCha12Rng::seed_from_u64(3);
        let pop = population(7, 16, &mut rng);
        let learned = evolution(2, 1.0, 0.0).learn(pop, &mut rng).unwrap();
        assert_eq!(learned.n_crossovers, 5 * 4 / 2);
        assert_eq!(learned.n_mutations, 0);
    }

    #[test]
    fn zero_rates_select_without_changing_bits() {
        let mut rng = ChaCha12Rng::seed_from_u64(9);
        let pop = population(6, 16, &mut rng);
        let originals: Vec<_> = pop.iter().map(|ind| ind.genotype.clone()).collect();
        let learned = evolution(1, 0.0, 0.0).learn(pop, &mut rng).unwrap();
        assert_eq!(learned.n_crossovers, 0);
        for (_, genotype) in &learned.offspring {
            assert!(originals.contains(genotype));
        }
    }

    #[test]
    fn mutation_flips_exactly_one_bit() {
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        let original = Genotype::random(32, &mut rng);
        let mut mutated = original.clone();
        assert!(mutated.mutate(1.0, &mut rng));
        let n_diff = original
            .bits()
            .iter()
            .zip(mutated.bits())
            .filter(|(a, b)| a != b)
            .count();
        assert_eq!(n_diff, 1);
        assert!(!mutated.mutate(0.0, &mut rng));
    }

    #[test]
    fn crossover_swaps_suffixes() {
        let mut rng = ChaCha12Rng::seed_from_u64(2);
        let mut first = Genotype::new(vec![false; 10]);
        let mut second = Genotype::new(vec![true; 10]);
        assert!(Genotype::crossover(&mut first, &mut second, 1.0, &mut rng).unwrap());
        let point = first.bits().iter().position(|&bit| bit).unwrap();
        assert!(first.bits()[point..].iter().all(|&bit| bit));
        assert!(second.bits()[..point].iter().all(|&bit| bit));
        assert!(second.bits()[point..].iter().all(|&bit| !bit));

        let mut short = Genotype::new(vec![true; 3]);
        assert!(Genotype::crossover(&mut first, &mut short, 1.0, &mut rng).is_err());
    }

    #[test]
    fn decode_spans_the_weight_range() {
        let encoding = Encoding {
            precision: 4,
            weight_min: -1.0,
            weight_max: 1.0,
        };
        let genotype = Genotype::new(
            "0000111110000111"
                .chars()
                .map(|c| c == '1')
                .collect(),
        );
        let weights = encoding.decode(&genotype);
        assert_eq!(weights.len(), 4);
        assert_eq!(weights[0], -1.0);
        assert_eq!(weights[1], 1.0);
        assert!((weights[2] - (-1.0 + 8.0 / 15.0 * 2.0)).abs() < 1e-12);
        assert_eq!(genotype.to_string(), "0000111110000111");
        assert_eq!(encoding.genome_len(36), 144);
    }
}
