use crate::phases::RoundRecord;
use crate::stats::Accumulator;
use anyhow::{Context, Result};
use rmp_serde::decode;
use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

pub trait Obs {
    fn update(&mut self, record: &RoundRecord) -> Result<()>;
    fn report(&self) -> serde_json::Value;
}

/// Summary of one named per-round quantity.
pub struct Metric {
    name: &'static str,
    extract: fn(&RoundRecord) -> f64,
    acc: Accumulator,
}

impl Metric {
    pub fn new(name: &'static str, extract: fn(&RoundRecord) -> f64) -> Self {
        Self {
            name,
            extract,
            acc: Accumulator::new(),
        }
    }
}

impl Obs for Metric {
    fn update(&mut self, record: &RoundRecord) -> Result<()> {
        self.acc.add((self.extract)(record));
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        serde_json::json!({ self.name: self.acc.report() })
    }
}

/// Summary of every phase statistic found in the round records.
#[derive(Default)]
pub struct PhaseStatistics {
    acc_map: BTreeMap<String, Accumulator>,
}

impl Obs for PhaseStatistics {
    fn update(&mut self, record: &RoundRecord) -> Result<()> {
        for (name, &value) in &record.statistics {
            self.acc_map.entry(name.clone()).or_default().add(value);
        }
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        let reports: BTreeMap<_, _> = self
            .acc_map
            .iter()
            .map(|(name, acc)| (name.clone(), acc.report()))
            .collect();
        serde_json::json!({ "phase_statistics": reports })
    }
}

pub struct Analyzer {
    n_rounds: usize,
    obs_ptr_vec: Vec<Box<dyn Obs>>,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyzer {
    pub fn new() -> Self {
        let obs_ptr_vec: Vec<Box<dyn Obs>> = vec![
            Box::new(Metric::new("hearings", |r| r.hearings as f64)),
            Box::new(Metric::new("avg_fisherman_fitness", |r| {
                r.avg_fisherman_fitness
            })),
            Box::new(Metric::new("avg_fisherman_complaints", |r| {
                r.avg_fisherman_complaints
            })),
            Box::new(Metric::new("unblocked_cells", |r| r.unblocked_cells as f64)),
            Box::new(Metric::new("n_aquaculture", |r| r.n_aquaculture as f64)),
            Box::new(Metric::new("total_fish_quantity", |r| r.total_fish_quantity)),
            Box::new(PhaseStatistics::default()),
        ];
        Self {
            n_rounds: 0,
            obs_ptr_vec,
        }
    }

    pub fn add_record(&mut self, record: &RoundRecord) -> Result<()> {
        for obs in &mut self.obs_ptr_vec {
            obs.update(record).context("failed to update observable")?;
        }
        self.n_rounds += 1;
        Ok(())
    }

    /// Feed every round record stored in `file`.
    pub fn add_file<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);

        let records: Vec<RoundRecord> =
            decode::from_read(&mut reader).context("failed to read round records")?;
        for record in &records {
            self.add_record(record)?;
        }
        Ok(())
    }

    pub fn report(&self) -> serde_json::Value {
        let reports: Vec<_> = self.obs_ptr_vec.iter().map(|obs| obs.report()).collect();
        serde_json::json!({ "n_rounds": self.n_rounds, "observables": reports })
    }

    pub fn save_results<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let writer = BufWriter::new(file);

        serde_json::to_writer_pretty(writer, &self.report())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(round: usize, n_aquaculture: usize) -> RoundRecord {
        RoundRecord {
            round,
            hearings: 1,
            statistics: BTreeMap::from([("taxes collected".to_string(), round as f64)]),
            avg_fisherman_fitness: 0.5,
            avg_fisherman_complaints: 1.0,
            unblocked_cells: 20,
            n_aquaculture,
            total_fish_quantity: 10.0,
        }
    }

    #[test]
    fn reports_every_observable() {
        let mut analyzer = Analyzer::new();
        for round in 0..3 {
            analyzer.add_record(&record(round, 2 * round)).unwrap();
        }
        let report = analyzer.report();
        assert_eq!(report["n_rounds"], 3);

        let observables = report["observables"].as_array().unwrap();
        assert_eq!(observables.len(), 7);
        let n_aquaculture = &observables[4]["n_aquaculture"];
        assert_eq!(n_aquaculture["mean"], 2.0);
        assert_eq!(n_aquaculture["last"], 4.0);
        let taxes = &observables[6]["phase_statistics"]["taxes collected"];
        assert_eq!(taxes["max"], 2.0);
    }
}
