use crate::model::RunResults;
use crate::stats::Accumulator;
use anyhow::{Context, Result, bail};
use rmp_serde::encode;
use serde_value::Value;
use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

/// Observable computed from the series of each run.
pub trait Obs {
    fn name(&self) -> &'static str;
    fn update(&mut self, results: &RunResults) -> Result<()>;
    fn report(&self) -> Result<Value>;
}

fn report_accs(accs: &BTreeMap<String, Accumulator>) -> Result<Value> {
    let reports: BTreeMap<_, _> = accs
        .iter()
        .map(|(label, acc)| (label.clone(), acc.report()))
        .collect();
    serde_value::to_value(reports).context("failed to convert reports")
}

fn last_step(results: &RunResults) -> Result<usize> {
    match results.series.n_steps() {
        0 => bail!("run has no timesteps"),
        n_steps => Ok(n_steps - 1),
    }
}

/// Counts of every category at the last timestep.
pub struct FinalCounts {
    accs: BTreeMap<String, Accumulator>,
}

impl FinalCounts {
    pub fn new() -> Self {
        Self {
            accs: BTreeMap::new(),
        }
    }
}

impl Obs for FinalCounts {
    fn name(&self) -> &'static str {
        "final_counts"
    }

    fn update(&mut self, results: &RunResults) -> Result<()> {
        let step = last_step(results)?;
        let tally = results.series.tally(step);

        let labels = results.series.labels();
        let counts = tally
            .n_infected
            .iter()
            .chain([&tally.n_dead, &tally.n_immune, &tally.n_uninfected]);
        for (label, &count) in labels.into_iter().zip(counts) {
            self.accs.entry(label).or_default().add(count as f64);
        }
        self.accs
            .entry("Isolated".to_string())
            .or_default()
            .add(tally.n_isolated as f64);

        Ok(())
    }

    fn report(&self) -> Result<Value> {
        report_accs(&self.accs)
    }
}

/// Largest number of actively infected people and the timestep it occurs at.
pub struct PeakInfected {
    n_infected: Accumulator,
    step: Accumulator,
}

impl PeakInfected {
    pub fn new() -> Self {
        Self {
            n_infected: Accumulator::new(),
            step: Accumulator::new(),
        }
    }
}

impl Obs for PeakInfected {
    fn name(&self) -> &'static str {
        "peak_infected"
    }

    fn update(&mut self, results: &RunResults) -> Result<()> {
        let series = &results.series;
        last_step(results)?;

        // Earliest step on ties.
        let (step, n_infected) = (0..series.n_steps())
            .map(|step| (step, series.infected.iter().map(|s| s[step]).sum::<usize>()))
            .fold((0, 0), |peak, cur| if cur.1 > peak.1 { cur } else { peak });

        self.n_infected.add(n_infected as f64);
        self.step.add(series.time[step] as f64);
        Ok(())
    }

    fn report(&self) -> Result<Value> {
        let mut accs = BTreeMap::new();
        accs.insert("n_infected".to_string(), self.n_infected.clone());
        accs.insert("step".to_string(), self.step.clone());
        report_accs(&accs)
    }
}

/// Fraction of actively infected people carrying any resistance at the last timestep.
pub struct ResistantFraction {
    acc: Accumulator,
}

impl ResistantFraction {
    pub fn new() -> Self {
        Self {
            acc: Accumulator::new(),
        }
    }
}

impl Obs for ResistantFraction {
    fn name(&self) -> &'static str {
        "resistant_fraction"
    }

    fn update(&mut self, results: &RunResults) -> Result<()> {
        let step = last_step(results)?;
        let n_infected = results.series.tally(step).n_infected;

        let total: usize = n_infected.iter().sum();
        if total == 0 {
            return Ok(());
        }
        let resistant: usize = n_infected[1..].iter().sum();
        self.acc.add(resistant as f64 / total as f64);
        Ok(())
    }

    fn report(&self) -> Result<Value> {
        serde_value::to_value(self.acc.report()).context("failed to convert report")
    }
}

/// Aggregates the results of several runs.
pub struct Analyzer {
    n_runs: usize,
    obs_ptr_vec: Vec<Box<dyn Obs>>,
}

impl Analyzer {
    pub fn new() -> Self {
        let obs_ptr_vec: Vec<Box<dyn Obs>> = vec![
            Box::new(FinalCounts::new()),
            Box::new(PeakInfected::new()),
            Box::new(ResistantFraction::new()),
        ];
        Self {
            n_runs: 0,
            obs_ptr_vec,
        }
    }

    pub fn add_results(&mut self, results: &RunResults) -> Result<()> {
        for obs in &mut self.obs_ptr_vec {
            obs.update(results)
                .with_context(|| format!("failed to update {}", obs.name()))?;
        }
        self.n_runs += 1;
        Ok(())
    }

    pub fn add_file<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let results = RunResults::load(file).context("failed to load results")?;
        self.add_results(&results)
    }

    pub fn n_runs(&self) -> usize {
        self.n_runs
    }

    pub fn reports(&self) -> Result<BTreeMap<&'static str, Value>> {
        self.obs_ptr_vec
            .iter()
            .map(|obs| -> Result<_> { Ok((obs.name(), obs.report()?)) })
            .collect()
    }

    pub fn save_results<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);

        let reports = self.reports().context("failed to build reports")?;
        encode::write(&mut writer, &reports).context("failed to serialize reports")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use crate::data::SeriesData;

    fn results(infected: Vec<Vec<usize>>, uninfected: Vec<usize>) -> RunResults {
        let n_steps = uninfected.len();
        RunResults {
            cfg: test_config(),
            series: SeriesData {
                time: (0..n_steps).collect(),
                infected,
                dead: vec![1; n_steps],
                immune: vec![0; n_steps],
                uninfected,
                isolated: vec![2; n_steps],
            },
            datasets: Vec::new(),
        }
    }

    fn field<'a>(value: &'a Value, key: &str) -> &'a Value {
        match value {
            Value::Map(map) => &map[&Value::String(key.to_string())],
            _ => panic!("expected a map"),
        }
    }

    #[test]
    fn reports_every_observable() {
        let mut analyzer = Analyzer::new();
        analyzer
            .add_results(&results(vec![vec![1, 4, 2], vec![0, 2, 2]], vec![8, 3, 5]))
            .expect("failed to add results");
        analyzer
            .add_results(&results(vec![vec![3, 3, 0], vec![0, 0, 0]], vec![6, 6, 9]))
            .expect("failed to add results");
        assert_eq!(analyzer.n_runs(), 2);

        let reports = analyzer.reports().expect("failed to build reports");

        let peak = field(&reports["peak_infected"], "n_infected");
        assert_eq!(field(peak, "mean"), &Value::F64(4.5));
        let step = field(&reports["peak_infected"], "step");
        assert_eq!(field(step, "max"), &Value::F64(1.0));

        let uninfected = field(&reports["final_counts"], "Uninfected");
        assert_eq!(field(uninfected, "mean"), &Value::F64(7.0));
        let isolated = field(&reports["final_counts"], "Isolated");
        assert_eq!(field(isolated, "mean"), &Value::F64(2.0));

        // Only the first run ends with infected people.
        let fraction = &reports["resistant_fraction"];
        assert_eq!(field(fraction, "n_vals"), &Value::U64(1));
        assert_eq!(field(fraction, "mean"), &Value::F64(0.5));
    }

    #[test]
    fn rejects_empty_run() {
        let mut analyzer = Analyzer::new();
        assert!(analyzer.add_results(&results(vec![vec![]], vec![])).is_err());
    }
}
