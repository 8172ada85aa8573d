use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, fs, ops::RangeBounds, path::Path};

/// Simulation configuration parameters.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Disease and treatment parameters.
    pub model: ModelConfig,
    /// Initial population parameters.
    pub init: InitConfig,
    /// Run length and reporting parameters.
    pub output: OutputConfig,
}

/// Disease and treatment parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Number of resistance (and drug) tiers.
    pub n_tiers: usize,

    /// Probability per step of recovering without effective treatment.
    pub prob_general_recovery: f64,
    /// Probability per step of recovering under effective treatment.
    pub prob_treatment_recovery: f64,
    /// Probability per step of the infection resisting the current drug.
    pub prob_mutation: f64,
    /// Probability per step of escalating the treatment one tier.
    pub prob_move_up_treatment: f64,
    /// Probability per step of an infected person dying.
    pub prob_death: f64,
    /// Probability per step of an infected person spreading the infection.
    pub prob_spread: f64,

    /// Number of people each spreading person contacts.
    pub n_spread_to: usize,

    /// Tier from which people are isolated (0-based: `0` is the first-line drug).
    pub isolation_threshold: usize,

    /// Whether resistance detection decides isolation.
    pub product_in_use: bool,
    /// Probability per step of the detection product firing.
    pub prob_product_detect: f64,
}

/// Initial population parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct InitConfig {
    /// Population size.
    pub n_agents: usize,
    /// Number of initially infected people.
    pub n_infected: usize,
    /// Random seed (non-reproducible run if absent).
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Run length and reporting parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Number of timesteps.
    pub n_steps: usize,
    /// Print the percentage of the run completed.
    pub report_progress: bool,
    /// Print the current counts.
    pub print_data: bool,
    /// Percentage of the run between reports.
    pub report_percentage: usize,
    /// Layout of the charting data sets.
    pub graph_type: GraphType,
}

/// Layout of the series handed to a charting tool.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphType {
    /// Cumulative infected series plus the non-disjoint isolated series.
    Line,
    /// Disjoint series summing to the population size.
    Stackplot,
}

impl Config {
    /// Load a [`Config`] from a file.
    ///
    /// The file must be TOML-encoded and contain a serialized [`Config`].
    /// Performs validation on all parameters before returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;

        let config: Config = toml::from_str(&contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let model = &self.model;
        check_num(model.n_tiers, 1..100).context("invalid number of tiers")?;

        check_num(model.prob_general_recovery, 0.0..=1.0)
            .context("invalid general recovery probability")?;
        check_num(model.prob_treatment_recovery, 0.0..=1.0)
            .context("invalid treatment recovery probability")?;
        check_num(model.prob_mutation, 0.0..=1.0).context("invalid mutation probability")?;
        check_num(model.prob_move_up_treatment, 0.0..=1.0)
            .context("invalid move up treatment probability")?;
        check_num(model.prob_death, 0.0..=1.0).context("invalid death probability")?;
        check_num(model.prob_spread, 0.0..=1.0).context("invalid spread probability")?;
        check_num(model.prob_product_detect, 0.0..=1.0)
            .context("invalid product detection probability")?;

        check_num(model.isolation_threshold, 0..model.n_tiers)
            .context("invalid isolation threshold")?;

        let init = &self.init;
        check_num(init.n_agents, 1..10_000_000).context("invalid number of agents")?;
        check_num(init.n_infected, 0..=init.n_agents)
            .context("invalid initial number of infected agents")?;
        check_num(model.n_spread_to, 0..=init.n_agents)
            .context("invalid number of people spread to")?;

        let output = &self.output;
        check_num(output.n_steps, 1..1_000_000).context("invalid number of steps")?;
        check_num(output.report_percentage, 1..=100).context("invalid report percentage")?;

        Ok(())
    }

    /// Number of steps between progress reports.
    pub fn report_mod_num(&self) -> usize {
        let n_steps = self.output.n_steps as f64;
        let n_reports = 100.0 / self.output.report_percentage as f64;
        ((n_steps / n_reports) as usize).max(1)
    }
}

fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}
