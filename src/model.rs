use crate::config::{Config, ModelConfig};
use crate::data::{DataHandler, Dataset, SeriesData};
use crate::person::{Infection, Person, Treatment};
use crate::sampling::sample;
use anyhow::{Context, Result, bail};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rand_distr::Bernoulli;
use rmp_serde::{decode, encode};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// Simulation model.
///
/// Holds the configuration, current population, data handler and random
/// number generator, and runs the timestep loop.
pub struct Model {
    cfg: Config,
    population: Vec<Person>,
    data_handler: DataHandler,
    rng: ChaCha12Rng,
}

/// Per-step event distributions.
struct Dists {
    general_recovery: Bernoulli,
    treatment_recovery: Bernoulli,
    mutation: Bernoulli,
    move_up_treatment: Bernoulli,
    death: Bernoulli,
    spread: Bernoulli,
    product_detect: Bernoulli,
}

impl Dists {
    fn new(cfg: &ModelConfig) -> Result<Self> {
        Ok(Self {
            general_recovery: Bernoulli::new(cfg.prob_general_recovery)?,
            treatment_recovery: Bernoulli::new(cfg.prob_treatment_recovery)?,
            mutation: Bernoulli::new(cfg.prob_mutation)?,
            move_up_treatment: Bernoulli::new(cfg.prob_move_up_treatment)?,
            death: Bernoulli::new(cfg.prob_death)?,
            spread: Bernoulli::new(cfg.prob_spread)?,
            product_detect: Bernoulli::new(cfg.prob_product_detect)?,
        })
    }
}

impl Model {
    /// Create a new `Model` whose population starts with `n_infected` fresh
    /// infections and is otherwise uninfected.
    pub fn new(cfg: Config) -> Result<Self> {
        cfg.validate().context("failed to validate config")?;

        let n_agents = cfg.init.n_agents;
        let n_infected = cfg.init.n_infected;

        let mut population = Vec::with_capacity(n_agents);
        population.resize_with(n_agents - n_infected, Person::new);
        population.resize_with(n_agents, || {
            Person::with_infection(Infection::new(cfg.model.n_tiers))
        });

        Self::with_population(cfg, population)
    }

    /// Create a new `Model` with the given initial population.
    pub fn with_population(cfg: Config, population: Vec<Person>) -> Result<Self> {
        cfg.validate().context("failed to validate config")?;

        let n_agents = population.len();
        if n_agents != cfg.init.n_agents {
            bail!(
                "population size must be {}, but is {n_agents}",
                cfg.init.n_agents
            );
        }
        check_tiers(&population, cfg.model.n_tiers).context("invalid population")?;

        let rng = match cfg.init.seed {
            Some(seed) => ChaCha12Rng::seed_from_u64(seed),
            None => ChaCha12Rng::try_from_os_rng()?,
        };
        let data_handler = DataHandler::new(&cfg);

        Ok(Self {
            cfg,
            population,
            data_handler,
            rng,
        })
    }

    #[cfg(test)]
    pub fn population(&self) -> &[Person] {
        &self.population
    }

    pub fn data_handler(&self) -> &DataHandler {
        &self.data_handler
    }

    /// Simulate the configured number of timesteps.
    pub fn run(&mut self) -> Result<()> {
        let dists = Dists::new(&self.cfg.model).context("failed to construct distributions")?;

        self.data_handler.reset();

        let i_agt_all: Vec<usize> = (0..self.population.len()).collect();

        for _ in 0..self.cfg.output.n_steps {
            self.perform_step(&dists, &i_agt_all)
                .context("failed to perform step")?;
        }

        Ok(())
    }

    /// Package the configuration, the recorded series and their charting data sets.
    pub fn results(&self) -> RunResults {
        let series = self.data_handler.series().clone();
        let datasets = series.datasets(self.cfg.output.graph_type);
        RunResults {
            cfg: self.cfg.clone(),
            series,
            datasets,
        }
    }

    fn perform_step(&mut self, dists: &Dists, i_agt_all: &[usize]) -> Result<()> {
        for person in &mut self.population {
            self.data_handler.record_person(person);
            update_person(person, &self.cfg.model, dists, &mut self.rng);
        }

        // Spread onto copies so that people infected during this step
        // cannot spread it further until the next one.
        let mut updated_population = self.population.clone();
        for person in &self.population {
            if !person.is_infectious() || !dists.spread.sample(&mut self.rng) {
                continue;
            }
            let i_tgt_vec = sample(i_agt_all, self.cfg.model.n_spread_to, &mut self.rng)
                .context("failed to sample spread targets")?;
            for &i_tgt in i_tgt_vec {
                person.spread_infection(&mut updated_population[i_tgt]);
            }
        }
        self.population = updated_population;

        self.data_handler.process_timestep_data();

        Ok(())
    }
}

fn check_tiers(population: &[Person], n_tiers: usize) -> Result<()> {
    for (i_agt, person) in population.iter().enumerate() {
        let infection_tiers = person.infection().map(Infection::n_tiers);
        let treatment_tiers = person.treatment().map(Treatment::n_tiers);
        for person_tiers in [infection_tiers, treatment_tiers].into_iter().flatten() {
            if person_tiers != n_tiers {
                bail!("person {i_agt} must have {n_tiers} tiers, but has {person_tiers}");
            }
        }
    }
    Ok(())
}

fn update_person<R: Rng + ?Sized>(
    person: &mut Person,
    cfg: &ModelConfig,
    dists: &Dists,
    rng: &mut R,
) {
    if !person.is_infectious() {
        return;
    }

    if person.treatment().is_none() {
        person.start_treatment(cfg.n_tiers);
    } else {
        if dists.move_up_treatment.sample(rng) {
            person.increase_treatment();
        }

        let threshold = cfg.isolation_threshold;
        if cfg.product_in_use && dists.product_detect.sample(rng) {
            let resistant = person
                .infection()
                .is_some_and(|infection| infection.is_resistant(threshold));
            if resistant {
                person.isolate();
            }
        } else if person.treatment().map_or(0, Treatment::drug) >= threshold {
            person.isolate();
        }
    }

    let general_recovery = dists.general_recovery.sample(rng);
    let treatment_recovery = person.correct_treatment() && dists.treatment_recovery.sample(rng);
    if general_recovery || treatment_recovery {
        person.recover();
    }

    if dists.mutation.sample(rng) {
        person.mutate_infection();
    }

    if dists.death.sample(rng) {
        person.die();
    }
}

/// Configuration and series of a completed run.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct RunResults {
    pub cfg: Config,
    pub series: SeriesData,
    pub datasets: Vec<Dataset>,
}

impl RunResults {
    /// Save the results to a MessagePack-encoded file.
    pub fn save<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);
        encode::write(&mut writer, self).context("failed to serialize results")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }

    /// Load previously saved results.
    pub fn load<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);
        let results = decode::from_read(&mut reader).context("failed to deserialize results")?;
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;

    fn quiet_config(n_agents: usize, n_infected: usize, n_steps: usize) -> Config {
        let mut cfg = test_config();
        cfg.model.n_tiers = 1;
        cfg.model.prob_general_recovery = 0.0;
        cfg.model.prob_treatment_recovery = 0.0;
        cfg.model.prob_mutation = 0.0;
        cfg.model.prob_move_up_treatment = 0.0;
        cfg.model.prob_death = 0.0;
        cfg.model.prob_spread = 0.0;
        cfg.model.isolation_threshold = 0;
        cfg.model.product_in_use = false;
        cfg.model.prob_product_detect = 0.0;
        cfg.init.n_agents = n_agents;
        cfg.init.n_infected = n_infected;
        cfg.output.n_steps = n_steps;
        cfg
    }

    fn run_model(cfg: Config) -> Model {
        let mut model = Model::new(cfg).expect("failed to construct model");
        model.run().expect("failed to run model");
        model
    }

    #[test]
    fn single_step_keeps_initial_distribution() {
        let model = run_model(quiet_config(10, 1, 1));
        let series = model.data_handler().series();
        assert_eq!(series.infected, vec![vec![1], vec![0]]);
        assert_eq!(series.uninfected, vec![9]);
        assert_eq!(series.dead, vec![0]);
        assert_eq!(series.immune, vec![0]);
        assert_eq!(series.isolated, vec![0]);
    }

    #[test]
    fn counts_sum_to_population_size() {
        let cfg = test_config();
        let n_agents = cfg.init.n_agents;
        let n_steps = cfg.output.n_steps;
        let model = run_model(cfg);
        let series = model.data_handler().series();
        assert_eq!(series.n_steps(), n_steps);
        for step in 0..n_steps {
            assert_eq!(series.tally(step).total(), n_agents);
        }
        assert_eq!(model.population().len(), n_agents);
    }

    #[test]
    fn same_seed_replays_identically() {
        let mut cfg = test_config();
        cfg.init.seed = Some(42);
        cfg.output.n_steps = 40;
        let model_a = run_model(cfg.clone());
        let model_b = run_model(cfg);
        assert_eq!(model_a.results(), model_b.results());
        assert_eq!(model_a.population(), model_b.population());
    }

    #[test]
    fn rejects_population_of_wrong_size() {
        let cfg = quiet_config(10, 0, 1);
        assert!(Model::with_population(cfg, vec![Person::new(); 9]).is_err());
    }

    #[test]
    fn uninfected_population_stays_uninfected() {
        let mut cfg = test_config();
        cfg.init.n_infected = 0;
        let n_agents = cfg.init.n_agents;
        let model = run_model(cfg);
        let series = model.data_handler().series();
        assert!(series.uninfected.iter().all(|&n| n == n_agents));
        assert!(series.infected[0].iter().all(|&n| n == 0));
    }

    #[test]
    fn dead_people_do_not_spread() {
        let mut cfg = quiet_config(20, 5, 2);
        cfg.model.prob_death = 1.0;
        cfg.model.prob_spread = 1.0;
        cfg.model.n_spread_to = 20;
        let model = run_model(cfg);
        let series = model.data_handler().series();
        assert_eq!(series.infected[0], vec![5, 0]);
        assert_eq!(series.dead, vec![0, 5]);
        assert_eq!(series.uninfected, vec![15, 15]);
    }

    #[test]
    fn recovery_makes_people_immune() {
        let mut cfg = quiet_config(20, 5, 3);
        cfg.model.prob_general_recovery = 1.0;
        cfg.model.prob_spread = 1.0;
        cfg.model.n_spread_to = 20;
        let model = run_model(cfg);
        let series = model.data_handler().series();
        assert_eq!(series.immune, vec![0, 5, 5]);
        assert_eq!(series.uninfected, vec![15, 15, 15]);
        assert!(model.population().iter().filter(|p| p.is_immune()).count() == 5);
    }

    #[test]
    fn spread_reaches_every_target() {
        let mut cfg = quiet_config(20, 2, 2);
        cfg.model.prob_spread = 1.0;
        cfg.model.n_spread_to = 20;
        let model = run_model(cfg);
        let series = model.data_handler().series();
        assert_eq!(series.infected[0], vec![2, 20]);
        assert_eq!(series.uninfected, vec![18, 0]);
    }

    #[test]
    fn isolates_by_treatment_tier() {
        let cfg = quiet_config(10, 4, 3);
        let model = run_model(cfg);
        let series = model.data_handler().series();
        // Treatment starts on the first step, isolation follows on the second.
        assert_eq!(series.isolated, vec![0, 0, 4]);
    }

    #[test]
    fn isolates_by_detected_resistance() {
        let mut cfg = quiet_config(10, 4, 3);
        cfg.model.product_in_use = true;
        cfg.model.prob_product_detect = 1.0;
        let model = run_model(cfg.clone());
        assert_eq!(model.data_handler().series().isolated, vec![0, 0, 0]);

        let mut resistant = Infection::new(1);
        resistant.make_resistant(0);
        let mut population = vec![Person::new(); 6];
        population.extend(vec![Person::with_infection(resistant); 4]);
        let mut model = Model::with_population(cfg, population).expect("failed to construct model");
        model.run().expect("failed to run model");
        assert_eq!(model.data_handler().series().isolated, vec![0, 0, 4]);
        assert_eq!(model.data_handler().series().infected[1], vec![4, 4, 4]);
    }

    #[test]
    fn missed_detection_falls_back_to_treatment_tier() {
        let mut cfg = quiet_config(10, 4, 3);
        cfg.model.product_in_use = true;
        cfg.model.prob_product_detect = 0.0;
        let model = run_model(cfg);
        assert_eq!(model.data_handler().series().isolated, vec![0, 0, 4]);
    }

    #[test]
    fn rejects_population_with_other_tier_count() {
        let mut cfg = quiet_config(3, 0, 1);
        cfg.model.n_tiers = 3;

        let mut foreign = Infection::new(5);
        foreign.make_resistant(4);
        let population = vec![Person::new(), Person::new(), Person::with_infection(foreign)];
        assert!(Model::with_population(cfg.clone(), population).is_err());

        let mut treated = Person::with_infection(Infection::new(3));
        treated.start_treatment(2);
        let population = vec![Person::new(), Person::new(), treated];
        assert!(Model::with_population(cfg.clone(), population).is_err());

        let mut treated = Person::with_infection(Infection::new(3));
        treated.start_treatment(3);
        let population = vec![Person::new(), Person::new(), treated];
        assert!(Model::with_population(cfg, population).is_ok());
    }

    #[test]
    fn escalation_and_mutation_raise_tier() {
        let mut cfg = quiet_config(5, 5, 6);
        cfg.model.n_tiers = 3;
        cfg.model.isolation_threshold = 2;
        cfg.model.prob_move_up_treatment = 1.0;
        cfg.model.prob_mutation = 1.0;
        let model = run_model(cfg);
        let series = model.data_handler().series();
        // Step 0: drug 1 starts and the infection resists it.
        // Steps 1 and 2: the drug moves up and is resisted again.
        assert_eq!(series.infected[0], vec![5, 0, 0, 0, 0, 0]);
        assert_eq!(series.infected[1], vec![0, 5, 0, 0, 0, 0]);
        assert_eq!(series.infected[2], vec![0, 0, 5, 0, 0, 0]);
        assert_eq!(series.infected[3], vec![0, 0, 0, 5, 5, 5]);
        assert_eq!(series.isolated, vec![0, 0, 0, 5, 5, 5]);
    }

    #[test]
    fn results_survive_save_and_load() {
        let model = run_model(quiet_config(10, 1, 2));
        let dir = std::env::temp_dir().join(format!("resistance-sim-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("failed to create dir");
        let file = dir.join("results.msgpack");

        let results = model.results();
        results.save(&file).expect("failed to save results");
        let loaded = RunResults::load(&file).expect("failed to load results");
        assert_eq!(loaded, results);

        std::fs::remove_dir_all(&dir).ok();
    }
}
