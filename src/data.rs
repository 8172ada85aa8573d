use crate::config::{Config, GraphType};
use crate::person::Person;
use serde::{Deserialize, Serialize};

/// Counts of a single timestep.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct Tally {
    /// Actively infected people per bucket (no resistance, then each tier).
    pub n_infected: Vec<usize>,
    pub n_dead: usize,
    pub n_immune: usize,
    pub n_uninfected: usize,
    /// Isolated people, overlapping every other category.
    pub n_isolated: usize,
}

impl Tally {
    fn new(n_tiers: usize) -> Self {
        Self {
            n_infected: vec![0; n_tiers + 1],
            ..Self::default()
        }
    }

    /// Sum of the disjoint categories.
    #[cfg(test)]
    pub fn total(&self) -> usize {
        self.n_dead + self.n_immune + self.n_uninfected + self.n_infected.iter().sum::<usize>()
    }
}

/// Labeled series, one entry per completed timestep.
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
pub struct SeriesData {
    pub time: Vec<usize>,
    /// One series per infected bucket.
    pub infected: Vec<Vec<usize>>,
    pub dead: Vec<usize>,
    pub immune: Vec<usize>,
    pub uninfected: Vec<usize>,
    pub isolated: Vec<usize>,
}

/// Series ready to be drawn by a charting tool.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub label: String,
    pub data: Vec<usize>,
    /// CSS colour of the series line.
    pub border_color: String,
}

/// Evenly spaced hues, one per series.
fn generate_colours(n_colours: usize) -> Vec<String> {
    let n_colours = n_colours.max(1);
    (0..n_colours)
        .map(|i_col| format!("hsl({}, 40%, 60%)", i_col * 360 / n_colours % 360))
        .collect()
}

impl SeriesData {
    fn new(n_tiers: usize) -> Self {
        Self {
            infected: vec![Vec::new(); n_tiers + 1],
            ..Self::default()
        }
    }

    pub fn n_steps(&self) -> usize {
        self.time.len()
    }

    pub fn n_tiers(&self) -> usize {
        self.infected.len().saturating_sub(1)
    }

    /// Counts of the timestep `step`.
    pub fn tally(&self, step: usize) -> Tally {
        Tally {
            n_infected: self.infected.iter().map(|series| series[step]).collect(),
            n_dead: self.dead[step],
            n_immune: self.immune[step],
            n_uninfected: self.uninfected[step],
            n_isolated: self.isolated[step],
        }
    }

    fn push(&mut self, step: usize, tally: &Tally) {
        for (series, &count) in self.infected.iter_mut().zip(&tally.n_infected) {
            series.push(count);
        }
        self.dead.push(tally.n_dead);
        self.immune.push(tally.n_immune);
        self.uninfected.push(tally.n_uninfected);
        self.isolated.push(tally.n_isolated);
        self.time.push(step);
    }

    /// Labels of the disjoint series, in data set order.
    pub fn labels(&self) -> Vec<String> {
        let mut labels = vec!["Infected".to_string()];
        labels.extend((1..=self.n_tiers()).map(|tier| format!("Resistance {tier}")));
        labels.extend(["Dead", "Immune", "Uninfected"].map(String::from));
        labels
    }

    /// Build the data sets of the given graph type.
    ///
    /// Line graphs need not sum to the population size, so each infected
    /// series includes every more resistant bucket (infected = i + r1 + r2,
    /// resistance 1 = r1 + r2, ...) and the isolated series is appended.
    pub fn datasets(&self, graph_type: GraphType) -> Vec<Dataset> {
        let mut datas: Vec<Vec<usize>> = match graph_type {
            GraphType::Stackplot => self.infected.clone(),
            GraphType::Line => (0..self.infected.len())
                .map(|i_bkt| {
                    (0..self.n_steps())
                        .map(|step| self.infected[i_bkt..].iter().map(|s| s[step]).sum::<usize>())
                        .collect()
                })
                .collect(),
        };
        datas.extend([self.dead.clone(), self.immune.clone(), self.uninfected.clone()]);

        let mut labels = self.labels();
        if graph_type == GraphType::Line {
            datas.push(self.isolated.clone());
            labels.push("Isolated".to_string());
        }

        let colours = generate_colours(labels.len());
        labels
            .into_iter()
            .zip(datas)
            .zip(colours)
            .map(|((label, data), border_color)| Dataset {
                label,
                data,
                border_color,
            })
            .collect()
    }
}

/// Aggregates the population into per-timestep series and reports progress.
pub struct DataHandler {
    n_tiers: usize,
    n_steps: usize,
    report_mod_num: usize,
    report_progress: bool,
    print_data: bool,

    timestep: usize,
    tally: Tally,
    series: SeriesData,
}

impl DataHandler {
    pub fn new(cfg: &Config) -> Self {
        let n_tiers = cfg.model.n_tiers;
        Self {
            n_tiers,
            n_steps: cfg.output.n_steps,
            report_mod_num: cfg.report_mod_num(),
            report_progress: cfg.output.report_progress,
            print_data: cfg.output.print_data,
            timestep: 0,
            tally: Tally::new(n_tiers),
            series: SeriesData::new(n_tiers),
        }
    }

    /// Discard all recorded data.
    pub fn reset(&mut self) {
        self.timestep = 0;
        self.tally = Tally::new(self.n_tiers);
        self.series = SeriesData::new(self.n_tiers);
    }

    /// Count a person in exactly one of immune, dead, uninfected or an
    /// infected bucket, and separately as isolated.
    pub fn record_person(&mut self, person: &Person) {
        if person.is_immune() {
            self.tally.n_immune += 1;
        } else if !person.is_alive() {
            self.tally.n_dead += 1;
        } else if let Some(infection) = person.infection() {
            self.tally.n_infected[infection.bucket()] += 1;
        } else {
            self.tally.n_uninfected += 1;
        }

        if person.is_isolated() {
            self.tally.n_isolated += 1;
        }
    }

    /// Store the current timestep's counts, report them and start a new timestep.
    pub fn process_timestep_data(&mut self) {
        self.series.push(self.timestep, &self.tally);

        if self.timestep % self.report_mod_num == 0 {
            self.report_model_state();
        }

        self.tally = Tally::new(self.n_tiers);
        self.timestep += 1;
    }

    #[cfg(test)]
    pub fn tally(&self) -> &Tally {
        &self.tally
    }

    pub fn series(&self) -> &SeriesData {
        &self.series
    }

    fn report_model_state(&self) {
        let progress = format!("{}% complete", 100 * self.timestep / self.n_steps);
        match (self.report_progress, self.print_data) {
            (false, false) => {}
            (true, false) => log::info!("{progress}"),
            (false, true) => log::info!("{}", format_tally(&self.tally)),
            (true, true) => log::info!("{progress} - {}", format_tally(&self.tally)),
        }
    }
}

fn format_tally(tally: &Tally) -> String {
    let infected: Vec<_> = tally.n_infected.iter().map(usize::to_string).collect();
    format!(
        "uninfected: {}, immune: {}, dead: {}, infected: [{}], isolated: {}",
        tally.n_uninfected,
        tally.n_immune,
        tally.n_dead,
        infected.join(", "),
        tally.n_isolated
    )
}
