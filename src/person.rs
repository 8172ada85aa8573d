use serde::{Deserialize, Serialize};
use std::fmt;

/// Resistance profile of an infection.
///
/// Holds one flag per drug tier, ordered from first-line to last-resort drugs.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct Infection {
    resistances: Vec<bool>,
}

impl Infection {
    /// Create an infection with no resistances.
    pub fn new(n_tiers: usize) -> Self {
        Self {
            resistances: vec![false; n_tiers],
        }
    }

    /// Make the infection resistant to the drug of the given tier.
    pub fn make_resistant(&mut self, tier: usize) {
        self.resistances[tier] = true;
    }

    pub fn is_resistant(&self, tier: usize) -> bool {
        self.resistances[tier]
    }

    /// Highest tier the infection is resistant to, `None` if it has no resistances.
    pub fn tier(&self) -> Option<usize> {
        self.resistances.iter().rposition(|&resistant| resistant)
    }

    /// Index of the infected bucket: `0` without resistances, `tier + 1` otherwise.
    pub fn bucket(&self) -> usize {
        self.tier().map_or(0, |tier| tier + 1)
    }

    pub fn n_tiers(&self) -> usize {
        self.resistances.len()
    }
}

impl fmt::Display for Infection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self
            .resistances
            .iter()
            .enumerate()
            .filter(|&(_, &resistant)| resistant)
            .map(|(tier, _)| (tier + 1).to_string())
            .collect();
        if names.is_empty() {
            write!(f, "infected")
        } else {
            write!(f, "infected with resistances: {}", names.join(","))
        }
    }
}

/// Drug currently used against an infection.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub struct Treatment {
    drug: usize,
    n_tiers: usize,
}

impl Treatment {
    /// Create a treatment with the first-line drug.
    pub fn new(n_tiers: usize) -> Self {
        Self { drug: 0, n_tiers }
    }

    pub fn drug(&self) -> usize {
        self.drug
    }

    pub fn n_tiers(&self) -> usize {
        self.n_tiers
    }

    /// Move up to the next strongest drug, saturating at the last one.
    pub fn next_treatment(&mut self) {
        if self.drug + 1 < self.n_tiers {
            self.drug += 1;
        }
    }

    /// Whether the drug works given the resistances of the infection.
    pub fn treats_infection(&self, infection: &Infection) -> bool {
        !infection.is_resistant(self.drug)
    }
}

impl fmt::Display for Treatment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "treated with drug: {}", self.drug + 1)
    }
}

/// Person of the simulation.
///
/// Copies never share an infection or a treatment, so the population can be
/// snapshotted with [`Clone`].
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct Person {
    infection: Option<Infection>,
    treatment: Option<Treatment>,
    isolated: bool,
    immune: bool,
    alive: bool,
}

impl Default for Person {
    fn default() -> Self {
        Self::new()
    }
}

impl Person {
    /// Create an uninfected, susceptible person.
    pub fn new() -> Self {
        Self {
            infection: None,
            treatment: None,
            isolated: false,
            immune: false,
            alive: true,
        }
    }

    /// Create a person carrying the given infection, untreated.
    pub fn with_infection(infection: Infection) -> Self {
        Self {
            infection: Some(infection),
            ..Self::new()
        }
    }

    pub fn infection(&self) -> Option<&Infection> {
        self.infection.as_ref()
    }

    pub fn treatment(&self) -> Option<&Treatment> {
        self.treatment.as_ref()
    }

    pub fn is_isolated(&self) -> bool {
        self.isolated
    }

    pub fn is_immune(&self) -> bool {
        self.immune
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Alive and not immune: able to receive an infection.
    pub fn is_susceptible(&self) -> bool {
        self.alive && !self.immune
    }

    /// Alive, not immune and carrying an infection.
    pub fn is_infectious(&self) -> bool {
        self.is_susceptible() && self.infection.is_some()
    }

    /// Start treatment with the first-line drug.
    pub fn start_treatment(&mut self, n_tiers: usize) {
        self.treatment = Some(Treatment::new(n_tiers));
    }

    /// Move the treatment up by one tier.
    pub fn increase_treatment(&mut self) {
        if let Some(treatment) = &mut self.treatment {
            treatment.next_treatment();
        }
    }

    /// Whether the current treatment overcomes the resistances of the infection.
    pub fn correct_treatment(&self) -> bool {
        match (&self.treatment, &self.infection) {
            (Some(treatment), Some(infection)) => treatment.treats_infection(infection),
            _ => false,
        }
    }

    /// Make the infection resistant to the drug it is treated with.
    pub fn mutate_infection(&mut self) {
        if let (Some(infection), Some(treatment)) = (&mut self.infection, &self.treatment) {
            infection.make_resistant(treatment.drug());
        }
    }

    /// Clear the infection and the treatment and make the person immune,
    /// irrespective of any resistances the infection had.
    pub fn recover(&mut self) {
        self.infection = None;
        self.treatment = None;
        self.deisolate();
        self.immune = true;
    }

    /// Give a copy of the infection to `other`, as long as it can receive it,
    /// does not already carry an equally or more resistant infection,
    /// and neither person is isolated.
    pub fn spread_infection(&self, other: &mut Person) {
        let Some(infection) = &self.infection else {
            return;
        };

        let directional = other
            .infection
            .as_ref()
            .is_none_or(|other_infection| infection.tier() > other_infection.tier());
        let susceptible = other.is_susceptible();
        let contactable = !self.isolated && !other.isolated;

        if directional && susceptible && contactable {
            other.infection = Some(infection.clone());
        }
    }

    pub fn isolate(&mut self) {
        self.isolated = true;
    }

    pub fn deisolate(&mut self) {
        self.isolated = false;
    }

    pub fn die(&mut self) {
        self.alive = false;
    }
}

impl fmt::Display for Person {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.alive {
            return write!(f, "Dead person");
        }
        if self.immune {
            return write!(f, "Immune person");
        }
        match (&self.infection, &self.treatment) {
            (Some(infection), Some(treatment)) => write!(f, "Person {infection} and {treatment}"),
            (Some(infection), None) => write!(f, "Person {infection} and untreated"),
            (None, _) => write!(f, "Uninfected person"),
        }
    }
}
