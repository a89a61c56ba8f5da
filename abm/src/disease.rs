// Copyright 2024 Nathan Geffen

// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at

//     http://www.apache.org/licenses/LICENSE-2.0

// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Disease parameters and sampling.
//!
//! `Disease` holds only parameters and lookup curves; every method here is
//! pure given its inputs, plus whatever randomness it draws from the
//! `RandomPool` it is handed. It holds no simulation state of its own.

use crate::classed_values::ClassedValues;
use crate::person::{PersonSnapshot, Severity, State};
use crate::population::Population;
use crate::random::RandomPool;

/// Relative-infectiousness weight by day offset from symptom onset.
/// Negative days are before onset (incubation); all other days not listed
/// contribute zero.
const INFECTIOUSNESS_OVER_TIME: &[(i32, f32)] = &[
    (-2, 0.12),
    (-1, 0.29),
    (0, 0.27),
    (1, 0.07),
    (2, 0.05),
    (3, 0.04),
    (4, 0.03),
    (5, 0.02),
    (6, 0.02),
    (7, 0.01),
    (8, 0.01),
    (9, 0.01),
    (10, 0.01),
];

fn infectiousness_weight(day: i32) -> f32 {
    INFECTIOUSNESS_OVER_TIME
        .iter()
        .find(|&&(d, _)| d == day)
        .map(|&(_, w)| w)
        .unwrap_or(0.0)
}

/// Disease parameters and sampling curves.
#[derive(Debug, Clone)]
pub struct Disease {
    pub p_infection: f32,
    pub p_asymptomatic: f32,
    pub p_severe: ClassedValues,
    pub p_critical: ClassedValues,
    pub p_hospital_death: f32,
    pub p_icu_death: f32,
    pub p_hospital_death_no_beds: f32,
    pub p_icu_death_no_beds: f32,
    pub mean_illness_duration: f32,
    pub mean_hospitalization_duration: f32,
    pub mean_icu_duration: f32,
}

impl Disease {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        p_infection: f32,
        p_asymptomatic: f32,
        p_severe: ClassedValues,
        p_critical: ClassedValues,
        p_hospital_death: f32,
        p_icu_death: f32,
        p_hospital_death_no_beds: f32,
        p_icu_death_no_beds: f32,
        mean_illness_duration: f32,
        mean_hospitalization_duration: f32,
        mean_icu_duration: f32,
    ) -> Self {
        Disease {
            p_infection,
            p_asymptomatic,
            p_severe,
            p_critical,
            p_hospital_death,
            p_icu_death,
            p_hospital_death_no_beds,
            p_icu_death_no_beds,
            mean_illness_duration,
            mean_hospitalization_duration,
            mean_icu_duration,
        }
    }

    /// Weighted infectiousness for a day relative to symptom onset.
    pub fn get_infectiousness_over_time(&self, day: i32) -> f32 {
        infectiousness_weight(day) * self.p_infection
    }

    /// Current infectiousness of `source`, 0 outside Incubation/Illness.
    pub fn source_infectiousness(&self, source: &PersonSnapshot) -> f32 {
        let day = match source.state {
            State::Incubation => -source.days_left,
            State::Illness => source.day_of_illness,
            _ => return 0.0,
        };
        self.get_infectiousness_over_time(day)
    }

    /// Whether `source` infects a contact this attempt.
    ///
    /// Asymptomatic sources are not discounted.
    pub fn did_infect(&self, source: &PersonSnapshot, rng: &RandomPool) -> bool {
        rng.chance(self.source_infectiousness(source))
    }

    /// Number of contacts `person` exposes today.
    pub fn people_exposed(&self, person: &PersonSnapshot, pop: &Population, rng: &RandomPool) -> u32 {
        if person.was_detected || self.source_infectiousness(person) <= 0.0 {
            return 0;
        }
        match person.state {
            State::Incubation => pop.contacts_per_day(person.age, 1.0, 100, rng),
            State::Illness if person.severity == Severity::Asymptomatic => {
                pop.contacts_per_day(person.age, 1.0, 100, rng)
            }
            State::Illness => pop.contacts_per_day(person.age, 0.5, 5, rng),
            _ => 0,
        }
    }

    /// Rolls whether a hospitalized/ICU patient dies, given whether care
    /// (a bed/ICU unit) was actually available.
    pub fn dies_in_hospital(&self, in_icu: bool, care_available: bool, rng: &RandomPool) -> bool {
        let p = match (in_icu, care_available) {
            (true, true) => self.p_icu_death,
            (true, false) => self.p_icu_death_no_beds,
            (false, true) => self.p_hospital_death,
            (false, false) => self.p_hospital_death_no_beds,
        };
        rng.chance(p)
    }

    fn sampled_duration(rng: &RandomPool, mean: f32, sigma: f32, lognormal_mean: f32, cap: i32) -> i32 {
        let raw = 1.0 + (rng.lognormal(lognormal_mean, sigma) * mean).floor();
        (raw as i32).clamp(1, cap)
    }

    /// Incubation duration, independent of `mean_illness_duration`.
    pub fn incubation_days(&self, rng: &RandomPool) -> i32 {
        Self::sampled_duration(rng, 1.5, 0.4, 1.0, 14)
    }

    /// Illness duration. When `mean_illness_duration` is zero, the
    /// multiplier zeroes out the sampled lognormal term and this always
    /// returns 1.
    pub fn illness_days(&self, rng: &RandomPool) -> i32 {
        Self::sampled_duration(rng, self.mean_illness_duration, 0.6, 0.0, 40)
    }

    pub fn hospitalization_days(&self, rng: &RandomPool) -> i32 {
        Self::sampled_duration(rng, self.mean_hospitalization_duration, 0.5, 0.0, 50)
    }

    pub fn icu_days(&self, rng: &RandomPool) -> i32 {
        Self::sampled_duration(rng, self.mean_icu_duration, 0.3, 0.0, 50)
    }

    /// Assigns symptom severity for a newly infected agent of the given age.
    pub fn symptom_severity(&self, age: i32, rng: &RandomPool) -> Severity {
        let u = rng.get();
        let sc = self.p_severe.get_greatest_lte(age);
        let cc = self.p_critical.get_greatest_lte(age);
        if u < sc * cc {
            Severity::Critical
        } else if u < sc {
            Severity::Severe
        } else if u < 1.0 - self.p_asymptomatic {
            Severity::Mild
        } else {
            Severity::Asymptomatic
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disease() -> Disease {
        Disease::new(
            1.0,
            0.3,
            ClassedValues::new(vec![(0, 0.1), (60, 0.3)]),
            ClassedValues::new(vec![(0, 0.05), (60, 0.2)]),
            0.1,
            0.3,
            0.9,
            0.95,
            3.0,
            5.0,
            6.0,
        )
    }

    #[test]
    fn infectiousness_table_values() {
        let d = disease();
        assert_eq!(d.get_infectiousness_over_time(-2), 0.12);
        assert_eq!(d.get_infectiousness_over_time(0), 0.27);
        assert_eq!(d.get_infectiousness_over_time(10), 0.01);
        assert_eq!(d.get_infectiousness_over_time(11), 0.0);
        assert_eq!(d.get_infectiousness_over_time(-3), 0.0);
    }

    #[test]
    fn incubation_days_is_bounded() {
        let d = disease();
        let rng = RandomPool::new(7);
        for _ in 0..1000 {
            let days = d.incubation_days(&rng);
            assert!((1..=14).contains(&days));
        }
    }

    #[test]
    fn illness_days_is_bounded() {
        let d = disease();
        let rng = RandomPool::new(8);
        for _ in 0..1000 {
            let days = d.illness_days(&rng);
            assert!((1..=40).contains(&days));
        }
    }

    #[test]
    fn zero_mean_illness_duration_always_clamps_to_one() {
        let mut d = disease();
        d.mean_illness_duration = 0.0;
        let rng = RandomPool::new(9);
        for _ in 0..100 {
            assert_eq!(d.illness_days(&rng), 1);
        }
    }

    #[test]
    fn severity_thresholds_respect_asymptomatic_probability() {
        let mut d = disease();
        d.p_asymptomatic = 1.0;
        d.p_severe = ClassedValues::new(vec![(0, 0.0)]);
        d.p_critical = ClassedValues::new(vec![(0, 0.0)]);
        let rng = RandomPool::new(10);
        for _ in 0..1000 {
            assert_eq!(d.symptom_severity(40, &rng), Severity::Asymptomatic);
        }
    }
}
