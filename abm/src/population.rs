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

//! Age-indexed population counters and mobility modifiers.

use crate::classed_values::ClassedValues;
use crate::random::RandomPool;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

fn counters(max_age: usize) -> Vec<AtomicI64> {
    (0..=max_age).map(|_| AtomicI64::new(0)).collect()
}

/// Per-age population counters plus population-wide mobility/gathering
/// modifiers.
#[derive(Debug)]
pub struct Population {
    max_age: usize,
    susceptible: Vec<AtomicI64>,
    infected: Vec<AtomicI64>,
    detected: Vec<AtomicI64>,
    recovered: Vec<AtomicI64>,
    hospitalized: Vec<AtomicI64>,
    in_icu: Vec<AtomicI64>,
    dead: Vec<AtomicI64>,
    all_infected: Vec<AtomicI64>,
    all_detected: Vec<AtomicI64>,
    avg_contacts_per_day: ClassedValues,
    /// Stored as bits of an f32 so it can be read/written atomically.
    mobility_factor_bits: AtomicU32,
    /// 0 disables the cap.
    limit_mass_gatherings: AtomicU32,
}

impl Population {
    /// `age_counts` gives the initial susceptible count per age;
    /// `avg_contacts_per_day` is an age-indexed curve of baseline daily
    /// contacts.
    pub fn new(age_counts: &[(i32, u32)], avg_contacts_per_day: Vec<(i32, f32)>) -> Self {
        let max_age = age_counts.iter().map(|&(a, _)| a).max().unwrap_or(0).max(0) as usize;
        let susceptible = counters(max_age);
        for &(age, count) in age_counts {
            susceptible[age as usize].store(count as i64, Ordering::Relaxed);
        }
        Population {
            max_age,
            susceptible,
            infected: counters(max_age),
            detected: counters(max_age),
            recovered: counters(max_age),
            hospitalized: counters(max_age),
            in_icu: counters(max_age),
            dead: counters(max_age),
            all_infected: counters(max_age),
            all_detected: counters(max_age),
            avg_contacts_per_day: ClassedValues::new(avg_contacts_per_day),
            mobility_factor_bits: AtomicU32::new(1.0f32.to_bits()),
            limit_mass_gatherings: AtomicU32::new(0),
        }
    }

    pub fn max_age(&self) -> usize {
        self.max_age
    }

    fn idx(&self, age: i32) -> usize {
        age.clamp(0, self.max_age as i32) as usize
    }

    pub fn population_mobility_factor(&self) -> f32 {
        f32::from_bits(self.mobility_factor_bits.load(Ordering::Relaxed))
    }

    pub fn set_population_mobility_factor(&self, value: f32) {
        self.mobility_factor_bits.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn limit_mass_gatherings(&self) -> u32 {
        self.limit_mass_gatherings.load(Ordering::Relaxed)
    }

    pub fn set_limit_mass_gatherings(&self, value: u32) {
        self.limit_mass_gatherings.store(value, Ordering::Relaxed);
    }

    /// Samples today's contact count for an agent of the given age.
    ///
    /// `floor(f) - 1` can go negative; saturated at 0 rather than
    /// propagated as a negative loop bound.
    pub fn contacts_per_day(&self, age: i32, factor: f32, limit: u32, rng: &RandomPool) -> u32 {
        let f = factor
            * self.population_mobility_factor()
            * rng.lognormal(0.0, 0.5)
            * self.avg_contacts_per_day.get_greatest_lte(age);
        let contacts = (f.floor() as i64) - 1;
        let mut contacts = contacts.max(0) as u32;
        let gatherings_cap = self.limit_mass_gatherings();
        if gatherings_cap > 0 {
            contacts = contacts.min(gatherings_cap);
        }
        contacts.min(limit)
    }

    pub fn infect(&self, age: i32) {
        let i = self.idx(age);
        self.susceptible[i].fetch_sub(1, Ordering::Relaxed);
        self.infected[i].fetch_add(1, Ordering::Relaxed);
        self.all_infected[i].fetch_add(1, Ordering::Relaxed);
    }

    pub fn detect(&self, age: i32) {
        let i = self.idx(age);
        self.detected[i].fetch_add(1, Ordering::Relaxed);
        self.all_detected[i].fetch_add(1, Ordering::Relaxed);
    }

    pub fn hospitalize(&self, age: i32) {
        self.hospitalized[self.idx(age)].fetch_add(1, Ordering::Relaxed);
    }

    /// Admits an agent directly to ICU (critical severity, bypassing a
    /// hospital bed first).
    pub fn admit_to_icu(&self, age: i32) {
        self.in_icu[self.idx(age)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn transfer_to_icu(&self, age: i32) {
        let i = self.idx(age);
        self.hospitalized[i].fetch_sub(1, Ordering::Relaxed);
        self.in_icu[i].fetch_add(1, Ordering::Relaxed);
    }

    pub fn release_from_icu(&self, age: i32) {
        self.in_icu[self.idx(age)].fetch_sub(1, Ordering::Relaxed);
    }

    pub fn release_from_hospital(&self, age: i32) {
        self.hospitalized[self.idx(age)].fetch_sub(1, Ordering::Relaxed);
    }

    /// An agent leaves the infected/detected pools into recovered.
    pub fn recover(&self, age: i32, was_detected: bool) {
        let i = self.idx(age);
        self.infected[i].fetch_sub(1, Ordering::Relaxed);
        if was_detected {
            self.detected[i].fetch_sub(1, Ordering::Relaxed);
        }
        self.recovered[i].fetch_add(1, Ordering::Relaxed);
    }

    /// An agent leaves the infected/detected pools into dead.
    pub fn die(&self, age: i32, was_detected: bool) {
        let i = self.idx(age);
        self.infected[i].fetch_sub(1, Ordering::Relaxed);
        if was_detected {
            self.detected[i].fetch_sub(1, Ordering::Relaxed);
        }
        self.dead[i].fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot_vec(counters: &[AtomicI64]) -> Vec<i64> {
        counters.iter().map(|c| c.load(Ordering::Relaxed)).collect()
    }

    pub fn susceptible_snapshot(&self) -> Vec<i64> {
        Self::snapshot_vec(&self.susceptible)
    }
    pub fn infected_snapshot(&self) -> Vec<i64> {
        Self::snapshot_vec(&self.infected)
    }
    pub fn detected_snapshot(&self) -> Vec<i64> {
        Self::snapshot_vec(&self.detected)
    }
    pub fn recovered_snapshot(&self) -> Vec<i64> {
        Self::snapshot_vec(&self.recovered)
    }
    pub fn hospitalized_snapshot(&self) -> Vec<i64> {
        Self::snapshot_vec(&self.hospitalized)
    }
    pub fn in_icu_snapshot(&self) -> Vec<i64> {
        Self::snapshot_vec(&self.in_icu)
    }
    pub fn dead_snapshot(&self) -> Vec<i64> {
        Self::snapshot_vec(&self.dead)
    }
    pub fn all_infected_snapshot(&self) -> Vec<i64> {
        Self::snapshot_vec(&self.all_infected)
    }
    pub fn all_detected_snapshot(&self) -> Vec<i64> {
        Self::snapshot_vec(&self.all_detected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infect_moves_susceptible_to_infected() {
        let pop = Population::new(&[(40, 100)], vec![(0, 5.0)]);
        pop.infect(40);
        assert_eq!(pop.susceptible_snapshot()[40], 99);
        assert_eq!(pop.infected_snapshot()[40], 1);
        assert_eq!(pop.all_infected_snapshot()[40], 1);
    }

    #[test]
    fn recover_clears_detected_flag_too() {
        let pop = Population::new(&[(40, 10)], vec![(0, 5.0)]);
        pop.infect(40);
        pop.detect(40);
        pop.recover(40, true);
        assert_eq!(pop.infected_snapshot()[40], 0);
        assert_eq!(pop.detected_snapshot()[40], 0);
        assert_eq!(pop.recovered_snapshot()[40], 1);
        assert_eq!(pop.all_detected_snapshot()[40], 1);
    }

    #[test]
    fn contacts_per_day_is_clamped_to_limit() {
        let pop = Population::new(&[(40, 10)], vec![(0, 1000.0)]);
        let rng = RandomPool::new(1);
        for _ in 0..200 {
            assert!(pop.contacts_per_day(40, 1.0, 5, &rng) <= 5);
        }
    }

    #[test]
    fn mass_gathering_limit_caps_contacts() {
        let pop = Population::new(&[(40, 10)], vec![(0, 1000.0)]);
        pop.set_limit_mass_gatherings(2);
        let rng = RandomPool::new(2);
        for _ in 0..200 {
            assert!(pop.contacts_per_day(40, 1.0, 100, &rng) <= 2);
        }
    }
}
