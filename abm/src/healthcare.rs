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

//! Bed/ICU capacity accounting, the daily testing queue, detection policy,
//! and recursive contact tracing.

use crate::disease::Disease;
use crate::error::SimulationProblem;
use crate::person::{Person, PersonSnapshot, State, MAX_INFECTEES};
use crate::population::Population;
use crate::random::RandomPool;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Mutex;

/// When (and how aggressively) symptomatic agents are tested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestingMode {
    NoTesting,
    AllWithSymptomsCT,
    AllWithSymptoms,
    OnlySevereSymptoms,
}

impl TestingMode {
    fn to_tag(self) -> u8 {
        match self {
            TestingMode::NoTesting => 0,
            TestingMode::AllWithSymptomsCT => 1,
            TestingMode::AllWithSymptoms => 2,
            TestingMode::OnlySevereSymptoms => 3,
        }
    }

    fn from_tag(tag: u8) -> Self {
        match tag {
            1 => TestingMode::AllWithSymptomsCT,
            2 => TestingMode::AllWithSymptoms,
            3 => TestingMode::OnlySevereSymptoms,
            _ => TestingMode::NoTesting,
        }
    }
}

/// Bed/ICU capacity, testing policy, and the day's testing queue.
#[derive(Debug)]
pub struct HealthcareSystem {
    beds: AtomicU32,
    icu_units: AtomicU32,
    available_beds: AtomicU32,
    available_icu_units: AtomicU32,
    tests_run_per_day: AtomicU32,
    p_detected_anyway: f32,
    testing_mode: AtomicU8,
    testing_queue: Mutex<Vec<u32>>,
}

impl HealthcareSystem {
    pub fn new(beds: u32, icu_units: u32, p_detected_anyway: f32) -> Self {
        HealthcareSystem {
            beds: AtomicU32::new(beds),
            icu_units: AtomicU32::new(icu_units),
            available_beds: AtomicU32::new(beds),
            available_icu_units: AtomicU32::new(icu_units),
            tests_run_per_day: AtomicU32::new(0),
            p_detected_anyway,
            testing_mode: AtomicU8::new(TestingMode::NoTesting.to_tag()),
            testing_queue: Mutex::new(Vec::new()),
        }
    }

    pub fn testing_mode(&self) -> TestingMode {
        TestingMode::from_tag(self.testing_mode.load(Ordering::Relaxed))
    }

    pub fn set_testing_mode(&self, mode: TestingMode) {
        self.testing_mode.store(mode.to_tag(), Ordering::Relaxed);
    }

    pub fn beds(&self) -> u32 {
        self.beds.load(Ordering::Relaxed)
    }
    pub fn icu_units(&self) -> u32 {
        self.icu_units.load(Ordering::Relaxed)
    }
    pub fn available_beds(&self) -> u32 {
        self.available_beds.load(Ordering::Relaxed)
    }
    pub fn available_icu_units(&self) -> u32 {
        self.available_icu_units.load(Ordering::Relaxed)
    }
    pub fn tests_run_per_day(&self) -> u32 {
        self.tests_run_per_day.load(Ordering::Relaxed)
    }

    pub fn build_new_hospital_beds(&self, value: u32) {
        self.beds.fetch_add(value, Ordering::Relaxed);
        self.available_beds.fetch_add(value, Ordering::Relaxed);
    }

    pub fn build_new_icu_units(&self, value: u32) {
        self.icu_units.fetch_add(value, Ordering::Relaxed);
        self.available_icu_units.fetch_add(value, Ordering::Relaxed);
    }

    /// Reserves a bed if one is available.
    pub fn hospitalize(&self) -> bool {
        self.available_beds
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Reserves an ICU unit if one is available.
    pub fn to_icu(&self) -> bool {
        self.available_icu_units
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok()
    }

    pub fn release(&self) {
        self.available_beds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn release_from_icu(&self) {
        self.available_icu_units.fetch_add(1, Ordering::Relaxed);
    }

    /// Attempts to enqueue `person` for testing. Thread-safe: the
    /// check-and-set of `queued_for_testing` happens under the agent's own
    /// lock (see `Person::try_queue_for_testing`).
    pub fn queue_for_testing(&self, person: &Person) -> bool {
        if person.try_queue_for_testing() {
            self.testing_queue.lock().unwrap().push(person.idx);
            true
        } else {
            false
        }
    }

    /// Called when a symptomatic agent becomes ill and is not yet detected.
    pub fn seek_testing(&self, person: &Person, rng: &RandomPool) {
        match self.testing_mode() {
            TestingMode::NoTesting => {}
            TestingMode::AllWithSymptomsCT | TestingMode::AllWithSymptoms => {
                self.queue_for_testing(person);
            }
            TestingMode::OnlySevereSymptoms => {
                let snapshot = person.snapshot();
                let severe = matches!(
                    snapshot.severity,
                    crate::person::Severity::Severe | crate::person::Severity::Critical
                );
                if severe || rng.chance(self.p_detected_anyway) {
                    self.queue_for_testing(person);
                }
            }
        }
    }

    /// A person is considered detectable if currently infectious, or
    /// already hospitalized/in ICU. Test sensitivity is not modeled: a
    /// person who would be detectable is always detected once tested.
    pub fn is_detected(&self, p: &PersonSnapshot, disease: &Disease) -> bool {
        disease.source_infectiousness(p) > 0.0 || matches!(p.state, State::Hospitalized | State::InIcu)
    }

    /// Drains the testing queue and processes each queued agent once.
    /// Single-threaded; called at the start of each tick before the
    /// parallel agent advance.
    pub fn iterate(&self, people: &[Person], disease: &Disease, pop: &Population) -> Result<(), SimulationProblem> {
        let queue = {
            let mut q = self.testing_queue.lock().unwrap();
            std::mem::take(&mut *q)
        };
        self.tests_run_per_day.store(queue.len() as u32, Ordering::Relaxed);

        for idx in &queue {
            let person = &people[*idx as usize];
            let snapshot = person.snapshot();
            if !snapshot.queued_for_testing {
                return Err(SimulationProblem::OtherFailure(format!(
                    "agent {idx} dequeued for testing but was never marked queued"
                )));
            }
            if !snapshot.is_infected || snapshot.was_detected {
                continue;
            }
            if self.is_detected(&snapshot, disease) {
                person.mark_detected();
                pop.detect(person.age);
                if self.testing_mode() == TestingMode::AllWithSymptomsCT {
                    self.perform_contact_tracing(people, *idx, 0);
                }
            }
        }
        Ok(())
    }

    /// Recursively queues the infector and infectees of a detected agent.
    /// Depth is bounded at 2 (root + one recursion). Assumes every contact
    /// is remembered and traceable.
    pub fn perform_contact_tracing(&self, people: &[Person], idx: u32, level: u32) {
        if level > 1 {
            return;
        }
        let snapshot = people[idx as usize].snapshot();
        if let Some(infector) = snapshot.infector {
            if self.queue_for_testing(&people[infector as usize]) {
                self.perform_contact_tracing(people, infector, level + 1);
            }
        }
        for i in 0..(snapshot.nr_infectees as usize).min(MAX_INFECTEES as usize) {
            let infectee = snapshot.infectees[i];
            if self.queue_for_testing(&people[infectee as usize]) {
                self.perform_contact_tracing(people, infectee, level + 1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hospitalize_respects_capacity() {
        let hc = HealthcareSystem::new(1, 0, 0.0);
        assert!(hc.hospitalize());
        assert!(!hc.hospitalize());
        assert_eq!(hc.available_beds(), 0);
        hc.release();
        assert_eq!(hc.available_beds(), 1);
    }

    #[test]
    fn build_new_capacity_increases_both_totals() {
        let hc = HealthcareSystem::new(0, 0, 0.0);
        hc.build_new_hospital_beds(5);
        hc.build_new_icu_units(2);
        assert_eq!(hc.beds(), 5);
        assert_eq!(hc.available_beds(), 5);
        assert_eq!(hc.icu_units(), 2);
        assert_eq!(hc.available_icu_units(), 2);
    }

    #[test]
    fn queue_for_testing_rejects_dead_or_already_queued() {
        let a = Person::new(0, 30);
        let hc = HealthcareSystem::new(5, 5, 0.0);
        assert!(hc.queue_for_testing(&a));
        assert!(!hc.queue_for_testing(&a));
    }

    /// Scenario: a detected source with infectees [B, C] and an infector A0
    /// must have A0, B, and C queued within contact tracing, each exactly
    /// once, within the recursion-depth-2 bound.
    #[test]
    fn contact_tracing_queues_infector_and_infectees_once_each() {
        use crate::classed_values::ClassedValues;

        let people: Vec<Person> = (0..4).map(|i| Person::new(i, 30)).collect();
        let pop = Population::new(&[(30, 10)], vec![(0, 2.0)]);
        let disease = Disease::new(
            1.0,
            0.0,
            ClassedValues::new(vec![(0, 0.0)]),
            ClassedValues::new(vec![(0, 0.0)]),
            0.0,
            0.0,
            1.0,
            1.0,
            3.0,
            5.0,
            6.0,
        );
        let rng = RandomPool::new(21);
        let hc = HealthcareSystem::new(5, 5, 0.0);
        hc.set_testing_mode(TestingMode::AllWithSymptomsCT);

        // 0 infects 1 (the "source"); 1 in turn infects 2 and 3.
        crate::person::infect(&people[1], Some(&people[0]), &disease, &hc, &pop, &rng).unwrap();
        crate::person::infect(&people[2], Some(&people[1]), &disease, &hc, &pop, &rng).unwrap();
        crate::person::infect(&people[3], Some(&people[1]), &disease, &hc, &pop, &rng).unwrap();

        hc.perform_contact_tracing(&people, 1, 0);

        assert!(people[0].snapshot().queued_for_testing);
        assert!(people[2].snapshot().queued_for_testing);
        assert!(people[3].snapshot().queued_for_testing);
        // Re-running must not re-queue anyone (already-queued agents are
        // skipped, per the "never re-test" quirk).
        assert!(!hc.queue_for_testing(&people[0]));
        assert!(!hc.queue_for_testing(&people[2]));
        assert!(!hc.queue_for_testing(&people[3]));
    }

    #[test]
    fn seek_testing_only_severe_symptoms_queues_severe_and_critical() {
        use crate::classed_values::ClassedValues;
        use crate::disease::Disease;
        use crate::person::Severity;
        use crate::population::Population;
        use crate::random::RandomPool;

        // Deterministic severity curves: never critical, and sc picks
        // whether every infection comes out Mild or Severe.
        let mild_disease = Disease::new(
            1.0,
            0.0,
            ClassedValues::new(vec![(0, 0.0)]),
            ClassedValues::new(vec![(0, 0.0)]),
            0.0,
            0.0,
            0.0,
            0.0,
            3.0,
            5.0,
            6.0,
        );
        let mut severe_disease = mild_disease.clone();
        severe_disease.p_severe = ClassedValues::new(vec![(0, 1.0)]);

        let pop = Population::new(&[(40, 10)], vec![(0, 0.0)]);
        let quiet_hc = HealthcareSystem::new(0, 0, 0.0);
        let rng = RandomPool::new(11);

        let mild = Person::new(0, 40);
        crate::person::infect(&mild, None, &mild_disease, &quiet_hc, &pop, &rng).unwrap();
        while mild.snapshot().state != State::Illness {
            crate::person::advance_one_day(&mild, &[], &mild_disease, &quiet_hc, &pop, &rng).unwrap();
        }
        assert_eq!(mild.snapshot().severity, Severity::Mild);

        let severe = Person::new(1, 40);
        crate::person::infect(&severe, None, &severe_disease, &quiet_hc, &pop, &rng).unwrap();
        while severe.snapshot().state != State::Illness {
            crate::person::advance_one_day(&severe, &[], &severe_disease, &quiet_hc, &pop, &rng).unwrap();
        }
        assert_eq!(severe.snapshot().severity, Severity::Severe);

        let hc = HealthcareSystem::new(5, 5, 0.0);
        hc.set_testing_mode(TestingMode::OnlySevereSymptoms);

        hc.seek_testing(&mild, &rng);
        assert!(!mild.snapshot().queued_for_testing);

        hc.seek_testing(&severe, &rng);
        assert!(severe.snapshot().queued_for_testing);
    }
}
