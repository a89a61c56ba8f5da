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

//! Per-agent state machine: init, expose, infect, advance one day,
//! hospitalize, release, recover, die.

use crate::disease::Disease;
use crate::error::SimulationProblem;
use crate::healthcare::{HealthcareSystem, TestingMode};
use crate::population::Population;
use crate::random::RandomPool;
use std::sync::Mutex;

/// Hard cap on stored infectees per agent; exceeding it fails the run.
pub const MAX_INFECTEES: u32 = 64;

/// One of the seven states an agent can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Susceptible,
    Incubation,
    Illness,
    Hospitalized,
    InIcu,
    Recovered,
    Dead,
}

/// Clinical severity, meaningful only once an agent is infected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Asymptomatic,
    Mild,
    Severe,
    Critical,
}

impl Default for Severity {
    /// Filler value before infection; never read.
    fn default() -> Self {
        Severity::Asymptomatic
    }
}

struct Inner {
    state: State,
    severity: Severity,
    is_infected: bool,
    has_immunity: bool,
    was_detected: bool,
    queued_for_testing: bool,
    included_in_totals: bool,
    days_left: i32,
    day_of_illness: i32,
    day_of_infection: i32,
    infector: Option<u32>,
    infectees: Option<Box<[u32; MAX_INFECTEES as usize]>>,
    nr_infectees: u32,
    other_people_infected: u64,
    other_people_exposed_today: u32,
}

impl Inner {
    fn new() -> Self {
        Inner {
            state: State::Susceptible,
            severity: Severity::default(),
            is_infected: false,
            has_immunity: false,
            was_detected: false,
            queued_for_testing: false,
            included_in_totals: false,
            days_left: 0,
            day_of_illness: 0,
            day_of_infection: 0,
            infector: None,
            infectees: None,
            nr_infectees: 0,
            other_people_infected: 0,
            other_people_exposed_today: 0,
        }
    }
}

/// An immutable-by-value read of an agent's current state, used so
/// `Disease`/`HealthcareSystem` can reason about an agent without holding
/// its lock.
#[derive(Debug, Clone, Copy)]
pub struct PersonSnapshot {
    pub idx: u32,
    pub age: i32,
    pub state: State,
    pub severity: Severity,
    pub is_infected: bool,
    pub has_immunity: bool,
    pub was_detected: bool,
    pub queued_for_testing: bool,
    pub included_in_totals: bool,
    pub days_left: i32,
    pub day_of_illness: i32,
    pub day_of_infection: i32,
    pub infector: Option<u32>,
    pub infectees: [u32; MAX_INFECTEES as usize],
    pub nr_infectees: u32,
    pub other_people_infected: u64,
    pub other_people_exposed_today: u32,
}

/// One simulated individual. `idx` and `age` are fixed for the agent's
/// lifetime; everything else lives behind `inner`'s lock. A writer
/// mutating an agent other than "itself" acquires that lock, while the
/// thread advancing an agent as "self" this tick is the only writer of
/// its own fields (uncontended).
pub struct Person {
    pub idx: u32,
    pub age: i32,
    inner: Mutex<Inner>,
}

impl Person {
    pub fn new(idx: u32, age: i32) -> Self {
        Person {
            idx,
            age,
            inner: Mutex::new(Inner::new()),
        }
    }

    pub fn snapshot(&self) -> PersonSnapshot {
        let g = self.inner.lock().unwrap();
        let mut infectees = [0u32; MAX_INFECTEES as usize];
        if let Some(buf) = &g.infectees {
            infectees.copy_from_slice(buf.as_slice());
        }
        PersonSnapshot {
            idx: self.idx,
            age: self.age,
            state: g.state,
            severity: g.severity,
            is_infected: g.is_infected,
            has_immunity: g.has_immunity,
            was_detected: g.was_detected,
            queued_for_testing: g.queued_for_testing,
            included_in_totals: g.included_in_totals,
            days_left: g.days_left,
            day_of_illness: g.day_of_illness,
            day_of_infection: g.day_of_infection,
            infector: g.infector,
            infectees,
            nr_infectees: g.nr_infectees,
            other_people_infected: g.other_people_infected,
            other_people_exposed_today: g.other_people_exposed_today,
        }
    }

    /// Marks the agent as detected by the healthcare system.
    pub fn mark_detected(&self) {
        self.inner.lock().unwrap().was_detected = true;
    }

    /// Enqueues for testing if eligible: not dead, not already detected,
    /// not already queued. `queued_for_testing` is set here and never
    /// cleared, so an agent is never tested twice.
    pub fn try_queue_for_testing(&self) -> bool {
        let mut g = self.inner.lock().unwrap();
        if matches!(g.state, State::Dead) || g.was_detected || g.queued_for_testing {
            return false;
        }
        g.queued_for_testing = true;
        true
    }

    /// Records that this agent (as the source of an infection) infected
    /// `infectee_idx`, appending to the bounded infectee list if one is
    /// allocated.
    fn record_infection_of(&self, infectee_idx: u32) -> Result<(), SimulationProblem> {
        let mut g = self.inner.lock().unwrap();
        g.other_people_infected += 1;
        if let Some(buf) = g.infectees.as_mut() {
            if g.nr_infectees >= MAX_INFECTEES {
                return Err(SimulationProblem::TooManyInfectees {
                    agent: self.idx,
                    max: MAX_INFECTEES,
                });
            }
            buf[g.nr_infectees as usize] = infectee_idx;
            g.nr_infectees += 1;
        }
        Ok(())
    }

    /// Allocates the bounded infectee buffer if contact tracing is active,
    /// lazily, at infection time.
    fn allocate_infectees_if_tracing(&self, mode: TestingMode) -> Result<(), SimulationProblem> {
        if mode != TestingMode::AllWithSymptomsCT {
            return Ok(());
        }
        let mut g = self.inner.lock().unwrap();
        if g.infectees.is_some() {
            return Err(SimulationProblem::OtherFailure(format!(
                "agent {} infectees buffer already allocated",
                self.idx
            )));
        }
        g.infectees = Some(Box::new([0u32; MAX_INFECTEES as usize]));
        Ok(())
    }

    fn free_infectees(&self) {
        self.inner.lock().unwrap().infectees = None;
    }
}

/// Infects `target`, optionally attributing the infection to `source`.
pub fn infect(
    target: &Person,
    source: Option<&Person>,
    disease: &Disease,
    healthcare: &HealthcareSystem,
    pop: &Population,
    rng: &RandomPool,
) -> Result<(), SimulationProblem> {
    let severity = disease.symptom_severity(target.age, rng);
    let incubation_days = disease.incubation_days(rng);
    {
        let mut g = target.inner.lock().unwrap();
        g.state = State::Incubation;
        g.severity = severity;
        g.days_left = incubation_days;
        g.is_infected = true;
        g.infector = source.map(|s| s.idx);
    }
    pop.infect(target.age);
    target.allocate_infectees_if_tracing(healthcare.testing_mode())?;
    if let Some(source) = source {
        source.record_infection_of(target.idx)?;
    }
    Ok(())
}

/// Attempts to infect `target` from `source`. Returns whether it succeeded.
pub fn expose(
    source: &Person,
    target: &Person,
    disease: &Disease,
    healthcare: &HealthcareSystem,
    pop: &Population,
    rng: &RandomPool,
) -> Result<bool, SimulationProblem> {
    let target_snapshot = target.snapshot();
    if target_snapshot.is_infected || target_snapshot.has_immunity {
        return Ok(false);
    }
    let source_snapshot = source.snapshot();
    if disease.did_infect(&source_snapshot, rng) {
        infect(target, Some(source), disease, healthcare, pop, rng)?;
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Attempts `nr_contacts` random exposures from `source`.
pub fn expose_others(
    source: &Person,
    people: &[Person],
    nr_contacts: u32,
    disease: &Disease,
    healthcare: &HealthcareSystem,
    pop: &Population,
    rng: &RandomPool,
) -> Result<(), SimulationProblem> {
    for _ in 0..nr_contacts {
        let target_idx = rng.below(people.len() as u32);
        expose(source, &people[target_idx as usize], disease, healthcare, pop, rng)?;
    }
    source.inner.lock().unwrap().other_people_exposed_today = nr_contacts;
    Ok(())
}

/// Transitions an agent from Incubation to Illness.
fn become_ill(person: &Person, disease: &Disease, healthcare: &HealthcareSystem, rng: &RandomPool) {
    let illness_days = disease.illness_days(rng);
    let (severity, was_detected) = {
        let mut g = person.inner.lock().unwrap();
        g.state = State::Illness;
        g.days_left = illness_days;
        g.day_of_illness = 0;
        (g.severity, g.was_detected)
    };
    if severity != Severity::Asymptomatic && !was_detected {
        healthcare.seek_testing(person, rng);
    }
}

/// Attempts to admit a now-severely-ill agent to hospital/ICU care.
fn hospitalize(
    person: &Person,
    disease: &Disease,
    healthcare: &HealthcareSystem,
    pop: &Population,
    rng: &RandomPool,
) {
    let already_detected = {
        let mut g = person.inner.lock().unwrap();
        let already = g.was_detected;
        g.was_detected = true;
        already
    };
    if !already_detected {
        pop.detect(person.age);
    }

    let severity = person.snapshot().severity;
    if severity == Severity::Critical {
        if healthcare.to_icu() {
            let icu_days = disease.icu_days(rng);
            let mut g = person.inner.lock().unwrap();
            g.state = State::InIcu;
            g.days_left = icu_days;
            drop(g);
            pop.admit_to_icu(person.age);
        } else {
            die(person, pop);
        }
        return;
    }

    if healthcare.hospitalize() {
        let hosp_days = disease.hospitalization_days(rng);
        let mut g = person.inner.lock().unwrap();
        g.state = State::Hospitalized;
        g.days_left = hosp_days;
        drop(g);
        pop.hospitalize(person.age);
    } else {
        let dies = disease.dies_in_hospital(false, false, rng);
        if dies {
            die(person, pop);
        } else {
            recover(person, pop);
        }
    }
}

/// Releases a Hospitalized/InIcu agent back into Recovered or Dead,
/// returning its bed/ICU unit to the pool.
fn release_from_hospital(person: &Person, disease: &Disease, healthcare: &HealthcareSystem, pop: &Population, rng: &RandomPool) {
    let in_icu = matches!(person.snapshot().state, State::InIcu);
    let dies = disease.dies_in_hospital(in_icu, true, rng);
    if in_icu {
        healthcare.release_from_icu();
        pop.release_from_icu(person.age);
    } else {
        healthcare.release();
        pop.release_from_hospital(person.age);
    }
    if dies {
        die(person, pop);
    } else {
        recover(person, pop);
    }
}

fn die(person: &Person, pop: &Population) {
    let was_detected = {
        let mut g = person.inner.lock().unwrap();
        g.state = State::Dead;
        g.has_immunity = true;
        g.is_infected = false;
        g.was_detected
    };
    person.free_infectees();
    pop.die(person.age, was_detected);
}

fn recover(person: &Person, pop: &Population) {
    let was_detected = {
        let mut g = person.inner.lock().unwrap();
        g.state = State::Recovered;
        g.has_immunity = true;
        g.is_infected = false;
        g.was_detected
    };
    person.free_infectees();
    pop.recover(person.age, was_detected);
}

/// Advances one agent by one simulated day. No-op for Susceptible,
/// Recovered, and Dead agents.
pub fn advance_one_day(
    person: &Person,
    people: &[Person],
    disease: &Disease,
    healthcare: &HealthcareSystem,
    pop: &Population,
    rng: &RandomPool,
) -> Result<(), SimulationProblem> {
    {
        let mut g = person.inner.lock().unwrap();
        g.other_people_exposed_today = 0;
    }

    let snapshot = person.snapshot();
    match snapshot.state {
        State::Susceptible | State::Recovered | State::Dead => return Ok(()),
        State::Incubation | State::Illness => {
            let contacts = disease.people_exposed(&snapshot, pop, rng);
            if contacts > 0 {
                expose_others(person, people, contacts, disease, healthcare, pop, rng)?;
            }

            let (days_left, cur_state) = {
                let mut g = person.inner.lock().unwrap();
                g.days_left -= 1;
                (g.days_left, g.state)
            };

            if days_left <= 0 {
                match cur_state {
                    State::Incubation => become_ill(person, disease, healthcare, rng),
                    State::Illness => {
                        if matches!(snapshot.severity, Severity::Severe | Severity::Critical) {
                            hospitalize(person, disease, healthcare, pop, rng);
                        } else {
                            recover(person, pop);
                        }
                    }
                    _ => unreachable!(),
                }
            } else if matches!(cur_state, State::Illness) {
                person.inner.lock().unwrap().day_of_illness += 1;
            }
        }
        State::Hospitalized | State::InIcu => {
            let days_left = {
                let mut g = person.inner.lock().unwrap();
                g.days_left -= 1;
                g.days_left
            };
            if days_left <= 0 {
                release_from_hospital(person, disease, healthcare, pop, rng);
            }
        }
    }

    person.inner.lock().unwrap().day_of_infection += 1;
    Ok(())
}

/// Marks an agent's `included_in_totals` flag if unset, returning the
/// secondary-infection count to fold into the cumulative totals if this
/// call is the one that set it.
pub fn take_totals_contribution_once(person: &Person) -> Option<u64> {
    let mut g = person.inner.lock().unwrap();
    if matches!(g.state, State::Recovered | State::Dead) && !g.included_in_totals {
        g.included_in_totals = true;
        Some(g.other_people_infected)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classed_values::ClassedValues;

    fn test_disease() -> Disease {
        Disease::new(
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
        )
    }

    #[test]
    fn new_person_is_susceptible() {
        let p = Person::new(0, 30);
        let s = p.snapshot();
        assert_eq!(s.state, State::Susceptible);
        assert!(!s.is_infected);
        assert!(!s.has_immunity);
    }

    #[test]
    fn infect_moves_to_incubation() {
        let target = Person::new(0, 30);
        let pop = Population::new(&[(30, 10)], vec![(0, 5.0)]);
        let hc = HealthcareSystem::new(5, 5, 0.0);
        let rng = RandomPool::new(1);
        let disease = test_disease();
        infect(&target, None, &disease, &hc, &pop, &rng).unwrap();
        let s = target.snapshot();
        assert_eq!(s.state, State::Incubation);
        assert!(s.is_infected);
        assert!(s.infector.is_none());
    }

    #[test]
    fn infect_records_infector_and_source_bookkeeping() {
        let source = Person::new(0, 30);
        let target = Person::new(1, 30);
        let pop = Population::new(&[(30, 10)], vec![(0, 5.0)]);
        let hc = HealthcareSystem::new(5, 5, 0.0);
        let rng = RandomPool::new(2);
        let disease = test_disease();
        infect(&target, Some(&source), &disease, &hc, &pop, &rng).unwrap();
        assert_eq!(target.snapshot().infector, Some(0));
        assert_eq!(source.snapshot().other_people_infected, 1);
    }

    #[test]
    fn recovered_agent_cannot_be_reinfected() {
        let target = Person::new(0, 30);
        {
            let mut g = target.inner.lock().unwrap();
            g.state = State::Recovered;
            g.has_immunity = true;
        }
        let source = Person::new(1, 30);
        {
            let mut g = source.inner.lock().unwrap();
            g.state = State::Illness;
            g.day_of_illness = 0;
        }
        let pop = Population::new(&[(30, 10)], vec![(0, 5.0)]);
        let hc = HealthcareSystem::new(5, 5, 0.0);
        let rng = RandomPool::new(3);
        let disease = test_disease();
        for _ in 0..10_000 {
            let infected = expose(&source, &target, &disease, &hc, &pop, &rng).unwrap();
            assert!(!infected);
        }
    }

    #[test]
    fn too_many_infectees_is_reported() {
        let source = Person::new(0, 30);
        {
            let mut g = source.inner.lock().unwrap();
            g.infectees = Some(Box::new([0u32; MAX_INFECTEES as usize]));
            g.nr_infectees = MAX_INFECTEES;
        }
        let err = source.record_infection_of(999).unwrap_err();
        assert_eq!(
            err,
            SimulationProblem::TooManyInfectees {
                agent: 0,
                max: MAX_INFECTEES
            }
        );
    }
}
