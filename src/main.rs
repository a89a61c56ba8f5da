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

//! Command-line driver for the agent-based epidemic engine: builds a
//! population and disease from flags, runs one or more independent
//! replicates, and prints each day's model state as CSV.

use abm::{ClassedValues, Context, Disease, HealthcareSystem, Population};
use clap::Parser;
use threadpool::ThreadPool;

/// Command-line arguments for one (or a batch of) replicate runs.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
struct Parameters {
    /// Number of independent replicates to run; 0 runs a single replicate
    /// inline, without spinning up a thread pool.
    #[arg(short, long, default_value_t = 10)]
    pub simulations: i32,
    #[arg(long, default_value_t = 0)]
    pub identity: i64,
    #[arg(short, long, default_value_t = 10_000)]
    pub agents: u32,
    #[arg(short, long, default_value_t = 365)]
    pub iterations: i32,
    #[arg(long, default_value_t = 10)]
    pub infections: u32,
    #[arg(long, default_value_t = 0)]
    pub beds: u32,
    #[arg(long, default_value_t = 0)]
    pub icu_units: u32,
    #[arg(long, default_value_t = 0.1)]
    pub p_infection: f32,
    #[arg(long, default_value_t = 0.3)]
    pub p_asymptomatic: f32,
    #[arg(long, default_value_t = 8.0)]
    pub mean_illness_duration: f32,
    #[arg(long, default_value_t = 10.0)]
    pub mean_hospitalization_duration: f32,
    #[arg(long, default_value_t = 12.0)]
    pub mean_icu_duration: f32,
    /// One of: none, all-with-symptoms, only-severe-symptoms,
    /// with-contact-tracing.
    #[arg(long, default_value_t = String::from("none"))]
    pub testing_mode: String,
    #[arg(long, default_value_t = String::from("2020-01-01"))]
    pub start_date: String,
}

fn testing_mode_intervention(mode: &str) -> Option<&'static str> {
    match mode {
        "all-with-symptoms" => Some("test-all-with-symptoms"),
        "only-severe-symptoms" => Some("test-only-severe-symptoms"),
        "with-contact-tracing" => Some("test-with-contact-tracing"),
        _ => None,
    }
}

/// Default per-age daily contact curve: younger and middle-aged agents mix
/// more than the very old.
fn default_avg_contacts_per_day() -> Vec<(i32, f32)> {
    vec![(0, 8.0), (15, 12.0), (30, 10.0), (60, 6.0), (80, 3.0)]
}

fn default_p_severe() -> ClassedValues {
    ClassedValues::new(vec![(0, 0.01), (40, 0.05), (60, 0.15), (80, 0.35)])
}

fn default_p_critical() -> ClassedValues {
    ClassedValues::new(vec![(0, 0.05), (40, 0.1), (60, 0.2), (80, 0.3)])
}

/// Spreads `total` agents flatly across ages 0..=100, with any remainder
/// folded into age 0.
fn flat_age_counts(total: u32) -> Vec<(i32, u32)> {
    const MAX_AGE: i32 = 100;
    let bands = (MAX_AGE + 1) as u32;
    let per_age = total / bands;
    let remainder = total % bands;
    (0..=MAX_AGE)
        .map(|age| (age, if age == 0 { per_age + remainder } else { per_age }))
        .collect()
}

fn report_header() {
    println!("sim,day,susceptible,infected,detected,recovered,hospitalized,in_icu,dead,available_beds,available_icu_units,exposed_per_day,tests_run_per_day,r");
}

fn report(sim: i64, day: i64, state: &abm::ModelState) {
    println!(
        "{sim},{day},{},{},{},{},{},{},{},{},{},{},{},{:.4}",
        state.susceptible.iter().sum::<i64>(),
        state.infected.iter().sum::<i64>(),
        state.detected.iter().sum::<i64>(),
        state.recovered.iter().sum::<i64>(),
        state.hospitalized.iter().sum::<i64>(),
        state.in_icu.iter().sum::<i64>(),
        state.dead.iter().sum::<i64>(),
        state.available_hospital_beds,
        state.available_icu_units,
        state.exposed_per_day,
        state.tests_run_per_day,
        state.r
    );
}

/// Runs one replicate. Called within the thread pool, so must be thread
/// safe; it owns everything it touches.
fn one_simulation(parameters: Parameters) {
    let population = Population::new(&flat_age_counts(parameters.agents), default_avg_contacts_per_day());
    let healthcare = HealthcareSystem::new(parameters.beds, parameters.icu_units, 0.01);
    let disease = Disease::new(
        parameters.p_infection,
        parameters.p_asymptomatic,
        default_p_severe(),
        default_p_critical(),
        0.1,
        0.3,
        0.6,
        0.8,
        parameters.mean_illness_duration,
        parameters.mean_hospitalization_duration,
        parameters.mean_icu_duration,
    );

    let seed = parameters.identity.unsigned_abs();
    let mut context = Context::new(population, healthcare, disease, &parameters.start_date, seed);

    if let Some(name) = testing_mode_intervention(&parameters.testing_mode) {
        context.add_intervention(0, name, 0);
    }

    if let Err(e) = context.infect_people(parameters.infections) {
        log::error!("sim {}: seeding infections failed: {e}", parameters.identity);
        return;
    }

    if parameters.identity == 0 {
        report_header();
    }
    report(parameters.identity, context.day(), &context.generate_state());

    for _ in 0..parameters.iterations {
        if let Err(e) = context.iterate() {
            log::error!("sim {}: aborting on day {}: {e}", parameters.identity, context.day());
            return;
        }
        report(parameters.identity, context.day(), &context.generate_state());
    }
}

/// Parses arguments, then either runs one replicate inline or fans a batch
/// of them out across a thread pool sized to the available CPUs.
fn main() {
    env_logger::init();
    let parameters = Parameters::parse();

    if parameters.simulations == 0 {
        one_simulation(parameters);
    } else {
        let threads = num_cpus::get();
        let pool = ThreadPool::new(threads);
        for i in 0..parameters.simulations {
            let mut p = parameters.clone();
            p.identity = i as i64;
            pool.execute(move || one_simulation(p));
        }
        pool.join();
    }
}
