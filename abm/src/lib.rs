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

//! An agent-based epidemic simulation engine: a population of agents is
//! advanced one simulated day at a time through a susceptible/incubation/
//! illness/hospital/recovered-or-dead state machine, with configurable
//! interventions (testing policy, contact tracing, capacity expansion,
//! mobility/gathering limits) applied at scheduled days.

#![crate_name = "abm"]

mod classed_values;
mod context;
mod disease;
mod error;
mod healthcare;
mod person;
mod population;
mod random;

pub use classed_values::ClassedValues;
pub use context::{Context, Intervention, ModelState, SampleWhat};
pub use disease::Disease;
pub use error::{ProblemFlag, SimulationProblem};
pub use healthcare::{HealthcareSystem, TestingMode};
pub use person::{Severity, State, MAX_INFECTEES};
pub use population::Population;
pub use random::RandomPool;
