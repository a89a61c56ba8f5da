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

//! Error taxonomy for a simulation run.
//!
//! Errors discovered during the parallel per-day agent advance are not
//! thrown; they are recorded in a [`ProblemFlag`] and the driver raises a
//! single fatal error once the parallel section has finished (see
//! `Context::iterate`).

use std::sync::Mutex;
use thiserror::Error;

/// Everything that can go wrong in a simulation run.
#[derive(Error, Debug, Clone, PartialEq, Eq, Default)]
pub enum SimulationProblem {
    /// Normal operation; nothing has gone wrong.
    #[default]
    #[error("no problem")]
    NoProblem,
    /// An agent's infectee list would have exceeded `MAX_INFECTEES`.
    #[error("agent {agent} would exceed the maximum of {max} recorded infectees")]
    TooManyInfectees { agent: u32, max: u32 },
    /// Bed/ICU accounting desynchronized (reserved for implementations that
    /// detect this; not raised by this engine under normal operation).
    #[error("hospital bed/ICU accounting is inconsistent")]
    HospitalAccountingFailure,
    /// Allocating an agent's infectees buffer failed.
    #[error("failed to allocate contact-tracing buffer for agent {agent}")]
    MallocFailure { agent: u32 },
    /// A logic invariant was violated (e.g. a double-allocated infectees
    /// buffer, or a dequeued agent that was never marked as queued).
    #[error("invariant violated: {0}")]
    OtherFailure(String),
}

/// A shared, write-once-wins flag for reporting a [`SimulationProblem`] out
/// of the parallel agent advance.
///
/// The first caller to report a problem (any variant other than
/// [`SimulationProblem::NoProblem`]) wins; later reports are dropped. This
/// matches the "abort the whole run with that reason" propagation policy:
/// once the tick finishes, the driver reads the flag once.
#[derive(Debug, Default)]
pub struct ProblemFlag(Mutex<SimulationProblem>);

impl ProblemFlag {
    pub fn new() -> Self {
        ProblemFlag(Mutex::new(SimulationProblem::NoProblem))
    }

    /// Records `problem` if nothing has been recorded yet. Returns `true` if
    /// this call is the one that set it.
    pub fn try_set(&self, problem: SimulationProblem) -> bool {
        let mut guard = self.0.lock().unwrap();
        if *guard == SimulationProblem::NoProblem {
            *guard = problem;
            true
        } else {
            false
        }
    }

    /// Returns the recorded problem, or `NoProblem` if none was recorded.
    pub fn get(&self) -> SimulationProblem {
        self.0.lock().unwrap().clone()
    }

    pub fn reset(&self) {
        *self.0.lock().unwrap() = SimulationProblem::NoProblem;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_problem_wins() {
        let flag = ProblemFlag::new();
        assert_eq!(flag.get(), SimulationProblem::NoProblem);
        assert!(flag.try_set(SimulationProblem::TooManyInfectees { agent: 3, max: 64 }));
        assert!(!flag.try_set(SimulationProblem::OtherFailure("late".into())));
        assert_eq!(
            flag.get(),
            SimulationProblem::TooManyInfectees { agent: 3, max: 64 }
        );
    }
}
