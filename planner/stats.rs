use std::fmt;
use std::time::Duration;

use horizon_syntax::Step;

/// Counters collected over one planner run.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Stats {
    pub iterations: usize,
    pub solves: usize,
    pub steps: Step,
    pub rules: usize,
    pub rejected: usize,
    pub out_of_memory: usize,
    /// Largest memory reading, in MB.
    pub memory: u64,
    pub grounding: Duration,
    pub solving: Duration,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Iterations   : {}", self.iterations)?;
        writeln!(f, "Solve calls  : {}", self.solves)?;
        writeln!(f, "Steps        : {}", self.steps)?;
        writeln!(f, "Rules        : {}", self.rules)?;
        writeln!(f, "Rejected     : {}", self.rejected)?;
        writeln!(f, "Out of memory: {}", self.out_of_memory)?;
        writeln!(f, "Memory       : {}MB", self.memory)?;
        writeln!(f, "Grounding    : {:.3}s", self.grounding.as_secs_f64())?;
        write!(f, "Solving      : {:.3}s", self.solving.as_secs_f64())
    }
}
