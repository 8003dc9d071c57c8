//! Bootstrap fitting and year-by-year Monte Carlo simulation.

pub mod bootstrap;
pub mod year;

pub use bootstrap::{fit_bootstrap, fit_full, BootstrapDraws};
pub use year::{
    merge_contributions, simulate_contributions, simulate_year, SimulationContext, Stratum,
    YearlyContribution,
};

use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Random number generator used by every simulation task.
pub type SimRng = rand_xoshiro::Xoshiro256PlusPlus;

/// Length of a simulated year in days.
pub const DAYS_PER_YEAR: f64 = 365.0;

/// Cooperative cancellation flag shared between a caller and a running job.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; running tasks stop at their next check.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Draw `n` task seeds from a master generator seeded with `seed`.
///
/// Seeds are assigned to tasks by index, so results do not depend on how the
/// thread pool schedules them.
pub fn task_seeds(seed: u64, n: usize) -> Vec<u64> {
    let mut master = SimRng::seed_from_u64(seed);
    (0..n).map(|_| master.random::<u64>()).collect()
}
