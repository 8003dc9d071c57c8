//! Data structures for registry-based prevalence estimation.

mod formula;
mod life_table;
mod registry;
mod result;

pub use formula::{Role, RoleSpec};
pub use life_table::{LifeTable, LifeTableRow, DEFAULT_MAX_AGE};
pub use registry::{Registry, RegistryRecord, DATE_FORMAT};
pub use result::PrevalenceResult;
