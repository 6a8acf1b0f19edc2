// Running compiled queries and shaping their results

pub mod executor;
pub mod totals;

pub use executor::{ListExecutor, ListResult};
pub use totals::shape_totals;
