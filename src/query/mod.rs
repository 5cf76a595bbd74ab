//! Query constraints and planning
//!
//! - **Constraints**: per-dimension alternative ranges, merged from
//!   independently derived predicates (a bounding box, a set of time ranges)
//! - **QueryPlanner**: checks an index supports the constraints, expands them
//!   into regions and decomposes each region into key ranges
//!
//! # Flow
//!
//! ```text
//! bbox ─┐
//!       ├─ merge ─→ Constraints ─→ is_supported? ─→ regions ─→ key ranges
//! time ─┘                              │
//!                                      └─ IndexNotSupported
//! ```

mod constraints;
mod error;
mod planner;

pub use constraints::{Constraints, TemporalConstraints, TemporalRange};
pub use error::{QueryError, QueryResult};
pub use planner::{QueryPlan, QueryPlanner};
