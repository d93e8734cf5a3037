//! Display order maintenance for image partitions.

mod engine;
mod plan;

pub use engine::{DisplayOrderEngine, OrderMap};
pub use plan::{plan_assign, plan_move, plan_remove, plan_reorder};
