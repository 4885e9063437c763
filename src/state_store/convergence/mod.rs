//! Gathering and calculation halves of convergence. Both are backend
//! agnostic; resolution lives with the controllers in `processor`.

pub mod calculator;
pub mod gatherer;
pub mod tasks;

pub use calculator::{
    calculate_convergence,
    ActualLrpChange,
    ChangeKind,
    ConvergenceChanges,
    MissingIndex,
};
pub use gatherer::ConvergenceInput;
pub use tasks::{calculate_task_convergence, TaskChanges, TaskConvergencePolicy};
