pub mod deadline_sweep;

pub use deadline_sweep::DeadlineSweepManager;
