//! Scale-down: choose underutilized nodes whose pods fit elsewhere and retire them under
//! cooldown and atomic group discipline.

pub mod candidates;
pub mod cooldown;
pub mod planner;
pub mod removal;
pub mod unremovable;
