//! Resource quotas gating scale-up and scale-down.

pub mod quotas;
pub mod tracker;
