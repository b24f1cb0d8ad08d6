//! Insurer coverage rules and the prior-authorization lifecycle.

pub mod authorization;
pub mod coverage;
