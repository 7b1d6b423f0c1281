pub mod access;
pub mod audit;
pub mod backup_exchange;
pub mod core;
pub mod observations;
pub mod requirement;
pub mod roster;
pub mod schedule;
pub mod subs;
