//! quorum: implement specs with one lead coding agent and a panel of
//! validator agents, iterating until the validators agree the work is done.

pub mod config;
pub mod consensus;
pub mod context;
pub mod errors;
pub mod orchestrator;
pub mod report;
pub mod session;
pub mod spec;
pub mod tools;
pub mod ui;
pub mod util;
pub mod validation;
