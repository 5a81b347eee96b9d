pub mod account;
pub mod cli;
pub mod engine;
pub mod model;
pub mod run;
pub mod status;
pub mod venues;
pub mod yields;
