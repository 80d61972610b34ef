pub mod calculation;
pub mod common;
pub mod domain;
pub mod parsers;
pub mod runner;
pub mod utils;
pub mod workflows;
