pub mod config;
pub mod results;
pub mod run;
