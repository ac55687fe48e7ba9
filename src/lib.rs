pub mod cli;
pub mod config;
pub mod core;
pub mod engine;
pub mod exit;
pub mod normalize;
pub mod report;
pub mod results;
pub mod rules;
pub mod scan;
pub mod table;
pub mod ui;
