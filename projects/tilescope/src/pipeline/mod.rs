// Tiled inference and recomposition pipeline

pub mod annotate;
pub mod bright_spot;
pub mod config;
pub mod detection;
pub mod orchestrator;
pub mod slicing;
pub mod stack;
pub mod types;
