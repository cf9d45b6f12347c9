pub mod alignment;
pub mod config;
pub mod frames;
pub mod geometry;
pub mod inference;
pub mod loop_closing;
pub mod mapping;
pub mod optimizer;
pub mod sim;
pub mod system;
