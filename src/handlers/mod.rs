pub mod callbacks;
pub mod commands;
pub mod photos;
pub mod workflow;
