pub mod menu;
pub mod recovery;
pub mod store;
