pub mod delivery;
pub mod transaction;
