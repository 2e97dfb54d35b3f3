pub mod coordinator;
pub mod gate;
pub mod registry;
