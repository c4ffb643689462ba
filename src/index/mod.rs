pub mod instance;
pub mod registry;
pub mod slots;
