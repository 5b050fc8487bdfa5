pub mod interrupt;
pub mod types;
