pub mod index;
pub mod populate;
