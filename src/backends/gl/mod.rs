pub mod types;
pub mod visitor;
