pub mod limits;
pub mod types;
