pub mod detector;
pub mod source;
pub mod types;
pub mod yahoo;
