pub mod generate;
pub mod token;
