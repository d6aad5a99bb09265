pub mod error;
pub mod population;
pub mod utils;
