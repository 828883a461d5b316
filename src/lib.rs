pub mod fss;
pub mod greedy;
pub mod models;
pub mod parse;
pub mod problem;
pub mod solution;
pub mod termination;
pub mod utils;

pub use fss::search;
pub use greedy::construct;
