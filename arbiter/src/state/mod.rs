pub mod barrier;
pub mod results;
