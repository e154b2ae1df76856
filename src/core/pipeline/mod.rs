pub mod aggregating;
pub mod comparing;
pub mod evaluating;
