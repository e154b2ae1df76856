/// Stand-ins for the judge's external dependencies, for wiring and tests.
pub mod sandbox;
pub mod store;
