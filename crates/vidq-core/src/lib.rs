pub mod accountant;
pub mod admission;
pub mod config;
pub mod daemon;
pub mod engine;
pub mod lifecycle;
pub mod logging;
pub mod scheduler;
pub mod single_flight;
pub mod store;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod test_support;
