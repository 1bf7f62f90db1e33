pub mod domain;
pub mod error;
pub mod failures;
pub mod runner;
pub mod traits;
