pub mod backup;
pub mod calc;
pub mod core;
pub mod curriculum;
pub mod master;
pub mod reports;
pub mod setup;
