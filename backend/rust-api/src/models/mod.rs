pub mod achievement;
pub mod incident;
pub mod quiz;
pub mod user;
