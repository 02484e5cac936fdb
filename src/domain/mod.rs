pub mod accounts;
pub mod energy_mix;
pub mod engine;
pub mod integration;
pub mod readings;
