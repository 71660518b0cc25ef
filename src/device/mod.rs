pub mod btle;
pub mod command;
pub mod connection;
pub mod constants;
pub mod controller;
pub mod monitor;
pub mod permission;
pub mod scanner;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;
