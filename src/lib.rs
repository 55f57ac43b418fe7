pub mod abi;
pub mod chain;
pub mod config;
pub mod constants;
pub mod db;
pub mod errors;
pub mod framework;
pub mod handlers;
pub mod monitor;
pub mod receiver;
pub mod ship;
pub mod types;
