#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod controller;
pub mod coulomb;
pub mod error_handling;
pub mod logging;
pub mod persistence;
pub mod protocol;
pub mod pwm;
pub mod safety;
pub mod signals;
pub mod state_machine;
pub mod types;
