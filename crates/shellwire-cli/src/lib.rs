//! shellwire CLI Library
//!
//! Runs commands one after another in a persistent local or remote shell and
//! mirrors their output.

pub mod runner;
