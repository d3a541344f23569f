//! Integration test crate for the argent develop engine.
//!
//! This crate exists solely to hold cross-crate scenario tests. It
//! depends on every engine crate to verify they work together.

#[cfg(test)]
mod common;

#[cfg(test)]
mod history;

#[cfg(test)]
mod persistence;

#[cfg(test)]
mod pipeline;

#[cfg(test)]
mod concurrency;
