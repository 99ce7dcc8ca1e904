//! Listings domain: the records we replicate and the stages that move them.

pub mod activities;
pub mod models;

pub use models::{Category, Listing, Media};
