//! HTTP implementation of [`ethereal_core::VenueClient`].

pub mod client;
pub mod protocol;

pub use client::*;
