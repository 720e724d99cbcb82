//! Exchange-interface adapter for the Ethereal perpetuals venue.
//!
//! [`Ethereal`] exposes blocking `fetch_*`/`create_order`/`cancel_*` calls.
//! Orders are snapped onto each market's tick and lot grid before dispatch,
//! and venue calls run through a [`ethereal_bridge::CallBridge`].

pub mod config;
pub mod convert;
pub mod error;
pub mod exchange;

pub use config::*;
pub use error::*;
pub use exchange::*;
