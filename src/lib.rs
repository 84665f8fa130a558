#![cfg_attr(not(any(test, feature = "std")), no_std)]

// This must go FIRST so that all the other modules see its macros.
mod fmt;

pub mod act;
pub mod consts;
pub mod gts;
pub mod message;
pub mod pib;
pub mod sab;
pub mod sap;
#[cfg(feature = "std")]
pub mod test_helpers;
pub mod wire;

pub use gts::GtsManager;
