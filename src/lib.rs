//! UEFI variable service backend for a hardware-virtualized guest: the
//! in-memory variable store, the Secure Boot authentication protocol, the
//! attribute/mode policy engine, and the MMIO command dispatcher that
//! bridges a guest's SMM Communicate buffer to all of the above.

extern crate binrw;
extern crate uefi;

pub use uefi::Guid;

pub mod attribute;
pub mod auth;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod guid;
pub mod mmio;
pub mod persistence;
pub mod pkcs7;
pub mod policy;
pub mod sign;
pub mod status;
pub mod transport;
pub mod ucs2;
pub mod varstore;

pub use attribute::EfiAttribute;
pub use error::EngineError;
pub use status::EfiStatus;
