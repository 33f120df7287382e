//! Storefront Core - Shared domain types.
//!
//! This crate provides the types shared by the store library, its binary and
//! the command-line tools:
//! - typed entity ids that cannot be mixed up across entities
//! - enumerations stored as single-letter codes (membership, payment status)
//! - the tax arithmetic used by computed price fields
//! - a validated email address
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no database access, no HTTP.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
