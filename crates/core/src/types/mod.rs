//! Core types for the storefront.

pub mod email;
pub mod id;
pub mod price;
pub mod status;

pub use email::{Email, EmailError};
pub use id::*;
pub use price::{TAX_RATE, price_with_tax, to_currency};
pub use status::*;
