//! Storefront checkout library
//!
//! Discount evaluation (rule matching, stacking, usage limits, per-item
//! amounts) and the checkout orchestrator that turns a cart into a pending
//! order with a payment intent.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod clock;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod repositories;
pub mod services;

pub use clock::{Clock, FixedClock, SystemClock};
pub use errors::{CheckoutError, DiscountError, ServiceError};
pub use services::commerce::{CheckoutRequest, CheckoutService, CheckoutSettings};
pub use services::discounts::{DiscountQuote, DiscountService};
