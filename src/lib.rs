#![deny(unsafe_op_in_unsafe_fn)]
#![warn(rust_2018_idioms, clippy::pedantic)]
#![allow(
    clippy::cast_lossless,
    clippy::must_use_candidate,
    clippy::unreadable_literal
)]

pub mod doc;
pub mod utils;

pub(crate) mod envelope;
pub(crate) mod nrbf;
pub(crate) mod stream;

pub use doc::{Document, Error, FormatError, Layer, PropertyBag, PropertyValue, Result, Surface};
