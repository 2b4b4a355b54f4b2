//! Identifier quoting and statement construction.

mod helpers;
pub mod statement;

pub use helpers::{quote_ident, quote_qualified, validate_type_name};
pub use statement::*;
