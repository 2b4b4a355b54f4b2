//! `dbpanel`: convenience façade that re-exports `dbpanel-core` and the
//! shared configuration types.

#![deny(missing_docs)]

/// Re-export **everything** from dbpanel-core at the crate root, so users can `use dbpanel::*;`.
#[doc(inline)]
pub use dbpanel_core::*;

/// Also expose dbpanel-core as a nested module for `dbpanel::core::...` paths.
pub use dbpanel_core as core;

/// Configuration, observability and retry policies.
pub use dbpanel_shared as shared;

pub use dbpanel_shared::{IsolationLevel, PanelConfig, Role};
