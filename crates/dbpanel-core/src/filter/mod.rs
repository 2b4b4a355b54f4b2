//! Report filter catalog and resolution of filter selections.

mod catalog;
mod kind;
mod resolver;

pub use catalog::Catalog;
pub use kind::{FilterDecl, FilterKind, Placement, ReportTarget, TargetKind};
pub use resolver::{
    build_report_select, resolve_filters, ResolvedFilter, ResolvedFilterOption, ResolvedFilters,
    ANY_OPTION, NO_OPTION, YES_OPTION,
};
