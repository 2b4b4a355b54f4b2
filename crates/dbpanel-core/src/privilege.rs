//! Which write actions the current principal may perform on a table.

use dbpanel_shared::ExecutionMetrics;
use serde::Serialize;
use tracing::warn;

use crate::session::{DbError, Session};
use crate::sql::quote_qualified;
use crate::value::SqlValue;

const PRIVILEGE_QUERY: &str = "SELECT has_table_privilege(current_user, $1, $2) AS granted";

/// Effective INSERT/UPDATE/DELETE grants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TablePrivileges {
    pub insert: bool,
    pub update: bool,
    pub delete: bool,
}

impl TablePrivileges {
    /// The answer whenever the check itself fails.
    pub fn none() -> Self {
        Self::default()
    }

    /// Look up by privilege name (`INSERT`, `UPDATE`, `DELETE`); anything
    /// else is `false`.
    pub fn allows(&self, privilege: &str) -> bool {
        match privilege.to_ascii_uppercase().as_str() {
            "INSERT" => self.insert,
            "UPDATE" => self.update,
            "DELETE" => self.delete,
            _ => false,
        }
    }

    pub fn any(&self) -> bool {
        self.insert || self.update || self.delete
    }
}

async fn has_privilege<S: Session + ?Sized>(
    session: &mut S,
    qualified: &str,
    privilege: &str,
) -> Result<bool, DbError> {
    let row = session
        .query_one(
            PRIVILEGE_QUERY,
            &[SqlValue::from(qualified), SqlValue::from(privilege)],
        )
        .await?;
    Ok(matches!(row.as_deref(), Some([SqlValue::Bool(true), ..])))
}

/// One privilege check per operation. Any failure yields all-false, so a
/// broken check can only ever hide an action.
pub async fn table_privileges<S: Session + ?Sized>(
    session: &mut S,
    schema: &str,
    table: &str,
) -> TablePrivileges {
    let qualified = match quote_qualified(schema, table) {
        Ok(q) => q,
        Err(e) => {
            warn!(table, "Privilege check skipped: {}", e);
            ExecutionMetrics::privilege_check_failed(table);
            return TablePrivileges::none();
        }
    };

    let mut granted = [false; 3];
    for (slot, privilege) in granted.iter_mut().zip(["INSERT", "UPDATE", "DELETE"]) {
        match has_privilege(session, &qualified, privilege).await {
            Ok(g) => *slot = g,
            Err(e) => {
                warn!(table, privilege, "Privilege check failed, hiding actions: {}", e);
                ExecutionMetrics::privilege_check_failed(table);
                return TablePrivileges::none();
            }
        }
    }

    let [insert, update, delete] = granted;
    TablePrivileges {
        insert,
        update,
        delete,
    }
}
