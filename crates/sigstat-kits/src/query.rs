//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "KITS SQL Server status reader."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
/// Column aliases produced by [`status_query`].
pub const COL_DATETIME: &str = "operation_state_datetime";
pub const COL_STATUS: &str = "operation_state";
pub const COL_PLAN: &str = "plan_id";
pub const COL_SIGNAL: &str = "signal_id";

/// Latest status per intersection restricted to `flagged` status codes,
/// newest first. Codes are bound as `@P1..@Pn`.
pub fn status_query(flagged: usize) -> String {
    let placeholders = (1..=flagged)
        .map(|index| format!("@P{index}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "SELECT \
            status.DATETIME AS {COL_DATETIME}, \
            status.STATUS AS {COL_STATUS}, \
            status.PLANID AS {COL_PLAN}, \
            signal.ASSETNUM AS {COL_SIGNAL} \
        FROM [KITS].[INTERSECTION] signal \
        LEFT OUTER JOIN [KITS].[INTERSECTIONSTATUS] status \
            ON signal.[INTID] = status.[INTID] \
        WHERE status.DATETIME IS NOT NULL \
            AND status.STATUS IN ({placeholders}) \
        ORDER BY status.DATETIME DESC"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_one_placeholder_per_code() {
        let sql = status_query(3);
        assert!(sql.contains("status.STATUS IN (@P1, @P2, @P3)"));
        assert!(!sql.contains("@P4"));
    }

    #[test]
    fn selects_published_aliases() {
        let sql = status_query(1);
        for alias in [COL_DATETIME, COL_STATUS, COL_PLAN, COL_SIGNAL] {
            assert!(sql.contains(&format!("AS {alias}")), "missing alias {alias}");
        }
        assert!(sql.contains("ON signal.[INTID] = status.[INTID]"));
        assert!(sql.contains("WHERE status.DATETIME IS NOT NULL"));
        assert!(sql.ends_with("ORDER BY status.DATETIME DESC"));
    }
}
