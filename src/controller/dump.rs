//! Human-readable and JSON rendering of every table.
//!
//! Enumeration is lenient: a failing table yields an error line and the
//! remaining tables are still rendered.

use std::ops::ControlFlow;

use serde::Serialize;

use super::TrafficController;
use crate::store::KeyValueStore;
use crate::types::MatchType;

/// Rendered content of one table.
#[derive(Debug, Clone, Serialize)]
pub struct TableDump {
    /// Table name.
    pub name: String,
    /// One line per entry, in key order.
    pub lines: Vec<String>,
    /// Why enumeration stopped early, if it did.
    pub error: Option<String>,
}

impl TableDump {
    fn failed(name: &str, error: String) -> Self {
        Self {
            name: name.to_owned(),
            lines: Vec::new(),
            error: Some(error),
        }
    }
}

/// Rendered content of every table, in a fixed order.
#[derive(Debug, Clone, Serialize)]
pub struct DumpReport {
    /// Per-table output.
    pub tables: Vec<TableDump>,
}

impl DumpReport {
    /// Flatten into printable lines.
    pub fn lines(&self) -> Vec<String> {
        let mut out = Vec::new();
        for table in &self.tables {
            out.push(format!("{}:", table.name));
            out.extend(table.lines.iter().map(|l| format!("  {l}")));
            if let Some(err) = &table.error {
                out.push(format!("{} print end with error: {err}", table.name));
            }
        }
        out
    }

    /// Table by name.
    pub fn table(&self, name: &str) -> Option<&TableDump> {
        self.tables.iter().find(|t| t.name == name)
    }
}

/// Name of the in-memory privileged-user section.
pub const PRIVILEGED_USERS: &str = "privileged_users";

pub(super) fn collect(controller: &TrafficController) -> DumpReport {
    let mut tables = Vec::new();

    tables.push(render(controller.cookie_tag.as_ref(), |cookie, v| {
        format!("cookie={cookie} tag={:#x} uid={}", v.tag, v.uid)
    }));

    match controller.policy_lock() {
        Ok(policy) => {
            tables.push(render(policy.counter_sets.as_ref(), |uid, set| {
                format!("{uid} {set}")
            }));
            tables.push(render(policy.rules.owner_map().as_ref(), |uid, v| {
                if v.rule.contains(MatchType::Iif) {
                    format!("{uid}  {} {}", v.rule, v.iif)
                } else {
                    format!("{uid}  {}", v.rule)
                }
            }));
            tables.push(render(
                policy.permissions.permission_map().as_ref(),
                |uid, mask| format!("{uid}  {mask}"),
            ));
            tables.push(TableDump {
                name: PRIVILEGED_USERS.to_owned(),
                lines: policy
                    .permissions
                    .privileged_users()
                    .iter()
                    .map(|uid| format!("{uid} ALLOW_UPDATE_DEVICE_STATS"))
                    .collect(),
                error: None,
            });
        }
        Err(e) => {
            let msg = format!("policy lock poisoned: {e}");
            for name in [
                "uid_counter_set_map",
                "uid_owner_map",
                "uid_permission_map",
                PRIVILEGED_USERS,
            ] {
                tables.push(TableDump::failed(name, msg.clone()));
            }
        }
    }

    DumpReport { tables }
}

fn render<K, V>(map: &dyn KeyValueStore<K, V>, line: impl Fn(&K, &V) -> String) -> TableDump {
    let mut lines = Vec::new();
    let result = map.iterate(&mut |k, v| {
        lines.push(line(k, v));
        ControlFlow::Continue(())
    });
    TableDump {
        name: map.name().to_owned(),
        lines,
        error: result.err().map(|e| e.to_string()),
    }
}
