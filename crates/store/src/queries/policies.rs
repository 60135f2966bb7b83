//! Policy persistence: upsert by unique name, patch updates, deletion.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use serde_json::Value;
use uuid::Uuid;

use al_domain::{
    ConditionLogic, EventCategory, Policy, PolicyAction, RuleCondition, Severity,
};

use crate::error::{Error, Result};
use crate::{fmt_ts, from_json, parse_ts, parse_uuid, to_json, Store};

/// Patchable columns for `update_policy`.
const ALLOWED_POLICY_COLUMNS: &[&str] = &[
    "name",
    "description",
    "enabled",
    "categories",
    "tools",
    "conditions",
    "condition_logic",
    "action",
    "severity",
    "alert_title",
    "alert_description",
    "tags",
];

pub(crate) fn row_to_policy(row: &Row) -> rusqlite::Result<Policy> {
    let categories: Vec<String> = from_json(row.get("categories")?);
    Ok(Policy {
        id: parse_uuid(&row.get::<_, String>("id")?),
        name: row.get("name")?,
        description: row.get::<_, Option<String>>("description")?.unwrap_or_default(),
        enabled: row.get::<_, i64>("enabled")? != 0,
        categories: categories
            .iter()
            .filter_map(|c| EventCategory::parse(c))
            .collect(),
        tools: from_json(row.get("tools")?),
        conditions: from_json(row.get("conditions")?),
        condition_logic: ConditionLogic::parse(&row.get::<_, String>("condition_logic")?)
            .unwrap_or_default(),
        action: PolicyAction::parse(&row.get::<_, String>("action")?)
            .unwrap_or(PolicyAction::Alert),
        severity: Severity::parse(&row.get::<_, String>("severity")?)
            .unwrap_or(Severity::Medium),
        alert_title: row.get::<_, Option<String>>("alert_title")?.unwrap_or_default(),
        alert_description: row
            .get::<_, Option<String>>("alert_description")?
            .unwrap_or_default(),
        tags: from_json(row.get("tags")?),
        created_at: parse_ts(&row.get::<_, String>("created_at")?),
        updated_at: parse_ts(&row.get::<_, String>("updated_at")?),
    })
}

impl Store {
    /// Insert, or on name conflict update every non-identity field. Used by
    /// both policy creation and idempotent default seeding.
    pub fn save_policy(&self, policy: &Policy) -> Result<()> {
        let categories: Vec<&str> = policy.categories.iter().map(|c| c.as_str()).collect();
        self.with_tx(|tx| {
            tx.execute(
                r#"
                INSERT INTO policies (
                    id, name, description, enabled, categories, tools,
                    conditions, condition_logic, action, severity,
                    alert_title, alert_description, tags, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                ON CONFLICT(name) DO UPDATE SET
                    description = excluded.description,
                    enabled = excluded.enabled,
                    categories = excluded.categories,
                    tools = excluded.tools,
                    conditions = excluded.conditions,
                    condition_logic = excluded.condition_logic,
                    action = excluded.action,
                    severity = excluded.severity,
                    alert_title = excluded.alert_title,
                    alert_description = excluded.alert_description,
                    tags = excluded.tags,
                    updated_at = excluded.updated_at
                "#,
                params![
                    policy.id.to_string(),
                    policy.name,
                    policy.description,
                    policy.enabled as i64,
                    to_json(&categories)?,
                    to_json(&policy.tools)?,
                    to_json(&policy.conditions)?,
                    policy.condition_logic.as_str(),
                    policy.action.as_str(),
                    policy.severity.as_str(),
                    policy.alert_title,
                    policy.alert_description,
                    to_json(&policy.tags)?,
                    fmt_ts(&policy.created_at),
                    fmt_ts(&policy.updated_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_policy_by_id(&self, policy_id: &Uuid) -> Result<Option<Policy>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM policies WHERE id = ?1",
                [policy_id.to_string()],
                row_to_policy,
            )
            .optional()
            .map_err(Into::into)
        })
    }

    pub fn get_policy_by_name(&self, name: &str) -> Result<Option<Policy>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM policies WHERE name = ?1",
                [name],
                row_to_policy,
            )
            .optional()
            .map_err(Into::into)
        })
    }

    pub fn get_policies(&self, enabled_only: bool) -> Result<Vec<Policy>> {
        let query = if enabled_only {
            "SELECT * FROM policies WHERE enabled = 1 ORDER BY created_at DESC"
        } else {
            "SELECT * FROM policies ORDER BY created_at DESC"
        };
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(query)?;
            let policies = stmt
                .query_map([], row_to_policy)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(policies)
        })
    }

    /// Apply a patch mapping to a policy. Keys outside the allowlist fail
    /// with an invalid-argument error; enum-valued keys are validated.
    pub fn update_policy(
        &self,
        policy_id: &Uuid,
        patch: &serde_json::Map<String, Value>,
    ) -> Result<Policy> {
        let mut set_clauses: Vec<String> = Vec::new();
        let mut params_vec: Vec<Option<String>> = Vec::new();

        for (key, value) in patch {
            if !ALLOWED_POLICY_COLUMNS.contains(&key.as_str()) {
                return Err(Error::InvalidArgument(format!(
                    "invalid policy column: {key:?}"
                )));
            }
            let bound = match key.as_str() {
                "enabled" => {
                    let enabled = value.as_bool().ok_or_else(|| {
                        Error::InvalidArgument("enabled must be a boolean".to_string())
                    })?;
                    Some(if enabled { "1" } else { "0" }.to_string())
                }
                "action" => {
                    let action = value.as_str().and_then(PolicyAction::parse).ok_or_else(
                        || Error::InvalidArgument(format!("invalid action: {value}")),
                    )?;
                    Some(action.as_str().to_string())
                }
                "severity" => {
                    let severity = value.as_str().and_then(Severity::parse).ok_or_else(
                        || Error::InvalidArgument(format!("invalid severity: {value}")),
                    )?;
                    Some(severity.as_str().to_string())
                }
                "condition_logic" => {
                    let logic = value.as_str().and_then(ConditionLogic::parse).ok_or_else(
                        || Error::InvalidArgument(format!("invalid condition logic: {value}")),
                    )?;
                    Some(logic.as_str().to_string())
                }
                "categories" => {
                    let categories: Vec<EventCategory> =
                        serde_json::from_value(value.clone()).map_err(|_| {
                            Error::InvalidArgument(format!("invalid categories: {value}"))
                        })?;
                    let strs: Vec<&str> = categories.iter().map(|c| c.as_str()).collect();
                    Some(to_json(&strs)?)
                }
                "conditions" => {
                    let conditions: Vec<RuleCondition> = serde_json::from_value(value.clone())
                        .map_err(|_| {
                            Error::InvalidArgument(format!("invalid conditions: {value}"))
                        })?;
                    Some(to_json(&conditions)?)
                }
                "tools" | "tags" => Some(to_json(value)?),
                "name" => {
                    let name = value.as_str().ok_or_else(|| {
                        Error::InvalidArgument("name must be a string".to_string())
                    })?;
                    if let Some(existing) = self.get_policy_by_name(name)? {
                        if existing.id != *policy_id {
                            return Err(Error::Conflict(format!(
                                "a policy named {name:?} already exists"
                            )));
                        }
                    }
                    Some(name.to_string())
                }
                _ => match value {
                    Value::Null => None,
                    Value::String(s) => Some(s.clone()),
                    other => Some(other.to_string()),
                },
            };
            set_clauses.push(format!("{key} = ?"));
            params_vec.push(bound);
        }

        set_clauses.push("updated_at = ?".to_string());
        params_vec.push(Some(fmt_ts(&Utc::now())));
        params_vec.push(Some(policy_id.to_string()));

        self.with_tx(|tx| {
            let changed = tx.execute(
                &format!(
                    "UPDATE policies SET {} WHERE id = ?",
                    set_clauses.join(", ")
                ),
                rusqlite::params_from_iter(&params_vec),
            )?;
            if changed == 0 {
                return Err(Error::NotFound(format!("policy {policy_id}")));
            }
            Ok(())
        })?;

        self.get_policy_by_id(policy_id)?
            .ok_or_else(|| Error::NotFound(format!("policy {policy_id}")))
    }

    /// Delete a policy, first unlinking alerts that reference it so the
    /// foreign key does not block the delete.
    pub fn delete_policy(&self, policy_id: &Uuid) -> Result<()> {
        self.with_tx(|tx| {
            tx.execute(
                "UPDATE alerts SET policy_id = NULL WHERE policy_id = ?1",
                [policy_id.to_string()],
            )?;
            let deleted = tx.execute(
                "DELETE FROM policies WHERE id = ?1",
                [policy_id.to_string()],
            )?;
            if deleted == 0 {
                return Err(Error::NotFound(format!("policy {policy_id}")));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use al_domain::{Alert, ConditionOperator, Session};

    fn policy(name: &str) -> Policy {
        Policy {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: "test".to_string(),
            enabled: true,
            categories: vec![EventCategory::CommandExec],
            tools: Vec::new(),
            conditions: vec![RuleCondition {
                field: "tool_input.command".to_string(),
                operator: ConditionOperator::Matches,
                value: r"rm\s+-rf".into(),
                case_sensitive: false,
            }],
            condition_logic: ConditionLogic::All,
            action: PolicyAction::Block,
            severity: Severity::High,
            alert_title: String::new(),
            alert_description: String::new(),
            tags: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn save_policy_twice_updates_in_place() {
        let store = Store::open_in_memory().unwrap();
        let first = policy("P1");
        store.save_policy(&first).unwrap();

        let mut second = policy("P1");
        second.description = "updated".to_string();
        store.save_policy(&second).unwrap();

        let all = store.get_policies(false).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].description, "updated");
        // Identity is preserved from the first save.
        assert_eq!(all[0].id, first.id);
    }

    #[test]
    fn conditions_round_trip() {
        let store = Store::open_in_memory().unwrap();
        store.save_policy(&policy("P1")).unwrap();
        let stored = store.get_policy_by_name("P1").unwrap().unwrap();
        assert_eq!(stored.conditions.len(), 1);
        assert_eq!(stored.conditions[0].field, "tool_input.command");
        assert_eq!(stored.categories, vec![EventCategory::CommandExec]);
        assert_eq!(stored.action, PolicyAction::Block);
    }

    #[test]
    fn update_policy_validates_enums() {
        let store = Store::open_in_memory().unwrap();
        let p = policy("P1");
        store.save_policy(&p).unwrap();

        let patch: serde_json::Map<String, Value> =
            serde_json::from_value(serde_json::json!({"severity": "apocalyptic"})).unwrap();
        assert!(matches!(
            store.update_policy(&p.id, &patch).unwrap_err(),
            Error::InvalidArgument(_)
        ));

        let patch: serde_json::Map<String, Value> =
            serde_json::from_value(serde_json::json!({"severity": "low", "enabled": false}))
                .unwrap();
        let updated = store.update_policy(&p.id, &patch).unwrap();
        assert_eq!(updated.severity, Severity::Low);
        assert!(!updated.enabled);
    }

    #[test]
    fn rename_to_existing_name_conflicts() {
        let store = Store::open_in_memory().unwrap();
        let p1 = policy("P1");
        let p2 = policy("P2");
        store.save_policy(&p1).unwrap();
        store.save_policy(&p2).unwrap();

        let patch: serde_json::Map<String, Value> =
            serde_json::from_value(serde_json::json!({"name": "P1"})).unwrap();
        assert!(matches!(
            store.update_policy(&p2.id, &patch).unwrap_err(),
            Error::Conflict(_)
        ));
    }

    #[test]
    fn delete_policy_unlinks_alerts() {
        let store = Store::open_in_memory().unwrap();
        store.save_session(&Session::new("s1")).unwrap();
        let p = policy("P1");
        store.save_policy(&p).unwrap();

        let mut alert = Alert::new(
            "s1",
            "Blocked",
            "",
            Severity::High,
            EventCategory::CommandExec,
        );
        alert.policy_id = Some(p.id);
        store.save_alert(&alert).unwrap();

        store.delete_policy(&p.id).unwrap();
        assert!(store.get_policy_by_id(&p.id).unwrap().is_none());
        let stored = store.get_alert_by_id(&alert.id).unwrap().unwrap();
        assert!(stored.policy_id.is_none());

        assert!(matches!(
            store.delete_policy(&p.id).unwrap_err(),
            Error::NotFound(_)
        ));
    }
}
