//! Applying a [`ChangeSet`] as a sequence of committed steps.
//!
//! Each step pairs one DDL unit with the metadata that describes the table
//! after it, and goes to the store as a single commit. Steps are not atomic
//! with respect to each other: if step 2 of 3 fails, step 1 stays applied and
//! the stored metadata still matches the table.

use serde::Serialize;
use tabula_sql::{DdlStmt, Identifier};

use crate::diff::ChangeSet;
use crate::schema::{Collection, FieldSpec, SchemaField};
use crate::store::{CollectionPatch, MetadataStore};
use crate::{Error, Result, ddl};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    RenameTable,
    AddFields,
    RenameFields,
    DropFields,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            StepKind::RenameTable => "rename table",
            StepKind::AddFields => "add fields",
            StepKind::RenameFields => "rename fields",
            StepKind::DropFields => "drop fields",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Committed,
    Failed,
}

/// Outcome of one step, as reported in [`Error::PartialMigration`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub kind: StepKind,
    pub status: StepStatus,
}

/// One commit unit.
#[derive(Debug, Clone)]
pub struct Step {
    pub kind: StepKind,
    pub ddl: DdlStmt,
    pub name: Option<Identifier>,
    pub fields: Option<Vec<SchemaField>>,
    pub next_field_id: Option<u32>,
}

impl Step {
    fn patch(&self, expected_version: i64) -> CollectionPatch {
        CollectionPatch {
            expected_version,
            name: self.name.clone(),
            fields: self.fields.clone(),
            next_field_id: self.next_field_id,
        }
    }
}

/// The steps that take `base` to the declared shape.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    base: Collection,
    steps: Vec<Step>,
}

impl MigrationPlan {
    pub fn new(base: &Collection, changes: &ChangeSet) -> Result<Self> {
        let mut steps = Vec::new();
        let mut table = base.name.clone();
        let mut fields = base.fields.clone();

        if let Some(rename) = &changes.rename_table {
            steps.push(Step {
                kind: StepKind::RenameTable,
                ddl: ddl::rename_table(&rename.from, &rename.to),
                name: Some(rename.to.clone()),
                fields: None,
                next_field_id: None,
            });
            table = rename.to.clone();
        }

        if !changes.additions.is_empty() {
            let specs: Vec<FieldSpec> = changes.additions.iter().map(SchemaField::to_spec).collect();
            fields.extend(changes.additions.iter().cloned());
            steps.push(Step {
                kind: StepKind::AddFields,
                ddl: ddl::alter_add(&table, &specs)?,
                name: None,
                fields: Some(fields.clone()),
                next_field_id: Some(changes.next_field_id),
            });
        }

        if !changes.renames.is_empty() {
            for rename in &changes.renames {
                if let Some(field) = fields.iter_mut().find(|f| f.id == rename.id) {
                    field.name = rename.to.clone();
                }
            }
            let pairs: Vec<(Identifier, Identifier)> = changes
                .renames
                .iter()
                .map(|r| (r.from.clone(), r.to.clone()))
                .collect();
            steps.push(Step {
                kind: StepKind::RenameFields,
                ddl: ddl::alter_rename(&table, &pairs),
                name: None,
                fields: Some(fields.clone()),
                next_field_id: None,
            });
        }

        if !changes.drops.is_empty() {
            let names: Vec<Identifier> = changes.drops.iter().map(|f| f.name.clone()).collect();
            steps.push(Step {
                kind: StepKind::DropFields,
                ddl: ddl::alter_drop(&table, &names),
                name: None,
                fields: None,
                next_field_id: None,
            });
        }

        // The last step records the declared field order.
        if let Some(last) = steps.last_mut() {
            last.fields = Some(changes.fields.clone());
        }

        Ok(Self {
            base: base.clone(),
            steps,
        })
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Commit every step in order, chaining the expected version.
    ///
    /// A failure in the first step is returned as is, nothing was applied.
    /// A failure after that is wrapped in [`Error::PartialMigration`].
    pub async fn apply(&self, store: &dyn MetadataStore) -> Result<Collection> {
        let mut current = self.base.clone();
        let mut reports: Vec<StepReport> = self
            .steps
            .iter()
            .map(|s| StepReport {
                kind: s.kind,
                status: StepStatus::Pending,
            })
            .collect();

        for (i, step) in self.steps.iter().enumerate() {
            let patch = step.patch(current.version);
            match store.update(current.id, patch, &step.ddl).await {
                Ok(updated) => {
                    tracing::debug!(
                        collection = %updated.name,
                        step = %step.kind,
                        version = updated.version,
                        "migration step committed"
                    );
                    reports[i].status = StepStatus::Committed;
                    current = updated;
                }
                Err(e) if i == 0 => return Err(e),
                Err(e) => {
                    reports[i].status = StepStatus::Failed;
                    tracing::warn!(
                        collection_id = current.id,
                        step = %step.kind,
                        error = %e,
                        "migration stopped after a partial apply"
                    );
                    return Err(Error::PartialMigration {
                        collection_id: current.id,
                        steps: reports,
                        failed: step.kind,
                        source: Box::new(e),
                    });
                }
            }
        }

        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff;
    use crate::schema::{CollectionSpec, FieldOptions, TextOptions};
    use chrono::Utc;
    use tabula_sql::render_ddl;

    fn ident(name: &str) -> Identifier {
        Identifier::new(name).unwrap()
    }

    fn text(name: &str) -> FieldSpec {
        FieldSpec::new(ident(name), FieldOptions::Text(TextOptions::default()))
    }

    fn posts() -> Collection {
        Collection {
            id: 1,
            name: ident("posts"),
            fields: vec![
                SchemaField::from_spec(1, &text("title")),
                SchemaField::from_spec(2, &text("body")),
            ],
            created_at: Utc::now(),
            version: 1,
            next_field_id: 3,
        }
    }

    #[test]
    fn plan_follows_fixed_order() {
        let base = posts();
        let candidate = CollectionSpec::new(
            ident("articles"),
            vec![text("summary"), text("headline").with_id(1)],
        );
        let changes = diff(&base, &candidate).unwrap();
        let plan = MigrationPlan::new(&base, &changes).unwrap();

        let kinds: Vec<StepKind> = plan.steps().iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                StepKind::RenameTable,
                StepKind::AddFields,
                StepKind::RenameFields,
                StepKind::DropFields
            ]
        );

        // Steps after the table rename act on the new name.
        assert_eq!(
            render_ddl(&plan.steps()[2].ddl),
            vec!["ALTER TABLE \"articles\" RENAME COLUMN \"title\" TO \"headline\""]
        );

        // Intermediate metadata keeps the dropped column until it is gone.
        let after_add: Vec<&str> = plan.steps()[1]
            .fields
            .as_ref()
            .unwrap()
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(after_add, ["title", "body", "summary"]);

        let last: Vec<(u32, &str)> = plan.steps()[3]
            .fields
            .as_ref()
            .unwrap()
            .iter()
            .map(|f| (f.id, f.name.as_str()))
            .collect();
        assert_eq!(last, [(3, "summary"), (1, "headline")]);
        assert_eq!(plan.steps()[1].next_field_id, Some(4));
    }

    #[test]
    fn empty_change_set_has_no_steps() {
        let base = posts();
        let candidate = CollectionSpec::new(
            ident("posts"),
            vec![text("title").with_id(1), text("body").with_id(2)],
        );
        let plan = MigrationPlan::new(&base, &diff(&base, &candidate).unwrap()).unwrap();
        assert!(plan.is_empty());
    }
}
