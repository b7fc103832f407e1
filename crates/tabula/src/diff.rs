//! Schema diffing - compare a stored collection against a new declaration.
//!
//! Fields are matched by id, never by name. A declared field without an id is
//! an addition, a stored id missing from the declaration is a drop, and an id
//! present in both under a different name is a rename. Anything else about a
//! retained field (type, options, `required`, `unique`) must stay the same.
//!
//! The resulting [`ChangeSet`] is applied in a fixed order:
//!
//! ```text
//! rename table -> add columns -> rename columns -> drop columns
//! ```
//!
//! The differ walks that order over the live column names and refuses any
//! change set that would make two columns share a name along the way.

use std::collections::{HashMap, HashSet};

use tabula_sql::Identifier;

use crate::{ddl, resolve};
use crate::schema::{Collection, CollectionSpec, SchemaField};
use crate::{Error, Result};

/// A column rename, paired by field id.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRename {
    pub id: u32,
    pub from: Identifier,
    pub to: Identifier,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableRename {
    pub from: Identifier,
    pub to: Identifier,
}

/// Everything that changes between two versions of a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet {
    pub table: Identifier,
    pub rename_table: Option<TableRename>,
    /// New fields, with their freshly assigned ids.
    pub additions: Vec<SchemaField>,
    /// In an order that never renames onto a live column.
    pub renames: Vec<FieldRename>,
    pub drops: Vec<SchemaField>,
    /// The field list once everything is applied, in declared order.
    pub fields: Vec<SchemaField>,
    /// Counter value after the additions took their ids.
    pub next_field_id: u32,
}

impl ChangeSet {
    /// Returns true if there are no differences.
    pub fn is_empty(&self) -> bool {
        self.rename_table.is_none()
            && self.additions.is_empty()
            && self.renames.is_empty()
            && self.drops.is_empty()
    }

    /// Count total number of changes.
    pub fn change_count(&self) -> usize {
        usize::from(self.rename_table.is_some())
            + self.additions.len()
            + self.renames.len()
            + self.drops.len()
    }
}

impl std::fmt::Display for ChangeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return writeln!(f, "No changes detected.");
        }
        writeln!(f, "Changes detected:\n")?;
        writeln!(f, "  {}:", self.table)?;
        if let Some(rename) = &self.rename_table {
            writeln!(f, "    ~ rename {} -> {}", rename.from, rename.to)?;
        }
        for field in &self.additions {
            let required = if field.required { " (required)" } else { "" };
            writeln!(
                f,
                "    + {} #{}: {}{}",
                field.name,
                field.id,
                field.field_type(),
                required
            )?;
        }
        for rename in &self.renames {
            writeln!(f, "    ~ #{}: {} -> {}", rename.id, rename.from, rename.to)?;
        }
        for field in &self.drops {
            writeln!(f, "    - {} #{}", field.name, field.id)?;
        }
        Ok(())
    }
}

/// Diff `previous` against the declaration `candidate`.
pub fn diff(previous: &Collection, candidate: &CollectionSpec) -> Result<ChangeSet> {
    let mut seen_names = HashSet::new();
    for field in &candidate.fields {
        if !seen_names.insert(field.name.as_str()) {
            return Err(Error::Config(format!(
                "field name {} is declared more than once",
                field.name
            )));
        }
        resolve::check_field(field)?;
    }

    let by_id: HashMap<u32, &SchemaField> = previous.fields.iter().map(|f| (f.id, f)).collect();
    let mut retained = HashSet::new();
    let mut renames = Vec::new();

    for field in &candidate.fields {
        let Some(id) = field.id else { continue };
        let Some(old) = by_id.get(&id) else {
            return Err(Error::UnsupportedMigration(format!(
                "field {} carries id {id}, which does not exist in collection {}",
                field.name, previous.name
            )));
        };
        if !retained.insert(id) {
            return Err(Error::UnsupportedMigration(format!(
                "field id {id} is declared more than once"
            )));
        }
        if old.options != field.options {
            return Err(Error::UnsupportedMigration(format!(
                "field {} (#{id}): changing type or options is not supported",
                old.name
            )));
        }
        if old.required != field.required || old.unique != field.unique {
            return Err(Error::UnsupportedMigration(format!(
                "field {} (#{id}): changing required or unique is not supported",
                old.name
            )));
        }
        if old.name != field.name {
            renames.push(FieldRename {
                id,
                from: old.name.clone(),
                to: field.name.clone(),
            });
        }
    }

    let max_id = previous.fields.iter().map(|f| f.id).max().unwrap_or(0);
    let mut next_field_id = previous.next_field_id.max(max_id + 1).max(1);
    let additions: Vec<SchemaField> = candidate
        .fields
        .iter()
        .filter(|f| f.id.is_none())
        .map(|f| {
            let id = next_field_id;
            next_field_id += 1;
            SchemaField::from_spec(id, f)
        })
        .collect();

    let mut new_fields = additions.iter();
    let fields: Vec<SchemaField> = candidate
        .fields
        .iter()
        .filter_map(|f| match f.id {
            Some(id) => Some(SchemaField::from_spec(id, f)),
            None => new_fields.next().cloned(),
        })
        .collect();

    let drops: Vec<SchemaField> = previous
        .fields
        .iter()
        .filter(|f| !retained.contains(&f.id))
        .cloned()
        .collect();

    if previous.name != candidate.name {
        ddl::check_collection_name(&candidate.name)?;
    }
    let rename_table = (previous.name != candidate.name).then(|| TableRename {
        from: previous.name.clone(),
        to: candidate.name.clone(),
    });

    let renames = check_name_collisions(previous, &additions, renames)?;

    Ok(ChangeSet {
        table: previous.name.clone(),
        rename_table,
        additions,
        renames,
        drops,
        fields,
        next_field_id,
    })
}

/// Walk the apply order over live column names. Returns the renames
/// reordered so each target is free when it runs.
fn check_name_collisions(
    previous: &Collection,
    additions: &[SchemaField],
    mut pending: Vec<FieldRename>,
) -> Result<Vec<FieldRename>> {
    let mut live: HashSet<Identifier> = previous.fields.iter().map(|f| f.name.clone()).collect();

    for field in additions {
        if !live.insert(field.name.clone()) {
            return Err(Error::UnsupportedMigration(format!(
                "new field {} would share a name with an existing column; \
                 rename or drop that column in a separate update first",
                field.name
            )));
        }
    }

    let mut ordered = Vec::with_capacity(pending.len());
    while !pending.is_empty() {
        let Some(pos) = pending.iter().position(|r| !live.contains(&r.to)) else {
            let names: Vec<String> = pending
                .iter()
                .map(|r| format!("{} -> {}", r.from, r.to))
                .collect();
            return Err(Error::UnsupportedMigration(format!(
                "renames would collide with live columns: {}",
                names.join(", ")
            )));
        };
        let rename = pending.remove(pos);
        live.remove(&rename.from);
        live.insert(rename.to.clone());
        ordered.push(rename);
    }

    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DecimalOptions, FieldOptions, FieldSpec, NumberOptions, TextOptions};
    use chrono::Utc;
    use proptest::prelude::*;

    fn ident(name: &str) -> Identifier {
        Identifier::new(name).unwrap()
    }

    fn make_field(name: &str) -> FieldSpec {
        FieldSpec::new(ident(name), FieldOptions::Text(TextOptions::default()))
    }

    fn make_collection(name: &str, fields: &[(u32, &str)], next_field_id: u32) -> Collection {
        Collection {
            id: 1,
            name: ident(name),
            fields: fields
                .iter()
                .map(|(id, name)| SchemaField::from_spec(*id, &make_field(name)))
                .collect(),
            created_at: Utc::now(),
            version: 1,
            next_field_id,
        }
    }

    fn candidate(name: &str, fields: Vec<FieldSpec>) -> CollectionSpec {
        CollectionSpec::new(ident(name), fields)
    }

    #[test]
    fn test_no_changes() {
        let prev = make_collection("posts", &[(1, "title")], 2);
        let cand = candidate("posts", vec![make_field("title").with_id(1)]);
        let changes = diff(&prev, &cand).unwrap();
        assert!(changes.is_empty());
        assert_eq!(changes.next_field_id, 2);
        assert_eq!(changes.to_string(), "No changes detected.\n");
    }

    #[test]
    fn test_add_rename_drop() {
        let prev = make_collection("posts", &[(1, "title"), (2, "body")], 3);
        let cand = candidate(
            "articles",
            vec![make_field("headline").with_id(1), make_field("views")],
        );
        let changes = diff(&prev, &cand).unwrap();

        assert_eq!(
            changes.rename_table,
            Some(TableRename {
                from: ident("posts"),
                to: ident("articles")
            })
        );
        assert_eq!(changes.additions.len(), 1);
        assert_eq!(changes.additions[0].id, 3);
        assert_eq!(
            changes.renames,
            vec![FieldRename {
                id: 1,
                from: ident("title"),
                to: ident("headline")
            }]
        );
        assert_eq!(changes.drops.len(), 1);
        assert_eq!(changes.drops[0].id, 2);
        assert_eq!(changes.next_field_id, 4);
        assert_eq!(changes.change_count(), 4);

        insta::assert_snapshot!(changes.to_string(), @r"
        Changes detected:

          posts:
            ~ rename posts -> articles
            + views #3: text
            ~ #1: title -> headline
            - body #2
        ");
    }

    #[test]
    fn test_ids_never_reused_after_drop() {
        // Field 3 was added and dropped earlier; the counter remembers it.
        let prev = make_collection("posts", &[(1, "title")], 4);
        let cand = candidate(
            "posts",
            vec![make_field("title").with_id(1), make_field("summary")],
        );
        let changes = diff(&prev, &cand).unwrap();
        assert_eq!(changes.additions[0].id, 4);
        assert_eq!(changes.next_field_id, 5);
    }

    #[test]
    fn test_counter_behind_existing_ids() {
        let prev = make_collection("posts", &[(1, "title"), (7, "body")], 2);
        let cand = candidate(
            "posts",
            vec![
                make_field("title").with_id(1),
                make_field("body").with_id(7),
                make_field("summary"),
            ],
        );
        assert_eq!(diff(&prev, &cand).unwrap().additions[0].id, 8);
    }

    #[test]
    fn test_option_change_is_unsupported() {
        let prev = make_collection("posts", &[(1, "title")], 2);
        let changed = FieldSpec::new(
            ident("title"),
            FieldOptions::Text(TextOptions {
                max: Some(10),
                ..Default::default()
            }),
        )
        .with_id(1);
        let err = diff(&prev, &candidate("posts", vec![changed])).unwrap_err();
        assert!(matches!(err, Error::UnsupportedMigration(_)), "{err:?}");

        let retyped = FieldSpec::new(
            ident("title"),
            FieldOptions::Decimal(DecimalOptions::default()),
        )
        .with_id(1);
        let err = diff(&prev, &candidate("posts", vec![retyped])).unwrap_err();
        assert!(matches!(err, Error::UnsupportedMigration(_)), "{err:?}");

        let required = make_field("title").with_id(1).required();
        let err = diff(&prev, &candidate("posts", vec![required])).unwrap_err();
        assert!(matches!(err, Error::UnsupportedMigration(_)), "{err:?}");
    }

    #[test]
    fn test_unknown_or_repeated_id_is_unsupported() {
        let prev = make_collection("posts", &[(1, "title")], 2);
        let err = diff(
            &prev,
            &candidate("posts", vec![make_field("title").with_id(9)]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnsupportedMigration(_)), "{err:?}");

        let err = diff(
            &prev,
            &candidate(
                "posts",
                vec![make_field("a").with_id(1), make_field("b").with_id(1)],
            ),
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnsupportedMigration(_)), "{err:?}");
    }

    #[test]
    fn test_duplicate_names_are_config_errors() {
        let prev = make_collection("posts", &[(1, "title")], 2);
        let err = diff(
            &prev,
            &candidate(
                "posts",
                vec![make_field("title").with_id(1), make_field("title")],
            ),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{err:?}");
    }

    #[test]
    fn test_swap_is_rejected() {
        let prev = make_collection("posts", &[(1, "a"), (2, "b")], 3);
        let cand = candidate(
            "posts",
            vec![make_field("b").with_id(1), make_field("a").with_id(2)],
        );
        let err = diff(&prev, &cand).unwrap_err();
        assert!(matches!(err, Error::UnsupportedMigration(_)), "{err:?}");
    }

    #[test]
    fn test_reusing_dropped_name_is_rejected() {
        let prev = make_collection("posts", &[(1, "title")], 2);
        let cand = candidate("posts", vec![make_field("title")]);
        let err = diff(&prev, &cand).unwrap_err();
        assert!(matches!(err, Error::UnsupportedMigration(_)), "{err:?}");
    }

    #[test]
    fn test_chained_renames_are_ordered() {
        // a -> b while b -> c: b must move first.
        let prev = make_collection("posts", &[(1, "a"), (2, "b")], 3);
        let cand = candidate(
            "posts",
            vec![make_field("b").with_id(1), make_field("c").with_id(2)],
        );
        let changes = diff(&prev, &cand).unwrap();
        let order: Vec<u32> = changes.renames.iter().map(|r| r.id).collect();
        assert_eq!(order, vec![2, 1]);
    }

    #[test]
    fn test_system_column_name_is_rejected() {
        let prev = make_collection("posts", &[(1, "title")], 2);
        let cand = candidate("posts", vec![make_field("deleted").with_id(1)]);
        assert!(matches!(diff(&prev, &cand), Err(Error::Config(_))));
    }

    #[test]
    fn test_rename_to_catalog_table_is_rejected() {
        let prev = make_collection("posts", &[(1, "title")], 2);
        let cand = candidate("_collections", vec![make_field("title").with_id(1)]);
        assert!(matches!(diff(&prev, &cand), Err(Error::Config(_))));
    }

    #[test]
    fn test_number_field_kept_with_same_options() {
        let options = FieldOptions::Number(NumberOptions {
            min: Some(0.0),
            max: Some(10.0),
            decimal_places: 0,
        });
        let mut prev = make_collection("posts", &[], 2);
        prev.fields.push(SchemaField::from_spec(
            1,
            &FieldSpec::new(ident("score"), options.clone()),
        ));
        let cand = candidate(
            "posts",
            vec![FieldSpec::new(ident("points"), options).with_id(1)],
        );
        let changes = diff(&prev, &cand).unwrap();
        assert_eq!(changes.renames.len(), 1);
        assert!(changes.additions.is_empty() && changes.drops.is_empty());
    }

    proptest! {
        #[test]
        fn every_id_is_classified_once(
            existing in 0usize..8,
            keep_mask in prop::collection::vec(any::<bool>(), 8),
            rename_mask in prop::collection::vec(any::<bool>(), 8),
            added in 0usize..5,
            counter_slack in 0u32..5,
        ) {
            let prev_fields: Vec<(u32, String)> =
                (0..existing).map(|i| (i as u32 + 1, format!("f{i}"))).collect();
            let refs: Vec<(u32, &str)> =
                prev_fields.iter().map(|(id, n)| (*id, n.as_str())).collect();
            let next = existing as u32 + 1 + counter_slack;
            let prev = make_collection("posts", &refs, next);

            let mut fields = Vec::new();
            let mut kept = 0;
            let mut renamed = 0;
            for (i, (id, name)) in prev_fields.iter().enumerate() {
                if !keep_mask[i] {
                    continue;
                }
                kept += 1;
                let name = if rename_mask[i] {
                    renamed += 1;
                    format!("r{i}")
                } else {
                    name.clone()
                };
                fields.push(make_field(&name).with_id(*id));
            }
            for j in 0..added {
                fields.push(make_field(&format!("n{j}")));
            }

            let changes = diff(&prev, &candidate("posts", fields)).unwrap();

            prop_assert_eq!(changes.additions.len(), added);
            prop_assert_eq!(changes.renames.len(), renamed);
            prop_assert_eq!(changes.drops.len(), existing - kept);
            for (k, field) in changes.additions.iter().enumerate() {
                prop_assert_eq!(field.id, next + k as u32);
                prop_assert!(field.id > existing as u32);
            }
            prop_assert_eq!(changes.next_field_id, next + added as u32);
        }
    }
}
