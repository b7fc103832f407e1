//! DDL units for collection tables.
//!
//! Every builder checks its fields through [`resolve`](crate::resolve) and
//! only ever deals in [`Identifier`]s, so a unit can be rendered without
//! further escaping decisions.

use tabula_sql::{
    AlterAction, AlterTable, ColumnDef, ColumnDefault, ColumnType, CreateTable, DdlStmt,
    Identifier,
};

use crate::{Error, Result};
use crate::resolve;
use crate::schema::{FieldSpec, system};

/// Table holding collection metadata. Collection tables reference it.
pub const CATALOG_TABLE: Identifier = Identifier::from_static("_collections");

fn system_columns() -> Vec<ColumnDef> {
    vec![
        ColumnDef::new(system::COLLECTION_ID, ColumnType::BigInt)
            .not_null()
            .references(CATALOG_TABLE, system::ID),
        ColumnDef::new(system::ID, ColumnType::BigSerial).primary_key(),
        ColumnDef::new(system::CREATED, ColumnType::Timestamptz)
            .not_null()
            .default(ColumnDefault::Now),
        ColumnDef::new(system::UPDATED, ColumnType::Timestamptz)
            .not_null()
            .default(ColumnDefault::Now),
        ColumnDef::new(system::DELETED, ColumnType::Timestamptz),
    ]
}

/// Collection names share a namespace with the catalog table.
pub fn check_collection_name(name: &Identifier) -> Result<()> {
    if *name == CATALOG_TABLE {
        return Err(Error::Config(format!(
            "{name} is reserved for collection metadata"
        )));
    }
    Ok(())
}

/// CREATE TABLE for a new collection: system columns, then one column per
/// field in declared order.
pub fn create(name: &Identifier, fields: &[FieldSpec]) -> Result<DdlStmt> {
    check_collection_name(name)?;
    let mut columns = system_columns();
    for field in fields {
        columns.push(resolve::resolve(field)?);
    }
    Ok(DdlStmt::CreateTable(CreateTable {
        name: name.clone(),
        if_not_exists: false,
        columns,
    }))
}

/// ADD COLUMN for each field, in one ALTER TABLE.
pub fn alter_add(table: &Identifier, fields: &[FieldSpec]) -> Result<DdlStmt> {
    let actions = fields
        .iter()
        .map(|f| resolve::resolve(f).map(AlterAction::AddColumn))
        .collect::<Result<_>>()?;
    Ok(DdlStmt::AlterTable(AlterTable {
        table: table.clone(),
        actions,
    }))
}

/// RENAME COLUMN for each `(from, to)` pair.
pub fn alter_rename(table: &Identifier, pairs: &[(Identifier, Identifier)]) -> DdlStmt {
    DdlStmt::AlterTable(AlterTable {
        table: table.clone(),
        actions: pairs
            .iter()
            .map(|(from, to)| AlterAction::RenameColumn {
                from: from.clone(),
                to: to.clone(),
            })
            .collect(),
    })
}

/// DROP COLUMN for each name, in one ALTER TABLE.
pub fn alter_drop(table: &Identifier, names: &[Identifier]) -> DdlStmt {
    DdlStmt::AlterTable(AlterTable {
        table: table.clone(),
        actions: names.iter().cloned().map(AlterAction::DropColumn).collect(),
    })
}

pub fn rename_table(from: &Identifier, to: &Identifier) -> DdlStmt {
    DdlStmt::RenameTable {
        from: from.clone(),
        to: to.clone(),
    }
}

/// CREATE TABLE IF NOT EXISTS for the metadata table.
pub fn catalog() -> DdlStmt {
    DdlStmt::CreateTable(CreateTable {
        name: CATALOG_TABLE,
        if_not_exists: true,
        columns: vec![
            ColumnDef::new(Identifier::from_static("id"), ColumnType::BigSerial).primary_key(),
            ColumnDef::new(Identifier::from_static("name"), ColumnType::Text)
                .not_null()
                .unique(),
            ColumnDef::new(Identifier::from_static("schema"), ColumnType::Jsonb).not_null(),
            ColumnDef::new(Identifier::from_static("next_field_id"), ColumnType::Integer)
                .not_null(),
            ColumnDef::new(Identifier::from_static("version"), ColumnType::BigInt).not_null(),
            ColumnDef::new(Identifier::from_static("created"), ColumnType::Timestamptz)
                .not_null()
                .default(ColumnDefault::Now),
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldOptions, NumberOptions, TextOptions};
    use tabula_sql::render_ddl;

    fn ident(name: &str) -> Identifier {
        Identifier::new(name).unwrap()
    }

    fn title() -> FieldSpec {
        FieldSpec::new(
            ident("title"),
            FieldOptions::Text(TextOptions {
                max: Some(100),
                ..Default::default()
            }),
        )
        .required()
    }

    fn views() -> FieldSpec {
        FieldSpec::new(
            ident("views"),
            FieldOptions::Number(NumberOptions {
                min: Some(0.0),
                max: Some(1_000_000.0),
                decimal_places: 0,
            }),
        )
    }

    #[test]
    fn create_posts() {
        let ddl = create(&ident("posts"), &[title(), views()]).unwrap();
        let sql = render_ddl(&ddl);
        assert_eq!(sql.len(), 1);
        insta::assert_snapshot!(sql[0], @r#"
        CREATE TABLE "posts" (
            "collectionId" BIGINT NOT NULL REFERENCES "_collections" ("id"),
            "id" BIGSERIAL PRIMARY KEY,
            "created" TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            "updated" TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            "deleted" TIMESTAMPTZ,
            "title" VARCHAR(100) NOT NULL,
            "views" INTEGER
        )
        "#);
    }

    #[test]
    fn create_rejects_bad_options() {
        let bad = FieldSpec::new(
            ident("title"),
            FieldOptions::Text(TextOptions {
                min: Some(5),
                max: Some(1),
                regex: None,
            }),
        );
        assert!(create(&ident("posts"), &[bad]).is_err());
    }

    #[test]
    fn add_batches_into_one_statement() {
        let ddl = alter_add(&ident("posts"), &[views(), title()]).unwrap();
        assert_eq!(
            render_ddl(&ddl),
            vec![
                "ALTER TABLE \"posts\" ADD COLUMN \"views\" INTEGER, \
                 ADD COLUMN \"title\" VARCHAR(100) NOT NULL"
            ]
        );
    }

    #[test]
    fn drop_batches_into_one_statement() {
        let ddl = alter_drop(&ident("posts"), &[ident("a"), ident("b")]);
        assert_eq!(
            render_ddl(&ddl),
            vec!["ALTER TABLE \"posts\" DROP COLUMN \"a\", DROP COLUMN \"b\""]
        );
    }

    #[test]
    fn rename_table_statement() {
        let ddl = rename_table(&ident("posts"), &ident("articles"));
        assert_eq!(
            render_ddl(&ddl),
            vec!["ALTER TABLE \"posts\" RENAME TO \"articles\""]
        );
    }

    #[test]
    fn catalog_table() {
        let sql = render_ddl(&catalog());
        insta::assert_snapshot!(sql[0], @r#"
        CREATE TABLE IF NOT EXISTS "_collections" (
            "id" BIGSERIAL PRIMARY KEY,
            "name" TEXT NOT NULL UNIQUE,
            "schema" JSONB NOT NULL,
            "next_field_id" INTEGER NOT NULL,
            "version" BIGINT NOT NULL,
            "created" TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#);
    }
}
