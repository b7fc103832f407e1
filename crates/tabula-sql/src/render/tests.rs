use crate::*;

fn ident(name: &str) -> Identifier {
    Identifier::new(name).unwrap()
}

#[test]
fn test_select_active_rows() {
    let stmt = SelectStmt::new(ident("posts"))
        .columns([ident("id"), ident("title")])
        .where_(Expr::column(ident("collectionId")).eq(Expr::param("collectionId")))
        .and_where(Expr::column(ident("deleted")).is_null())
        .order_by(OrderBy::asc(ident("id")));

    let result = render(&stmt);
    insta::assert_snapshot!(result.sql, @r#"
    SELECT "id", "title"
    FROM "posts"
    WHERE "collectionId" = $1 AND "deleted" IS NULL
    ORDER BY "id" ASC
    "#);
    assert_eq!(result.params, vec![ParamName::from("collectionId")]);
}

#[test]
fn test_select_star() {
    let stmt = SelectStmt::new(ident("posts"));
    assert_eq!(render(&stmt).sql, "SELECT *\nFROM \"posts\"");
}

#[test]
fn test_insert_returning() {
    let stmt = InsertStmt::new(ident("posts"))
        .column(ident("collectionId"), Expr::param("collectionId"))
        .column(ident("title"), Expr::param("title"))
        .returning([ident("id"), ident("created")]);

    let result = render(&stmt);
    insta::assert_snapshot!(result.sql, @r#"
    INSERT INTO "posts" ("collectionId", "title")
    VALUES ($1, $2)
    RETURNING "id", "created"
    "#);
    assert_eq!(
        result.params,
        vec![ParamName::from("collectionId"), ParamName::from("title")]
    );
}

#[test]
fn test_update_with_coalesce() {
    let deleted = ident("deleted");
    let stmt = UpdateStmt::new(ident("posts"))
        .set(
            deleted.clone(),
            Expr::coalesce(vec![Expr::column(deleted), Expr::Now]),
        )
        .where_(Expr::column(ident("id")).eq(Expr::param("id")));

    let result = render(&stmt);
    insta::assert_snapshot!(result.sql, @r#"
    UPDATE "posts"
    SET "deleted" = COALESCE("deleted", NOW())
    WHERE "id" = $1
    "#);
}

#[test]
fn test_repeated_param_reuses_placeholder() {
    let stmt = SelectStmt::new(ident("posts"))
        .where_(Expr::column(ident("a")).eq(Expr::param("x")))
        .and_where(Expr::column(ident("b")).eq(Expr::param("x")));

    let result = render(&stmt);
    assert_eq!(
        result.sql,
        "SELECT *\nFROM \"posts\"\nWHERE \"a\" = $1 AND \"b\" = $1"
    );
    assert_eq!(result.params.len(), 1);
}

#[test]
fn test_param_named_after_column_shares_placeholder() {
    let title = ident("title");
    let stmt = SelectStmt::new(ident("posts"))
        .where_(Expr::column(title.clone()).eq(Expr::param(&title)))
        .and_where(Expr::column(ident("alt")).eq(Expr::param("title")));

    let result = render(&stmt);
    assert_eq!(result.params, vec![ParamName::from("title")]);
    assert_eq!(result.params[0].as_str(), "title");
    assert_eq!(result.params[0].to_string(), "title");
}

#[test]
fn test_stmt_enum_delegates() {
    let stmt: Stmt = UpdateStmt::new(ident("posts"))
        .set(ident("title"), Expr::param("title"))
        .set(ident("updated"), Expr::Now)
        .where_(Expr::column(ident("id")).eq(Expr::param("id")))
        .returning([ident("id")])
        .into();

    let result = render(&stmt);
    insta::assert_snapshot!(result.sql, @r#"
    UPDATE "posts"
    SET "title" = $1, "updated" = NOW()
    WHERE "id" = $2
    RETURNING "id"
    "#);
    assert_eq!(stmt.table().as_str(), "posts");
}

#[test]
fn test_create_table() {
    let ddl = DdlStmt::CreateTable(CreateTable {
        name: ident("posts"),
        if_not_exists: false,
        columns: vec![
            ColumnDef::new(ident("collectionId"), ColumnType::BigInt)
                .not_null()
                .references(ident("_collections"), ident("id")),
            ColumnDef::new(ident("id"), ColumnType::BigSerial).primary_key(),
            ColumnDef::new(ident("created"), ColumnType::Timestamptz)
                .not_null()
                .default(ColumnDefault::Now),
            ColumnDef::new(ident("title"), ColumnType::Varchar(100))
                .not_null()
                .unique(),
        ],
    });

    let statements = render_ddl(&ddl);
    assert_eq!(statements.len(), 1);
    insta::assert_snapshot!(statements[0], @r#"
    CREATE TABLE "posts" (
        "collectionId" BIGINT NOT NULL REFERENCES "_collections" ("id"),
        "id" BIGSERIAL PRIMARY KEY,
        "created" TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        "title" VARCHAR(100) NOT NULL UNIQUE
    )
    "#);
}

#[test]
fn test_create_table_if_not_exists() {
    let ddl = DdlStmt::CreateTable(CreateTable {
        name: ident("_collections"),
        if_not_exists: true,
        columns: vec![ColumnDef::new(ident("schema"), ColumnType::Jsonb).not_null()],
    });

    assert_eq!(
        render_ddl(&ddl),
        vec!["CREATE TABLE IF NOT EXISTS \"_collections\" (\n    \"schema\" JSONB NOT NULL\n)"]
    );
}

#[test]
fn test_alter_batches_adds_and_drops() {
    let ddl = DdlStmt::AlterTable(AlterTable {
        table: ident("posts"),
        actions: vec![
            AlterAction::AddColumn(ColumnDef::new(ident("score"), ColumnType::Integer)),
            AlterAction::AddColumn(ColumnDef::new(ident("ratio"), ColumnType::DoublePrecision)),
            AlterAction::DropColumn(ident("legacy")),
        ],
    });

    assert_eq!(
        render_ddl(&ddl),
        vec![
            "ALTER TABLE \"posts\" ADD COLUMN \"score\" INTEGER, \
             ADD COLUMN \"ratio\" DOUBLE PRECISION, DROP COLUMN \"legacy\""
        ]
    );
}

#[test]
fn test_alter_renames_are_split() {
    let ddl = DdlStmt::AlterTable(AlterTable {
        table: ident("posts"),
        actions: vec![
            AlterAction::RenameColumn {
                from: ident("title"),
                to: ident("headline"),
            },
            AlterAction::RenameColumn {
                from: ident("body"),
                to: ident("content"),
            },
        ],
    });

    assert_eq!(
        render_ddl(&ddl),
        vec![
            "ALTER TABLE \"posts\" RENAME COLUMN \"title\" TO \"headline\"",
            "ALTER TABLE \"posts\" RENAME COLUMN \"body\" TO \"content\"",
        ]
    );
    assert_eq!(ddl.intent(), "alter table posts: rename 2 column(s)");
}

#[test]
fn test_rename_table() {
    let ddl = DdlStmt::RenameTable {
        from: ident("posts"),
        to: ident("articles"),
    };
    assert_eq!(
        render_ddl(&ddl),
        vec!["ALTER TABLE \"posts\" RENAME TO \"articles\""]
    );
    assert_eq!(ddl.table().as_str(), "posts");
}
