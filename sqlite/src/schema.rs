//! SQL generation for migration steps and the ledger table.
//!
//! Identifiers are validated and then double-quoted, so names such as
//! `value` or `name` never collide with SQL keywords. Index names are
//! prefixed with their table name because SQLite keeps all index names in
//! one namespace per database.

use std::collections::BTreeMap;

use dbstrap_core::{ColumnSchema, IndexSpec, MigrationStep, TypeRegistry, validate_identifier};
use serde_json::Value;

use crate::error::Result;

/// Validates and double-quotes an identifier.
pub(crate) fn quote_ident(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{name}\""))
}

/// Physical index name for `index` on `table`.
pub fn index_name(table: &str, index: &str) -> String {
    format!("{table}_{index}")
}

fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}

/// Renders one column definition.
///
/// Auto-increment primary keys are emitted as `INTEGER PRIMARY KEY
/// AUTOINCREMENT` regardless of the declared integer type, since SQLite
/// only allows the keyword on a rowid alias.
pub fn column_sql(
    name: &str,
    column: &ColumnSchema,
    types: &TypeRegistry,
    inline_primary_key: bool,
) -> Result<String> {
    let mut sql = quote_ident(name)?;
    let sql_type = types.resolve(&column.type_name)?;

    if inline_primary_key && column.auto_increment {
        sql.push_str(" INTEGER PRIMARY KEY AUTOINCREMENT");
        return Ok(sql);
    }

    sql.push(' ');
    sql.push_str(&sql_type);
    if inline_primary_key {
        sql.push_str(" PRIMARY KEY");
    }
    if !column.allow_null {
        sql.push_str(" NOT NULL");
    }
    if column.unique {
        sql.push_str(" UNIQUE");
    }
    if let Some(default) = &column.default_value {
        sql.push_str(" DEFAULT ");
        sql.push_str(&literal(default));
    }
    Ok(sql)
}

/// Generates `CREATE TABLE` for a column map.
///
/// Primary key columns come first; a composite key becomes a table
/// constraint.
pub fn create_table_sql(
    table: &str,
    columns: &BTreeMap<String, ColumnSchema>,
    if_not_exists: bool,
    types: &TypeRegistry,
) -> Result<String> {
    let primary: Vec<&String> = columns
        .iter()
        .filter(|(_, c)| c.primary_key)
        .map(|(n, _)| n)
        .collect();
    let inline_primary_key = primary.len() == 1;

    let mut ordered: Vec<(&String, &ColumnSchema)> = columns.iter().collect();
    ordered.sort_by_key(|(_, c)| !c.primary_key);

    let mut definitions = Vec::with_capacity(columns.len() + 1);
    for (name, column) in ordered {
        definitions.push(column_sql(
            name,
            column,
            types,
            inline_primary_key && column.primary_key,
        )?);
    }
    if primary.len() > 1 {
        let keys = primary
            .iter()
            .map(|n| quote_ident(n))
            .collect::<Result<Vec<_>>>()?;
        definitions.push(format!("PRIMARY KEY ({})", keys.join(", ")));
    }

    Ok(format!(
        "CREATE TABLE {}{} (\n    {}\n);",
        if if_not_exists { "IF NOT EXISTS " } else { "" },
        quote_ident(table)?,
        definitions.join(",\n    ")
    ))
}

/// Generates `CREATE [UNIQUE] INDEX` for an index on `table`.
pub fn create_index_sql(table: &str, index: &IndexSpec) -> Result<String> {
    let name = index_name(table, &index.effective_name());
    let fields = index
        .fields
        .iter()
        .map(|f| quote_ident(f))
        .collect::<Result<Vec<_>>>()?;
    Ok(format!(
        "CREATE {}INDEX {} ON {} ({});",
        if index.unique { "UNIQUE " } else { "" },
        quote_ident(&name)?,
        quote_ident(table)?,
        fields.join(", ")
    ))
}

/// Generates the SQL for one migration step.
pub fn step_sql(step: &MigrationStep, types: &TypeRegistry) -> Result<String> {
    let sql = match step {
        MigrationStep::CreateTable {
            table,
            columns,
            if_not_exists,
        } => create_table_sql(table, columns, *if_not_exists, types)?,
        MigrationStep::DropTable { table, if_exists } => format!(
            "DROP TABLE {}{};",
            if *if_exists { "IF EXISTS " } else { "" },
            quote_ident(table)?
        ),
        MigrationStep::RenameTable { from, to } => format!(
            "ALTER TABLE {} RENAME TO {};",
            quote_ident(from)?,
            quote_ident(to)?
        ),
        MigrationStep::AddColumn {
            table,
            column,
            definition,
        } => format!(
            "ALTER TABLE {} ADD COLUMN {};",
            quote_ident(table)?,
            column_sql(column, definition, types, false)?
        ),
        MigrationStep::RemoveColumn { table, column } => format!(
            "ALTER TABLE {} DROP COLUMN {};",
            quote_ident(table)?,
            quote_ident(column)?
        ),
        MigrationStep::AddIndex { table, index } => create_index_sql(table, index)?,
        MigrationStep::RemoveIndex { table, name } => {
            format!("DROP INDEX {};", quote_ident(&index_name(table, name))?)
        }
        MigrationStep::Sql { sql } => sql.clone(),
    };
    Ok(sql)
}

/// Generates the ledger table DDL.
pub fn ledger_table_sql(table: &str) -> Result<String> {
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    \"name\" VARCHAR(255) NOT NULL PRIMARY KEY,\n    \"applied_at\" TEXT,\n    \"checksum\" TEXT\n);",
        quote_ident(table)?
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbstrap_core::ValidationError;
    use rusqlite::Connection;

    fn columns() -> BTreeMap<String, ColumnSchema> {
        let mut columns = BTreeMap::new();
        columns.insert("id".to_string(), ColumnSchema::primary_key());
        columns.insert("name".to_string(), ColumnSchema::new("STRING").not_null());
        columns.insert(
            "value".to_string(),
            ColumnSchema::new("BIGINT").with_default(serde_json::json!(0)),
        );
        columns.insert(
            "label".to_string(),
            ColumnSchema::new("TEXT").with_default(serde_json::json!("it's")),
        );
        columns
    }

    #[test]
    fn test_quote_ident_rejects_injection() {
        assert_eq!(quote_ident("value").unwrap(), "\"value\"");
        assert!(matches!(
            quote_ident("x\"; DROP TABLE y; --"),
            Err(crate::SqliteError::ValidationError(
                ValidationError::InvalidIdentifier(_)
            ))
        ));
    }

    #[test]
    fn test_create_table_puts_primary_key_first() {
        let sql = create_table_sql("testOne", &columns(), false, &TypeRegistry::new()).unwrap();
        let first_column = sql.lines().nth(1).unwrap().trim();
        assert_eq!(first_column, "\"id\" INTEGER PRIMARY KEY AUTOINCREMENT,");
        assert!(sql.contains("\"name\" VARCHAR(255) NOT NULL"));
        assert!(sql.contains("\"value\" BIGINT DEFAULT 0"));
        assert!(sql.contains("DEFAULT 'it''s'"));
    }

    #[test]
    fn test_generated_sql_executes() {
        let conn = Connection::open_in_memory().unwrap();
        let types = TypeRegistry::new();
        conn.execute_batch(&create_table_sql("testOne", &columns(), false, &types).unwrap())
            .unwrap();
        conn.execute_batch(
            &create_index_sql("testOne", &IndexSpec::new(&["value", "name"]).named("value")).unwrap(),
        )
        .unwrap();
        // a second table may reuse the logical index name
        conn.execute_batch(&create_table_sql("testTwo", &columns(), true, &types).unwrap())
            .unwrap();
        conn.execute_batch(
            &create_index_sql("testTwo", &IndexSpec::new(&["value", "name"]).named("value")).unwrap(),
        )
        .unwrap();

        conn.execute("INSERT INTO testOne (name) VALUES ('a')", []).unwrap();
        let value: i64 = conn
            .query_row("SELECT value FROM testOne", [], |row| row.get(0))
            .unwrap();
        assert_eq!(value, 0);
    }

    #[test]
    fn test_composite_primary_key() {
        let mut columns = BTreeMap::new();
        let mut a = ColumnSchema::new("INTEGER");
        a.primary_key = true;
        let mut b = ColumnSchema::new("STRING");
        b.primary_key = true;
        columns.insert("a".to_string(), a);
        columns.insert("b".to_string(), b);

        let sql = create_table_sql("pairs", &columns, false, &TypeRegistry::new()).unwrap();
        assert!(sql.contains("PRIMARY KEY (\"a\", \"b\")"));
        Connection::open_in_memory().unwrap().execute_batch(&sql).unwrap();
    }

    #[test]
    fn test_step_sql_variants() {
        let types = TypeRegistry::new();
        assert_eq!(
            step_sql(
                &MigrationStep::DropTable {
                    table: "t".into(),
                    if_exists: true
                },
                &types
            )
            .unwrap(),
            "DROP TABLE IF EXISTS \"t\";"
        );
        assert_eq!(
            step_sql(
                &MigrationStep::RenameTable {
                    from: "a".into(),
                    to: "b".into()
                },
                &types
            )
            .unwrap(),
            "ALTER TABLE \"a\" RENAME TO \"b\";"
        );
        assert_eq!(
            step_sql(
                &MigrationStep::RemoveIndex {
                    table: "t".into(),
                    name: "value".into()
                },
                &types
            )
            .unwrap(),
            "DROP INDEX \"t_value\";"
        );
        assert_eq!(
            step_sql(
                &MigrationStep::AddColumn {
                    table: "t".into(),
                    column: "c".into(),
                    definition: ColumnSchema::new("TEXT"),
                },
                &types
            )
            .unwrap(),
            "ALTER TABLE \"t\" ADD COLUMN \"c\" TEXT;"
        );
    }

    #[test]
    fn test_unknown_type_in_step() {
        let mut columns = BTreeMap::new();
        columns.insert("shape".to_string(), ColumnSchema::new("GEOMETRY"));
        let result = step_sql(
            &MigrationStep::CreateTable {
                table: "t".into(),
                columns,
                if_not_exists: false,
            },
            &TypeRegistry::new(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_ledger_table_sql() {
        let sql = ledger_table_sql("SequelizeMeta").unwrap();
        assert!(sql.contains("CREATE TABLE IF NOT EXISTS \"SequelizeMeta\""));
        assert!(ledger_table_sql("bad-name").is_err());
    }
}
