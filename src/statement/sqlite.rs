use super::{conflict_columns, insert_parts, quote_with, render_change, Dialect, Statement, WriteIntent};
use crate::Result;

/// SQLite: double-quoted identifiers, `?` placeholders, sets as JSON text
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn quote(&self, ident: &str) -> String {
        quote_with(ident, '"')
    }

    /// `INSERT ... ON CONFLICT (<identity>) DO UPDATE SET ...`
    ///
    /// Assignments take the incoming row (`excluded`); counter deltas apply
    /// to the stored row.
    fn upsert(&self, intent: &WriteIntent) -> Result<Statement> {
        let (columns, values, mut params) = insert_parts(self, intent)?;
        let keys: Vec<String> = intent.identity.iter().map(|(name, _)| self.quote(name)).collect();

        let mut sets = Vec::new();
        for column in conflict_columns(intent) {
            for fragment in &column.changes {
                if fragment.is_assignment() {
                    let col = self.quote(&column.column);
                    sets.push(format!("{col} = excluded.{col}"));
                } else {
                    sets.push(render_change(self, &column.column, fragment, &mut params)?);
                }
            }
        }

        let action = if sets.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", sets.join(", "))
        };
        Ok(Statement::new(
            format!(
                "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {}",
                self.quote(&intent.table),
                columns.join(", "),
                values.join(", "),
                keys.join(", "),
                action
            ),
            params,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::tests::account_intent;
    use crate::value::Value;

    #[test]
    fn test_insert() {
        let stmt = SqliteDialect.insert(&account_intent(false)).unwrap();
        assert_eq!(
            stmt.text,
            r#"INSERT INTO "accounts" ("id", "email", "logins", "roles") VALUES (?, ?, ?, ?)"#
        );
        assert_eq!(
            stmt.params,
            vec![
                Value::from(7),
                Value::from("a@b.c"),
                Value::from(7),
                Value::from(r#"["user","admin"]"#)
            ]
        );
    }

    #[test]
    fn test_update_uses_fragments() {
        let stmt = SqliteDialect.update(&account_intent(false)).unwrap();
        assert_eq!(
            stmt.text,
            r#"UPDATE "accounts" SET "email" = ?, "logins" = "logins" + ?, "roles" = ? WHERE "id" = ?"#
        );
        assert_eq!(
            stmt.params,
            vec![
                Value::from("a@b.c"),
                Value::from(3),
                Value::from(r#"["user","admin"]"#),
                Value::from(7)
            ]
        );
    }

    #[test]
    fn test_upsert() {
        let stmt = SqliteDialect.upsert(&account_intent(false)).unwrap();
        assert_eq!(
            stmt.text,
            concat!(
                r#"INSERT INTO "accounts" ("id", "email", "logins", "roles") VALUES (?, ?, ?, ?) "#,
                r#"ON CONFLICT ("id") DO UPDATE SET "email" = excluded."email", "logins" = "logins" + ?, "roles" = excluded."roles""#
            )
        );
        assert_eq!(stmt.params.len(), 5);
        assert_eq!(stmt.params[4], Value::from(3));
    }

    #[test]
    fn test_delete_and_select() {
        let id = vec![("id".to_string(), Value::from(7))];
        let delete = SqliteDialect.delete("accounts", &id);
        assert_eq!(delete.text, r#"DELETE FROM "accounts" WHERE "id" = ?"#);

        let select = SqliteDialect.select_by_identity("accounts", &id, 2);
        assert_eq!(select.text, r#"SELECT * FROM "accounts" WHERE "id" = ? LIMIT 2"#);
        assert_eq!(select.params, vec![Value::from(7)]);
    }

    #[test]
    fn test_set_decoding() {
        assert_eq!(
            SqliteDialect.decode_set(&Value::from(r#"["a",1]"#)).unwrap(),
            vec![Value::from("a"), Value::from(1)]
        );
        assert!(SqliteDialect.decode_set(&Value::Null).unwrap().is_empty());
        assert!(SqliteDialect.decode_set(&Value::from("not json")).is_err());
    }

    #[test]
    fn test_native_set_fragment_rejected() {
        let intent = account_intent(true);
        assert!(SqliteDialect.update(&intent).is_err());
    }
}
