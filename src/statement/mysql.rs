use super::{conflict_columns, insert_parts, quote_with, render_change, Dialect, Statement, WriteIntent};
use crate::Result;

/// MySQL: back-quoted identifiers, `?` placeholders, sets as JSON text
#[derive(Debug, Default, Clone, Copy)]
pub struct MysqlDialect;

impl Dialect for MysqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote(&self, ident: &str) -> String {
        quote_with(ident, '`')
    }

    /// `INSERT ... ON DUPLICATE KEY UPDATE ...`
    fn upsert(&self, intent: &WriteIntent) -> Result<Statement> {
        let (columns, values, mut params) = insert_parts(self, intent)?;

        let mut sets = Vec::new();
        for column in conflict_columns(intent) {
            for fragment in &column.changes {
                if fragment.is_assignment() {
                    let col = self.quote(&column.column);
                    sets.push(format!("{col} = VALUES({col})"));
                } else {
                    sets.push(render_change(self, &column.column, fragment, &mut params)?);
                }
            }
        }
        // Without an assignment the duplicate branch is a no-op on the key
        if sets.is_empty() {
            if let Some((name, _)) = intent.identity.first() {
                let col = self.quote(name);
                sets.push(format!("{col} = {col}"));
            }
        }

        Ok(Statement::new(
            format!(
                "INSERT INTO {} ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {}",
                self.quote(&intent.table),
                columns.join(", "),
                values.join(", "),
                sets.join(", ")
            ),
            params,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::tests::account_intent;
    use crate::statement::ColumnWrite;
    use crate::value::Value;
    use crate::value_type::PropertyValue;

    #[test]
    fn test_update_quotes_with_backticks() {
        let stmt = MysqlDialect.update(&account_intent(false)).unwrap();
        assert_eq!(
            stmt.text,
            "UPDATE `accounts` SET `email` = ?, `logins` = `logins` + ?, `roles` = ? WHERE `id` = ?"
        );
    }

    #[test]
    fn test_upsert() {
        let stmt = MysqlDialect.upsert(&account_intent(false)).unwrap();
        assert_eq!(
            stmt.text,
            concat!(
                "INSERT INTO `accounts` (`id`, `email`, `logins`, `roles`) VALUES (?, ?, ?, ?) ",
                "ON DUPLICATE KEY UPDATE `email` = VALUES(`email`), `logins` = `logins` + ?, `roles` = VALUES(`roles`)"
            )
        );
        assert_eq!(stmt.params.len(), 5);
    }

    #[test]
    fn test_upsert_of_identity_only() {
        let mut intent = WriteIntent::new("tags");
        intent.identity = vec![("name".to_string(), Value::from("rust"))];
        intent.columns = vec![ColumnWrite::from_property(
            "name",
            &PropertyValue::Scalar(Value::from("rust")),
            true,
            false,
        )];
        let stmt = MysqlDialect.upsert(&intent).unwrap();
        assert_eq!(
            stmt.text,
            "INSERT INTO `tags` (`name`) VALUES (?) ON DUPLICATE KEY UPDATE `name` = `name`"
        );
    }
}
