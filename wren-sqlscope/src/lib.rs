//! Scoped SQL rewriting for plugin storage isolation.
//!
//! Plugins share one SQLite database. Before any plugin-issued statement
//! reaches storage, every table, view, and index identifier it references
//! or defines is rewritten to `prefix + name + suffix`, where the suffix
//! embeds the plugin name. Two plugins can therefore never collide on a
//! physical table, and no plugin can name another plugin's tables.
//!
//! The rewrite operates on the parsed AST only — string literals are never
//! touched, and a statement that fails to parse produces no output at all.
//! Trigger DDL, which the parser grammar lacks, goes through a token-level
//! path that feeds the trigger body back into the AST rewrite.

mod trigger;
mod visit;

use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::{Parser, ParserError};
use sqlparser::tokenizer::{Token, TokenizerError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("sql parse error: {0}")]
    Parse(#[from] ParserError),

    #[error("sql tokenize error: {0}")]
    Tokenize(#[from] TokenizerError),
}

/// The deterministic prefix/suffix pair applied to one plugin's SQL
/// identifiers. Derived from the plugin name, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNamespace {
    pub prefix: String,
    pub suffix: String,
}

impl TableNamespace {
    /// Namespace for a plugin: `_wren_plugin_<name>_<table>` physical names.
    pub fn for_plugin(plugin_name: &str) -> Self {
        Self {
            prefix: "_wren_plugin_".to_string(),
            suffix: format!("_{plugin_name}"),
        }
    }

    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    fn apply(&self, name: &str) -> String {
        format!("{}{}{}", self.prefix, name, self.suffix)
    }
}

/// Rewrites every table/view/index/trigger identifier in `sql` into
/// `ns`'s namespace.
///
/// `sql` may contain several statements; the output re-appends a `;`
/// terminator after each rewritten statement. A statement naming no
/// tables comes back with identical meaning. Any parse failure rejects
/// the whole input before any output is produced.
pub fn rewrite(sql: &str, ns: &TableNamespace) -> Result<String, RewriteError> {
    let dialect = SQLiteDialect {};
    let mut out = String::new();
    for segment in trigger::split(sql)? {
        match segment {
            trigger::Segment::Plain(tokens) => {
                let mut parser = Parser::new(&dialect).with_tokens(tokens);
                let mut stmt = parser.parse_statement()?;
                let trailing = parser.peek_token().token;
                if trailing != Token::EOF {
                    return Err(ParserError::ParserError(format!(
                        "unexpected token after statement: {trailing}"
                    ))
                    .into());
                }
                visit::rewrite_statement(&mut stmt, ns);
                out.push_str(&stmt.to_string());
            }
            trigger::Segment::CreateTrigger(tokens) => {
                out.push_str(&trigger::rewrite_create(&tokens, ns)?);
            }
            trigger::Segment::DropTrigger(tokens) => {
                out.push_str(&trigger::rewrite_drop(&tokens, ns));
            }
        }
        out.push(';');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ns() -> TableNamespace {
        TableNamespace::for_plugin("greeter")
    }

    #[test]
    fn create_table_renamed() {
        let out = rewrite("CREATE TABLE items (id INTEGER, name TEXT)", &ns()).unwrap();
        assert_eq!(out, "CREATE TABLE _wren_plugin_items_greeter (id INTEGER, name TEXT);");
    }

    #[test]
    fn select_with_join_renames_both_sides() {
        let out = rewrite(
            "SELECT a.x, b.y FROM items a JOIN tags b ON a.id = b.item_id",
            &ns(),
        )
        .unwrap();
        assert!(out.contains("_wren_plugin_items_greeter"));
        assert!(out.contains("_wren_plugin_tags_greeter"));
        // Aliases stay untouched.
        assert!(out.contains("a.x"));
        assert!(out.contains("b.y"));
    }

    #[test]
    fn insert_with_embedded_select() {
        let out = rewrite("INSERT INTO log SELECT * FROM staging", &ns()).unwrap();
        assert!(out.contains("INSERT INTO _wren_plugin_log_greeter"));
        assert!(out.contains("FROM _wren_plugin_staging_greeter"));
    }

    #[test]
    fn update_target_and_where() {
        let out = rewrite(
            "UPDATE counts SET n = n + 1 WHERE counts.id = 3",
            &ns(),
        )
        .unwrap();
        assert!(out.contains("UPDATE _wren_plugin_counts_greeter"));
        assert!(out.contains("_wren_plugin_counts_greeter.id = 3"));
    }

    #[test]
    fn delete_with_subquery() {
        let out = rewrite(
            "DELETE FROM items WHERE id IN (SELECT item_id FROM expired)",
            &ns(),
        )
        .unwrap();
        assert!(out.contains("DELETE FROM _wren_plugin_items_greeter"));
        assert!(out.contains("FROM _wren_plugin_expired_greeter"));
    }

    #[test]
    fn cte_name_and_body_renamed() {
        let out = rewrite(
            "WITH recent AS (SELECT * FROM events) SELECT * FROM recent",
            &ns(),
        )
        .unwrap();
        assert!(out.contains("WITH _wren_plugin_recent_greeter AS"));
        assert!(out.contains("FROM _wren_plugin_events_greeter"));
        assert!(out.contains("SELECT * FROM _wren_plugin_recent_greeter;"));
    }

    #[test]
    fn drop_and_index_statements() {
        let out = rewrite("DROP TABLE items", &ns()).unwrap();
        assert_eq!(out, "DROP TABLE _wren_plugin_items_greeter;");

        let out = rewrite("CREATE INDEX idx_items ON items (name)", &ns()).unwrap();
        assert!(out.contains("_wren_plugin_idx_items_greeter"));
        assert!(out.contains("ON _wren_plugin_items_greeter"));
    }

    #[test]
    fn string_literals_never_rewritten() {
        let out = rewrite("SELECT * FROM items WHERE name = 'items'", &ns()).unwrap();
        assert!(out.contains("FROM _wren_plugin_items_greeter"));
        assert!(out.contains("'items'"));
    }

    #[test]
    fn statement_without_tables_unchanged() {
        let out = rewrite("SELECT 1 + 2", &ns()).unwrap();
        assert_eq!(out, "SELECT 1 + 2;");
    }

    #[test]
    fn multiple_statements_each_terminated() {
        let out = rewrite(
            "CREATE TABLE a (x INTEGER); INSERT INTO a VALUES (1)",
            &ns(),
        )
        .unwrap();
        assert_eq!(
            out,
            "CREATE TABLE _wren_plugin_a_greeter (x INTEGER);INSERT INTO _wren_plugin_a_greeter VALUES (1);"
        );
    }

    #[test]
    fn invalid_sql_rejected_without_output() {
        let err = rewrite("SELEKT broken FROM", &ns());
        assert!(matches!(err, Err(RewriteError::Parse(_))));
    }

    #[test]
    fn distinct_plugins_never_collide() {
        let a = rewrite("CREATE TABLE items (id INTEGER)", &TableNamespace::for_plugin("alpha")).unwrap();
        let b = rewrite("CREATE TABLE items (id INTEGER)", &TableNamespace::for_plugin("beta")).unwrap();
        assert_ne!(a, b);
        assert!(a.contains("_wren_plugin_items_alpha"));
        assert!(b.contains("_wren_plugin_items_beta"));
    }

    #[test]
    fn foreign_key_target_renamed() {
        let out = rewrite(
            "CREATE TABLE tags (id INTEGER, item_id INTEGER REFERENCES items (id))",
            &ns(),
        )
        .unwrap();
        assert!(out.contains("_wren_plugin_tags_greeter"));
        assert!(out.contains("REFERENCES _wren_plugin_items_greeter"));
    }

    #[test]
    fn explain_recurses_into_wrapped_statement() {
        let out = rewrite("EXPLAIN SELECT * FROM items", &ns()).unwrap();
        assert!(out.contains("_wren_plugin_items_greeter"));
    }

    #[test]
    fn derived_table_alias_qualifier_untouched() {
        let out = rewrite(
            "SELECT d.total FROM (SELECT COUNT(*) AS total FROM items) d",
            &ns(),
        )
        .unwrap();
        assert!(out.contains("d.total"));
        assert!(out.contains("FROM _wren_plugin_items_greeter"));
    }

    #[test]
    fn subquery_alias_qualifiers_untouched() {
        let out = rewrite(
            "SELECT x FROM items WHERE EXISTS (SELECT 1 FROM tags t WHERE t.item_id = items.id)",
            &ns(),
        )
        .unwrap();
        assert!(out.contains("t.item_id"));
        assert!(out.contains("_wren_plugin_items_greeter.id"));
        assert!(out.contains("FROM _wren_plugin_tags_greeter AS t"));
    }

    #[test]
    fn create_trigger_renames_name_target_and_body() {
        let out = rewrite(
            "CREATE TRIGGER trg AFTER INSERT ON items BEGIN UPDATE counts SET n = n + 1; END",
            &ns(),
        )
        .unwrap();
        assert!(out.contains("CREATE TRIGGER _wren_plugin_trg_greeter"));
        assert!(out.contains("ON _wren_plugin_items_greeter"));
        assert!(out.contains("UPDATE _wren_plugin_counts_greeter SET n = n + 1"));
        assert!(out.ends_with("END;"));
    }

    #[test]
    fn trigger_when_clause_keeps_row_references() {
        let out = rewrite(
            "CREATE TRIGGER audit_items AFTER UPDATE ON items FOR EACH ROW WHEN NEW.kind = 1 \
             BEGIN INSERT INTO audit VALUES (NEW.id, OLD.id); END",
            &ns(),
        )
        .unwrap();
        assert!(out.contains("WHEN NEW.kind = 1"));
        assert!(out.contains("INSERT INTO _wren_plugin_audit_greeter"));
        assert!(out.contains("NEW.id"));
        assert!(out.contains("OLD.id"));
    }

    #[test]
    fn drop_trigger_renamed() {
        let out = rewrite("DROP TRIGGER IF EXISTS trg", &ns()).unwrap();
        assert_eq!(out, "DROP TRIGGER IF EXISTS _wren_plugin_trg_greeter;");
    }

    #[test]
    fn trigger_between_plain_statements() {
        let out = rewrite(
            "CREATE TABLE items (id INTEGER); \
             CREATE TRIGGER trg AFTER DELETE ON items BEGIN DELETE FROM log; END; \
             DROP TABLE items",
            &ns(),
        )
        .unwrap();
        assert!(out.contains("CREATE TABLE _wren_plugin_items_greeter"));
        assert!(out.contains("DELETE FROM _wren_plugin_log_greeter"));
        assert!(out.contains("DROP TABLE _wren_plugin_items_greeter;"));
    }

    #[test]
    fn unterminated_trigger_rejected() {
        let err = rewrite(
            "CREATE TRIGGER trg AFTER INSERT ON items BEGIN UPDATE c SET n = 1;",
            &ns(),
        );
        assert!(matches!(err, Err(RewriteError::Parse(_))));
    }

    #[test]
    fn case_and_ordering_expressions() {
        let out = rewrite(
            "SELECT CASE WHEN items.kind = 1 THEN 'a' ELSE 'b' END FROM items ORDER BY items.id",
            &ns(),
        )
        .unwrap();
        // All three qualified references share the namespaced name.
        assert_eq!(out.matches("_wren_plugin_items_greeter").count(), 3);
    }
}
