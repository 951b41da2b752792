//! MySQL INSERT script renderer
//!
//! Rows reference each other through subselects on natural keys, so the
//! script can be appended to a database that already holds other projects.

use super::ResultExporter;
use crate::config::ExportFormat;
use crate::error::ExportError;
use crate::extract::ExtractionResult;
use crate::types::{Author, Commit, FileMetrics, FunctionMetrics, MetricsOutcome, Reference};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::io::Write;

const PROJECT_ID: &str = "@project_id";

/// A value in an INSERT statement
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Number(u64),
    Text(String),
    Bool(bool),
    Date(DateTime<Utc>),
    /// Inserted verbatim inside parentheses (subselects, variables)
    Expr(String),
}

impl SqlValue {
    pub fn text(value: impl Into<String>) -> Self {
        SqlValue::Text(value.into())
    }

    fn render(&self) -> String {
        match self {
            SqlValue::Number(n) => n.to_string(),
            SqlValue::Text(s) => format!("'{}'", escape_string(s)),
            SqlValue::Bool(b) => u8::from(*b).to_string(),
            SqlValue::Date(d) => format!("'{}'", d.format("%Y-%m-%d %H:%M:%S")),
            SqlValue::Expr(e) => format!("({})", e),
        }
    }
}

impl From<usize> for SqlValue {
    fn from(n: usize) -> Self {
        SqlValue::Number(n as u64)
    }
}

/// Escape a string for a single-quoted MySQL literal
pub fn escape_string(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\0' => escaped.push_str("\\0"),
            '\x08' => escaped.push_str("\\b"),
            '\t' => escaped.push_str("\\t"),
            '\x1a' => escaped.push_str("\\z"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '"' | '\'' | '\\' | '%' => {
                escaped.push('\\');
                escaped.push(c);
            }
            c => escaped.push(c),
        }
    }
    escaped
}

/// `INSERT [IGNORE] INTO` statement without the terminating semicolon
pub fn insert(table: &str, values: &[(&str, SqlValue)], ignore: bool) -> String {
    let fields: Vec<String> = values.iter().map(|(name, _)| format!("`{}`", name)).collect();
    let rendered: Vec<String> = values.iter().map(|(_, value)| value.render()).collect();
    format!(
        "INSERT {}INTO `{}` ({}) VALUES ({})",
        if ignore { "IGNORE " } else { "" },
        table,
        fields.join(","),
        rendered.join(",")
    )
}

pub fn select(fields: &[&str], table: &str, condition: Option<&str>) -> String {
    let fields: Vec<String> = fields.iter().map(|f| format!("`{}`", f)).collect();
    let mut query = format!("SELECT {} FROM `{}`", fields.join(","), table);
    if let Some(condition) = condition {
        query.push_str(" WHERE ");
        query.push_str(condition);
    }
    query
}

pub fn set_variable(name: &str, value: &str) -> String {
    format!("SET @{} = ({})", name, value)
}

fn project_scoped(table: &str, key: &str, value: &str) -> SqlValue {
    SqlValue::Expr(select(
        &["id"],
        table,
        Some(&format!(
            "`{}` = '{}' AND `project` = {}",
            key,
            escape_string(value),
            PROJECT_ID
        )),
    ))
}

fn commit_id(id: &str) -> SqlValue {
    project_scoped("commit", "commit_oid", id)
}

fn file_entry_id(content_id: &str) -> SqlValue {
    project_scoped("file_entry", "entry_oid", content_id)
}

fn path_id(path: &str) -> SqlValue {
    SqlValue::Expr(select(
        &["id"],
        "path",
        Some(&format!("`path` = '{}'", escape_string(path))),
    ))
}

fn project_var() -> SqlValue {
    SqlValue::Expr(PROJECT_ID.to_string())
}

/// Renders a result as a MySQL INSERT script
#[derive(Debug, Default, Clone, Copy)]
pub struct SqlScriptExporter;

impl SqlScriptExporter {
    pub fn project(&self, name: &str) -> String {
        format!(
            "{};\n{};\n",
            insert("project", &[("name", SqlValue::text(name))], false),
            set_variable(
                "project_id",
                &select(&["id"], "project", Some(&format!("`name` = '{}'", escape_string(name))))
            )
        )
    }

    pub fn author(&self, author: &Author) -> String {
        let values = [
            ("name", SqlValue::text(&author.name)),
            ("email", SqlValue::text(&author.email)),
        ];
        format!("{};\n", insert("author", &values, true))
    }

    pub fn commit(&self, commit: &Commit) -> String {
        let author = select(
            &["id"],
            "author",
            Some(&format!(
                "`name`='{}' AND `email`='{}'",
                escape_string(&commit.author.name),
                escape_string(&commit.author.email)
            )),
        );
        let values = [
            ("project", project_var()),
            ("commit_oid", SqlValue::text(&commit.id)),
            ("date", SqlValue::Date(commit.timestamp)),
            ("message", SqlValue::text(commit.message.trim())),
            ("author", SqlValue::Expr(author)),
        ];
        format!("{};\n", insert("commit", &values, false))
    }

    pub fn reference(&self, reference: &Reference) -> String {
        let values = [
            ("project", project_var()),
            ("name", SqlValue::text(&reference.name)),
            ("commit", commit_id(&reference.target)),
            ("is_tag", SqlValue::Bool(reference.is_tag)),
            ("is_branch", SqlValue::Bool(reference.is_branch)),
            ("is_remote", SqlValue::Bool(reference.is_remote)),
        ];
        format!("{};\n", insert("reference", &values, false))
    }

    pub fn file_entry(&self, content_id: &str) -> String {
        let values = [
            ("project", project_var()),
            ("entry_oid", SqlValue::text(content_id)),
        ];
        format!("{};\n", insert("file_entry", &values, false))
    }

    pub fn path(&self, path: &str) -> String {
        format!("{};\n", insert("path", &[("path", SqlValue::text(path))], true))
    }

    pub fn commit_file(&self, commit: &str, content_id: &str, path: &str) -> String {
        let values = [
            ("commit", commit_id(commit)),
            ("file_entry", file_entry_id(content_id)),
            ("path", path_id(path)),
        ];
        format!("{};\n", insert("commit_file", &values, false))
    }

    pub fn file_metrics(&self, content_id: &str, metrics: &FileMetrics) -> String {
        let values = [
            ("file_entry", file_entry_id(content_id)),
            ("loc", metrics.loc.into()),
            ("cyclomatic", metrics.cyclomatic.into()),
            ("functions", metrics.function_count.into()),
            ("dependencies", metrics.dependency_count.into()),
        ];
        let mut sql = format!("{};\n", insert("file_metrics", &values, false));
        for function in &metrics.functions {
            sql.push_str(&self.function_metrics(content_id, function));
        }
        sql
    }

    pub fn function_metrics(&self, content_id: &str, function: &FunctionMetrics) -> String {
        let values = [
            ("file_entry", file_entry_id(content_id)),
            ("name", SqlValue::text(&function.name)),
            ("line", function.line.into()),
            ("loc", function.loc.into()),
            ("cyclomatic", function.cyclomatic.into()),
            ("params", function.params.into()),
        ];
        format!("{};\n", insert("function_metrics", &values, false))
    }

    pub fn file_error(&self, content_id: &str, reason: &str) -> String {
        let values = [
            ("file_entry", file_entry_id(content_id)),
            ("reason", SqlValue::text(reason)),
        ];
        format!("{};\n", insert("file_error", &values, false))
    }

    fn outcome(&self, outcome: &MetricsOutcome) -> String {
        match &outcome.result {
            Ok(metrics) => self.file_metrics(&outcome.content_id, metrics),
            Err(reason) => self.file_error(&outcome.content_id, &reason.to_string()),
        }
    }
}

impl ResultExporter for SqlScriptExporter {
    fn format(&self) -> ExportFormat {
        ExportFormat::Sql
    }

    fn export(&self, result: &ExtractionResult, out: &mut dyn Write) -> Result<(), ExportError> {
        out.write_all(self.project(&result.project).as_bytes())?;

        for author in &result.authors {
            out.write_all(self.author(author).as_bytes())?;
        }
        for commit in &result.commits {
            out.write_all(self.commit(commit).as_bytes())?;
        }
        for reference in &result.references {
            out.write_all(self.reference(reference).as_bytes())?;
        }

        let files = &result.files;
        for content_id in files.contents().iter() {
            out.write_all(self.file_entry(content_id).as_bytes())?;
        }
        for path in files.paths().iter() {
            out.write_all(self.path(path).as_bytes())?;
        }
        for commit in files.commit_files() {
            for file in &commit.files {
                if let Some((content_id, path)) = files.resolve(file) {
                    out.write_all(self.commit_file(&commit.commit_id, content_id, path).as_bytes())?;
                }
            }
        }

        // Content table order keeps the script stable across runs
        let outcomes: HashMap<&str, &MetricsOutcome> = result
            .outcomes
            .iter()
            .map(|o| (o.content_id.as_str(), o))
            .collect();
        for content_id in files.contents().iter() {
            if let Some(outcome) = outcomes.get(content_id) {
                out.write_all(self.outcome(outcome).as_bytes())?;
            }
        }

        out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FailureReason;
    use chrono::TimeZone;

    #[test]
    fn test_escape_string() {
        assert_eq!(escape_string("it's"), "it\\'s");
        assert_eq!(escape_string("a\nb\r\tc"), "a\\nb\\r\\tc");
        assert_eq!(escape_string("100%"), "100\\%");
        assert_eq!(escape_string("C:\\dir \"x\""), "C:\\\\dir \\\"x\\\"");
        assert_eq!(escape_string("\0\x08\x1a"), "\\0\\b\\z");
        assert_eq!(escape_string("plain ünïcode"), "plain ünïcode");
    }

    #[test]
    fn test_insert_statement() {
        let sql = insert(
            "path",
            &[("path", SqlValue::text("src/a.js")), ("n", SqlValue::Number(3))],
            true,
        );
        assert_eq!(sql, "INSERT IGNORE INTO `path` (`path`,`n`) VALUES ('src/a.js',3)");
    }

    #[test]
    fn test_project_header() {
        let sql = SqlScriptExporter.project("o'brien");
        assert_eq!(
            sql,
            "INSERT INTO `project` (`name`) VALUES ('o\\'brien');\n\
             SET @project_id = (SELECT `id` FROM `project` WHERE `name` = 'o\\'brien');\n"
        );
    }

    #[test]
    fn test_commit_row() {
        let commit = Commit {
            id: "a".repeat(40),
            timestamp: Utc.with_ymd_and_hms(2015, 3, 4, 5, 6, 7).unwrap(),
            author: Author::new("Ann", "ann@example.com"),
            message: "  fix: it's done\n".to_string(),
            parents: vec![],
        };
        let sql = SqlScriptExporter.commit(&commit);
        assert!(sql.starts_with("INSERT INTO `commit` (`project`,`commit_oid`,`date`,`message`,`author`) VALUES ((@project_id),"));
        assert!(sql.contains("'2015-03-04 05:06:07'"));
        assert!(sql.contains("'fix: it\\'s done'"));
        assert!(sql.contains("(SELECT `id` FROM `author` WHERE `name`='ann' AND `email`='ann@example.com')"));
        assert!(sql.ends_with(");\n"));
    }

    #[test]
    fn test_reference_flags() {
        let reference = Reference {
            name: "refs/tags/v1".to_string(),
            target: "b".repeat(40),
            is_tag: true,
            is_branch: false,
            is_remote: false,
        };
        let sql = SqlScriptExporter.reference(&reference);
        assert!(sql.contains("'refs/tags/v1'"));
        assert!(sql.ends_with(",1,0,0);\n"));
    }

    #[test]
    fn test_metrics_and_errors() {
        let metrics = FileMetrics {
            loc: 10,
            cyclomatic: 3,
            function_count: 1,
            functions: vec![FunctionMetrics {
                name: "main".to_string(),
                line: 2,
                loc: 5,
                cyclomatic: 2,
                params: 1,
            }],
            dependency_count: 4,
        };
        let ok = SqlScriptExporter.outcome(&MetricsOutcome::success("c1", metrics));
        assert_eq!(ok.lines().count(), 2);
        assert!(ok.contains("INSERT INTO `file_metrics`"));
        assert!(ok.contains(",10,3,1,4);"));
        assert!(ok.contains("INSERT INTO `function_metrics`"));
        assert!(ok.contains(",'main',2,5,2,1);"));

        let failed = SqlScriptExporter.outcome(&MetricsOutcome::failure("c2", FailureReason::Timeout));
        assert!(failed.starts_with("INSERT INTO `file_error`"));
        assert!(failed.contains("'timeout'"));
    }
}
