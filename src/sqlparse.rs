//! A small SQL surface parser.
//!
//! Just enough SQL understanding for two jobs: reading table shapes out
//! of a schema dump, and classifying the DDL statements that need
//! reversing in flashback output. Anything unrecognized is [`Statement::Other`]
//! and passes through untouched.

/// One classified statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateTable {
        schema: Option<String>,
        name: String,
        columns: Vec<ColumnDef>,
        primary_keys: Vec<String>,
    },
    CreateDatabase {
        name: String,
    },
    CreateIndex {
        index: String,
        schema: Option<String>,
        table: String,
    },
    CreateView {
        schema: Option<String>,
        name: String,
    },
    Use {
        schema: String,
    },
    Begin,
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub unsigned: bool,
}

/// Split a script into statements on top-level semicolons, skipping
/// quoted strings, backticked names, and all three comment styles.
pub fn split_statements(text: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let bytes: Vec<char> = text.chars().collect();
    let mut i = 0;
    let mut quote: Option<char> = None;

    while i < bytes.len() {
        let c = bytes[i];
        match quote {
            Some(q) => {
                current.push(c);
                if c == '\\' && q != '`' && i + 1 < bytes.len() {
                    current.push(bytes[i + 1]);
                    i += 2;
                    continue;
                }
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' | '`' => {
                    quote = Some(c);
                    current.push(c);
                }
                '-' if bytes.get(i + 1) == Some(&'-') => {
                    while i < bytes.len() && bytes[i] != '\n' {
                        i += 1;
                    }
                    continue;
                }
                '#' => {
                    while i < bytes.len() && bytes[i] != '\n' {
                        i += 1;
                    }
                    continue;
                }
                '/' if bytes.get(i + 1) == Some(&'*') => {
                    i += 2;
                    while i + 1 < bytes.len() && !(bytes[i] == '*' && bytes[i + 1] == '/') {
                        i += 1;
                    }
                    i += 2;
                    continue;
                }
                ';' => {
                    let statement = current.trim();
                    if !statement.is_empty() {
                        statements.push(statement.to_string());
                    }
                    current.clear();
                }
                _ => current.push(c),
            },
        }
        i += 1;
    }
    let tail = current.trim();
    if !tail.is_empty() {
        statements.push(tail.to_string());
    }
    statements
}

/// Classify one statement by its leading keywords.
pub fn classify(sql: &str) -> Statement {
    let tokens: Vec<&str> = sql.split_whitespace().collect();
    let kw = |i: usize| -> String {
        tokens
            .get(i)
            .map(|t| t.to_ascii_lowercase())
            .unwrap_or_default()
    };

    match kw(0).as_str() {
        "use" => match tokens.get(1) {
            Some(raw) => Statement::Use {
                schema: strip_identifier(raw),
            },
            None => Statement::Other,
        },
        "begin" => Statement::Begin,
        "create" => {
            // Step over the modifiers that may sit between CREATE and the
            // object keyword (OR REPLACE, TEMPORARY, ALGORITHM=, DEFINER=,
            // SQL SECURITY, UNIQUE, FULLTEXT, SPATIAL).
            let mut j = 1;
            loop {
                let word = kw(j);
                let modifier = matches!(
                    word.as_str(),
                    "or" | "replace" | "temporary" | "unique" | "fulltext" | "spatial"
                        | "sql" | "security" | "definer" | "invoker"
                ) || word.starts_with("algorithm=")
                    || word.starts_with("definer=");
                if !modifier {
                    break;
                }
                j += 1;
            }
            match kw(j).as_str() {
                "table" => {
                    let at = skip_if_not_exists(&tokens, j + 1);
                    let Some(raw) = tokens.get(at) else {
                        return Statement::Other;
                    };
                    let (schema, name) = parse_object_name(raw);
                    let (columns, primary_keys) = parse_create_table_body(sql);
                    Statement::CreateTable {
                        schema,
                        name,
                        columns,
                        primary_keys,
                    }
                }
                "database" | "schema" => {
                    let at = skip_if_not_exists(&tokens, j + 1);
                    match tokens.get(at) {
                        Some(raw) => Statement::CreateDatabase {
                            name: strip_identifier(raw),
                        },
                        None => Statement::Other,
                    }
                }
                "index" => {
                    let Some(raw_index) = tokens.get(j + 1) else {
                        return Statement::Other;
                    };
                    let on = tokens
                        .iter()
                        .position(|t| t.eq_ignore_ascii_case("on"));
                    let Some(raw_table) = on.and_then(|at| tokens.get(at + 1)) else {
                        return Statement::Other;
                    };
                    let (schema, table) = parse_object_name(raw_table);
                    Statement::CreateIndex {
                        index: strip_identifier(raw_index),
                        schema,
                        table,
                    }
                }
                "view" => {
                    let Some(raw) = tokens.get(j + 1) else {
                        return Statement::Other;
                    };
                    let (schema, name) = parse_object_name(raw);
                    Statement::CreateView { schema, name }
                }
                _ => Statement::Other,
            }
        }
        _ => Statement::Other,
    }
}

fn skip_if_not_exists(tokens: &[&str], at: usize) -> usize {
    if tokens
        .get(at)
        .is_some_and(|t| t.eq_ignore_ascii_case("if"))
    {
        at + 3
    } else {
        at
    }
}

/// "db.tb", possibly backticked, possibly glued to the column list.
fn parse_object_name(raw: &str) -> (Option<String>, String) {
    let raw = raw.split('(').next().unwrap_or(raw);
    let raw = raw.trim_end_matches([';', ',']);
    match raw.split_once('.') {
        Some((db, tb)) => (Some(strip_identifier(db)), strip_identifier(tb)),
        None => (None, strip_identifier(raw)),
    }
}

fn strip_identifier(raw: &str) -> String {
    raw.trim_end_matches([';', ','])
        .chars()
        .filter(|&c| c != '`')
        .collect()
}

/// Pull column names, signedness, and the primary key out of the
/// parenthesized CREATE TABLE body.
fn parse_create_table_body(sql: &str) -> (Vec<ColumnDef>, Vec<String>) {
    let mut columns = Vec::new();
    let mut primary_keys = Vec::new();
    let Some(body) = table_body(sql) else {
        return (columns, primary_keys);
    };

    for piece in split_top_level(body) {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        let lower = piece.to_ascii_lowercase();
        if lower.starts_with("primary key") || lower.starts_with("constraint") {
            if let Some(at) = lower.find("primary key") {
                primary_keys.extend(parenthesized_names(&piece[at..]));
            }
            continue;
        }
        let first = lower.split_whitespace().next().unwrap_or_default();
        if matches!(
            first,
            "key" | "index" | "unique" | "fulltext" | "spatial" | "foreign" | "check"
        ) {
            continue;
        }

        let name = leading_identifier(piece);
        if name.is_empty() {
            continue;
        }
        let unsigned = lower.split_whitespace().any(|w| w == "unsigned");
        if lower.contains("primary key") {
            primary_keys.push(name.clone());
        }
        columns.push(ColumnDef { name, unsigned });
    }
    (columns, primary_keys)
}

/// The text between the body's outer parentheses.
fn table_body(sql: &str) -> Option<&str> {
    let start = sql.find('(')?;
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (off, c) in sql[start..].char_indices() {
        let i = start + off;
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' | '`' => quote = Some(c),
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(&sql[start + 1..i]);
                    }
                }
                _ => {}
            },
        }
    }
    None
}

fn split_top_level(body: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut begin = 0;
    for (i, c) in body.char_indices() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' | '`' => quote = Some(c),
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                ',' if depth == 0 => {
                    pieces.push(&body[begin..i]);
                    begin = i + 1;
                }
                _ => {}
            },
        }
    }
    pieces.push(&body[begin..]);
    pieces
}

/// Names listed inside the first parentheses, for key definitions.
fn parenthesized_names(piece: &str) -> Vec<String> {
    let Some(start) = piece.find('(') else {
        return Vec::new();
    };
    let Some(end) = piece[start..].find(')') else {
        return Vec::new();
    };
    piece[start + 1..start + end]
        .split(',')
        .map(|n| strip_identifier(n.trim()))
        .filter(|n| !n.is_empty())
        .collect()
}

/// The column name opening a definition line, which may be backticked
/// and contain spaces.
fn leading_identifier(piece: &str) -> String {
    let piece = piece.trim_start();
    if let Some(rest) = piece.strip_prefix('`') {
        match rest.find('`') {
            Some(end) => rest[..end].to_string(),
            None => String::new(),
        }
    } else {
        piece
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_semicolons_outside_quotes() {
        let script = "USE a; INSERT INTO t VALUES ('x;y'); -- trailing; comment\nSELECT 1";
        let statements = split_statements(script);
        assert_eq!(statements.len(), 3);
        assert_eq!(statements[0], "USE a");
        assert_eq!(statements[1], "INSERT INTO t VALUES ('x;y')");
        assert_eq!(statements[2], "SELECT 1");
    }

    #[test]
    fn skips_block_and_hash_comments() {
        let script = "/* header; */ CREATE DATABASE d; # note; here\nUSE d";
        let statements = split_statements(script);
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0], "CREATE DATABASE d");
    }

    #[test]
    fn classifies_use_and_begin() {
        assert_eq!(
            classify("USE `app`"),
            Statement::Use {
                schema: "app".to_string()
            }
        );
        assert_eq!(classify("begin"), Statement::Begin);
        assert_eq!(classify("INSERT INTO t VALUES (1)"), Statement::Other);
    }

    #[test]
    fn parses_create_table() {
        let sql = "CREATE TABLE IF NOT EXISTS `app`.`orders` (\n\
                   `id` bigint unsigned NOT NULL AUTO_INCREMENT,\n\
                   `note` varchar(64) DEFAULT 'a,b',\n\
                   `amount` decimal(10,2) NOT NULL,\n\
                   KEY `idx_note` (`note`),\n\
                   PRIMARY KEY (`id`)\n\
                   ) ENGINE=InnoDB";
        match classify(sql) {
            Statement::CreateTable {
                schema,
                name,
                columns,
                primary_keys,
            } => {
                assert_eq!(schema.as_deref(), Some("app"));
                assert_eq!(name, "orders");
                let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
                assert_eq!(names, vec!["id", "note", "amount"]);
                assert!(columns[0].unsigned);
                assert!(!columns[1].unsigned);
                assert_eq!(primary_keys, vec!["id"]);
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn inline_primary_key_and_glued_parenthesis() {
        let sql = "create table t(id int primary key, v text)";
        match classify(sql) {
            Statement::CreateTable {
                schema,
                name,
                columns,
                primary_keys,
            } => {
                assert_eq!(schema, None);
                assert_eq!(name, "t");
                assert_eq!(columns.len(), 2);
                assert_eq!(primary_keys, vec!["id"]);
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn constraint_primary_key() {
        let sql = "CREATE TABLE t (a int, b int, CONSTRAINT pk_t PRIMARY KEY (a, b))";
        match classify(sql) {
            Statement::CreateTable { primary_keys, .. } => {
                assert_eq!(primary_keys, vec!["a", "b"]);
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn classifies_database_index_view() {
        assert_eq!(
            classify("CREATE DATABASE IF NOT EXISTS shop"),
            Statement::CreateDatabase {
                name: "shop".to_string()
            }
        );
        assert_eq!(
            classify("CREATE UNIQUE INDEX idx_a ON `app`.`t` (a)"),
            Statement::CreateIndex {
                index: "idx_a".to_string(),
                schema: Some("app".to_string()),
                table: "t".to_string(),
            }
        );
        assert_eq!(
            classify("CREATE ALGORITHM=UNDEFINED DEFINER=`root`@`%` SQL SECURITY DEFINER VIEW v AS SELECT 1"),
            Statement::CreateView {
                schema: None,
                name: "v".to_string(),
            }
        );
    }

    #[test]
    fn backticked_names_with_spaces() {
        let sql = "CREATE TABLE t (`my col` int, plain int)";
        match classify(sql) {
            Statement::CreateTable { columns, .. } => {
                assert_eq!(columns[0].name, "my col");
                assert_eq!(columns[1].name, "plain");
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }
}
