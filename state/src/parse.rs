//! SQL 语句 → read/write item set 的解析入口。
//!
//! 完整的 SQL parser 是外部协作方; 这里是覆盖常见 DML/DDL 形态的
//! 语句分类 + 谓词提取, 足以驱动 state log 的读写集构建:
//! 比较谓词、IN、BETWEEN、INSERT 列值、UPDATE SET、DDL 目标表。

use common::err::{UltError, UltResult};
use common::utils::to_lower;

use crate::data::StateData;
use crate::item::{FunctionType, StateItem};
use crate::query::{ColumnSet, QueryType};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// 标识符或关键字 (`users.id` 这类限定名是一个 token)
    Ident(String),
    Number(String),
    Str(String),
    Symbol(String),
}

impl Token {
    pub fn ident(&self) -> Option<&str> {
        match self {
            Token::Ident(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn is_keyword(&self, keyword: &str) -> bool {
        match self {
            Token::Ident(value) => value.eq_ignore_ascii_case(keyword),
            _ => false,
        }
    }

    pub fn is_symbol(&self, symbol: &str) -> bool {
        match self {
            Token::Symbol(value) => value == symbol,
            _ => false,
        }
    }
}

fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_' || ch == '@'
}

fn is_ident_part(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '$' || ch == '@'
}

pub fn tokenize(statement: &str) -> Vec<Token> {
    let chars: Vec<char> = statement.chars().collect();
    let mut tokens = vec![];
    let mut pos = 0;

    while pos < chars.len() {
        let ch = chars[pos];

        if ch.is_whitespace() {
            pos += 1;
            continue;
        }

        // comments
        if ch == '-' && pos + 1 < chars.len() && chars[pos + 1] == '-' {
            while pos < chars.len() && chars[pos] != '\n' {
                pos += 1;
            }
            continue;
        }
        if ch == '/' && pos + 1 < chars.len() && chars[pos + 1] == '*' {
            pos += 2;
            while pos + 1 < chars.len() && !(chars[pos] == '*' && chars[pos + 1] == '/') {
                pos += 1;
            }
            pos = (pos + 2).min(chars.len());
            continue;
        }

        if ch == '\'' || ch == '"' {
            let quote = ch;
            pos += 1;
            let mut value = String::new();
            while pos < chars.len() {
                if chars[pos] == quote {
                    if pos + 1 < chars.len() && chars[pos + 1] == quote {
                        value.push(quote);
                        pos += 2;
                        continue;
                    }
                    pos += 1;
                    break;
                }
                if chars[pos] == '\\' && pos + 1 < chars.len() {
                    value.push(chars[pos + 1]);
                    pos += 2;
                    continue;
                }
                value.push(chars[pos]);
                pos += 1;
            }
            tokens.push(Token::Str(value));
            continue;
        }

        if ch == '`' {
            pos += 1;
            let mut value = String::new();
            while pos < chars.len() && chars[pos] != '`' {
                value.push(chars[pos]);
                pos += 1;
            }
            pos += 1;
            // 反引号内的内容原样作为标识符
            tokens.push(Token::Ident(value));
            continue;
        }

        if ch.is_ascii_digit() || (ch == '-' && pos + 1 < chars.len() && chars[pos + 1].is_ascii_digit() && expects_value(&tokens)) {
            let mut value = String::new();
            if ch == '-' {
                value.push('-');
                pos += 1;
            }
            while pos < chars.len() && (chars[pos].is_ascii_digit() || chars[pos] == '.') {
                value.push(chars[pos]);
                pos += 1;
            }
            tokens.push(Token::Number(value));
            continue;
        }

        if is_ident_start(ch) {
            let mut value = String::new();
            while pos < chars.len() && is_ident_part(chars[pos]) {
                value.push(chars[pos]);
                pos += 1;
            }
            // 限定名: ident '.' ident / ident '.' '*'
            if pos < chars.len() && chars[pos] == '.' {
                if pos + 1 < chars.len() && (is_ident_start(chars[pos + 1]) || chars[pos + 1] == '*') {
                    value.push('.');
                    pos += 1;
                    if chars[pos] == '*' {
                        value.push('*');
                        pos += 1;
                    } else {
                        while pos < chars.len() && is_ident_part(chars[pos]) {
                            value.push(chars[pos]);
                            pos += 1;
                        }
                    }
                }
            }
            tokens.push(Token::Ident(value));
            continue;
        }

        // multi-char operators
        if pos + 1 < chars.len() {
            let pair: String = chars[pos..pos + 2].iter().collect();
            if pair == "<=" || pair == ">=" || pair == "!=" || pair == "<>" || pair == ":=" {
                tokens.push(Token::Symbol(pair));
                pos += 2;
                continue;
            }
        }

        tokens.push(Token::Symbol(ch.to_string()));
        pos += 1;
    }

    tokens
}

/// '-' 出现在运算符/'('/',' 之后时按负数前缀处理
fn expects_value(tokens: &[Token]) -> bool {
    match tokens.last() {
        None => false,
        Some(Token::Symbol(symbol)) => {
            matches!(symbol.as_str(), "=" | "<" | "<=" | ">" | ">=" | "!=" | "<>" | "(" | ",")
        }
        Some(Token::Ident(ident)) => ident.eq_ignore_ascii_case("between") || ident.eq_ignore_ascii_case("and"),
        _ => false,
    }
}

#[derive(Debug, Default)]
pub struct ParsedQuery {
    pub query_type: QueryType,
    pub is_ddl: bool,

    pub read_set: Vec<StateItem>,
    pub write_set: Vec<StateItem>,
    pub var_map: Vec<StateItem>,

    pub read_columns: ColumnSet,
    pub write_columns: ColumnSet,
}

fn token_to_data(token: &Token) -> Option<StateData> {
    match token {
        Token::Number(value) => {
            if value.contains('.') {
                value.parse::<f64>().ok().map(StateData::Double)
            } else {
                value.parse::<i64>().ok().map(StateData::Int)
            }
        }
        Token::Str(value) => Some(StateData::String(value.clone())),
        Token::Ident(value) if value.eq_ignore_ascii_case("null") => Some(StateData::Null),
        _ => None,
    }
}

/// 裸列名补上表限定
fn qualify(column: &str, table: &str) -> String {
    if column.contains('.') {
        to_lower(column)
    } else {
        format!("{}.{}", to_lower(table), to_lower(column))
    }
}

const CLAUSE_END_KEYWORDS: [&str; 6] = ["order", "group", "limit", "having", "for", "on"];

/// WHERE 子句的扁平谓词提取。
/// AND/OR 结构摊平成 item 列表, 相关性判定对列表做 any-match。
fn parse_where_items(tokens: &[Token], table: &str) -> Vec<StateItem> {
    let mut items = vec![];
    let mut pos = 0;

    while pos < tokens.len() {
        if CLAUSE_END_KEYWORDS.iter().any(|keyword| tokens[pos].is_keyword(keyword)) {
            break;
        }

        let column = match tokens[pos].ident() {
            Some(ident)
                if !ident.eq_ignore_ascii_case("and")
                    && !ident.eq_ignore_ascii_case("or")
                    && !ident.eq_ignore_ascii_case("not") =>
            {
                ident.to_string()
            }
            _ => {
                pos += 1;
                continue;
            }
        };

        // col IN (v1, v2, ...)
        if pos + 1 < tokens.len() && tokens[pos + 1].is_keyword("in") {
            let mut values = vec![];
            let mut scan = pos + 2;
            if scan < tokens.len() && tokens[scan].is_symbol("(") {
                scan += 1;
                while scan < tokens.len() && !tokens[scan].is_symbol(")") {
                    if let Some(data) = token_to_data(&tokens[scan]) {
                        values.push(data);
                    }
                    scan += 1;
                }
                scan += 1;
            }

            if !values.is_empty() {
                items.push(StateItem::in_item(&qualify(&column, table), values));
            }
            pos = scan;
            continue;
        }

        // col BETWEEN a AND b
        if pos + 1 < tokens.len() && tokens[pos + 1].is_keyword("between") {
            if pos + 4 < tokens.len() && tokens[pos + 3].is_keyword("and") {
                if let (Some(begin), Some(end)) = (token_to_data(&tokens[pos + 2]), token_to_data(&tokens[pos + 4])) {
                    items.push(StateItem::between_item(&qualify(&column, table), begin, end));
                }
            }
            pos += 5;
            continue;
        }

        // col <op> value
        if pos + 2 < tokens.len() {
            if let Token::Symbol(op) = &tokens[pos + 1] {
                let function_type = match op.as_str() {
                    "=" => Some(FunctionType::Eq),
                    "<" => Some(FunctionType::Lt),
                    "<=" => Some(FunctionType::Le),
                    ">" => Some(FunctionType::Gt),
                    ">=" => Some(FunctionType::Ge),
                    "!=" | "<>" => Some(FunctionType::Neq),
                    _ => None,
                };

                if let Some(function_type) = function_type {
                    if let Some(data) = token_to_data(&tokens[pos + 2]) {
                        let mut item = StateItem::eq_item(&qualify(&column, table), data);
                        item.function_type = function_type;
                        items.push(item);
                    }
                    pos += 3;
                    continue;
                }
            }
        }

        pos += 1;
    }

    items
}

fn find_keyword(tokens: &[Token], keyword: &str) -> Option<usize> {
    tokens.iter().position(|token| token.is_keyword(keyword))
}

fn columns_of_items(items: &[StateItem], columns: &mut ColumnSet) {
    for item in items {
        item.visit_leaves(&mut |leaf| {
            columns.insert(leaf.name.clone());
            false
        });
    }
}

/// `parse_query(stmt) → (read_set, write_set, var_map, is_ddl)`
pub fn parse_query(statement: &str) -> UltResult<ParsedQuery> {
    let tokens = tokenize(statement);
    let verb = tokens
        .first()
        .and_then(|token| token.ident())
        .map(|ident| ident.to_ascii_lowercase())
        .unwrap_or_default();

    let mut parsed = ParsedQuery::default();

    match verb.as_str() {
        "select" => {
            parsed.query_type = QueryType::Select;

            let from = find_keyword(&tokens, "from");
            let table = from
                .and_then(|index| tokens.get(index + 1))
                .and_then(|token| token.ident())
                .map(to_lower)
                .unwrap_or_default();

            if table.is_empty() {
                return Ok(parsed);
            }

            let where_pos = find_keyword(&tokens, "where");
            if let Some(where_pos) = where_pos {
                parsed.read_set = parse_where_items(&tokens[where_pos + 1..], &table);
            }

            if parsed.read_set.is_empty() {
                parsed.read_set.push(StateItem::wildcard_item(&format!("{}.*", table)));
            }

            // join 目标也进读集
            let mut scan = 0;
            while let Some(join) = tokens[scan..].iter().position(|token| token.is_keyword("join")) {
                scan += join + 1;
                if let Some(join_table) = tokens.get(scan).and_then(|token| token.ident()) {
                    parsed
                        .read_set
                        .push(StateItem::wildcard_item(&format!("{}.*", to_lower(join_table))));
                }
            }

            columns_of_items(&parsed.read_set, &mut parsed.read_columns);
        }

        "insert" | "replace" => {
            parsed.query_type = QueryType::Insert;

            let into = find_keyword(&tokens, "into");
            let table_pos = into.map(|index| index + 1).unwrap_or(1);
            let table = match tokens.get(table_pos).and_then(|token| token.ident()) {
                Some(table) => to_lower(table),
                None => return Err(UltError::Parse(format!("cannot find insert target: {}", statement))),
            };

            // 列清单与第一组 VALUES 对齐时产出精确的列=值
            let mut columns = vec![];
            let mut scan = table_pos + 1;
            if tokens.get(scan).map(|token| token.is_symbol("(")).unwrap_or(false) {
                scan += 1;
                while scan < tokens.len() && !tokens[scan].is_symbol(")") {
                    if let Some(ident) = tokens[scan].ident() {
                        columns.push(qualify(ident, &table));
                    }
                    scan += 1;
                }
            }

            let mut values = vec![];
            if let Some(values_pos) = tokens.iter().position(|token| token.is_keyword("values") || token.is_keyword("value")) {
                let mut scan = values_pos + 1;
                if tokens.get(scan).map(|token| token.is_symbol("(")).unwrap_or(false) {
                    scan += 1;
                    let mut depth = 1;
                    while scan < tokens.len() && depth > 0 {
                        if tokens[scan].is_symbol("(") {
                            depth += 1;
                        } else if tokens[scan].is_symbol(")") {
                            depth -= 1;
                        } else if depth == 1 {
                            if let Some(data) = token_to_data(&tokens[scan]) {
                                values.push(data);
                            }
                        }
                        scan += 1;
                    }
                }
            }

            if !columns.is_empty() && columns.len() == values.len() {
                for (column, value) in columns.iter().zip(values.into_iter()) {
                    parsed.write_set.push(StateItem::eq_item(column, value));
                    parsed.write_columns.insert(column.clone());
                }
            } else {
                parsed.write_set.push(StateItem::wildcard_item(&format!("{}.*", table)));
                parsed.write_columns.insert(format!("{}.*", table));
            }
        }

        "update" => {
            parsed.query_type = QueryType::Update;

            let table = match tokens.get(1).and_then(|token| token.ident()) {
                Some(table) => to_lower(table),
                None => return Err(UltError::Parse(format!("cannot find update target: {}", statement))),
            };

            let set_pos = find_keyword(&tokens, "set");
            let where_pos = find_keyword(&tokens, "where");

            if let Some(set_pos) = set_pos {
                let set_end = where_pos.unwrap_or(tokens.len());
                let mut scan = set_pos + 1;
                while scan + 2 < tokens.len() + 1 && scan < set_end {
                    if let (Some(column), true) = (
                        tokens[scan].ident(),
                        tokens.get(scan + 1).map(|token| token.is_symbol("=")).unwrap_or(false),
                    ) {
                        let column = qualify(column, &table);
                        if let Some(data) = tokens.get(scan + 2).and_then(token_to_data) {
                            parsed.write_set.push(StateItem::eq_item(&column, data));
                        } else {
                            parsed.write_set.push(StateItem::wildcard_item(&column));
                        }
                        parsed.write_columns.insert(column);
                        scan += 3;
                        if tokens.get(scan).map(|token| token.is_symbol(",")).unwrap_or(false) {
                            scan += 1;
                        }
                        continue;
                    }
                    scan += 1;
                }
            }

            if let Some(where_pos) = where_pos {
                parsed.read_set = parse_where_items(&tokens[where_pos + 1..], &table);
                // 行选择谓词同样界定了被写的行
                parsed.write_set.extend(parsed.read_set.iter().cloned());
            }

            if parsed.write_set.is_empty() {
                parsed.write_set.push(StateItem::wildcard_item(&format!("{}.*", table)));
                parsed.write_columns.insert(format!("{}.*", table));
            }

            columns_of_items(&parsed.read_set, &mut parsed.read_columns);
        }

        "delete" => {
            parsed.query_type = QueryType::Delete;

            let from = find_keyword(&tokens, "from");
            let table = match from.and_then(|index| tokens.get(index + 1)).and_then(|token| token.ident()) {
                Some(table) => to_lower(table),
                None => return Err(UltError::Parse(format!("cannot find delete target: {}", statement))),
            };

            if let Some(where_pos) = find_keyword(&tokens, "where") {
                parsed.read_set = parse_where_items(&tokens[where_pos + 1..], &table);
                parsed.write_set = parsed.read_set.clone();
            }

            if parsed.write_set.is_empty() {
                parsed.write_set.push(StateItem::wildcard_item(&format!("{}.*", table)));
            }

            parsed.write_columns.insert(format!("{}.*", table));
            columns_of_items(&parsed.read_set, &mut parsed.read_columns);
        }

        "create" | "drop" | "alter" | "truncate" | "rename" => {
            parsed.query_type = match verb.as_str() {
                "create" => QueryType::Create,
                "drop" => QueryType::Drop,
                "alter" => QueryType::Alter,
                "truncate" => QueryType::Truncate,
                _ => QueryType::Rename,
            };
            parsed.is_ddl = true;

            // CREATE/DROP/ALTER/TRUNCATE [TABLE] <t> / RENAME TABLE <a> TO <b>
            let mut targets = vec![];
            let mut scan = 1;
            while scan < tokens.len() {
                match tokens[scan].ident() {
                    Some(ident)
                        if ident.eq_ignore_ascii_case("table")
                            || ident.eq_ignore_ascii_case("database")
                            || ident.eq_ignore_ascii_case("schema")
                            || ident.eq_ignore_ascii_case("temporary")
                            || ident.eq_ignore_ascii_case("if")
                            || ident.eq_ignore_ascii_case("not")
                            || ident.eq_ignore_ascii_case("exists")
                            || ident.eq_ignore_ascii_case("to") =>
                    {
                        scan += 1;
                    }
                    Some(ident) => {
                        targets.push(to_lower(ident));
                        scan += 1;
                        if parsed.query_type != QueryType::Rename {
                            break;
                        }
                    }
                    None => break,
                }
            }

            if targets.is_empty() {
                return Err(UltError::Parse(format!("cannot find ddl target: {}", statement)));
            }

            for target in targets {
                parsed.write_set.push(StateItem::wildcard_item(&format!("{}.*", target)));
                parsed.write_columns.insert(format!("{}.*", target));
            }
        }

        _ => {
            // BEGIN/COMMIT/SET 等对读写集无贡献
            parsed.query_type = QueryType::Unknown;
        }
    }

    Ok(parsed)
}

/// 解析失败时的 DDL 兜底: 至少把写目标表捞出来
pub fn parse_ddl_fallback(statement: &str) -> ParsedQuery {
    let tokens = tokenize(statement);
    let mut parsed = ParsedQuery::default();

    let markers = ["into", "from", "table", "update"];
    for marker in markers {
        if let Some(index) = find_keyword(&tokens, marker) {
            if let Some(table) = tokens.get(index + 1).and_then(|token| token.ident()) {
                let target = format!("{}.*", to_lower(table));
                parsed.write_set.push(StateItem::wildcard_item(&target));
                parsed.write_columns.insert(target);
                return parsed;
            }
        }
    }

    parsed
}

#[cfg(test)]
mod test {
    use crate::data::StateData;
    use crate::query::QueryType;
    use crate::range::StateRange;

    use super::{parse_ddl_fallback, parse_query, tokenize, Token};

    #[test]
    fn test_tokenize() {
        let tokens = tokenize("SELECT * FROM users WHERE id >= 10 AND name = 'o''brien'");
        assert!(tokens.contains(&Token::Symbol(">=".to_string())));
        assert!(tokens.contains(&Token::Str("o'brien".to_string())));

        let tokens = tokenize("users.id = -5");
        assert_eq!(tokens[0], Token::Ident("users.id".to_string()));
        assert_eq!(tokens[2], Token::Number("-5".to_string()));
    }

    #[test]
    fn test_parse_select() {
        let parsed = parse_query("SELECT * FROM users WHERE id = 42").unwrap();

        assert_eq!(parsed.query_type, QueryType::Select);
        assert!(!parsed.is_ddl);
        assert!(parsed.write_set.is_empty());
        assert_eq!(parsed.read_set.len(), 1);
        assert_eq!(parsed.read_set[0].name, "users.id");
        assert!(StateRange::is_intersects(
            parsed.read_set[0].make_range2(),
            &StateRange::from(42)
        ));
    }

    #[test]
    fn test_parse_insert_with_columns() {
        let parsed = parse_query("INSERT INTO users (id, name) VALUES (7, 'alice')").unwrap();

        assert_eq!(parsed.query_type, QueryType::Insert);
        assert_eq!(parsed.write_set.len(), 2);
        assert_eq!(parsed.write_set[0].name, "users.id");
        assert_eq!(parsed.write_set[0].data_list[0], StateData::Int(7));
        assert_eq!(parsed.write_set[1].data_list[0], StateData::from("alice"));
        assert!(parsed.read_set.is_empty());
        assert!(parsed.write_columns.contains("users.id"));
    }

    #[test]
    fn test_parse_insert_without_columns() {
        let parsed = parse_query("INSERT INTO users VALUES (7, 'alice')").unwrap();

        assert_eq!(parsed.write_set.len(), 1);
        assert_eq!(parsed.write_set[0].name, "users.*");
    }

    #[test]
    fn test_parse_update() {
        let parsed = parse_query("UPDATE users SET name = 'bob' WHERE id BETWEEN 10 AND 20").unwrap();

        assert_eq!(parsed.query_type, QueryType::Update);
        assert!(parsed.write_columns.contains("users.name"));
        assert_eq!(parsed.read_set.len(), 1);
        assert_eq!(parsed.read_set[0].name, "users.id");
        assert!(StateRange::is_intersects(
            parsed.read_set[0].make_range2(),
            &StateRange::from(15)
        ));

        // 行选择谓词也在写集中
        assert!(parsed.write_set.iter().any(|item| item.name == "users.id"));
    }

    #[test]
    fn test_parse_delete_and_in() {
        let parsed = parse_query("DELETE FROM orders WHERE user_id IN (1, 2, 3)").unwrap();

        assert_eq!(parsed.query_type, QueryType::Delete);
        assert_eq!(parsed.read_set[0].name, "orders.user_id");
        assert!(StateRange::is_intersects(
            parsed.read_set[0].make_range2(),
            &StateRange::from(2)
        ));
        assert!(!parsed.write_set.is_empty());
    }

    #[test]
    fn test_parse_ddl() {
        let parsed = parse_query("DROP TABLE IF EXISTS users").unwrap();
        assert!(parsed.is_ddl);
        assert_eq!(parsed.query_type, QueryType::Drop);
        assert_eq!(parsed.write_set[0].name, "users.*");

        let parsed = parse_query("TRUNCATE orders").unwrap();
        assert_eq!(parsed.query_type, QueryType::Truncate);
        assert_eq!(parsed.write_set[0].name, "orders.*");

        let parsed = parse_query("RENAME TABLE users TO members").unwrap();
        assert_eq!(parsed.write_set.len(), 2);
    }

    #[test]
    fn test_parse_write_only_has_nonempty_write_set() {
        // DML 的写集不允许为空
        for statement in [
            "INSERT INTO t VALUES (1)",
            "DELETE FROM t",
            "UPDATE t SET a = 1",
            "TRUNCATE t",
        ] {
            let parsed = parse_query(statement).unwrap();
            assert!(!parsed.write_set.is_empty(), "statement: {}", statement);
        }
    }

    #[test]
    fn test_ddl_fallback() {
        let parsed = parse_ddl_fallback("INSERT INTO weird_syntax SELECT something impossible");
        assert_eq!(parsed.write_set.len(), 1);
        assert_eq!(parsed.write_set[0].name, "weird_syntax.*");
    }
}
