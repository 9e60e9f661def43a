/// `table.column` → (`table`, `column`)。没有 '.' 时 column 为空。
pub fn split_table_name(expr: &str) -> (String, String) {
    match expr.split_once('.') {
        Some((table, column)) => (table.to_string(), column.to_string()),
        None => (expr.to_string(), String::new()),
    }
}

pub fn to_lower(value: &str) -> String {
    value.to_ascii_lowercase()
}

pub fn replace_all(haystack: &str, from: &str, to: &str) -> String {
    if from.is_empty() {
        return haystack.to_string();
    }
    haystack.replace(from, to)
}

/// key column 表达式解析。
/// 组之间以 ',' 分隔，组内复合列以 '+' 连接:
/// `users.id,orders.product_id+orders.user_id`
pub fn parse_key_column_groups_expr(expression: &str) -> Vec<Vec<String>> {
    expression
        .split(',')
        .filter(|group| !group.trim().is_empty())
        .map(|group| {
            group
                .split('+')
                .map(|column| column.trim().to_string())
                .filter(|column| !column.is_empty())
                .collect()
        })
        .filter(|group: &Vec<String>| !group.is_empty())
        .collect()
}

/// 配置文件中 keyColumns 数组的各项也允许 '+' 复合列
pub fn parse_key_column_groups(entries: &[String]) -> Vec<Vec<String>> {
    entries
        .iter()
        .flat_map(|entry| parse_key_column_groups_expr(entry))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_split_table_name() {
        assert_eq!(
            split_table_name("users.id"),
            ("users".to_string(), "id".to_string())
        );
        assert_eq!(
            split_table_name("users.*"),
            ("users".to_string(), "*".to_string())
        );
        assert_eq!(split_table_name("users"), ("users".to_string(), String::new()));
    }

    #[test]
    fn test_parse_key_column_groups() {
        let groups = parse_key_column_groups_expr("users.id,orders.product_id+orders.user_id");
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0], vec!["users.id"]);
        assert_eq!(groups[1], vec!["orders.product_id", "orders.user_id"]);

        let entries = vec!["users.id".to_string(), "a.x+b.y".to_string()];
        let groups = parse_key_column_groups(&entries);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1], vec!["a.x", "b.y"]);
    }

    #[test]
    fn test_replace_all() {
        assert_eq!(replace_all("a @v b @v", "@v", "1"), "a 1 b 1");
        assert_eq!(replace_all("abc", "", "x"), "abc");
    }
}
