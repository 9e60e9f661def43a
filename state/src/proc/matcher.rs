use tracing::warn;

use crate::parse::{parse_ddl_fallback, parse_query, tokenize, Token};
use crate::proc::proc_call::ProcCall;
use crate::query::Query;

use crate::item::StateItem;

/// procedure definition 与 binlog 里捕获到的语句的对齐器。
///
/// binlog 只有写语句; 过程体内的 SELECT 等读语句需要从定义文件恢复。
/// 模板匹配按 token 流进行, 参数名与局部变量视作单 token 通配。
pub struct ProcMatcher {
    name: String,
    parameters: Vec<String>,
    locals: Vec<String>,
    statements: Vec<String>,
}

fn is_wildcard_token(value: &str, parameters: &[String], locals: &[String]) -> bool {
    let lowered = value.to_ascii_lowercase();
    value.starts_with('@')
        || parameters.iter().any(|parameter| *parameter == lowered)
        || locals.iter().any(|local| *local == lowered)
}

impl ProcMatcher {
    pub fn new(procdef: &str) -> Self {
        let tokens = tokenize(procdef);

        let mut name = String::new();
        let mut parameters = vec![];

        // CREATE PROCEDURE <name> ( [IN|OUT|INOUT] <param> <type>, ... )
        if let Some(index) = tokens.iter().position(|token| token.is_keyword("procedure")) {
            if let Some(Token::Ident(proc_name)) = tokens.get(index + 1) {
                name = proc_name.clone();
            }

            if let Some(open) = tokens[index..].iter().position(|token| token.is_symbol("(")) {
                let mut scan = index + open + 1;
                let mut depth = 1;
                let mut expect_name = true;

                while scan < tokens.len() && depth > 0 {
                    let token = &tokens[scan];
                    if token.is_symbol("(") {
                        depth += 1;
                    } else if token.is_symbol(")") {
                        depth -= 1;
                    } else if token.is_symbol(",") && depth == 1 {
                        expect_name = true;
                    } else if expect_name && depth == 1 {
                        if let Some(ident) = token.ident() {
                            if !ident.eq_ignore_ascii_case("in")
                                && !ident.eq_ignore_ascii_case("out")
                                && !ident.eq_ignore_ascii_case("inout")
                            {
                                parameters.push(ident.to_ascii_lowercase());
                                expect_name = false;
                            }
                        }
                    }
                    scan += 1;
                }
            }
        }

        // BEGIN ... END 之间按 ';' 切语句
        let upper = procdef.to_ascii_uppercase();
        let body_start = upper.find("BEGIN").map(|index| index + "BEGIN".len()).unwrap_or(0);
        let body_end = upper.rfind("END").unwrap_or(procdef.len());
        let body = &procdef[body_start..body_end.max(body_start)];

        let mut locals = vec![];
        let mut statements = vec![];

        for raw_statement in body.split(';') {
            let statement = raw_statement.trim();
            if statement.is_empty() {
                continue;
            }

            let statement_tokens = tokenize(statement);
            if statement_tokens
                .first()
                .map(|token| token.is_keyword("declare"))
                .unwrap_or(false)
            {
                if let Some(Token::Ident(local)) = statement_tokens.get(1) {
                    locals.push(local.to_ascii_lowercase());
                }
                continue;
            }

            statements.push(statement.to_string());
        }

        ProcMatcher {
            name,
            parameters,
            locals,
            statements,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    fn template_matches(&self, template: &str, recorded: &str) -> bool {
        let template_tokens = tokenize(template);
        let recorded_tokens = tokenize(recorded);

        if template_tokens.len() != recorded_tokens.len() {
            return false;
        }

        template_tokens.iter().zip(recorded_tokens.iter()).all(|(lhs, rhs)| {
            match (lhs, rhs) {
                (Token::Ident(template_ident), _) if is_wildcard_token(template_ident, &self.parameters, &self.locals) => {
                    // 参数位可以是任意字面量或标识符
                    !matches!(rhs, Token::Symbol(_))
                }
                (Token::Ident(a), Token::Ident(b)) => a.eq_ignore_ascii_case(b),
                (Token::Number(a), Token::Number(b)) => a == b,
                (Token::Str(a), Token::Str(b)) => a == b,
                (Token::Symbol(a), Token::Symbol(b)) => a == b,
                _ => false,
            }
        })
    }

    /// 把记录到的语句对齐到过程体中 `start` 之后的下一个位置
    pub fn match_forward(&self, statement: &str, start: usize) -> Option<usize> {
        (start..self.statements.len()).find(|index| self.template_matches(&self.statements[*index], statement))
    }

    /// 过程体第 `index` 条语句以实参代入后物化为 Query
    pub fn as_query(&self, index: usize, proc_call: &ProcCall, _key_columns: &[Vec<String>]) -> Vec<Query> {
        let template = match self.statements.get(index) {
            Some(template) => template,
            None => return vec![],
        };

        let statement = self.substitute(template, proc_call);

        let parsed = match parse_query(&statement) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("cannot parse recovered statement, falling back: {}", e);
                parse_ddl_fallback(&statement)
            }
        };

        let mut query = Query::new();
        query.query_type = parsed.query_type;
        query.statement = statement;
        query.read_set = parsed.read_set;
        query.write_set = parsed.write_set;
        query.read_columns = parsed.read_columns;
        query.write_columns = parsed.write_columns;

        vec![query]
    }

    fn substitute(&self, template: &str, proc_call: &ProcCall) -> String {
        let tokens = tokenize(template);
        let mut output = String::new();

        for token in tokens {
            if !output.is_empty() {
                output.push(' ');
            }

            match &token {
                Token::Ident(ident) => {
                    let lowered = ident.to_ascii_lowercase();
                    match self.parameters.iter().position(|parameter| *parameter == lowered) {
                        Some(position) if position < proc_call.parameters.len() => {
                            output.push_str(&proc_call.parameters[position].to_string());
                        }
                        _ => output.push_str(ident),
                    }
                }
                Token::Number(value) => output.push_str(value),
                Token::Str(value) => {
                    output.push('\'');
                    output.push_str(&value.replace('\'', "''"));
                    output.push('\'');
                }
                Token::Symbol(symbol) => output.push_str(symbol),
            }
        }

        output
    }

    /// 形参绑定 → StateItem 列表
    pub fn variable_set(&self, proc_call: &ProcCall) -> Vec<StateItem> {
        self.parameters
            .iter()
            .zip(proc_call.parameters.iter())
            .map(|(parameter, value)| StateItem::eq_item(parameter, value.clone()))
            .collect()
    }
}
