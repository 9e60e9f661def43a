use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::data::StateData;
use crate::range::StateRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConditionType {
    None,
    And,
    Or,
}

impl Default for ConditionType {
    fn default() -> Self {
        ConditionType::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FunctionType {
    None,
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
    Between,
    InInternal,
    Like,
    Wildcard,
}

impl Default for FunctionType {
    fn default() -> Self {
        FunctionType::None
    }
}

/// 谓词表达式树的一个节点。
/// 叶节点: `name` (table.column) + `function_type` + `data_list`;
/// AND/OR 节点: `condition_type` + `arg_list`。
/// 子查询谓词挂在 `sub_query_list` 上。
#[derive(Debug, Default, Serialize)]
pub struct StateItem {
    pub condition_type: ConditionType,
    pub function_type: FunctionType,

    pub name: String,
    pub data_list: Vec<StateData>,

    pub arg_list: Vec<StateItem>,
    pub sub_query_list: Vec<StateItem>,

    #[serde(skip)]
    pub(crate) range_cache: OnceCell<StateRange>,
}

impl Clone for StateItem {
    fn clone(&self) -> Self {
        // range cache 不随克隆走, 需要时重建
        StateItem {
            condition_type: self.condition_type,
            function_type: self.function_type,
            name: self.name.clone(),
            data_list: self.data_list.clone(),
            arg_list: self.arg_list.clone(),
            sub_query_list: self.sub_query_list.clone(),
            range_cache: OnceCell::new(),
        }
    }
}

impl PartialEq for StateItem {
    fn eq(&self, other: &Self) -> bool {
        self.condition_type == other.condition_type
            && self.function_type == other.function_type
            && self.name == other.name
            && self.data_list == other.data_list
            && self.arg_list == other.arg_list
            && self.sub_query_list == other.sub_query_list
    }
}

impl StateItem {
    pub fn eq_item(name: &str, value: StateData) -> Self {
        StateItem {
            function_type: FunctionType::Eq,
            name: name.to_string(),
            data_list: vec![value],
            ..Default::default()
        }
    }

    pub fn between_item(name: &str, begin: StateData, end: StateData) -> Self {
        StateItem {
            function_type: FunctionType::Between,
            name: name.to_string(),
            data_list: vec![begin, end],
            ..Default::default()
        }
    }

    pub fn in_item<I: IntoIterator<Item = StateData>>(name: &str, values: I) -> Self {
        StateItem {
            function_type: FunctionType::InInternal,
            name: name.to_string(),
            data_list: values.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn wildcard_item(name: &str) -> Self {
        StateItem {
            function_type: FunctionType::Wildcard,
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn condition(condition_type: ConditionType, args: Vec<StateItem>) -> Self {
        StateItem {
            condition_type,
            arg_list: args,
            ..Default::default()
        }
    }

    /// `function_type + data_list` 物化为 range
    pub fn make_range(&self) -> StateRange {
        match self.function_type {
            FunctionType::Eq => match self.data_list.first() {
                Some(value) => StateRange::point(value.clone()),
                None => StateRange::new(),
            },
            FunctionType::Lt => match self.data_list.first() {
                Some(value) => StateRange::less_than(value.clone()),
                None => StateRange::new(),
            },
            FunctionType::Le => match self.data_list.first() {
                Some(value) => StateRange::less_equal(value.clone()),
                None => StateRange::new(),
            },
            FunctionType::Gt => match self.data_list.first() {
                Some(value) => StateRange::greater_than(value.clone()),
                None => StateRange::new(),
            },
            FunctionType::Ge => match self.data_list.first() {
                Some(value) => StateRange::greater_equal(value.clone()),
                None => StateRange::new(),
            },
            FunctionType::Between => {
                if self.data_list.len() < 2 {
                    return StateRange::new();
                }
                StateRange::between(self.data_list[0].clone(), self.data_list[1].clone())
            }
            FunctionType::InInternal => StateRange::list(self.data_list.iter().cloned()),
            // NEQ/LIKE 不能收窄为闭区间, 保守地当全域处理
            FunctionType::Neq | FunctionType::Like | FunctionType::Wildcard => StateRange::wildcard(),
            FunctionType::None => {
                if self.data_list.is_empty() {
                    StateRange::new()
                } else {
                    StateRange::list(self.data_list.iter().cloned())
                }
            }
        }
    }

    /// 带缓存的 range 物化
    pub fn make_range2(&self) -> &StateRange {
        self.range_cache.get_or_init(|| self.make_range())
    }

    pub fn is_leaf(&self) -> bool {
        self.condition_type == ConditionType::None
    }

    /// 自身及全部后代 (arg_list + sub_query_list) 的先序遍历
    pub fn visit_leaves<'a, F>(&'a self, visit: &mut F) -> bool
    where
        F: FnMut(&'a StateItem) -> bool,
    {
        if !self.name.is_empty() && visit(self) {
            return true;
        }

        for child in &self.arg_list {
            if child.visit_leaves(visit) {
                return true;
            }
        }

        for child in &self.sub_query_list {
            if child.visit_leaves(visit) {
                return true;
            }
        }

        false
    }
}
