use std::collections::BTreeMap;

use getset::{Getters, MutGetters, Setters};
use serde::{Deserialize, Serialize};

use state::Gid;

/// cluster range 与查询谓词的比较口径
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeComparisonMethod {
    /// 只有完全相同的点才算命中
    EqOnly,
    /// 区间相交即命中
    Intersect,
}

impl Default for RangeComparisonMethod {
    fn default() -> Self {
        RangeComparisonMethod::EqOnly
    }
}

impl RangeComparisonMethod {
    pub fn from_config(value: &str) -> Self {
        if value == "intersect" {
            RangeComparisonMethod::Intersect
        } else {
            RangeComparisonMethod::EqOnly
        }
    }
}

/// 一次 state change 的全部输入。
#[derive(Debug, Clone, Default, Getters, Setters, MutGetters, Serialize, Deserialize)]
#[getset(get = "pub", set = "pub", get_mut = "pub")]
pub struct StateChangePlan {
    state_log_path: String,
    state_log_name: String,

    db_name: String,
    db_host: String,
    db_port: u16,
    db_username: String,
    db_password: String,

    /// 单列或复合列的 key column 组
    key_column_groups: Vec<Vec<String>>,
    /// (alias column, real column)
    column_aliases: Vec<(String, String)>,

    db_dump_path: String,

    rollback_gids: Vec<Gid>,
    /// gid → 在该 gid 之前执行的 SQL 文件
    user_queries: BTreeMap<Gid, String>,
    auto_rollback_ratio: Option<f64>,

    start_gid: Option<Gid>,
    end_gid: Option<Gid>,
    replay_from_gid: Option<Gid>,
    skip_gids: Vec<Gid>,

    full_replay: bool,
    drop_intermediate_db: bool,
    range_comparison_method: RangeComparisonMethod,
    execute_replace_query: bool,
    dry_run: bool,

    report_path: String,
    binlog_path: String,
    thread_num: usize,
}

impl StateChangePlan {
    pub fn new() -> Self {
        StateChangePlan {
            drop_intermediate_db: true,
            execute_replace_query: true,
            ..Default::default()
        }
    }

    /// rollback_gids 保持升序且无重复
    pub fn normalize_rollback_gids(&mut self) {
        self.rollback_gids.sort_unstable();
        self.rollback_gids.dedup();
    }

    pub fn is_rollback_gid(&self, gid: Gid) -> bool {
        self.rollback_gids.binary_search(&gid).is_ok()
    }

    pub fn is_skip_gid(&self, gid: Gid) -> bool {
        self.skip_gids.contains(&gid)
    }

    /// start/end 窗口过滤
    pub fn is_in_gid_window(&self, gid: Gid) -> bool {
        if let Some(start_gid) = self.start_gid {
            if gid < start_gid {
                return false;
            }
        }
        if let Some(end_gid) = self.end_gid {
            if gid > end_gid {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod test {
    use super::{RangeComparisonMethod, StateChangePlan};

    #[test]
    fn test_rollback_gid_normalization() {
        let mut plan = StateChangePlan::new();
        plan.rollback_gids_mut().extend([5, 1, 3, 1, 5]);
        plan.normalize_rollback_gids();

        assert_eq!(plan.rollback_gids(), &vec![1, 3, 5]);
        assert!(plan.is_rollback_gid(3));
        assert!(!plan.is_rollback_gid(2));
    }

    #[test]
    fn test_gid_window() {
        let mut plan = StateChangePlan::new();
        assert!(plan.is_in_gid_window(0));
        assert!(plan.is_in_gid_window(u64::MAX));

        plan.set_start_gid(Some(10));
        plan.set_end_gid(Some(20));
        assert!(!plan.is_in_gid_window(9));
        assert!(plan.is_in_gid_window(10));
        assert!(plan.is_in_gid_window(20));
        assert!(!plan.is_in_gid_window(21));
    }

    #[test]
    fn test_range_comparison_method() {
        assert_eq!(
            RangeComparisonMethod::from_config("intersect"),
            RangeComparisonMethod::Intersect
        );
        assert_eq!(RangeComparisonMethod::from_config("eqonly"), RangeComparisonMethod::EqOnly);
    }

    #[test]
    fn test_defaults() {
        let plan = StateChangePlan::new();
        assert!(plan.drop_intermediate_db());
        assert!(plan.execute_replace_query());
        assert!(!plan.dry_run());
    }
}
