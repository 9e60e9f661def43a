/// 表的重命名历史。`get_name(when)` 取某时刻的名字。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingHistory {
    initial_name: String,
    naming_history: Vec<(u64, String)>,
}

impl NamingHistory {
    pub fn new(initial_name: &str) -> Self {
        NamingHistory {
            initial_name: initial_name.to_string(),
            naming_history: vec![(0, initial_name.to_string())],
        }
    }

    pub fn add_rename_history(&mut self, new_name: &str, when: u64) {
        self.naming_history.push((when, new_name.to_string()));
        self.naming_history.sort_by_key(|entry| entry.0);
    }

    pub fn get_name(&self, when: u64) -> &str {
        let mut name = self.initial_name.as_str();

        for (timestamp, entry_name) in &self.naming_history {
            if *timestamp > when {
                break;
            }
            name = entry_name;
        }

        name
    }

    pub fn get_initial_name(&self) -> &str {
        &self.initial_name
    }

    pub fn get_current_name(&self) -> &str {
        &self.naming_history.last().expect("naming history is never empty").1
    }

    pub fn matches(&self, name: &str, when: u64) -> bool {
        self.get_name(when) == name
    }
}

#[cfg(test)]
mod test {
    use super::NamingHistory;

    #[test]
    fn test_rename_chain() {
        let mut history = NamingHistory::new("users");
        history.add_rename_history("members", 100);
        history.add_rename_history("accounts", 200);

        assert_eq!(history.get_initial_name(), "users");
        assert_eq!(history.get_name(0), "users");
        assert_eq!(history.get_name(99), "users");
        assert_eq!(history.get_name(100), "members");
        assert_eq!(history.get_name(250), "accounts");
        assert_eq!(history.get_current_name(), "accounts");

        assert!(history.matches("users", 50));
        assert!(history.matches("members", 150));
        assert!(!history.matches("users", 150));
    }

    #[test]
    fn test_out_of_order_inserts_are_sorted() {
        let mut history = NamingHistory::new("t1");
        history.add_rename_history("t3", 300);
        history.add_rename_history("t2", 100);

        assert_eq!(history.get_name(200), "t2");
        assert_eq!(history.get_current_name(), "t3");
    }
}
