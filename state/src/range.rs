use std::cmp::Ordering;

use serde::Serialize;

use crate::data::StateData;

/// 区间端点。Exclusive 用于 LT/GT。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Endpoint {
    Unbounded,
    Inclusive(StateData),
    Exclusive(StateData),
}

impl Endpoint {
    pub fn value(&self) -> Option<&StateData> {
        match self {
            Endpoint::Unbounded => None,
            Endpoint::Inclusive(value) | Endpoint::Exclusive(value) => Some(value),
        }
    }
}

/// 下界比较: Unbounded = -∞; 同值时 Inclusive 先于 Exclusive
fn cmp_lower(a: &Endpoint, b: &Endpoint) -> Ordering {
    match (a, b) {
        (Endpoint::Unbounded, Endpoint::Unbounded) => Ordering::Equal,
        (Endpoint::Unbounded, _) => Ordering::Less,
        (_, Endpoint::Unbounded) => Ordering::Greater,
        (Endpoint::Inclusive(a), Endpoint::Inclusive(b)) | (Endpoint::Exclusive(a), Endpoint::Exclusive(b)) => {
            a.cmp(b)
        }
        (Endpoint::Inclusive(a), Endpoint::Exclusive(b)) => a.cmp(b).then(Ordering::Less),
        (Endpoint::Exclusive(a), Endpoint::Inclusive(b)) => a.cmp(b).then(Ordering::Greater),
    }
}

/// 上界比较: Unbounded = +∞; 同值时 Exclusive 先于 Inclusive
fn cmp_upper(a: &Endpoint, b: &Endpoint) -> Ordering {
    match (a, b) {
        (Endpoint::Unbounded, Endpoint::Unbounded) => Ordering::Equal,
        (Endpoint::Unbounded, _) => Ordering::Greater,
        (_, Endpoint::Unbounded) => Ordering::Less,
        (Endpoint::Inclusive(a), Endpoint::Inclusive(b)) | (Endpoint::Exclusive(a), Endpoint::Exclusive(b)) => {
            a.cmp(b)
        }
        (Endpoint::Inclusive(a), Endpoint::Exclusive(b)) => a.cmp(b).then(Ordering::Greater),
        (Endpoint::Exclusive(a), Endpoint::Inclusive(b)) => a.cmp(b).then(Ordering::Less),
    }
}

/// [lower, upper] 是否构成非空区间
fn lower_fits_upper(lower: &Endpoint, upper: &Endpoint) -> bool {
    match (lower, upper) {
        (Endpoint::Unbounded, _) | (_, Endpoint::Unbounded) => true,
        (Endpoint::Inclusive(a), Endpoint::Inclusive(b)) => a <= b,
        (Endpoint::Inclusive(a), Endpoint::Exclusive(b))
        | (Endpoint::Exclusive(a), Endpoint::Inclusive(b))
        | (Endpoint::Exclusive(a), Endpoint::Exclusive(b)) => a < b,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Interval {
    pub min: Endpoint,
    pub max: Endpoint,
}

impl Interval {
    pub fn point(value: StateData) -> Self {
        Interval {
            min: Endpoint::Inclusive(value.clone()),
            max: Endpoint::Inclusive(value),
        }
    }

    pub fn full() -> Self {
        Interval {
            min: Endpoint::Unbounded,
            max: Endpoint::Unbounded,
        }
    }

    pub fn intersect(&self, other: &Interval) -> Option<Interval> {
        let min = if cmp_lower(&self.min, &other.min) == Ordering::Less {
            other.min.clone()
        } else {
            self.min.clone()
        };
        let max = if cmp_upper(&self.max, &other.max) == Ordering::Greater {
            other.max.clone()
        } else {
            self.max.clone()
        };

        if lower_fits_upper(&min, &max) {
            Some(Interval { min, max })
        } else {
            None
        }
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.intersect(other).is_some()
    }

    /// 相交或首尾相接时可以合并为一个区间
    fn can_merge(&self, other: &Interval) -> bool {
        if self.overlaps(other) {
            return true;
        }

        let touches = |upper: &Endpoint, lower: &Endpoint| -> bool {
            match (upper.value(), lower.value()) {
                (Some(a), Some(b)) if a == b => {
                    matches!(upper, Endpoint::Inclusive(_)) || matches!(lower, Endpoint::Inclusive(_))
                }
                _ => false,
            }
        };

        touches(&self.max, &other.min) || touches(&other.max, &self.min)
    }

    fn merge(&self, other: &Interval) -> Interval {
        let min = if cmp_lower(&self.min, &other.min) == Ordering::Less {
            self.min.clone()
        } else {
            other.min.clone()
        };
        let max = if cmp_upper(&self.max, &other.max) == Ordering::Greater {
            self.max.clone()
        } else {
            other.max.clone()
        };

        Interval { min, max }
    }

    pub fn is_point(&self) -> bool {
        match (&self.min, &self.max) {
            (Endpoint::Inclusive(a), Endpoint::Inclusive(b)) => a == b,
            _ => false,
        }
    }
}

/// 单个列值域上的有序不相交区间集。
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StateRange {
    intervals: Vec<Interval>,
}

impl StateRange {
    pub fn new() -> Self {
        StateRange { intervals: vec![] }
    }

    pub(crate) fn from_intervals(intervals: Vec<Interval>) -> Self {
        StateRange { intervals }
    }

    pub fn point(value: StateData) -> Self {
        StateRange {
            intervals: vec![Interval::point(value)],
        }
    }

    pub fn between(begin: StateData, end: StateData) -> Self {
        StateRange {
            intervals: vec![Interval {
                min: Endpoint::Inclusive(begin),
                max: Endpoint::Inclusive(end),
            }],
        }
    }

    pub fn list<I: IntoIterator<Item = StateData>>(values: I) -> Self {
        let mut range = StateRange {
            intervals: values.into_iter().map(Interval::point).collect(),
        };
        range.arrange_self();
        range
    }

    pub fn wildcard() -> Self {
        StateRange {
            intervals: vec![Interval::full()],
        }
    }

    pub fn less_than(value: StateData) -> Self {
        StateRange {
            intervals: vec![Interval {
                min: Endpoint::Unbounded,
                max: Endpoint::Exclusive(value),
            }],
        }
    }

    pub fn less_equal(value: StateData) -> Self {
        StateRange {
            intervals: vec![Interval {
                min: Endpoint::Unbounded,
                max: Endpoint::Inclusive(value),
            }],
        }
    }

    pub fn greater_than(value: StateData) -> Self {
        StateRange {
            intervals: vec![Interval {
                min: Endpoint::Exclusive(value),
                max: Endpoint::Unbounded,
            }],
        }
    }

    pub fn greater_equal(value: StateData) -> Self {
        StateRange {
            intervals: vec![Interval {
                min: Endpoint::Inclusive(value),
                max: Endpoint::Unbounded,
            }],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    pub fn is_intersects(a: &StateRange, b: &StateRange) -> bool {
        for lhs in &a.intervals {
            for rhs in &b.intervals {
                if lhs.overlaps(rhs) {
                    return true;
                }
            }
        }

        false
    }

    pub fn and(a: &StateRange, b: &StateRange) -> StateRange {
        let mut result = StateRange::new();

        for lhs in &a.intervals {
            for rhs in &b.intervals {
                if let Some(intersection) = lhs.intersect(rhs) {
                    result.intervals.push(intersection);
                }
            }
        }

        result.arrange_self();
        result
    }

    pub fn or(a: &StateRange, b: &StateRange) -> StateRange {
        let mut result = a.clone();
        result.or_fast(b);
        result.arrange_self();
        result
    }

    /// 把 other 的区间并进来, 不整理。
    /// 两边都已排序时是 O(n+m); 调用方最后统一 `arrange_self`。
    pub fn or_fast(&mut self, other: &StateRange) {
        let mut merged = Vec::with_capacity(self.intervals.len() + other.intervals.len());

        let mut lhs = std::mem::take(&mut self.intervals).into_iter().peekable();
        let mut rhs = other.intervals.iter().cloned().peekable();

        loop {
            match (lhs.peek(), rhs.peek()) {
                (Some(a), Some(b)) => {
                    if cmp_lower(&a.min, &b.min) != Ordering::Greater {
                        merged.push(lhs.next().unwrap());
                    } else {
                        merged.push(rhs.next().unwrap());
                    }
                }
                (Some(_), None) => merged.push(lhs.next().unwrap()),
                (None, Some(_)) => merged.push(rhs.next().unwrap()),
                (None, None) => break,
            }
        }

        self.intervals = merged;
    }

    /// 排序并合并相交/相接的区间
    pub fn arrange_self(&mut self) {
        if self.intervals.len() < 2 {
            return;
        }

        self.intervals.sort_by(|a, b| cmp_lower(&a.min, &b.min));

        let mut arranged: Vec<Interval> = Vec::with_capacity(self.intervals.len());
        for interval in self.intervals.drain(..) {
            match arranged.last_mut() {
                Some(last) if last.can_merge(&interval) => {
                    *last = last.merge(&interval);
                }
                _ => arranged.push(interval),
            }
        }

        self.intervals = arranged;
    }

    /// 诊断输出用的 WHERE 片段
    pub fn make_where_query(&self, column: &str) -> String {
        if self.intervals.is_empty() {
            return String::from("(1=0)");
        }

        let parts: Vec<String> = self
            .intervals
            .iter()
            .map(|interval| match (&interval.min, &interval.max) {
                (Endpoint::Unbounded, Endpoint::Unbounded) => String::from("(1=1)"),
                (Endpoint::Unbounded, Endpoint::Inclusive(v)) => format!("{}<={}", column, v),
                (Endpoint::Unbounded, Endpoint::Exclusive(v)) => format!("{}<{}", column, v),
                (Endpoint::Inclusive(v), Endpoint::Unbounded) => format!("{}>={}", column, v),
                (Endpoint::Exclusive(v), Endpoint::Unbounded) => format!("{}>{}", column, v),
                (Endpoint::Inclusive(a), Endpoint::Inclusive(b)) => {
                    if a == b {
                        format!("{}={}", column, a)
                    } else {
                        format!("({0}>={1} AND {0}<={2})", column, a, b)
                    }
                }
                (min, max) => {
                    let lower = match min {
                        Endpoint::Inclusive(v) => format!("{}>={}", column, v),
                        Endpoint::Exclusive(v) => format!("{}>{}", column, v),
                        Endpoint::Unbounded => unreachable!(),
                    };
                    let upper = match max {
                        Endpoint::Inclusive(v) => format!("{}<={}", column, v),
                        Endpoint::Exclusive(v) => format!("{}<{}", column, v),
                        Endpoint::Unbounded => unreachable!(),
                    };
                    format!("({} AND {})", lower, upper)
                }
            })
            .collect();

        parts.join(" OR ")
    }
}

impl From<i64> for StateRange {
    fn from(value: i64) -> Self {
        StateRange::point(StateData::Int(value))
    }
}

#[cfg(test)]
mod test {
    use crate::data::StateData;

    use super::StateRange;

    fn between(a: i64, b: i64) -> StateRange {
        StateRange::between(StateData::Int(a), StateData::Int(b))
    }

    #[test]
    fn test_point_intersection() {
        let one = StateRange::from(1);
        let also_one = StateRange::from(1);
        let two = StateRange::from(2);

        assert!(StateRange::is_intersects(&one, &also_one));
        assert!(!StateRange::is_intersects(&one, &two));
    }

    #[test]
    fn test_between_contains_point() {
        let range = between(10, 20);

        assert!(StateRange::is_intersects(&range, &StateRange::from(15)));
        assert!(StateRange::is_intersects(&range, &StateRange::from(10)));
        assert!(StateRange::is_intersects(&range, &StateRange::from(20)));
        assert!(!StateRange::is_intersects(&range, &StateRange::from(25)));
    }

    #[test]
    fn test_open_bounds() {
        let lt = StateRange::less_than(StateData::Int(10));
        assert!(StateRange::is_intersects(&lt, &StateRange::from(9)));
        assert!(!StateRange::is_intersects(&lt, &StateRange::from(10)));

        let ge = StateRange::greater_equal(StateData::Int(10));
        assert!(StateRange::is_intersects(&ge, &StateRange::from(10)));
        assert!(!StateRange::is_intersects(&ge, &StateRange::from(9)));

        // (−∞,10) 与 [10,∞) 不相交
        assert!(!StateRange::is_intersects(&lt, &ge));
    }

    #[test]
    fn test_or_fast_then_arrange() {
        let mut range = StateRange::from(1);
        range.or_fast(&between(1, 2));
        range.or_fast(&StateRange::from(2));
        range.arrange_self();

        assert_eq!(range.intervals().len(), 1);
        assert_eq!(range.make_where_query("users.id"), "(users.id>=1 AND users.id<=2)");
    }

    #[test]
    fn test_arrange_keeps_disjoint() {
        let mut range = StateRange::from(1);
        range.or_fast(&StateRange::from(10));
        range.or_fast(&StateRange::from(20));
        range.arrange_self();

        assert_eq!(range.intervals().len(), 3);

        let where_query = range.make_where_query("users.id");
        assert!(where_query.contains("users.id=1"));
        assert!(where_query.contains("users.id=10"));
        assert!(where_query.contains("users.id=20"));
    }

    #[test]
    fn test_and() {
        let a = between(1, 10);
        let b = between(5, 20);

        let intersection = StateRange::and(&a, &b);
        assert_eq!(intersection.make_where_query("c"), "(c>=5 AND c<=10)");

        let disjoint = StateRange::and(&between(1, 2), &between(5, 6));
        assert!(disjoint.is_empty());
        assert_eq!(disjoint.make_where_query("c"), "(1=0)");
    }

    #[test]
    fn test_list_dedup() {
        let range = StateRange::list(vec![
            StateData::Int(3),
            StateData::Int(1),
            StateData::Int(3),
            StateData::Int(2),
        ]);

        // 排序 + 相同点合并。1 与 2 不共享端点, 保持分离
        assert_eq!(range.intervals().len(), 3);
    }

    #[test]
    fn test_wildcard() {
        let wildcard = StateRange::wildcard();
        assert!(StateRange::is_intersects(&wildcard, &StateRange::from(123)));
        assert_eq!(wildcard.make_where_query("c"), "(1=1)");
    }
}
