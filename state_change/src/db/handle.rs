use common::err::UltResult;

/// 重放引擎对数据库驱动的全部依赖。
/// 一个 handle 对应一条连接; 事务内的语句都走同一个 handle。
pub trait DbHandle: Send {
    /// 执行语句并丢弃结果
    fn execute(&mut self, query: &str) -> UltResult<()>;

    /// 执行语句并取回全部行 (文本形式)
    fn query_rows(&mut self, query: &str) -> UltResult<Vec<Vec<String>>>;

    /// 吃掉 CALL 等语句返回的多余 result set。
    /// 不消费的话连接会停在 commands-out-of-sync 状态。
    fn consume_results(&mut self) -> UltResult<()>;

    fn set_autocommit(&mut self, enabled: bool) -> UltResult<()>;
}
