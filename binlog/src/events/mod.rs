pub mod event_header;
pub mod format_description_event;
pub mod int_var_event;
pub mod query_event;
pub mod rand_event;
pub mod row_event;
pub mod row_query_event;
pub mod table_map_event;
pub mod user_var_event;
pub mod xid_event;

use num_enum::TryFromPrimitive;
use serde::Serialize;

pub use event_header::{EventHeader, EVENT_LEN_OFFSET, EVENT_TYPE_OFFSET, HEADER_LEN, LOG_POS_OFFSET};
pub use format_description_event::{ChecksumAlg, FormatDescriptionEvent};
pub use int_var_event::{IntVarEvent, IntVarType};
pub use query_event::QueryEvent;
pub use rand_event::RandEvent;
pub use row_event::{RowChange, RowEvent, RowEventType};
pub use row_query_event::RowQueryEvent;
pub use table_map_event::TableMapEvent;
pub use user_var_event::{UserVarEvent, UserVarType};
pub use xid_event::TransactionIdEvent;

///
/// Enumeration type for the different types of log events.
///
/// @see https://dev.mysql.com/doc/dev/mysql-server/latest/namespacemysql_1_1binlog_1_1event.html
///
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum EventType {
    Unknown = 0,
    StartV3 = 1,
    Query = 2,
    Stop = 3,
    Rotate = 4,
    IntVar = 5,
    Slave = 7,
    Rand = 13,
    UserVar = 14,
    FormatDescription = 15,
    Xid = 16,
    BeginLoadQuery = 17,
    ExecuteLoadQuery = 18,
    TableMap = 19,
    WriteRowsV1 = 23,
    UpdateRowsV1 = 24,
    DeleteRowsV1 = 25,
    Incident = 26,
    Heartbeat = 27,
    Ignorable = 28,
    RowsQuery = 29,
    WriteRows = 30,
    UpdateRows = 31,
    DeleteRows = 32,
    Gtid = 33,
    AnonymousGtid = 34,
    PreviousGtids = 35,
    TransactionContext = 36,
    ViewChange = 37,
    XaPrepare = 38,
    PartialUpdateRows = 39,
    TransactionPayload = 40,
    HeartbeatV2 = 41,
}

/// 解码后的事件。原始事件是多态继承结构, 在这里收敛为闭集 tagged variant。
#[derive(Debug, Serialize, Clone)]
pub enum BinlogEvent {
    Query(QueryEvent),
    TransactionId(TransactionIdEvent),
    IntVar(IntVarEvent),
    Rand(RandEvent),
    UserVar(UserVarEvent),
    TableMap(TableMapEvent),
    Row(RowEvent),
    RowQuery(RowQueryEvent),
}

impl BinlogEvent {
    pub fn timestamp(&self) -> u64 {
        match self {
            BinlogEvent::Query(event) => event.timestamp,
            BinlogEvent::TransactionId(event) => event.timestamp,
            BinlogEvent::IntVar(event) => event.timestamp,
            BinlogEvent::Rand(event) => event.timestamp,
            BinlogEvent::UserVar(event) => event.timestamp,
            BinlogEvent::TableMap(event) => event.timestamp,
            BinlogEvent::Row(event) => event.timestamp,
            BinlogEvent::RowQuery(event) => event.timestamp,
        }
    }
}
