use num_enum::TryFromPrimitive;
use serde::Serialize;

/// 服务端的列类型 (enum_field_types)
///
/// @see https://dev.mysql.com/doc/dev/mysql-server/latest/field__types_8h.html
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum FieldType {
    Decimal = 0,
    Tiny = 1,
    Short = 2,
    Long = 3,
    Float = 4,
    Double = 5,
    Null = 6,
    Timestamp = 7,
    LongLong = 8,
    Int24 = 9,
    Date = 10,
    Time = 11,
    DateTime = 12,
    Year = 13,
    NewDate = 14,
    VarChar = 15,
    Bit = 16,
    Timestamp2 = 17,
    DateTime2 = 18,
    Time2 = 19,
    TypedArray = 20,
    Invalid = 243,
    Bool = 244,
    Json = 245,
    NewDecimal = 246,
    Enum = 247,
    Set = 248,
    TinyBlob = 249,
    MediumBlob = 250,
    LongBlob = 251,
    Blob = 252,
    VarString = 253,
    String = 254,
    Geometry = 255,
}

impl FieldType {
    /// signedness bit 只对数值列有意义
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldType::Tiny
                | FieldType::Short
                | FieldType::Int24
                | FieldType::Long
                | FieldType::LongLong
                | FieldType::Year
                | FieldType::Float
                | FieldType::Double
                | FieldType::Decimal
                | FieldType::NewDecimal
        )
    }
}

/// 解码后的逻辑类型
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum LogicalType {
    Integer,
    Float,
    Decimal,
    String,
    DateTime,
}

/// 一个列的解码描述。
/// `length` 为正时是定长字节数, 为负时是长度前缀自身的字节数 (varchar/blob)。
#[derive(Debug, Serialize, Clone)]
pub struct ColumnDef {
    pub logical_type: LogicalType,
    pub length: i32,
    pub field_type: FieldType,
    pub metadata: u16,
    pub is_unsigned: bool,
}

impl ColumnDef {
    pub fn new(
        logical_type: LogicalType,
        length: i32,
        field_type: FieldType,
        metadata: u16,
        is_unsigned: bool,
    ) -> Self {
        ColumnDef {
            logical_type,
            length,
            field_type,
            metadata,
            is_unsigned,
        }
    }
}
