//! 各持久化消息的 wire format 编解码。
//!
//! field number 一旦定下不再改动; 未知字段跳过以保持向前兼容。

use std::collections::HashMap;

use openssl::bn::BigNum;

use common::err::{UltError, UltResult};

use crate::cluster::row_cluster::{CompositeRange, GidList, RowAlias, RowCluster};
use crate::codec::wire::{WireReader, WireWriter};
use crate::codec::WireMessage;
use crate::data::StateData;
use crate::graph::column_graph::{hash_column_set, ColumnAccessType, ColumnDependencyGraph, ColumnDependencyNode};
use crate::graph::TableDependencyGraph;
use crate::hash::StateHash;
use crate::item::{ConditionType, FunctionType, StateItem};
use crate::proc::proc_call::ProcCall;
use crate::query::{Query, QueryFlags, QueryType, StatementContext, UserVar, UserVarValueType};
use crate::range::{Endpoint, Interval, StateRange};
use crate::transaction::{Transaction, TransactionFlags};

//////////////////////
// StateData
//////////////////////

const DATA_KIND_NULL: u64 = 0;
const DATA_KIND_BOOL: u64 = 1;
const DATA_KIND_INT: u64 = 2;
const DATA_KIND_UINT: u64 = 3;
const DATA_KIND_DOUBLE: u64 = 4;
const DATA_KIND_STRING: u64 = 5;
const DATA_KIND_BYTES: u64 = 6;

impl WireMessage for StateData {
    fn encode(&self, writer: &mut WireWriter) {
        match self {
            StateData::Null => writer.write_uint64(1, DATA_KIND_NULL),
            StateData::Bool(value) => {
                writer.write_uint64(1, DATA_KIND_BOOL);
                writer.write_bool(2, *value);
            }
            StateData::Int(value) => {
                writer.write_uint64(1, DATA_KIND_INT);
                writer.write_int64(3, *value);
            }
            StateData::UInt(value) => {
                writer.write_uint64(1, DATA_KIND_UINT);
                writer.write_uint64(4, *value);
            }
            StateData::Double(value) => {
                writer.write_uint64(1, DATA_KIND_DOUBLE);
                writer.write_double(5, *value);
            }
            StateData::String(value) => {
                writer.write_uint64(1, DATA_KIND_STRING);
                writer.write_string(6, value);
            }
            StateData::Bytes(value) => {
                writer.write_uint64(1, DATA_KIND_BYTES);
                writer.write_bytes(7, value);
            }
        }
    }

    fn decode(reader: &mut WireReader) -> UltResult<Self> {
        let mut kind = DATA_KIND_NULL;
        let mut value = StateData::Null;

        while let Some((field, wire_type)) = reader.next_tag()? {
            match field {
                1 => kind = reader.read_uint64()?,
                2 => value = StateData::Bool(reader.read_bool()?),
                3 => value = StateData::Int(reader.read_int64()?),
                4 => value = StateData::UInt(reader.read_uint64()?),
                5 => value = StateData::Double(reader.read_double()?),
                6 => value = StateData::String(reader.read_string()?),
                7 => value = StateData::Bytes(reader.read_bytes()?.to_vec()),
                _ => reader.skip_field(wire_type)?,
            }
        }

        if kind == DATA_KIND_NULL {
            return Ok(StateData::Null);
        }
        Ok(value)
    }
}

//////////////////////
// StateRange
//////////////////////

const ENDPOINT_UNBOUNDED: u64 = 0;
const ENDPOINT_INCLUSIVE: u64 = 1;
const ENDPOINT_EXCLUSIVE: u64 = 2;

fn encode_endpoint(endpoint: &Endpoint, kind_field: u32, value_field: u32, writer: &mut WireWriter) {
    match endpoint {
        Endpoint::Unbounded => writer.write_uint64(kind_field, ENDPOINT_UNBOUNDED),
        Endpoint::Inclusive(value) => {
            writer.write_uint64(kind_field, ENDPOINT_INCLUSIVE);
            writer.write_message(value_field, &value.to_encoded());
        }
        Endpoint::Exclusive(value) => {
            writer.write_uint64(kind_field, ENDPOINT_EXCLUSIVE);
            writer.write_message(value_field, &value.to_encoded());
        }
    }
}

fn endpoint_from_parts(kind: u64, value: Option<StateData>) -> UltResult<Endpoint> {
    match kind {
        ENDPOINT_UNBOUNDED => Ok(Endpoint::Unbounded),
        ENDPOINT_INCLUSIVE => Ok(Endpoint::Inclusive(value.unwrap_or_default())),
        ENDPOINT_EXCLUSIVE => Ok(Endpoint::Exclusive(value.unwrap_or_default())),
        other => Err(UltError::Decode(format!("unknown endpoint kind: {}", other))),
    }
}

impl WireMessage for Interval {
    fn encode(&self, writer: &mut WireWriter) {
        encode_endpoint(&self.min, 1, 2, writer);
        encode_endpoint(&self.max, 3, 4, writer);
    }

    fn decode(reader: &mut WireReader) -> UltResult<Self> {
        let mut min_kind = ENDPOINT_UNBOUNDED;
        let mut min_value = None;
        let mut max_kind = ENDPOINT_UNBOUNDED;
        let mut max_value = None;

        while let Some((field, wire_type)) = reader.next_tag()? {
            match field {
                1 => min_kind = reader.read_uint64()?,
                2 => min_value = Some(StateData::from_encoded(reader.read_bytes()?)?),
                3 => max_kind = reader.read_uint64()?,
                4 => max_value = Some(StateData::from_encoded(reader.read_bytes()?)?),
                _ => reader.skip_field(wire_type)?,
            }
        }

        Ok(Interval {
            min: endpoint_from_parts(min_kind, min_value)?,
            max: endpoint_from_parts(max_kind, max_value)?,
        })
    }
}

impl WireMessage for StateRange {
    fn encode(&self, writer: &mut WireWriter) {
        for interval in self.intervals() {
            writer.write_message(1, &interval.to_encoded());
        }
    }

    fn decode(reader: &mut WireReader) -> UltResult<Self> {
        let mut intervals = vec![];

        while let Some((field, wire_type)) = reader.next_tag()? {
            match field {
                1 => intervals.push(Interval::from_encoded(reader.read_bytes()?)?),
                _ => reader.skip_field(wire_type)?,
            }
        }

        Ok(StateRange::from_intervals(intervals))
    }
}

//////////////////////
// StateItem
//////////////////////

fn condition_type_code(condition_type: ConditionType) -> u64 {
    match condition_type {
        ConditionType::None => 0,
        ConditionType::And => 1,
        ConditionType::Or => 2,
    }
}

fn condition_type_from(code: u64) -> UltResult<ConditionType> {
    match code {
        0 => Ok(ConditionType::None),
        1 => Ok(ConditionType::And),
        2 => Ok(ConditionType::Or),
        other => Err(UltError::Decode(format!("unknown condition type: {}", other))),
    }
}

fn function_type_code(function_type: FunctionType) -> u64 {
    match function_type {
        FunctionType::None => 0,
        FunctionType::Eq => 1,
        FunctionType::Neq => 2,
        FunctionType::Lt => 3,
        FunctionType::Le => 4,
        FunctionType::Gt => 5,
        FunctionType::Ge => 6,
        FunctionType::Between => 7,
        FunctionType::InInternal => 8,
        FunctionType::Like => 9,
        FunctionType::Wildcard => 10,
    }
}

fn function_type_from(code: u64) -> UltResult<FunctionType> {
    match code {
        0 => Ok(FunctionType::None),
        1 => Ok(FunctionType::Eq),
        2 => Ok(FunctionType::Neq),
        3 => Ok(FunctionType::Lt),
        4 => Ok(FunctionType::Le),
        5 => Ok(FunctionType::Gt),
        6 => Ok(FunctionType::Ge),
        7 => Ok(FunctionType::Between),
        8 => Ok(FunctionType::InInternal),
        9 => Ok(FunctionType::Like),
        10 => Ok(FunctionType::Wildcard),
        other => Err(UltError::Decode(format!("unknown function type: {}", other))),
    }
}

impl WireMessage for StateItem {
    fn encode(&self, writer: &mut WireWriter) {
        writer.write_uint64(1, condition_type_code(self.condition_type));
        writer.write_uint64(2, function_type_code(self.function_type));
        if !self.name.is_empty() {
            writer.write_string(3, &self.name);
        }
        for data in &self.data_list {
            writer.write_message(4, &data.to_encoded());
        }
        for item in &self.arg_list {
            writer.write_message(5, &item.to_encoded());
        }
        for item in &self.sub_query_list {
            writer.write_message(6, &item.to_encoded());
        }
    }

    fn decode(reader: &mut WireReader) -> UltResult<Self> {
        let mut item = StateItem::default();

        while let Some((field, wire_type)) = reader.next_tag()? {
            match field {
                1 => item.condition_type = condition_type_from(reader.read_uint64()?)?,
                2 => item.function_type = function_type_from(reader.read_uint64()?)?,
                3 => item.name = reader.read_string()?,
                4 => item.data_list.push(StateData::from_encoded(reader.read_bytes()?)?),
                5 => item.arg_list.push(StateItem::from_encoded(reader.read_bytes()?)?),
                6 => item.sub_query_list.push(StateItem::from_encoded(reader.read_bytes()?)?),
                _ => reader.skip_field(wire_type)?,
            }
        }

        Ok(item)
    }
}

//////////////////////
// StateHash
//////////////////////

impl WireMessage for StateHash {
    fn encode(&self, writer: &mut WireWriter) {
        for modulo in self.modulo_list() {
            writer.write_bytes(1, &modulo.to_vec());
        }
        for hash in self.hash_list() {
            writer.write_bytes(2, &hash.to_vec());
        }
    }

    fn decode(reader: &mut WireReader) -> UltResult<Self> {
        let mut modulo_list = vec![];
        let mut hash_list = vec![];

        while let Some((field, wire_type)) = reader.next_tag()? {
            match field {
                1 => modulo_list.push(
                    BigNum::from_slice(reader.read_bytes()?)
                        .map_err(|e| UltError::Decode(format!("bad modulo payload: {}", e)))?,
                ),
                2 => hash_list.push(
                    BigNum::from_slice(reader.read_bytes()?)
                        .map_err(|e| UltError::Decode(format!("bad hash payload: {}", e)))?,
                ),
                _ => reader.skip_field(wire_type)?,
            }
        }

        if modulo_list.len() != hash_list.len() {
            return Err(UltError::Decode(String::from(
                "state hash modulo / accumulator count mismatch",
            )));
        }

        Ok(StateHash::with_parts(modulo_list, hash_list))
    }
}

//////////////////////
// Query
//////////////////////

impl WireMessage for UserVar {
    fn encode(&self, writer: &mut WireWriter) {
        writer.write_string(1, &self.name);
        writer.write_uint64(2, self.value_type as u64);
        writer.write_bool(3, self.is_null);
        writer.write_bool(4, self.is_unsigned);
        writer.write_uint64(5, self.charset as u64);
        writer.write_bytes(6, &self.value);
    }

    fn decode(reader: &mut WireReader) -> UltResult<Self> {
        let mut user_var = UserVar::default();

        while let Some((field, wire_type)) = reader.next_tag()? {
            match field {
                1 => user_var.name = reader.read_string()?,
                2 => {
                    let code = reader.read_uint64()? as u8;
                    user_var.value_type = UserVarValueType::try_from(code)
                        .map_err(|_| UltError::Decode(format!("unknown user var type: {}", code)))?;
                }
                3 => user_var.is_null = reader.read_bool()?,
                4 => user_var.is_unsigned = reader.read_bool()?,
                5 => user_var.charset = reader.read_uint64()? as u32,
                6 => user_var.value = reader.read_bytes()?.to_vec(),
                _ => reader.skip_field(wire_type)?,
            }
        }

        Ok(user_var)
    }
}

impl WireMessage for StatementContext {
    fn encode(&self, writer: &mut WireWriter) {
        writer.write_bool(1, self.has_last_insert_id);
        writer.write_uint64(2, self.last_insert_id);
        writer.write_bool(3, self.has_insert_id);
        writer.write_uint64(4, self.insert_id);
        writer.write_bool(5, self.has_rand_seed);
        writer.write_uint64(6, self.rand_seed1);
        writer.write_uint64(7, self.rand_seed2);
        for user_var in &self.user_vars {
            writer.write_message(8, &user_var.to_encoded());
        }
    }

    fn decode(reader: &mut WireReader) -> UltResult<Self> {
        let mut context = StatementContext::default();

        while let Some((field, wire_type)) = reader.next_tag()? {
            match field {
                1 => context.has_last_insert_id = reader.read_bool()?,
                2 => context.last_insert_id = reader.read_uint64()?,
                3 => context.has_insert_id = reader.read_bool()?,
                4 => context.insert_id = reader.read_uint64()?,
                5 => context.has_rand_seed = reader.read_bool()?,
                6 => context.rand_seed1 = reader.read_uint64()?,
                7 => context.rand_seed2 = reader.read_uint64()?,
                8 => context.user_vars.push(UserVar::from_encoded(reader.read_bytes()?)?),
                _ => reader.skip_field(wire_type)?,
            }
        }

        Ok(context)
    }
}

fn encode_hash_entry(table: &str, hash: &StateHash) -> Vec<u8> {
    let mut writer = WireWriter::new();
    writer.write_string(1, table);
    writer.write_message(2, &hash.to_encoded());
    writer.into_bytes()
}

fn decode_hash_entry(buffer: &[u8]) -> UltResult<(String, StateHash)> {
    let mut reader = WireReader::new(buffer);
    let mut table = String::new();
    let mut hash = StateHash::new();

    while let Some((field, wire_type)) = reader.next_tag()? {
        match field {
            1 => table = reader.read_string()?,
            2 => hash = StateHash::from_encoded(reader.read_bytes()?)?,
            _ => reader.skip_field(wire_type)?,
        }
    }

    Ok((table, hash))
}

impl WireMessage for Query {
    fn encode(&self, writer: &mut WireWriter) {
        writer.write_uint64(1, self.query_type as u64);
        writer.write_uint64(2, self.timestamp);
        writer.write_string(3, &self.database);
        writer.write_string(4, &self.statement);
        writer.write_uint64(5, self.flags.bits() as u64);
        writer.write_uint64(6, self.affected_rows as u64);

        for (table, hash) in &self.before_hash {
            writer.write_message(7, &encode_hash_entry(table, hash));
        }
        for (table, hash) in &self.after_hash {
            writer.write_message(8, &encode_hash_entry(table, hash));
        }

        for item in &self.read_set {
            writer.write_message(9, &item.to_encoded());
        }
        for item in &self.write_set {
            writer.write_message(10, &item.to_encoded());
        }
        for item in &self.var_map {
            writer.write_message(11, &item.to_encoded());
        }

        for column in &self.read_columns {
            writer.write_string(12, column);
        }
        for column in &self.write_columns {
            writer.write_string(13, column);
        }

        writer.write_message(14, &self.statement_context.to_encoded());
    }

    fn decode(reader: &mut WireReader) -> UltResult<Self> {
        let mut query = Query::new();
        let mut before_hash = HashMap::new();
        let mut after_hash = HashMap::new();

        while let Some((field, wire_type)) = reader.next_tag()? {
            match field {
                1 => {
                    let code = reader.read_uint64()? as u32;
                    query.query_type = QueryType::try_from(code)
                        .map_err(|_| UltError::Decode(format!("unknown query type: {}", code)))?;
                }
                2 => query.timestamp = reader.read_uint64()?,
                3 => query.database = reader.read_string()?,
                4 => query.statement = reader.read_string()?,
                5 => {
                    query.flags = QueryFlags::from_bits_truncate(reader.read_uint64()? as u8);
                }
                6 => query.affected_rows = reader.read_uint64()? as u32,
                7 => {
                    let (table, hash) = decode_hash_entry(reader.read_bytes()?)?;
                    before_hash.insert(table, hash);
                }
                8 => {
                    let (table, hash) = decode_hash_entry(reader.read_bytes()?)?;
                    after_hash.insert(table, hash);
                }
                9 => query.read_set.push(StateItem::from_encoded(reader.read_bytes()?)?),
                10 => query.write_set.push(StateItem::from_encoded(reader.read_bytes()?)?),
                11 => query.var_map.push(StateItem::from_encoded(reader.read_bytes()?)?),
                12 => {
                    query.read_columns.insert(reader.read_string()?);
                }
                13 => {
                    query.write_columns.insert(reader.read_string()?);
                }
                14 => query.statement_context = StatementContext::from_encoded(reader.read_bytes()?)?,
                _ => reader.skip_field(wire_type)?,
            }
        }

        query.before_hash = before_hash;
        query.after_hash = after_hash;

        Ok(query)
    }
}

//////////////////////
// Transaction
//////////////////////

impl WireMessage for Transaction {
    fn encode(&self, writer: &mut WireWriter) {
        for query in self.queries() {
            writer.write_message(1, &query.to_encoded());
        }
        writer.write_uint64(2, self.gid);
        writer.write_uint64(3, self.xid);
        writer.write_uint64(4, self.timestamp);
        writer.write_uint64(5, self.flags.bits() as u64);
    }

    fn decode(reader: &mut WireReader) -> UltResult<Self> {
        let mut transaction = Transaction::new();

        while let Some((field, wire_type)) = reader.next_tag()? {
            match field {
                1 => transaction.push(Query::from_encoded(reader.read_bytes()?)?),
                2 => transaction.gid = reader.read_uint64()?,
                3 => transaction.xid = reader.read_uint64()?,
                4 => transaction.timestamp = reader.read_uint64()?,
                5 => transaction.flags = TransactionFlags::from_bits_truncate(reader.read_uint64()? as u8),
                _ => reader.skip_field(wire_type)?,
            }
        }

        Ok(transaction)
    }
}

//////////////////////
// RowCluster
//////////////////////

fn encode_range_entry(range: &StateRange, gids: &[u64]) -> Vec<u8> {
    let mut writer = WireWriter::new();
    writer.write_message(1, &range.to_encoded());
    for gid in gids {
        writer.write_uint64(2, *gid);
    }
    writer.into_bytes()
}

fn decode_range_entry(buffer: &[u8]) -> UltResult<(StateRange, GidList)> {
    let mut reader = WireReader::new(buffer);
    let mut range = StateRange::new();
    let mut gids = vec![];

    while let Some((field, wire_type)) = reader.next_tag()? {
        match field {
            1 => range = StateRange::from_encoded(reader.read_bytes()?)?,
            2 => gids.push(reader.read_uint64()?),
            _ => reader.skip_field(wire_type)?,
        }
    }

    Ok((range, gids))
}

impl WireMessage for RowCluster {
    fn encode(&self, writer: &mut WireWriter) {
        for (column, entries) in &self.cluster_map {
            let mut column_writer = WireWriter::new();
            column_writer.write_string(1, column);
            for (range, gids) in entries {
                column_writer.write_message(2, &encode_range_entry(range, gids));
            }
            writer.write_message(1, &column_writer.into_bytes());
        }

        for (column, container) in &self.aliases {
            for (key, row_alias) in container {
                let mut alias_writer = WireWriter::new();
                alias_writer.write_string(1, column);
                alias_writer.write_message(2, &key.to_encoded());
                alias_writer.write_message(3, &row_alias.alias.to_encoded());
                alias_writer.write_message(4, &row_alias.real.to_encoded());
                writer.write_message(2, &alias_writer.into_bytes());
            }
        }

        for (column, wildcard) in &self.wildcard_map {
            let mut wildcard_writer = WireWriter::new();
            wildcard_writer.write_string(1, column);
            wildcard_writer.write_bool(2, *wildcard);
            writer.write_message(3, &wildcard_writer.into_bytes());
        }

        for (key_id, entries) in &self.composite_cluster_map {
            let mut composite_writer = WireWriter::new();
            composite_writer.write_string(1, key_id);
            for (ranges, gids) in entries {
                let mut entry_writer = WireWriter::new();
                for range in &ranges.ranges {
                    entry_writer.write_message(1, &range.to_encoded());
                }
                for gid in gids {
                    entry_writer.write_uint64(2, *gid);
                }
                composite_writer.write_message(2, &entry_writer.into_bytes());
            }
            writer.write_message(4, &composite_writer.into_bytes());
        }
    }

    fn decode(reader: &mut WireReader) -> UltResult<Self> {
        let mut cluster = RowCluster::new();

        while let Some((field, wire_type)) = reader.next_tag()? {
            match field {
                1 => {
                    let buffer = reader.read_bytes()?;
                    let mut column_reader = WireReader::new(buffer);

                    let mut column = String::new();
                    let mut entries = vec![];
                    while let Some((field, wire_type)) = column_reader.next_tag()? {
                        match field {
                            1 => column = column_reader.read_string()?,
                            2 => entries.push(decode_range_entry(column_reader.read_bytes()?)?),
                            _ => column_reader.skip_field(wire_type)?,
                        }
                    }
                    cluster.cluster_map.insert(column, entries);
                }
                2 => {
                    let buffer = reader.read_bytes()?;
                    let mut alias_reader = WireReader::new(buffer);

                    let mut column = String::new();
                    let mut key = StateData::Null;
                    let mut alias = StateItem::default();
                    let mut real = StateItem::default();
                    while let Some((field, wire_type)) = alias_reader.next_tag()? {
                        match field {
                            1 => column = alias_reader.read_string()?,
                            2 => key = StateData::from_encoded(alias_reader.read_bytes()?)?,
                            3 => alias = StateItem::from_encoded(alias_reader.read_bytes()?)?,
                            4 => real = StateItem::from_encoded(alias_reader.read_bytes()?)?,
                            _ => alias_reader.skip_field(wire_type)?,
                        }
                    }
                    cluster
                        .aliases
                        .entry(column)
                        .or_default()
                        .insert(key, RowAlias { alias, real });
                }
                3 => {
                    let buffer = reader.read_bytes()?;
                    let mut wildcard_reader = WireReader::new(buffer);

                    let mut column = String::new();
                    let mut wildcard = false;
                    while let Some((field, wire_type)) = wildcard_reader.next_tag()? {
                        match field {
                            1 => column = wildcard_reader.read_string()?,
                            2 => wildcard = wildcard_reader.read_bool()?,
                            _ => wildcard_reader.skip_field(wire_type)?,
                        }
                    }
                    cluster.wildcard_map.insert(column, wildcard);
                }
                4 => {
                    let buffer = reader.read_bytes()?;
                    let mut composite_reader = WireReader::new(buffer);

                    let mut key_id = String::new();
                    let mut entries = vec![];
                    while let Some((field, wire_type)) = composite_reader.next_tag()? {
                        match field {
                            1 => key_id = composite_reader.read_string()?,
                            2 => {
                                let entry_buffer = composite_reader.read_bytes()?;
                                let mut entry_reader = WireReader::new(entry_buffer);

                                let mut ranges = CompositeRange::default();
                                let mut gids: GidList = vec![];
                                while let Some((field, wire_type)) = entry_reader.next_tag()? {
                                    match field {
                                        1 => ranges
                                            .ranges
                                            .push(StateRange::from_encoded(entry_reader.read_bytes()?)?),
                                        2 => gids.push(entry_reader.read_uint64()?),
                                        _ => entry_reader.skip_field(wire_type)?,
                                    }
                                }
                                entries.push((ranges, gids));
                            }
                            _ => composite_reader.skip_field(wire_type)?,
                        }
                    }
                    cluster.composite_cluster_map.insert(key_id, entries);
                }
                _ => reader.skip_field(wire_type)?,
            }
        }

        Ok(cluster)
    }
}

//////////////////////
// dependency graphs
//////////////////////

impl WireMessage for ColumnDependencyGraph {
    fn encode(&self, writer: &mut WireWriter) {
        for (index, node) in self.nodes.iter().enumerate() {
            let mut entry_writer = WireWriter::new();
            entry_writer.write_uint64(1, index as u64);
            for column in &node.column_set {
                entry_writer.write_string(2, column);
            }
            entry_writer.write_uint64(3, node.access_type as u64);
            entry_writer.write_uint64(4, node.hash);
            for adjacent in &self.adjacency[index] {
                entry_writer.write_uint64(5, *adjacent as u64);
            }
            writer.write_message(1, &entry_writer.into_bytes());
        }
    }

    fn decode(reader: &mut WireReader) -> UltResult<Self> {
        struct Entry {
            node_index: usize,
            node: ColumnDependencyNode,
            adjacent: Vec<usize>,
        }

        let mut entries: Vec<Entry> = vec![];

        while let Some((field, wire_type)) = reader.next_tag()? {
            match field {
                1 => {
                    let buffer = reader.read_bytes()?;
                    let mut entry_reader = WireReader::new(buffer);

                    let mut node_index = 0usize;
                    let mut column_set = crate::query::ColumnSet::new();
                    let mut access_type = ColumnAccessType::Read;
                    let mut hash = 0u64;
                    let mut adjacent = vec![];

                    while let Some((field, wire_type)) = entry_reader.next_tag()? {
                        match field {
                            1 => node_index = entry_reader.read_uint64()? as usize,
                            2 => {
                                column_set.insert(entry_reader.read_string()?);
                            }
                            3 => {
                                access_type = if entry_reader.read_uint64()? == 1 {
                                    ColumnAccessType::Write
                                } else {
                                    ColumnAccessType::Read
                                };
                            }
                            4 => hash = entry_reader.read_uint64()?,
                            5 => adjacent.push(entry_reader.read_uint64()? as usize),
                            _ => entry_reader.skip_field(wire_type)?,
                        }
                    }

                    // 序列化前的 hash 缺省时重算
                    if hash == 0 {
                        hash = hash_column_set(&column_set);
                    }

                    entries.push(Entry {
                        node_index,
                        node: ColumnDependencyNode {
                            column_set,
                            access_type,
                            hash,
                        },
                        adjacent,
                    });
                }
                _ => reader.skip_field(wire_type)?,
            }
        }

        entries.sort_by_key(|entry| entry.node_index);

        let mut graph = ColumnDependencyGraph::new();
        for (expected_index, entry) in entries.iter().enumerate() {
            if entry.node_index != expected_index {
                return Err(UltError::Decode(String::from(
                    "column dependency graph node indices are not dense",
                )));
            }

            graph.node_map.insert(entry.node.hash, expected_index);
            graph.nodes.push(entry.node.clone());
            graph.adjacency.push(entry.adjacent.clone());
        }

        Ok(graph)
    }
}

impl WireMessage for TableDependencyGraph {
    fn encode(&self, writer: &mut WireWriter) {
        for (index, table) in self.nodes.iter().enumerate() {
            let mut entry_writer = WireWriter::new();
            entry_writer.write_string(1, table);
            for target in &self.out_edges[index] {
                entry_writer.write_string(2, &self.nodes[*target]);
            }
            writer.write_message(1, &entry_writer.into_bytes());
        }
    }

    fn decode(reader: &mut WireReader) -> UltResult<Self> {
        let mut graph = TableDependencyGraph::new();
        let mut relations: Vec<(String, Vec<String>)> = vec![];

        while let Some((field, wire_type)) = reader.next_tag()? {
            match field {
                1 => {
                    let buffer = reader.read_bytes()?;
                    let mut entry_reader = WireReader::new(buffer);

                    let mut table = String::new();
                    let mut related = vec![];
                    while let Some((field, wire_type)) = entry_reader.next_tag()? {
                        match field {
                            1 => table = entry_reader.read_string()?,
                            2 => related.push(entry_reader.read_string()?),
                            _ => entry_reader.skip_field(wire_type)?,
                        }
                    }

                    graph.add_table(&table);
                    relations.push((table, related));
                }
                _ => reader.skip_field(wire_type)?,
            }
        }

        for (table, related) in relations {
            for target in related {
                graph.add_relationship(&table, &target);
            }
        }

        Ok(graph)
    }
}

//////////////////////
// ProcCall
//////////////////////

impl WireMessage for ProcCall {
    fn encode(&self, writer: &mut WireWriter) {
        writer.write_uint64(1, self.call_id);
        writer.write_string(2, &self.proc_name);
        for statement in &self.statements {
            writer.write_string(3, statement);
        }
        for parameter in &self.parameters {
            writer.write_message(4, &parameter.to_encoded());
        }
    }

    fn decode(reader: &mut WireReader) -> UltResult<Self> {
        let mut proc_call = ProcCall::default();

        while let Some((field, wire_type)) = reader.next_tag()? {
            match field {
                1 => proc_call.call_id = reader.read_uint64()?,
                2 => proc_call.proc_name = reader.read_string()?,
                3 => proc_call.statements.push(reader.read_string()?),
                4 => proc_call.parameters.push(StateData::from_encoded(reader.read_bytes()?)?),
                _ => reader.skip_field(wire_type)?,
            }
        }

        Ok(proc_call)
    }
}

#[cfg(test)]
mod test {
    use crate::cluster::RowCluster;
    use crate::codec::WireMessage;
    use crate::data::StateData;
    use crate::graph::{ColumnAccessType, ColumnDependencyGraph, TableDependencyGraph};
    use crate::hash::StateHash;
    use crate::item::{ConditionType, StateItem};
    use crate::query::{Query, QueryFlags, QueryType, StatementContext, UserVar, UserVarValueType};
    use crate::range::StateRange;
    use crate::transaction::{Transaction, TransactionFlags};

    fn sample_item() -> StateItem {
        let mut or_expr = StateItem::condition(
            ConditionType::Or,
            vec![
                StateItem::eq_item("users.id", StateData::Int(1)),
                StateItem::between_item("users.id", StateData::Int(10), StateData::Int(20)),
            ],
        );
        or_expr.sub_query_list.push(StateItem::in_item(
            "orders.id",
            vec![StateData::Int(-1), StateData::UInt(u64::MAX)],
        ));
        or_expr
    }

    fn sample_query() -> Query {
        let mut query = Query::new();
        query.query_type = QueryType::Update;
        query.timestamp = 1666000000;
        query.database = String::from("shop");
        query.statement = String::from("UPDATE users SET name = 'bob' WHERE id = 1");
        query.flags = QueryFlags::IS_CONTINUOUS;
        query.affected_rows = 3;
        query.read_set.push(sample_item());
        query.write_set.push(StateItem::eq_item("users.name", StateData::from("bob")));
        query.var_map.push(StateItem::eq_item("@1", StateData::Int(1)));
        query.read_columns.insert(String::from("users.id"));
        query.write_columns.insert(String::from("users.name"));

        let mut hash = StateHash::new();
        hash.init().unwrap();
        hash.insert_record(b"1|bob").unwrap();
        query.after_hash.insert(String::from("users"), hash.clone());
        hash.delete_record(b"1|bob").unwrap();
        query.before_hash.insert(String::from("users"), hash);

        query.statement_context = StatementContext {
            has_last_insert_id: true,
            last_insert_id: 41,
            has_insert_id: false,
            insert_id: 0,
            has_rand_seed: true,
            rand_seed1: 1,
            rand_seed2: 2,
            user_vars: vec![UserVar {
                name: String::from("uid"),
                value_type: UserVarValueType::Int,
                is_null: false,
                is_unsigned: true,
                charset: 33,
                value: 42u64.to_le_bytes().to_vec(),
            }],
        };

        query
    }

    #[test]
    fn test_state_data_roundtrip() {
        for data in [
            StateData::Null,
            StateData::Bool(true),
            StateData::Int(-42),
            StateData::UInt(u64::MAX),
            StateData::Double(1.25),
            StateData::from("alice"),
            StateData::Bytes(vec![0, 1, 2, 255]),
        ] {
            let decoded = StateData::from_encoded(&data.to_encoded()).unwrap();
            assert_eq!(decoded, data);
        }
    }

    #[test]
    fn test_state_range_roundtrip() {
        let mut range = StateRange::between(StateData::Int(1), StateData::Int(10));
        range.or_fast(&StateRange::less_than(StateData::Int(-5)));
        range.or_fast(&StateRange::from(100));
        range.arrange_self();

        let decoded = StateRange::from_encoded(&range.to_encoded()).unwrap();
        assert_eq!(decoded, range);
    }

    #[test]
    fn test_state_item_roundtrip() {
        let item = sample_item();
        let decoded = StateItem::from_encoded(&item.to_encoded()).unwrap();
        assert_eq!(decoded, item);
    }

    #[test]
    fn test_state_hash_roundtrip() {
        let mut hash = StateHash::new();
        hash.init().unwrap();
        hash.insert_record(b"user:1|name:alice").unwrap();

        let decoded = StateHash::from_encoded(&hash.to_encoded()).unwrap();
        assert_eq!(decoded, hash);
    }

    #[test]
    fn test_query_roundtrip() {
        let query = sample_query();
        let decoded = Query::from_encoded(&query.to_encoded()).unwrap();
        assert_eq!(decoded, query);
    }

    #[test]
    fn test_transaction_roundtrip() {
        let mut transaction = Transaction::new();
        transaction.gid = 42;
        transaction.xid = 77;
        transaction.timestamp = 1666000000;
        transaction.flags = TransactionFlags::IS_PROCEDURE_CALL;
        transaction.push(sample_query());
        transaction.push(Query::new());

        let decoded = Transaction::from_encoded(&transaction.to_encoded()).unwrap();
        assert_eq!(decoded, transaction);
    }

    #[test]
    fn test_row_cluster_roundtrip() {
        let mut cluster = RowCluster::new();
        cluster.add_key("users.id");
        cluster.add_key_range("users.id", StateRange::from(1), 1);
        cluster.add_key_range("users.id", StateRange::from(10), 2);
        cluster.merge_cluster("users.id");
        cluster.set_wildcard("posts.id", true);
        cluster.add_alias(
            StateItem::eq_item("users.uid_str", StateData::from("000042")),
            StateItem::eq_item("users.id", StateData::Int(42)),
        );
        cluster.add_composite_key_range(
            &["a.x".to_string(), "b.y".to_string()],
            crate::cluster::CompositeRange {
                ranges: vec![StateRange::from(1), StateRange::from(2)],
            },
            9,
        );

        let decoded = RowCluster::from_encoded(&cluster.to_encoded()).unwrap();
        assert_eq!(decoded, cluster);
    }

    #[test]
    fn test_column_graph_roundtrip() {
        let mut graph = ColumnDependencyGraph::new();
        graph.add(
            ["users.id".to_string()].into_iter().collect(),
            ColumnAccessType::Write,
            &[],
        );
        graph.add(
            ["users.id".to_string(), "orders.uid".to_string()].into_iter().collect(),
            ColumnAccessType::Write,
            &[],
        );
        graph.add(
            ["products.id".to_string()].into_iter().collect(),
            ColumnAccessType::Read,
            &[],
        );

        let decoded = ColumnDependencyGraph::from_encoded(&graph.to_encoded()).unwrap();
        assert_eq!(decoded, graph);
    }

    #[test]
    fn test_table_graph_roundtrip() {
        let mut graph = TableDependencyGraph::new();
        graph.add_relationship("orders", "users");
        graph.add_relationship("orders", "products");
        graph.add_relationship("users", "users");

        let decoded = TableDependencyGraph::from_encoded(&graph.to_encoded()).unwrap();
        assert_eq!(decoded, graph);
    }
}
