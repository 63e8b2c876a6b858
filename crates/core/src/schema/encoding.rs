//! Binary encoding of table schemas.
//!
//! The schema blob is stored in slot 0 of every record file so a table can be
//! reopened without consulting the catalog.

use super::check::{CheckExpr, CompareOp};
use super::column::Column;
use super::constraint::{CheckConstraint, ConstraintTiming, Constraints, ForeignKey, UniqueKey};
use super::table::TableSchema;
use crate::codec::{decode_value, encode_value, ByteReader, ByteWriter};
use crate::error::{Error, Result};
use crate::types::DataType;

const SCHEMA_VERSION: u8 = 1;

const EXPR_COMPARE: u8 = 1;
const EXPR_NOT_NULL: u8 = 2;
const EXPR_AND: u8 = 3;
const EXPR_OR: u8 = 4;
const EXPR_NOT: u8 = 5;

/// Nesting limit when decoding check expressions.
const MAX_EXPR_DEPTH: usize = 64;

/// Serializes a schema.
pub fn encode_schema(schema: &TableSchema) -> Vec<u8> {
    let mut w = ByteWriter::with_capacity(128);
    w.put_u8(SCHEMA_VERSION);
    w.put_str(schema.name());

    w.put_u32(schema.columns().len() as u32);
    for col in schema.columns() {
        w.put_str(col.name());
        w.put_u8(col.data_type().tag());
        w.put_u8(col.is_nullable() as u8);
        match col.declared_default() {
            Some(v) => {
                w.put_u8(1);
                encode_value(v, &mut w);
            }
            None => w.put_u8(0),
        }
    }

    let c = schema.constraints();
    match c.primary_key() {
        Some(pk) => {
            w.put_u8(1);
            put_key(&mut w, pk);
        }
        None => w.put_u8(0),
    }
    w.put_u32(c.unique_keys().len() as u32);
    for key in c.unique_keys() {
        put_key(&mut w, key);
    }
    w.put_u32(c.foreign_keys().len() as u32);
    for fk in c.foreign_keys() {
        w.put_str(&fk.name);
        w.put_str(&fk.child_column);
        w.put_str(&fk.parent_table);
        w.put_str(&fk.parent_column);
        w.put_u8(fk.timing.tag());
    }
    w.put_u32(c.checks().len() as u32);
    for check in c.checks() {
        w.put_str(&check.name);
        w.put_u8(check.timing.tag());
        put_expr(&mut w, &check.expr);
    }
    w.into_inner()
}

/// Deserializes a schema written by [`encode_schema`].
pub fn decode_schema(data: &[u8]) -> Result<TableSchema> {
    let mut r = ByteReader::new(data);
    let version = r.get_u8()?;
    if version != SCHEMA_VERSION {
        return Err(Error::format(format!(
            "unsupported schema version {}",
            version
        )));
    }
    let name = r.get_str()?;

    let column_count = r.get_u32()? as usize;
    let mut columns = Vec::with_capacity(column_count.min(1024));
    for _ in 0..column_count {
        let col_name = r.get_str()?;
        let dt = get_type(&mut r)?;
        let nullable = r.get_u8()? != 0;
        let mut col = Column::new(col_name, dt).nullable(nullable);
        if r.get_u8()? != 0 {
            col = col.default_value(decode_value(&mut r)?);
        }
        columns.push(col);
    }

    let mut constraints = Constraints::new();
    if r.get_u8()? != 0 {
        constraints.set_primary_key(get_key(&mut r)?);
    }
    for _ in 0..r.get_u32()? {
        constraints.push_unique(get_key(&mut r)?);
    }
    for _ in 0..r.get_u32()? {
        constraints.push_foreign_key(ForeignKey {
            name: r.get_str()?,
            child_column: r.get_str()?,
            parent_table: r.get_str()?,
            parent_column: r.get_str()?,
            timing: get_timing(&mut r)?,
        });
    }
    for _ in 0..r.get_u32()? {
        let name = r.get_str()?;
        let timing = get_timing(&mut r)?;
        let expr = get_expr(&mut r, 0)?;
        constraints.push_check(CheckConstraint { name, expr, timing });
    }

    if r.remaining() != 0 {
        return Err(Error::format(format!(
            "{} trailing bytes after schema",
            r.remaining()
        )));
    }
    Ok(TableSchema::from_parts(name, columns, constraints))
}

fn put_key(w: &mut ByteWriter, key: &UniqueKey) {
    w.put_str(&key.name);
    w.put_u8(key.timing.tag());
    w.put_u32(key.columns.len() as u32);
    for col in &key.columns {
        w.put_str(col);
    }
}

fn get_key(r: &mut ByteReader<'_>) -> Result<UniqueKey> {
    let name = r.get_str()?;
    let timing = get_timing(r)?;
    let count = r.get_u32()? as usize;
    let mut columns = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        columns.push(r.get_str()?);
    }
    Ok(UniqueKey::new(name, columns, timing))
}

fn get_type(r: &mut ByteReader<'_>) -> Result<DataType> {
    let tag = r.get_u8()?;
    DataType::from_tag(tag).ok_or_else(|| Error::format(format!("unknown column type tag {}", tag)))
}

fn get_timing(r: &mut ByteReader<'_>) -> Result<ConstraintTiming> {
    let tag = r.get_u8()?;
    ConstraintTiming::from_tag(tag)
        .ok_or_else(|| Error::format(format!("unknown constraint timing {}", tag)))
}

fn put_expr(w: &mut ByteWriter, expr: &CheckExpr) {
    match expr {
        CheckExpr::Compare { column, op, value } => {
            w.put_u8(EXPR_COMPARE);
            w.put_u32(*column as u32);
            w.put_u8(op.tag());
            encode_value(value, w);
        }
        CheckExpr::IsNotNull(column) => {
            w.put_u8(EXPR_NOT_NULL);
            w.put_u32(*column as u32);
        }
        CheckExpr::And(a, b) => {
            w.put_u8(EXPR_AND);
            put_expr(w, a);
            put_expr(w, b);
        }
        CheckExpr::Or(a, b) => {
            w.put_u8(EXPR_OR);
            put_expr(w, a);
            put_expr(w, b);
        }
        CheckExpr::Not(a) => {
            w.put_u8(EXPR_NOT);
            put_expr(w, a);
        }
    }
}

fn get_expr(r: &mut ByteReader<'_>, depth: usize) -> Result<CheckExpr> {
    if depth > MAX_EXPR_DEPTH {
        return Err(Error::format("check expression nested too deeply"));
    }
    let tag = r.get_u8()?;
    Ok(match tag {
        EXPR_COMPARE => {
            let column = r.get_u32()? as usize;
            let op_tag = r.get_u8()?;
            let op = CompareOp::from_tag(op_tag)
                .ok_or_else(|| Error::format(format!("unknown compare op {}", op_tag)))?;
            CheckExpr::Compare {
                column,
                op,
                value: decode_value(r)?,
            }
        }
        EXPR_NOT_NULL => CheckExpr::IsNotNull(r.get_u32()? as usize),
        EXPR_AND => get_expr(r, depth + 1)?.and(get_expr(r, depth + 1)?),
        EXPR_OR => get_expr(r, depth + 1)?.or(get_expr(r, depth + 1)?),
        EXPR_NOT => get_expr(r, depth + 1)?.not(),
        other => return Err(Error::format(format!("unknown check expression tag {}", other))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TableBuilder;
    use crate::value::Value;

    #[test]
    fn test_schema_roundtrip() {
        let schema = TableBuilder::new("orders")
            .unwrap()
            .add_column("id", DataType::Int64)
            .unwrap()
            .add_column_def(
                Column::new("status", DataType::String).default_value(Value::String("new".into())),
            )
            .unwrap()
            .add_column("user_id", DataType::Int64)
            .unwrap()
            .add_column("amount", DataType::Float64)
            .unwrap()
            .add_nullable(&["user_id"])
            .add_primary_key(&["id"])
            .unwrap()
            .add_unique_with("uq_user_status", &["user_id", "status"], ConstraintTiming::Deferred)
            .unwrap()
            .add_foreign_key_with("fk_user", "user_id", "users", "id", ConstraintTiming::Deferred)
            .unwrap()
            .add_check(
                "ck_amount",
                CheckExpr::compare(3, CompareOp::GtEq, 0.0f64)
                    .or(CheckExpr::IsNotNull(2).not()),
            )
            .unwrap()
            .build()
            .unwrap();

        let decoded = decode_schema(&encode_schema(&schema)).unwrap();
        assert_eq!(decoded, schema);
        assert_eq!(
            decoded.get_column("status").unwrap().declared_default(),
            Some(&Value::String("new".into()))
        );
        assert_eq!(decoded.get_column("amount").unwrap().position(), 3);
        assert_eq!(decoded.constraints().foreign_keys()[0].timing, ConstraintTiming::Deferred);
    }

    #[test]
    fn test_corrupt_schema() {
        let schema = TableBuilder::new("t")
            .unwrap()
            .add_column("a", DataType::Int32)
            .unwrap()
            .build()
            .unwrap();
        let mut data = encode_schema(&schema);
        data[0] = 9;
        assert!(matches!(decode_schema(&data), Err(Error::Format { .. })));

        let data = encode_schema(&schema);
        assert!(decode_schema(&data[..data.len() - 1]).is_err());
    }
}
