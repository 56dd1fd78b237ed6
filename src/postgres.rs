//! [`Connection`] over a synchronous PostgreSQL client.
//!
//! Commands must be compiled for [`crate::config::Dialect::Postgres`]:
//! placeholders are `$n` and every one is cast to its column type, so the
//! server infers parameter types from the casts. Result sets are read in
//! full when the command runs.

use postgres::types::{ToSql, Type as PgType};
use postgres::{Client, Row};
use tracing::debug;

use crate::compiler::emit::{Command, DbParameter};
use crate::descriptor::DbType;
use crate::error::QueryError;
use crate::execute::{Connection, RowReader};
use crate::value::Value;

pub struct PostgresConnection {
    client: Client,
}

impl PostgresConnection {
    pub fn new(client: Client) -> Self {
        PostgresConnection { client }
    }

    /// Connect with a libpq-style connection string.
    pub fn connect(params: &str) -> Result<Self, QueryError> {
        let client = Client::connect(params, postgres::NoTls).map_err(database)?;
        Ok(PostgresConnection { client })
    }

    pub fn client(&mut self) -> &mut Client {
        &mut self.client
    }
}

impl Connection for PostgresConnection {
    fn execute(&mut self, command: &Command) -> Result<Box<dyn RowReader>, QueryError> {
        let params = command
            .parameters
            .iter()
            .map(to_sql)
            .collect::<Result<Vec<_>, _>>()?;
        let refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(|p| p.as_ref()).collect();
        let rows = self.client.query(command.text.as_str(), &refs).map_err(database)?;
        debug!(rows = rows.len(), "postgres command returned");
        Ok(Box::new(PostgresReader {
            rows: rows.into_iter(),
        }))
    }
}

struct PostgresReader {
    rows: std::vec::IntoIter<Row>,
}

impl RowReader for PostgresReader {
    fn next_row(&mut self) -> Result<Option<Vec<Value>>, QueryError> {
        let Some(row) = self.rows.next() else {
            return Ok(None);
        };
        (0..row.len())
            .map(|i| read_column(&row, i))
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }
}

fn database(err: postgres::Error) -> QueryError {
    QueryError::Database(err.to_string())
}

type BoxedParam = Box<dyn ToSql + Sync>;

fn to_sql(param: &DbParameter) -> Result<BoxedParam, QueryError> {
    let boxed: BoxedParam = match (&param.value, param.db_type) {
        (Value::Null, Some(DbType::Boolean)) => Box::new(None::<bool>),
        (Value::Null, Some(DbType::Int32)) => Box::new(None::<i32>),
        (Value::Null, Some(DbType::Int64)) => Box::new(None::<i64>),
        (Value::Null, Some(DbType::Double)) => Box::new(None::<f64>),
        (Value::Null, Some(DbType::DateTime)) => Box::new(None::<chrono::NaiveDateTime>),
        (Value::Null, Some(DbType::Binary)) => Box::new(None::<Vec<u8>>),
        (Value::Null, Some(DbType::Json)) => Box::new(None::<serde_json::Value>),
        (Value::Null, _) => Box::new(None::<String>),
        (Value::Bool(b), _) => Box::new(*b),
        (Value::Int32(i), _) => Box::new(*i),
        (Value::Int64(i), _) => Box::new(*i),
        (Value::Float64(f), _) => Box::new(*f),
        (Value::String(s), _) => Box::new(s.clone()),
        (Value::DateTime(d), _) => Box::new(*d),
        (Value::Bytes(b), _) => Box::new(b.clone()),
        (Value::Json(j), _) => Box::new(j.clone()),
        (other, _) => {
            return Err(QueryError::ParameterMismatch(format!(
                "{} cannot be bound: {other:?}",
                param.name
            )));
        }
    };
    Ok(boxed)
}

fn read_column(row: &Row, i: usize) -> Result<Value, QueryError> {
    let ty = row.columns()[i].type_();
    let value = if *ty == PgType::BOOL {
        row.try_get::<_, Option<bool>>(i).map(|v| v.map(Value::Bool))
    } else if *ty == PgType::INT2 {
        row.try_get::<_, Option<i16>>(i)
            .map(|v| v.map(|x| Value::Int32(i32::from(x))))
    } else if *ty == PgType::INT4 {
        row.try_get::<_, Option<i32>>(i).map(|v| v.map(Value::Int32))
    } else if *ty == PgType::INT8 {
        row.try_get::<_, Option<i64>>(i).map(|v| v.map(Value::Int64))
    } else if *ty == PgType::FLOAT4 {
        row.try_get::<_, Option<f32>>(i)
            .map(|v| v.map(|x| Value::Float64(f64::from(x))))
    } else if *ty == PgType::FLOAT8 {
        row.try_get::<_, Option<f64>>(i).map(|v| v.map(Value::Float64))
    } else if *ty == PgType::TIMESTAMP {
        row.try_get::<_, Option<chrono::NaiveDateTime>>(i)
            .map(|v| v.map(Value::DateTime))
    } else if *ty == PgType::BYTEA {
        row.try_get::<_, Option<Vec<u8>>>(i).map(|v| v.map(Value::Bytes))
    } else if *ty == PgType::JSON || *ty == PgType::JSONB {
        row.try_get::<_, Option<serde_json::Value>>(i)
            .map(|v| v.map(Value::Json))
    } else if [PgType::TEXT, PgType::VARCHAR, PgType::BPCHAR, PgType::NAME].contains(ty) {
        row.try_get::<_, Option<String>>(i).map(|v| v.map(Value::String))
    } else {
        return Err(QueryError::Materialization(format!(
            "column {i} has unsupported type {ty}"
        )));
    };
    Ok(value.map_err(database)?.unwrap_or(Value::Null))
}
