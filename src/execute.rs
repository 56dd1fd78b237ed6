//! The database boundary.
//!
//! A [`Connection`] runs one [`Command`] and hands back a [`RowReader`]
//! over its result set. [`CommandExecutor`] layers the three ways a
//! compiled query consumes rows on top of that: a lazy sequence, one
//! complex value built from every row, or a single scalar.
//!
//! Readers own their rows, so the connection stays free for the nested
//! commands a materializer issues while an outer sequence is still open.

use std::collections::VecDeque;

use tracing::debug;

use crate::compiler::emit::Command;
use crate::error::QueryError;
use crate::value::Value;

/// A forward-only cursor over one result set.
pub trait RowReader {
    /// The next physical row, or `None` once the set is exhausted.
    fn next_row(&mut self) -> Result<Option<Vec<Value>>, QueryError>;
}

/// Something that can run commands.
pub trait Connection {
    fn execute(&mut self, command: &Command) -> Result<Box<dyn RowReader>, QueryError>;
}

/// Turns one physical row into a result element. Receives the connection
/// for any nested commands it has to run.
pub type RowMaterializer<'c, T> =
    Box<dyn FnMut(&[Value], &mut dyn Connection) -> Result<T, QueryError> + 'c>;

// ── Executor ───────────────────────────────────────────────────────────

pub struct CommandExecutor<'c> {
    connection: &'c mut dyn Connection,
}

impl<'c> CommandExecutor<'c> {
    pub fn new(connection: &'c mut dyn Connection) -> Self {
        CommandExecutor { connection }
    }

    /// Run `command` and materialize its rows one advance at a time.
    pub fn execute_enumerable<T>(
        self,
        command: &Command,
        materialize: RowMaterializer<'c, T>,
    ) -> Result<Rows<'c, T>, QueryError> {
        debug!(sql = %command.text, parameters = command.parameters.len(), "executing enumerable");
        let reader = self.connection.execute(command)?;
        Ok(Rows {
            reader: Some(reader),
            connection: self.connection,
            materialize,
            empty_default: None,
            produced: false,
        })
    }

    /// Run `command` and build one value from all of its rows.
    pub fn execute_complex<T>(
        &mut self,
        command: &Command,
        materialize: impl FnOnce(Vec<Vec<Value>>, &mut dyn Connection) -> Result<T, QueryError>,
    ) -> Result<T, QueryError> {
        debug!(sql = %command.text, parameters = command.parameters.len(), "executing complex");
        let mut reader = self.connection.execute(command)?;
        let mut rows = Vec::new();
        while let Some(row) = reader.next_row()? {
            rows.push(row);
        }
        materialize(rows, &mut *self.connection)
    }

    /// Run `command` and return the first column of its first row, or
    /// null when there is no row.
    pub fn execute_scalar(&mut self, command: &Command) -> Result<Value, QueryError> {
        debug!(sql = %command.text, parameters = command.parameters.len(), "executing scalar");
        let mut reader = self.connection.execute(command)?;
        Ok(reader
            .next_row()?
            .and_then(|row| row.into_iter().next())
            .unwrap_or(Value::Null))
    }
}

/// A lazy, single-pass sequence of materialized rows.
///
/// The reader is released as soon as it reports the end of its rows or
/// yields an error.
pub struct Rows<'c, T> {
    reader: Option<Box<dyn RowReader>>,
    connection: &'c mut dyn Connection,
    materialize: RowMaterializer<'c, T>,
    empty_default: Option<T>,
    produced: bool,
}

impl<T> Rows<'_, T> {
    /// Yield `value` once if the result set turns out to be empty.
    pub fn with_empty_default(mut self, value: T) -> Self {
        self.empty_default = Some(value);
        self
    }
}

impl<T> Iterator for Rows<'_, T> {
    type Item = Result<T, QueryError>;

    fn next(&mut self) -> Option<Self::Item> {
        let reader = self.reader.as_mut()?;
        match reader.next_row() {
            Ok(Some(row)) => {
                self.produced = true;
                let item = (self.materialize)(&row, &mut *self.connection);
                if item.is_err() {
                    self.reader = None;
                }
                Some(item)
            }
            Ok(None) => {
                self.reader = None;
                if self.produced {
                    None
                } else {
                    self.empty_default.take().map(Ok)
                }
            }
            Err(err) => {
                self.reader = None;
                Some(Err(err))
            }
        }
    }
}

// ── In-memory connection ───────────────────────────────────────────────

/// A connection that answers commands from queued result sets, in order,
/// and records every command it receives.
#[derive(Debug, Default)]
pub struct MemoryConnection {
    results: VecDeque<Vec<Vec<Value>>>,
    pub executed: Vec<Command>,
}

impl MemoryConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the rows the next command returns.
    pub fn push_result(&mut self, rows: Vec<Vec<Value>>) -> &mut Self {
        self.results.push_back(rows);
        self
    }

    pub fn with_result(mut self, rows: Vec<Vec<Value>>) -> Self {
        self.results.push_back(rows);
        self
    }

    pub fn pending(&self) -> usize {
        self.results.len()
    }
}

impl Connection for MemoryConnection {
    fn execute(&mut self, command: &Command) -> Result<Box<dyn RowReader>, QueryError> {
        self.executed.push(command.clone());
        let rows = self.results.pop_front().ok_or_else(|| {
            QueryError::Database(format!("no result queued for: {}", command.text))
        })?;
        Ok(Box::new(MemoryReader {
            rows: rows.into_iter(),
        }))
    }
}

struct MemoryReader {
    rows: std::vec::IntoIter<Vec<Value>>,
}

impl RowReader for MemoryReader {
    fn next_row(&mut self) -> Result<Option<Vec<Value>>, QueryError> {
        Ok(self.rows.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(text: &str) -> Command {
        Command {
            text: text.into(),
            parameters: Vec::new(),
        }
    }

    fn first_column() -> RowMaterializer<'static, Value> {
        Box::new(|row: &[Value], _: &mut dyn Connection| Ok(row[0].clone()))
    }

    #[test]
    fn test_enumerable_is_lazy() {
        let mut conn = MemoryConnection::new()
            .with_result(vec![vec![Value::Int32(1)], vec![Value::Int32(2)]]);
        let mut rows = CommandExecutor::new(&mut conn)
            .execute_enumerable(&command("SELECT 1"), first_column())
            .unwrap();
        assert_eq!(rows.next().unwrap().unwrap(), Value::Int32(1));
        assert_eq!(rows.next().unwrap().unwrap(), Value::Int32(2));
        assert!(rows.next().is_none());
        assert!(rows.next().is_none());
    }

    #[test]
    fn test_enumerable_empty_default() {
        let mut conn = MemoryConnection::new().with_result(Vec::new());
        let rows: Vec<Value> = CommandExecutor::new(&mut conn)
            .execute_enumerable(&command("SELECT 1"), first_column())
            .unwrap()
            .with_empty_default(Value::Null)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(rows, vec![Value::Null]);
    }

    #[test]
    fn test_enumerable_stops_after_error() {
        let mut conn = MemoryConnection::new()
            .with_result(vec![vec![Value::Int32(1)], vec![Value::Int32(2)]]);
        let failing: RowMaterializer<'static, Value> = Box::new(|_: &[Value], _: &mut dyn Connection| {
            Err(QueryError::Materialization("bad row".into()))
        });
        let mut rows = CommandExecutor::new(&mut conn)
            .execute_enumerable(&command("SELECT 1"), failing)
            .unwrap();
        assert!(rows.next().unwrap().is_err());
        assert!(rows.next().is_none());
    }

    #[test]
    fn test_scalar_reads_first_column() {
        let mut conn = MemoryConnection::new()
            .with_result(vec![vec![Value::Int64(42), Value::Null]])
            .with_result(Vec::new());
        let mut executor = CommandExecutor::new(&mut conn);
        assert_eq!(executor.execute_scalar(&command("SELECT COUNT(*)")).unwrap(), Value::Int64(42));
        assert_eq!(executor.execute_scalar(&command("SELECT MAX(x)")).unwrap(), Value::Null);
    }

    #[test]
    fn test_complex_sees_every_row() {
        let mut conn = MemoryConnection::new()
            .with_result(vec![vec![Value::Int32(1)], vec![Value::Int32(2)]]);
        let n = CommandExecutor::new(&mut conn)
            .execute_complex(&command("SELECT 1"), |rows, _| Ok(rows.len()))
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(conn.executed.len(), 1);
    }

    #[test]
    fn test_missing_result_is_a_database_error() {
        let mut conn = MemoryConnection::new();
        let err = CommandExecutor::new(&mut conn)
            .execute_scalar(&command("SELECT 1"))
            .unwrap_err();
        assert!(matches!(err, QueryError::Database(_)));
    }
}
