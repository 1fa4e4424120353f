//! [`Backend`] implementation over a single `mysql_async` connection.

use crate::convert::{columns_meta, row_values, to_param};
use crate::endpoint::BackendEndpoint;
use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, DriverError, Params, Row, Statement};
use shadow_core::{
    Backend, BackendError, Failure, Outcome, PreparedShape, ResultSet, StatementId, Value,
};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// CR_UNKNOWN_ERROR, used for client-side driver failures.
const CLIENT_ERROR_CODE: u16 = 2000;
/// ER_UNKNOWN_STMT_HANDLER
const UNKNOWN_STATEMENT_CODE: u16 = 1243;

struct PreparedEntry {
    sql: String,
    /// Server handle; `None` after a reconnect until re-prepared.
    handle: Option<Statement>,
}

/// One connection to one MySQL-protocol server.
///
/// Prepared statements are tracked by session-local id so they can be
/// re-prepared transparently after a reconnect.
pub struct MySqlBackend {
    endpoint: BackendEndpoint,
    connect_timeout: Duration,
    conn: Option<Conn>,
    statements: HashMap<StatementId, PreparedEntry>,
}

impl MySqlBackend {
    pub fn new(endpoint: BackendEndpoint, connect_timeout: Duration) -> Self {
        Self {
            endpoint,
            connect_timeout,
            conn: None,
            statements: HashMap::new(),
        }
    }

    /// Map a driver error to either a statement failure or a connection error.
    ///
    /// Connection errors drop the live connection so the caller can reconnect.
    fn map_error(&mut self, err: mysql_async::Error) -> Result<Outcome, BackendError> {
        match err {
            mysql_async::Error::Server(e) => Ok(Outcome::Failure(
                Failure::statement(e.code, e.message).with_sql_state(e.state),
            )),
            mysql_async::Error::Io(e) => {
                self.drop_connection();
                Err(BackendError::ConnectionLost(e.to_string()))
            }
            mysql_async::Error::Driver(DriverError::ConnectionClosed) => {
                self.drop_connection();
                Err(BackendError::ConnectionLost(
                    "connection closed by server".to_string(),
                ))
            }
            other => Ok(Outcome::Failure(Failure::statement(
                CLIENT_ERROR_CODE,
                other.to_string(),
            ))),
        }
    }

    fn drop_connection(&mut self) {
        self.conn = None;
        for entry in self.statements.values_mut() {
            entry.handle = None;
        }
    }

    fn conn(&mut self) -> Result<&mut Conn, BackendError> {
        self.conn.as_mut().ok_or(BackendError::NotConnected)
    }

    /// Get the server handle for a statement, preparing it again if needed.
    async fn statement_handle(
        &mut self,
        id: StatementId,
    ) -> Result<Result<Statement, mysql_async::Error>, BackendError> {
        let sql = match self.statements.get(&id) {
            Some(PreparedEntry {
                handle: Some(stmt), ..
            }) => return Ok(Ok(stmt.clone())),
            Some(entry) => entry.sql.clone(),
            None => {
                return Ok(Err(mysql_async::Error::Server(mysql_async::ServerError {
                    code: UNKNOWN_STATEMENT_CODE,
                    message: format!("Unknown prepared statement handler ({id})"),
                    state: "HY000".to_string(),
                })))
            }
        };

        debug!("Re-preparing statement {} on {}", id, self.endpoint.address());
        let prepared = self.conn()?.prep(sql.as_str()).await;
        if let (Ok(stmt), Some(entry)) = (&prepared, self.statements.get_mut(&id)) {
            entry.handle = Some(stmt.clone());
        }
        Ok(prepared)
    }
}

async fn text_result(conn: &mut Conn, sql: &str) -> Result<ResultSet, mysql_async::Error> {
    let mut result = conn.query_iter(sql).await?;
    let columns = columns_meta(result.columns_ref());
    let rows: Vec<Row> = result.collect().await?;
    result.drop_result().await?;
    Ok(result_set(conn, columns, &rows))
}

async fn binary_result(
    conn: &mut Conn,
    stmt: &Statement,
    params: Params,
) -> Result<ResultSet, mysql_async::Error> {
    let mut result = conn.exec_iter(stmt, params).await?;
    let columns = columns_meta(result.columns_ref());
    let rows: Vec<Row> = result.collect().await?;
    result.drop_result().await?;
    Ok(result_set(conn, columns, &rows))
}

fn result_set(conn: &Conn, columns: Vec<shadow_core::ColumnMeta>, rows: &[Row]) -> ResultSet {
    ResultSet::new(columns, rows.iter().map(row_values).collect())
        .with_affected_rows(conn.affected_rows())
        .with_warnings(conn.get_warnings())
        .with_last_insert_id(conn.last_insert_id())
}

fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

#[async_trait]
impl Backend for MySqlBackend {
    fn endpoint(&self) -> String {
        self.endpoint.address()
    }

    async fn connect(&mut self) -> Result<(), BackendError> {
        let address = self.endpoint.address();
        let opts = self
            .endpoint
            .opts()
            .map_err(|e| BackendError::Unreachable {
                endpoint: address.clone(),
                reason: e.to_string(),
            })?;

        let conn = match tokio::time::timeout(self.connect_timeout, Conn::new(opts)).await {
            Err(_) => {
                return Err(BackendError::Unreachable {
                    endpoint: address,
                    reason: format!("timed out after {:?}", self.connect_timeout),
                })
            }
            Ok(Err(mysql_async::Error::Server(e))) => {
                return Err(BackendError::Rejected {
                    endpoint: address,
                    code: e.code,
                    message: e.message,
                })
            }
            Ok(Err(e)) => {
                return Err(BackendError::Unreachable {
                    endpoint: address,
                    reason: e.to_string(),
                })
            }
            Ok(Ok(conn)) => conn,
        };

        self.drop_connection();
        self.conn = Some(conn);
        debug!("Connected to {}", address);
        Ok(())
    }

    async fn query(&mut self, sql: &str) -> Result<Outcome, BackendError> {
        let result = text_result(self.conn()?, sql).await;
        match result {
            Ok(rs) => Ok(Outcome::Rows(rs)),
            Err(e) => self.map_error(e),
        }
    }

    async fn use_database(&mut self, database: &str) -> Result<Outcome, BackendError> {
        let sql = format!("USE {}", quote_identifier(database));
        let result = self.conn()?.query_drop(sql).await;
        match result {
            Ok(()) => Ok(Outcome::Rows(ResultSet::ok(0))),
            Err(e) => self.map_error(e),
        }
    }

    async fn prepare(&mut self, id: StatementId, sql: &str) -> Result<Outcome, BackendError> {
        let result = self.conn()?.prep(sql).await;
        match result {
            Ok(stmt) => {
                let shape = PreparedShape {
                    param_count: stmt.num_params(),
                    params: columns_meta(stmt.params()),
                    columns: columns_meta(stmt.columns()),
                };
                self.statements.insert(
                    id,
                    PreparedEntry {
                        sql: sql.to_string(),
                        handle: Some(stmt),
                    },
                );
                Ok(Outcome::Prepared(shape))
            }
            Err(e) => self.map_error(e),
        }
    }

    async fn execute(
        &mut self,
        id: StatementId,
        params: &[Value],
    ) -> Result<Outcome, BackendError> {
        let stmt = match self.statement_handle(id).await? {
            Ok(stmt) => stmt,
            Err(e) => return self.map_error(e),
        };
        let params = if params.is_empty() {
            Params::Empty
        } else {
            Params::Positional(params.iter().map(to_param).collect())
        };
        let result = binary_result(self.conn()?, &stmt, params).await;
        match result {
            Ok(rs) => Ok(Outcome::Rows(rs)),
            Err(e) => self.map_error(e),
        }
    }

    async fn close_statement(&mut self, id: StatementId) -> Result<(), BackendError> {
        let Some(PreparedEntry {
            handle: Some(stmt), ..
        }) = self.statements.remove(&id)
        else {
            return Ok(());
        };
        let result = self.conn()?.close(stmt).await;
        match result {
            Ok(()) => Ok(()),
            Err(e) => self.map_error(e).map(|_| ()),
        }
    }

    async fn reset(&mut self) {
        // A cancelled exchange leaves the wire mid-packet; never reuse it.
        self.drop_connection();
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        self.statements.clear();
        if let Some(conn) = self.conn.take() {
            conn.disconnect()
                .await
                .map_err(|e| BackendError::ConnectionLost(e.to_string()))?;
        }
        Ok(())
    }
}
