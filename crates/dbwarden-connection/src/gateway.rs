//! Query gateway
//!
//! Runs one statement against the live handle: fail fast when disconnected,
//! time the round trip, normalize the driver's rows and log a summary line.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use dbwarden_core::{QueryResult, Result, Value, WardenError};

use crate::pending::QueryToken;
use crate::supervisor::Shared;

const SOURCE: &str = "dbwarden::query";

/// Labeling context for a query: which org/system/period it ran for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryContext {
    pub org: String,
    pub sys: String,
    pub period: String,
}

impl QueryContext {
    pub fn new(org: impl Into<String>, sys: impl Into<String>, period: impl Into<String>) -> Self {
        Self {
            org: org.into(),
            sys: sys.into(),
            period: period.into(),
        }
    }
}

impl fmt::Display for QueryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.org, self.sys, self.period)
    }
}

/// A named statement with positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    /// Used for labeling and debug flagging only, never executed
    pub name: String,
    pub sql: String,
    pub params: Vec<Value>,
    pub context: Option<QueryContext>,
}

impl QueryRequest {
    pub fn new(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
            params: Vec::new(),
            context: None,
        }
    }

    /// Append one positional parameter
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn with_params(mut self, params: impl IntoIterator<Item = Value>) -> Self {
        self.params.extend(params);
        self
    }

    pub fn with_context(mut self, context: QueryContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Verbose logging is on for any query whose name mentions "debug"
    pub fn is_debug(&self) -> bool {
        self.name.contains("debug")
    }

    /// `org/sys/period/name` when a context is attached, otherwise the bare name
    pub fn label(&self) -> String {
        match &self.context {
            Some(context) => format!("{}/{}", context, self.name),
            None => self.name.clone(),
        }
    }
}

/// Removes the query's abort channel however the query future ends,
/// including when the caller drops it mid-flight
struct PendingGuard<'a> {
    shared: &'a Shared,
    token: QueryToken,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.settle(self.token);
    }
}

pub(crate) async fn execute(shared: &Shared, request: QueryRequest) -> Result<QueryResult> {
    let admission = shared.admit()?;
    let _pending = PendingGuard {
        shared,
        token: admission.token,
    };

    let debug = request.is_debug();
    let label = request.label();
    shared
        .sink
        .log_debug(SOURCE, &format!("{}: {}", label, request.sql), debug);

    if request.sql.trim().is_empty() {
        let error = WardenError::Dispatch(format!("query {} has no statement", request.name));
        shared.sink.log_error(SOURCE, &error.to_string());
        return Err(error);
    }

    let started = Instant::now();
    let outcome = tokio::select! {
        biased;
        aborted = admission.aborted => Err(aborted.unwrap_or_else(|_| {
            WardenError::RuntimeHandle("connection released while query was in flight".into())
        })),
        rows = admission.handle.query(&request.sql, &request.params) => rows,
    };

    let result = match outcome {
        Ok(rows) => QueryResult::from_driver(rows)?,
        Err(error) => {
            if matches!(error, WardenError::Dispatch(_)) {
                shared.sink.log_error(SOURCE, &error.to_string());
            }
            return Err(error);
        }
    };

    let elapsed = started.elapsed().as_millis();
    shared.sink.log(
        SOURCE,
        &format!("{}: {} rows, rtt {}ms", label, result.row_count(), elapsed),
    );
    if debug {
        shared
            .sink
            .log_debug(SOURCE, &format!("{}: {}", label, result.to_pretty_json()?), true);
    }

    Ok(result)
}

#[cfg(test)]
mod tests;
