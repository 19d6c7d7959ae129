//! Error Classifier
//!
//! Sorts database failures into transient (retry) and permanent (surface)
//! classes, from SQLSTATE codes when available and message patterns otherwise.

use crate::error::BiError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Database error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlErrorClass {
    Deadlock,
    Timeout,
    Connection,
    ResourceExhausted,
    Syntax,
    UndefinedObject,
    PermissionDenied,
    Other,
}

impl SqlErrorClass {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SqlErrorClass::Deadlock
                | SqlErrorClass::Timeout
                | SqlErrorClass::Connection
                | SqlErrorClass::ResourceExhausted
        )
    }

    /// Classify a PostgreSQL SQLSTATE code.
    pub fn from_sqlstate(code: &str) -> Self {
        match code {
            "40P01" | "40001" => SqlErrorClass::Deadlock,
            "57014" => SqlErrorClass::Timeout,
            "53300" | "53200" | "53100" => SqlErrorClass::ResourceExhausted,
            "42601" => SqlErrorClass::Syntax,
            "42P01" | "42703" | "42883" => SqlErrorClass::UndefinedObject,
            "42501" => SqlErrorClass::PermissionDenied,
            c if c.starts_with("08") || c.starts_with("57P") => SqlErrorClass::Connection,
            _ => SqlErrorClass::Other,
        }
    }

    /// Classify from an error message.
    pub fn from_message(message: &str) -> Self {
        let msg = message.to_lowercase();

        if msg.contains("deadlock") || msg.contains("could not serialize") {
            return SqlErrorClass::Deadlock;
        }
        if msg.contains("timeout") || msg.contains("timed out") || msg.contains("canceling statement") {
            return SqlErrorClass::Timeout;
        }
        if msg.contains("connection")
            || msg.contains("network")
            || msg.contains("broken pipe")
            || msg.contains("unreachable")
        {
            return SqlErrorClass::Connection;
        }
        if msg.contains("too many clients") || msg.contains("out of memory") {
            return SqlErrorClass::ResourceExhausted;
        }
        if msg.contains("syntax error") {
            return SqlErrorClass::Syntax;
        }
        if msg.contains("does not exist") || msg.contains("not found") {
            return SqlErrorClass::UndefinedObject;
        }
        if msg.contains("permission denied") {
            return SqlErrorClass::PermissionDenied;
        }
        SqlErrorClass::Other
    }
}

impl fmt::Display for SqlErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SqlErrorClass::Deadlock => "Deadlock",
            SqlErrorClass::Timeout => "Timeout",
            SqlErrorClass::Connection => "Connection",
            SqlErrorClass::ResourceExhausted => "ResourceExhausted",
            SqlErrorClass::Syntax => "Syntax",
            SqlErrorClass::UndefinedObject => "UndefinedObject",
            SqlErrorClass::PermissionDenied => "PermissionDenied",
            SqlErrorClass::Other => "Other",
        };
        write!(f, "{}", name)
    }
}

/// Map a sqlx error onto the crate error, marking transient failures.
pub fn classify_sqlx_error(err: sqlx::Error) -> BiError {
    let class = match &err {
        sqlx::Error::PoolTimedOut => SqlErrorClass::Timeout,
        sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
            SqlErrorClass::Connection
        }
        sqlx::Error::Database(db) => match db.code() {
            Some(code) => match SqlErrorClass::from_sqlstate(&code) {
                SqlErrorClass::Other => SqlErrorClass::from_message(db.message()),
                class => class,
            },
            None => SqlErrorClass::from_message(db.message()),
        },
        other => SqlErrorClass::from_message(&other.to_string()),
    };

    if class.is_transient() {
        BiError::TransientDatabase(format!("{}: {}", class, err))
    } else {
        BiError::Database(err.to_string())
    }
}

/// Whether an error is worth retrying.
pub fn is_transient(error: &BiError) -> bool {
    match error {
        BiError::TransientDatabase(_) | BiError::Timeout(_) => true,
        BiError::Database(msg) | BiError::Execution(msg) => {
            SqlErrorClass::from_message(msg).is_transient()
        }
        _ => false,
    }
}

/// Whether a failure means the database could not be reached at all.
pub fn is_unreachable(error: &BiError) -> bool {
    match error {
        BiError::TransientDatabase(msg) => {
            SqlErrorClass::from_message(msg) == SqlErrorClass::Connection
        }
        _ => false,
    }
}
