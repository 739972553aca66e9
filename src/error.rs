//! Error handling for mapscope
//!
//! This module defines the crate error type and a Result alias. The variants
//! follow the recovery taxonomy of the engine: only construction failures
//! reach the host, everything else is logged and recovered where it happens.

use thiserror::Error;

/// Main error type for mapscope operations
#[derive(Error, Debug)]
pub enum MapScopeError {
    /// A device found another device in its scope (ancestor or descendant)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An endpoint could not be bound to, or unbound from, a device signal
    #[error("Binding error: {0}")]
    Binding(String),

    /// A vector or list exceeded a hard maximum
    #[error("Capacity error: {what} length {length} exceeds maximum {max}")]
    Capacity {
        what: &'static str,
        length: usize,
        max: usize,
    },

    /// A host value could not be coerced to the declared signal type
    #[error("Type error: {0}")]
    Type(String),

    /// A signal, instance or registry entry was not found
    #[error("Lookup error: {0}")]
    Lookup(String),

    /// Errors raised by the mapping network layer
    #[error("Network error: {0}")]
    Network(String),

    /// Errors related to configuration loading/saving
    #[error("Config error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<MapScopeError>,
    },
}

impl MapScopeError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        MapScopeError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether the error is a construction-time configuration failure
    pub fn is_configuration(&self) -> bool {
        match self {
            MapScopeError::Configuration(_) => true,
            MapScopeError::WithContext { source, .. } => source.is_configuration(),
            _ => false,
        }
    }
}

/// Result type alias for mapscope operations
pub type Result<T> = std::result::Result<T, MapScopeError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}
