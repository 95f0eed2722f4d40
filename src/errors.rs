//! Error Types
//!
//! This module defines the error types used throughout the device runtime.
//!
//! # Overview
//!
//! The main error type [`DeviceError`] covers the *recoverable* failure modes:
//! - Invalid configuration values
//! - Object creation failures reported by the backend
//! - Malformed upload requests (size mismatches, non-copiable targets)
//!
//! Transient conditions that are part of normal operation (a stale handle,
//! a full staging pool, a skipped draw) are **not** errors. They surface as
//! `Option`/`bool` results or in execution statistics. Programming contract
//! violations (registry exhaustion, double-unregister, descriptor kind
//! mismatches) panic.
//!
//! # Usage
//!
//! ```rust,ignore
//! use myth_device::errors::{DeviceError, Result};
//!
//! fn create_things() -> Result<()> {
//!     // Operations that may fail return Result
//!     Ok(())
//! }
//! ```

use thiserror::Error;

use crate::object::{ObjectId, ObjectType};

/// The main error type for the device runtime.
#[derive(Error, Debug)]
pub enum DeviceError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// A [`DeviceConfig`](crate::config::DeviceConfig) value is out of range.
    #[error("Invalid device configuration: {0}")]
    InvalidConfig(String),

    // ========================================================================
    // Object Errors
    // ========================================================================
    /// The handle does not resolve to a live object.
    #[error("Object {0} not found (stale or unknown handle)")]
    ObjectNotFound(ObjectId),

    /// The handle resolved, but to an object of another kind.
    #[error("Object {id} has type {actual:?}, expected {expected:?}")]
    WrongObjectType {
        /// The offending handle
        id: ObjectId,
        /// The type the caller asked for
        expected: ObjectType,
        /// The type of the live object
        actual: ObjectType,
    },

    /// A view does not fit its parent resource.
    #[error("Invalid view: {0}")]
    InvalidView(String),

    /// The backend failed to create a native object.
    #[error("Backend error: {0}")]
    Backend(String),

    // ========================================================================
    // Upload Errors
    // ========================================================================
    /// The target object cannot receive staged uploads.
    #[error("Object {0} is not a copy target")]
    NotCopiable(ObjectId),

    /// The requested copy range lies outside the target.
    #[error("Invalid copy range: {0}")]
    InvalidCopyRange(String),

    /// The source data provider does not match the staging layout.
    #[error("Source data size mismatch: layout needs {expected} bytes, provider has {actual}")]
    SourceSizeMismatch {
        /// Bytes required by the staging layout
        expected: u64,
        /// Bytes reported by the provider
        actual: u64,
    },

    /// A single upload would never fit into the staging pool.
    #[error("Staging request of {requested} bytes exceeds the pool capacity of {capacity} bytes")]
    StagingRequestTooLarge {
        /// Size of the request
        requested: u64,
        /// Total pool size
        capacity: u64,
    },

    /// The source data provider failed to produce its bytes.
    #[error("Source data error: {0}")]
    SourceData(String),

    // ========================================================================
    // I/O Errors
    // ========================================================================
    /// I/O error (worker thread creation).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Alias for `Result<T, DeviceError>`.
pub type Result<T> = std::result::Result<T, DeviceError>;
