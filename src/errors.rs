//! Error Types
//!
//! This module defines the error types used throughout the engine.
//!
//! # Overview
//!
//! The main error type [`CathodeError`] covers all failure modes including:
//! - ECS storage and hierarchy errors
//! - Resource cache, loading, and dependency errors
//! - GPU allocation, validation, and device-loss errors
//!
//! # Usage
//!
//! All public APIs return [`Result<T>`] which is an alias for `std::result::Result<T, CathodeError>`.
//!
//! ```rust,ignore
//! use cathode::errors::{CathodeError, Result};
//!
//! fn load_asset() -> Result<()> {
//!     // Operations that may fail return Result
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// The main error type for the Cathode engine.
///
/// This enum covers all possible error conditions that can occur
/// during engine operation. Each variant provides specific context
/// about what went wrong.
#[derive(Error, Debug)]
pub enum CathodeError {
    // ========================================================================
    // ECS Errors
    // ========================================================================
    /// Row index past the end of a component column.
    #[error("Index out of range: {context} (index: {index}, len: {len})")]
    OutOfRange {
        /// Description of what was being accessed
        context: &'static str,
        /// The invalid index
        index: usize,
        /// Number of valid rows
        len: usize,
    },

    /// Field name not present in a component schema.
    #[error("Unknown field '{field}' on component '{component}'")]
    UnknownField {
        /// Component type name
        component: String,
        /// The missing field name
        field: String,
    },

    /// Component descriptor validation failed.
    #[error("Invalid component '{component}': {reason}")]
    InvalidComponent {
        /// Component type name
        component: String,
        /// What was wrong with it
        reason: String,
    },

    /// A system with this name is already registered.
    #[error("Duplicate system name: {0}")]
    DuplicateSystem(String),

    // ========================================================================
    // Hierarchy Errors
    // ========================================================================
    /// Reparenting would introduce a cycle in the transform hierarchy.
    #[error("Reparenting entity {entity} under {parent} would create a cycle")]
    HierarchyCycle {
        /// Entity being reparented
        entity: u32,
        /// Requested parent
        parent: u32,
    },

    /// Ancestor chain exceeded the supported depth.
    #[error("Transform ancestor chain deeper than {max} for entity {entity}")]
    HierarchyDepthOverflow {
        /// Entity whose chain overflowed
        entity: u32,
        /// Supported maximum depth
        max: usize,
    },

    /// Matrix pool is at its hard capacity.
    #[error("Matrix storage exhausted (capacity {0})")]
    StorageExhausted(usize),

    // ========================================================================
    // Resource Errors
    // ========================================================================
    /// A cached entry exists under this id with a different resource kind.
    #[error("Resource type mismatch for '{id}': cached {cached}, requested {requested}")]
    TypeMismatch {
        /// Resource id
        id: String,
        /// Kind stored in the cache
        cached: String,
        /// Kind the caller asked for
        requested: String,
    },

    /// The dependency graph contains a cycle involving this id.
    #[error("Circular dependency detected at '{0}'")]
    CircularDependency(String),

    /// Handle access after the entry was evicted from the cache.
    #[error("Resource '{0}' was evicted")]
    ResourceEvicted(String),

    /// Handle access while the entry is still loading or after release.
    #[error("Resource '{0}' is not loaded")]
    NotLoaded(String),

    /// The loader did not finish within the configured timeout.
    #[error("Loading '{id}' timed out after {timeout_ms} ms")]
    LoadTimeout {
        /// Resource id
        id: String,
        /// Configured timeout in milliseconds
        timeout_ms: u64,
    },

    /// The loader itself failed.
    #[error("Loader failed for '{id}': {reason}")]
    LoaderFailure {
        /// Resource id
        id: String,
        /// Loader-reported reason
        reason: String,
    },

    /// No loader is registered for this resource kind.
    #[error("No loader registered for resource kind '{0}'")]
    NoLoader(String),

    // ========================================================================
    // GPU & Rendering Errors
    // ========================================================================
    /// Allocation would push a VRAM category over its budget.
    #[error("VRAM budget exceeded for {category}: {requested} B requested, {available} B available")]
    VramBudgetExceeded {
        /// Accounting category name
        category: &'static str,
        /// Bytes the allocation asked for
        requested: u64,
        /// Bytes left under the budget
        available: u64,
    },

    /// The GPU device was lost.
    #[error("GPU device lost: {0}")]
    DeviceLost(String),

    /// Failed to request a compatible GPU adapter.
    #[error("Failed to request WGPU adapter: {0}")]
    AdapterRequestFailed(String),

    /// Failed to create the GPU device.
    #[error("Failed to create WGPU device: {0}")]
    DeviceCreateFailed(#[from] wgpu::RequestDeviceError),

    /// A draw command failed builder validation.
    #[error("Invalid draw command: {0}")]
    InvalidDrawCommand(String),

    /// A GPU handle did not resolve to a live object.
    #[error("Stale GPU handle: {0}")]
    StaleHandle(&'static str),

    /// Bind group creation did not match the layout.
    #[error("Bind group validation failed: {0}")]
    BindGroupMismatch(String),

    /// Byte-size queries are not defined for block-compressed formats.
    #[error("Format {0} is block-compressed; use the block-size path")]
    CompressedFormat(&'static str),

    // ========================================================================
    // Scene Component Errors
    // ========================================================================
    /// A light constructor rejected its arguments.
    #[error("Invalid light: {0}")]
    InvalidLight(String),

    // ========================================================================
    // I/O & Asset Errors
    // ========================================================================
    /// File I/O error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// HTTP fetch error.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// URL parsing error.
    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),

    /// Image decoding error.
    #[error("Image decode error: {0}")]
    ImageDecodeError(String),

    /// JSON parsing error.
    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),
}

// ============================================================================
// Convenient conversion implementations
// ============================================================================

impl From<image::ImageError> for CathodeError {
    fn from(err: image::ImageError) -> Self {
        CathodeError::ImageDecodeError(err.to_string())
    }
}

/// Alias for `Result<T, CathodeError>`.
pub type Result<T> = std::result::Result<T, CathodeError>;
