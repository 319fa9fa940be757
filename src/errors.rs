//! Error Types
//!
//! This module defines the error types used throughout the engine.
//!
//! # Overview
//!
//! The main error type [`MirageError`] covers the failure modes of the
//! render-pass pipeline:
//! - GPU resource creation failures
//! - Broken pass wiring and contract violations
//! - Shader template and configuration errors
//! - Backend initialization failures
//!
//! Several failure classes never surface as errors because the pipeline
//! recovers from them in place: shadow-map allocation retries at lower
//! resolutions, failed shader programs skip their draws, textures without a
//! GPU substrate are replaced by placeholders, and stale lighting buffers are
//! re-created.
//!
//! # Usage
//!
//! All public APIs return [`Result<T>`] which is an alias for
//! `std::result::Result<T, MirageError>`.
//!
//! ```rust,ignore
//! use mirage::errors::{MirageError, Result};
//!
//! fn allocate() -> Result<()> {
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// The main error type for the Mirage engine.
#[derive(Error, Debug)]
pub enum MirageError {
    // ========================================================================
    // GPU Resource Errors
    // ========================================================================
    /// The driver could not allocate a render target.
    #[error("Failed to create render target '{label}' ({width}x{height}): {reason}")]
    RenderTargetCreation {
        /// Debug label of the requested target
        label: String,
        /// Requested width in pixels
        width: u32,
        /// Requested height in pixels
        height: u32,
        /// Backend-provided reason
        reason: String,
    },

    /// A shader program failed to compile.
    #[error("Shader '{program}' failed to compile: {log}")]
    ShaderCompilation {
        /// Program name
        program: String,
        /// Compiler output
        log: String,
    },

    // ========================================================================
    // Pass Contract Errors
    // ========================================================================
    /// A render pass was invoked without one of its declared inputs.
    #[error("Render pass '{pass}' is missing input channel {channel}")]
    MissingPassInput {
        /// Name of the pass
        pass: &'static str,
        /// Channel key that was expected
        channel: &'static str,
    },

    /// Gaussian kernel parameters are unusable.
    #[error("Invalid gaussian kernel: {0}")]
    InvalidKernel(String),

    /// A programming-contract invariant was violated.
    ///
    /// These are logic bugs, never input-validation failures: the frame is
    /// aborted and the error propagates to the caller of the renderer.
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Renderer settings failed to (de)serialize.
    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),

    /// Renderer settings are inconsistent.
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    /// A post-process effect name could not be resolved.
    #[error("Unknown post-process effect: {0}")]
    UnknownPostProcessEffect(String),

    // ========================================================================
    // Shader Generation Errors
    // ========================================================================
    /// Shader template rendering failed.
    #[error("Shader template error: {0}")]
    Template(#[from] minijinja::Error),

    // ========================================================================
    // Backend Errors
    // ========================================================================
    /// Failed to request a compatible GPU adapter.
    #[error("Failed to request WGPU adapter: {0}")]
    AdapterRequestFailed(String),

    /// Failed to create the GPU device.
    #[error("Failed to create WGPU device: {0}")]
    DeviceCreateFailed(#[from] wgpu::RequestDeviceError),
}

/// Alias for `Result<T, MirageError>`.
pub type Result<T> = std::result::Result<T, MirageError>;
