//! Local processing stages for a candidate proof document.
//!
//! Each submodule implements exactly one transformation step, so each can be
//! tested alone and backed by a different implementation (platform codec,
//! other PDF engine) without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! validate ──▶ render ──▶ compress ──▶ (upload)
//! (type/size)  (PDF→image) (byte budget)
//! ```
//!
//! 1. [`validate`] — synchronous MIME-type and size guard; runs first
//! 2. [`render`]   — flatten a multi-page PDF into one raster; runs in
//!    `spawn_blocking` because pdfium is not async-safe
//! 3. [`compress`] — re-encode an image until it fits its byte budget, or
//!    fail closed
//! 4. [`encode`]   — the codec capability shared by `render` and `compress`
//!
//! [`crate::prepare`] chains the stages for one capture attempt.

pub mod compress;
pub mod encode;
pub mod render;
pub mod validate;
