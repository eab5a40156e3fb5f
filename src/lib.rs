//! Transcoding-aware HTTP reverse proxy for HLS manifests and segments.
//!
//! The crate is organized around the five pieces of the proxy's data
//! path: header policy ([`headers`]), per-origin connection pooling
//! ([`pool`]), a byte- and entry-bounded segment cache ([`cache`]), the
//! manifest classifier/rewriter ([`rewrite`]), and the background
//! prefetch orchestrator ([`prefetch`]) that couples the three of them
//! together. [`config`] and [`state`] wire everything into the [`web`]
//! router.

pub mod cache;
pub mod config;
pub mod errors;
pub mod headers;
pub mod pool;
pub mod prefetch;
pub mod rewrite;
pub mod state;
pub mod web;
