//! Core domain types for the fabric control plane.
//!
//! This crate has no knowledge of HTTP, SQL, or process management. It holds
//! the shared data model, the keyed-MAC token scheme, the pure master-election
//! function, and the in-process rate limiter — the parts of the system that
//! can be reasoned about (and tested) without a database or a network socket.

pub mod error;
pub mod ha;
pub mod identity;
pub mod models;
pub mod ratelimit;
