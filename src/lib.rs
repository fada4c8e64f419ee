//! Watchpost: condition-triggered alerting over HTTP endpoints.
//!
//! Each rule polls an endpoint, evaluates a sandboxed predicate over the
//! JSON response, and on a `true` verdict runs an ordered list of commands,
//! then stays quiet for a per-rule cooldown. One rule's failure never stops
//! the others.
//!
//! See `DESIGN.md` for the architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod credentials;
pub mod logging;
pub mod registry;

pub mod cooldown;
pub mod dispatcher;
pub mod fetcher;
pub mod predicate;

pub mod scout;
