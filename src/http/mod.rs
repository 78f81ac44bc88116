//! HTTP protocol implementation.
//!
//! Just enough HTTP/1.1 for the configuration UI: two JSON routes, a
//! long-poll notification route, and a streamed static page, parsed
//! incrementally in small bounded buffers.
//!
//! # Connection state machine
//!
//! ```text
//!   ParseMethod → ParseURI → SkipRequestLineTail → ParseHeaderLine*
//!        ↑                                              │
//!        │                              [Content-Length]▼
//!        │                                           ReadBody
//!        │                                              │
//!        └── keep-alive ←── Respond ←──── Route ◄───────┘
//!                              │            │
//!                            Close     Park (long-poll)
//! ```
//!
//! - **`parser`**: incremental request parser; bounded carryover,
//!   chunk-invariant
//! - **`connection`**: routing, response draining, long-poll park/wake
//! - **`response`**: status codes, response assembly, streamed bodies

pub mod connection;
pub mod parser;
pub mod response;
