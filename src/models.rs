//! These models represent the objects passed between the transport layer
//! and the agent runtime.
//!
//! There are a few related formats we need to interact with:
//! - chat-completions messages/chunks, sent to and received from the LLM
//! - responses-mode input/output items, the canonical wire shape
//! - the internal item taxonomy the runtime consumes
//!
//! Backend payloads are kept verbatim on each item as `raw`; everything
//! else converts into the internal structs using to/from helpers so the
//! rest of the runtime only ever sees one shape.
pub mod chunk;
pub mod item;
pub mod usage;
