//! Services — canvas state and the rules that mutate it.
//!
//! `history` and `session` hold state; `canvas` ties them together and
//! decides what each request publishes; `cursor` relays ephemeral pointer
//! traffic that never touches history.

pub mod canvas;
pub mod cursor;
pub mod history;
pub mod session;
