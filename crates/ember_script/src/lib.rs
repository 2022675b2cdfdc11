//! Ember Scripting
//!
//! JavaScript blueprint units evaluated via QuickJS.
//!
//! ## Unit format
//!
//! A scripted unit is plain JavaScript. Its completion value (the value of
//! the last expression statement) is the blueprint definition, so object
//! literals must be parenthesized:
//!
//! ```js
//! const hp = 20 + 5;
//! ({ kind: "npc", attributes: { name: "Guard", hp, maxHp: hp } })
//! ```
//!
//! `print(...)` is available and forwards to the log.

pub mod runtime;

pub use runtime::{ScriptError, ScriptLimits, ScriptRuntime};
