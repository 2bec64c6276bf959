//! Tether Scripting Layer
//!
//! The primitive engine API the bridge is written against, the QuickJS engine
//! implementing it, and an in-process heap engine used as a test double.
//!
//! ## Architecture
//!
//! - **Engine API:** [`ScriptEngine`], value based, every operation that may run
//!   script code is protected and reports the thrown value
//! - **QuickJS engine:** [`QuickJsEngine`], the engine script code runs on
//! - **Heap engine:** [`HeapEngine`], a deterministic stand-in without a
//!   language front end, used to test the bridge through the engine API
//! - **FFI:** opaque pointers ([`ScriptHandle`]) carry host identities through
//!   script code
//! - **Runtime:** [`ScriptRuntime`] drives an engine the way script code would

pub mod engine;
pub mod ffi;
pub mod heap;
pub mod quickjs;
pub mod runtime;
pub mod time;

pub use engine::{Completion, Finalizer, ModuleLoader, NativeFunction, ScriptEngine, ValueType};
pub use ffi::ScriptHandle;
pub use heap::{HeapEngine, HeapValue};
pub use quickjs::{JsValue, QuickJsEngine};
pub use runtime::{ScriptError, ScriptRuntime};
