//! Script runtime driver
//!
//! Plays the part of script code against any [`ScriptEngine`]: resolves
//! dotted paths from the global object, reads, writes and calls through them,
//! and turns thrown values into [`ScriptError`]s.

use crate::engine::{ScriptEngine, ValueType};
use crate::quickjs::{JsValue, QuickJsEngine};
use std::path::Path;
use thiserror::Error;

/// Failure observed by code running inside the engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScriptError {
    #[error("uncaught {message}")]
    Thrown {
        message: String,
        /// `code` property of the thrown error object, when present.
        code: Option<String>,
    },

    #[error("'{path}' is not a function")]
    NotCallable { path: String },

    #[error("empty path")]
    EmptyPath,

    #[error("failed to read script {path}: {message}")]
    Io { path: String, message: String },
}

impl ScriptError {
    pub fn code(&self) -> Option<&str> {
        match self {
            ScriptError::Thrown { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

/// Script execution context
pub struct ScriptRuntime<E: ScriptEngine> {
    engine: E,
}

impl<E: ScriptEngine> ScriptRuntime<E> {
    pub fn new(engine: E) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Converts a thrown value the way an uncaught exception report would.
    pub fn thrown(&self, value: E::Value) -> ScriptError {
        let code = if self.engine.type_of(&value).is_object() {
            self.engine
                .get(&value, "code")
                .ok()
                .and_then(|code| self.engine.as_string(&code))
        } else {
            None
        };
        ScriptError::Thrown {
            message: self.engine.to_display_string(&value),
            code,
        }
    }

    /// Resolves `a.b.c` to `(holder of c, value of c)`.
    pub fn resolve(&self, path: &str) -> Result<(E::Value, E::Value), ScriptError> {
        if path.is_empty() {
            return Err(ScriptError::EmptyPath);
        }
        let mut holder = self.engine.global();
        let mut segments = path.split('.').peekable();
        loop {
            let Some(segment) = segments.next() else {
                return Err(ScriptError::EmptyPath);
            };
            let value = self
                .engine
                .get(&holder, segment)
                .map_err(|thrown| self.thrown(thrown))?;
            if segments.peek().is_none() {
                return Ok((holder, value));
            }
            holder = value;
        }
    }

    /// `path`
    pub fn get(&self, path: &str) -> Result<E::Value, ScriptError> {
        self.resolve(path).map(|(_, value)| value)
    }

    /// `path = value`, reporting whether the write was accepted.
    pub fn set(&self, path: &str, value: E::Value) -> Result<bool, ScriptError> {
        let (holder, key) = match path.rsplit_once('.') {
            Some((parent, key)) => (self.get(parent)?, key),
            None => (self.engine.global(), path),
        };
        self.engine
            .set(&holder, key, value)
            .map_err(|thrown| self.thrown(thrown))
    }

    /// `key in path`
    pub fn has(&self, path: &str, key: &str) -> Result<bool, ScriptError> {
        let object = self.get(path)?;
        self.engine
            .has(&object, key)
            .map_err(|thrown| self.thrown(thrown))
    }

    /// `Object.keys(path)`
    pub fn keys(&self, path: &str) -> Result<Vec<String>, ScriptError> {
        let object = self.get(path)?;
        self.engine
            .keys(&object)
            .map_err(|thrown| self.thrown(thrown))
    }

    /// `path(args...)`, with the holder as `this`.
    pub fn call(&self, path: &str, args: &[E::Value]) -> Result<E::Value, ScriptError> {
        let (holder, function) = self.resolve(path)?;
        if self.engine.type_of(&function) != ValueType::Function {
            return Err(ScriptError::NotCallable {
                path: path.to_string(),
            });
        }
        self.engine
            .call(&function, &holder, args)
            .map_err(|thrown| self.thrown(thrown))
    }

    /// `new path(args...)`
    pub fn construct(&self, path: &str, args: &[E::Value]) -> Result<E::Value, ScriptError> {
        let constructor = self.get(path)?;
        if !self.engine.is_callable(&constructor) {
            return Err(ScriptError::NotCallable {
                path: path.to_string(),
            });
        }
        self.engine
            .construct(&constructor, args)
            .map_err(|thrown| self.thrown(thrown))
    }

    /// `JSON.stringify(path)`
    pub fn stringify(&self, path: &str) -> Result<Option<String>, ScriptError> {
        let value = self.get(path)?;
        self.engine
            .json_encode(&value)
            .map_err(|thrown| self.thrown(thrown))
    }

    /// `require(id)`
    pub fn require(&self, id: &str) -> Result<E::Value, ScriptError> {
        self.engine
            .require(id)
            .map_err(|thrown| self.thrown(thrown))
    }
}

impl ScriptRuntime<QuickJsEngine> {
    /// Evaluates script source in the global scope.
    pub fn execute(&self, source: &str) -> Result<JsValue, ScriptError> {
        self.engine
            .eval(source)
            .map_err(|thrown| self.thrown(thrown))
    }

    pub fn execute_file(&self, path: &Path) -> Result<JsValue, ScriptError> {
        let source = std::fs::read_to_string(path).map_err(|err| ScriptError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        tracing::debug!(path = %path.display(), "executing script file");
        self.execute(&source)
    }
}
