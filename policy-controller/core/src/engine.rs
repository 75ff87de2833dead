use crate::DataContext;
use serde::de::DeserializeOwned;

/// Output path of override programs: a list of JSON patch operations.
pub const PATCHES_PATH: &str = "patches";

/// Output path of validate programs: `{valid: bool, reason: string}`.
pub const VALIDATE_PATH: &str = "validate";

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("program is invalid: {0}")]
    Syntax(String),

    #[error("program does not produce a value at {path:?}: {message}")]
    UnresolvedPath { path: String, message: String },

    #[error("value at {path:?} could not be decoded: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("evaluation engine is unavailable: {0}")]
    Unavailable(String),
}

/// The declarative evaluation engine rule programs run on.
///
/// Implementations must be safe to share across admission requests.
pub trait Engine: Send + Sync {
    /// Returns the canonical formatting of a program, failing if it does not parse.
    fn format(&self, program: &str) -> Result<String, EngineError>;

    /// Checks a program's syntax and types without evaluating it against data.
    fn validate(&self, program: &str) -> Result<(), EngineError>;

    /// Evaluates `program` with `data` bound and returns the value at `output`.
    fn execute(
        &self,
        program: &str,
        data: &DataContext,
        output: &str,
    ) -> Result<serde_json::Value, EngineError>;
}

/// Evaluates a program and decodes the output into `T`.
pub fn execute_as<T: DeserializeOwned>(
    engine: &dyn Engine,
    program: &str,
    data: &DataContext,
    output: &str,
) -> Result<T, EngineError> {
    let value = engine.execute(program, data, output)?;
    serde_json::from_value(value).map_err(|source| EngineError::Decode {
        path: output.to_string(),
        source,
    })
}
