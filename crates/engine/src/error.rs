//! Typed engine errors.
//!
//! Errors fall in two classes. Fatal errors describe a broken configuration (an
//! undeclared step, an action reference nobody registered) and abort the run.
//! Everything else is contained by the executor and routed through the failing
//! step's error branches like any business failure.

use thiserror::Error;

use crate::model::ParameterType;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A required parameter had neither a bound value nor a default.
    #[error("parameter '{parameter}' is required but was not provided")]
    MissingParameter { parameter: String },

    /// A bound or default value could not be converted to the declared type.
    #[error("parameter '{parameter}' cannot be converted to {expected}: {reason}")]
    TypeCoercion {
        parameter: String,
        expected: ParameterType,
        reason: String,
    },

    /// A graph references a step name that is not declared.
    #[error("step '{0}' is not declared")]
    UnknownStep(String),

    /// The registry has nothing registered under the reference.
    #[error("no action registered for reference '{0}'")]
    UnresolvedAction(String),

    /// A parameter type name could not be resolved.
    #[error("unknown parameter type '{0}'")]
    UnknownType(String),

    /// A service the executor depends on was not registered on the context chain.
    #[error("service '{0}' is not registered on the execution context")]
    MissingService(&'static str),

    /// The expression evaluator rejected an expression.
    #[error("failed to evaluate expression '{expression}': {reason}")]
    Expression { expression: String, reason: String },

    /// A workflow document could not be read or parsed.
    #[error("invalid workflow document: {0}")]
    Document(String),

    /// An action panicked while executing.
    #[error("action panicked: {0}")]
    ActionPanicked(String),
}

impl EngineError {
    /// Returns true when the error must abort the run instead of feeding the error branches.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::UnknownStep(_)
                | EngineError::UnresolvedAction(_)
                | EngineError::UnknownType(_)
                | EngineError::MissingService(_)
                | EngineError::Document(_)
        )
    }
}
