use std::fmt;

/// Error types for the provisioning engine
///
/// Every failure the engine can produce falls into one of these classes.
/// Validation and graph errors happen before any remote call and are fixed
/// by editing the input; conflicts and provider errors happen during apply.
#[derive(Debug)]
pub enum EngineError {
    /// A variable value failed validation or is missing
    Validation { variable: String, message: String },

    /// An expression is malformed or cannot be evaluated
    Expression { expression: String, message: String },

    /// The dependency graph contains a cycle
    Cycle { path: Vec<String> },

    /// An expression references an address that does not exist in the graph
    UnknownReference {
        reference: String,
        referenced_from: String,
    },

    /// State store version token mismatch (concurrent modification)
    Conflict {
        address: String,
        expected: Option<u64>,
        actual: Option<u64>,
    },

    /// The remote resource-management API rejected a call
    Provider { address: String, message: String },

    /// Recorded state and remote actual state disagree
    Drift { address: String, message: String },

    /// The state store cannot be read or written
    StateUnreachable(String),

    /// A run precondition is not satisfied (e.g. missing credentials)
    Precondition(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Validation { variable, message } => {
                write!(f, "Invalid value for variable '{}': {}", variable, message)
            }
            EngineError::Expression {
                expression,
                message,
            } => {
                write!(f, "Failed to evaluate '{}': {}", expression, message)
            }
            EngineError::Cycle { path } => {
                write!(f, "Dependency cycle detected: {}", path.join(" -> "))
            }
            EngineError::UnknownReference {
                reference,
                referenced_from,
            } => {
                write!(
                    f,
                    "Reference to unknown address '{}' in '{}'",
                    reference, referenced_from
                )
            }
            EngineError::Conflict {
                address,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "State conflict for '{}': expected version {:?}, found {:?} (concurrent run?)",
                    address, expected, actual
                )
            }
            EngineError::Provider { address, message } => {
                write!(f, "Provider error for '{}': {}", address, message)
            }
            EngineError::Drift { address, message } => {
                write!(f, "Drift detected for '{}': {}", address, message)
            }
            EngineError::StateUnreachable(msg) => {
                write!(f, "State store unreachable: {}", msg)
            }
            EngineError::Precondition(msg) => {
                write!(f, "Precondition failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl EngineError {
    /// CLI exit code for this error class
    ///
    /// 1 = validation/graph error, 3 = precondition failure. Partial applies
    /// (exit 2) are not errors and are mapped from the run report instead.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Validation { .. }
            | EngineError::Expression { .. }
            | EngineError::Cycle { .. }
            | EngineError::UnknownReference { .. } => 1,
            EngineError::StateUnreachable(_) | EngineError::Precondition(_) => 3,
            _ => 1,
        }
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
