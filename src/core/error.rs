// This module defines the error taxonomy of the shader backend using the thiserror crate.
// CompileError separates the four fatal failure classes of a compilation: malformed input
// programs (undeclared values, unbalanced control flow, node kinds the backend never
// accepts), allocation overflow against the per-stage register or export budget, binding
// errors for resource accesses that the binding table does not cover, and unsupported
// operations that are valid IR but have no target mapping for the current stage. A fifth
// variant carries textual IR parse failures. Every variant carries enough context (node id,
// resource name, budget numbers, binding space) for a caller to produce a diagnostic.
// CompileResult<T> is the crate-wide result alias.

//! Error types for the shader backend.
//!
//! Using thiserror for idiomatic error handling. All errors are fatal for the
//! compilation that raised them; no partial output is ever returned.

use std::fmt;
use thiserror::Error;

use crate::ir::{NodeId, ShaderStage};

/// Resource class a binding index lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BindingSpace {
    Texture,
    UniformBuffer,
    StorageBuffer,
    Image,
    AtomicCounter,
}

impl fmt::Display for BindingSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BindingSpace::Texture => "texture",
            BindingSpace::UniformBuffer => "uniform buffer",
            BindingSpace::StorageBuffer => "storage buffer",
            BindingSpace::Image => "image",
            BindingSpace::AtomicCounter => "atomic counter buffer",
        };
        f.write_str(name)
    }
}

/// Hardware resource whose budget can be exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetResource {
    Gpr,
    ParamExport,
    PosExport,
    PixelExport,
}

impl fmt::Display for BudgetResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BudgetResource::Gpr => "general purpose registers",
            BudgetResource::ParamExport => "parameter export slots",
            BudgetResource::PosExport => "position export slots",
            BudgetResource::PixelExport => "pixel export slots",
        };
        f.write_str(name)
    }
}

/// Main error type for shader compilation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("Malformed program{}: {reason}", fmt_node(.node))]
    MalformedProgram {
        node: Option<NodeId>,
        reason: String,
    },

    #[error("Allocation overflow: {required} {resource} required, budget is {budget}")]
    AllocationOverflow {
        resource: BudgetResource,
        required: u32,
        budget: u32,
    },

    #[error("Binding error: {space} binding {binding}: {reason}")]
    BindingError {
        space: BindingSpace,
        binding: u32,
        reason: String,
    },

    #[error("Unsupported operation in {stage} shader: {operation}")]
    UnsupportedOperation {
        stage: ShaderStage,
        operation: String,
    },

    #[error("Parse error at line {line}: {reason}")]
    Parse {
        line: usize,
        reason: String,
    },
}

fn fmt_node(node: &Option<NodeId>) -> String {
    match node {
        Some(id) => format!(" at node {}", id),
        None => String::new(),
    }
}

impl CompileError {
    pub fn malformed(node: Option<NodeId>, reason: impl Into<String>) -> Self {
        CompileError::MalformedProgram {
            node,
            reason: reason.into(),
        }
    }

    pub fn unsupported(stage: ShaderStage, operation: impl Into<String>) -> Self {
        CompileError::UnsupportedOperation {
            stage,
            operation: operation.into(),
        }
    }

    pub fn binding(space: BindingSpace, binding: u32, reason: impl Into<String>) -> Self {
        CompileError::BindingError {
            space,
            binding,
            reason: reason.into(),
        }
    }

    /// Attach the offending IR node to a malformed-program error that has none.
    pub fn at_node(self, id: NodeId) -> Self {
        match self {
            CompileError::MalformedProgram { node: None, reason } => CompileError::MalformedProgram {
                node: Some(id),
                reason,
            },
            other => other,
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, CompileError::MalformedProgram { .. })
    }

    pub fn is_allocation_overflow(&self) -> bool {
        matches!(self, CompileError::AllocationOverflow { .. })
    }

    pub fn is_binding_error(&self) -> bool {
        matches!(self, CompileError::BindingError { .. })
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, CompileError::UnsupportedOperation { .. })
    }
}

/// Result type alias for compile operations.
pub type CompileResult<T> = Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = CompileError::malformed(Some(NodeId(7)), "undeclared value %3");
        assert_eq!(err.to_string(), "Malformed program at node 7: undeclared value %3");

        let err = CompileError::AllocationOverflow {
            resource: BudgetResource::Gpr,
            required: 5,
            budget: 4,
        };
        assert!(err.to_string().contains("5 general purpose registers required"));

        let err = CompileError::binding(BindingSpace::Texture, 5, "not bound");
        assert_eq!(err.to_string(), "Binding error: texture binding 5: not bound");
    }

    #[test]
    fn test_classification() {
        assert!(CompileError::malformed(None, "x").is_malformed());
        assert!(CompileError::unsupported(ShaderStage::Compute, "discard").is_unsupported());
        assert!(!CompileError::unsupported(ShaderStage::Compute, "discard").is_malformed());
    }

    #[test]
    fn test_at_node_keeps_existing_node() {
        let err = CompileError::malformed(None, "break outside of a loop").at_node(NodeId(3));
        assert_eq!(err.to_string(), "Malformed program at node 3: break outside of a loop");
        let err = CompileError::malformed(Some(NodeId(1)), "x").at_node(NodeId(3));
        assert_eq!(err, CompileError::malformed(Some(NodeId(1)), "x"));
    }
}
