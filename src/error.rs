use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Property,
    Document,
    ArrayValue,
    Object,
    Instance,
    Shape,
    Slot,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceType::Property => write!(f, "property"),
            ResourceType::Document => write!(f, "document"),
            ResourceType::ArrayValue => write!(f, "array value"),
            ResourceType::Object => write!(f, "object"),
            ResourceType::Instance => write!(f, "instance"),
            ResourceType::Shape => write!(f, "shape"),
            ResourceType::Slot => write!(f, "slot"),
        }
    }
}

/// Why an access check refused the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    PropertyRead,
    PropertyUpdate,
    PropertyDelete,
    NotWritable,
    NotDeletable,
    NotPullable,
    ReferencedContext,
    DocumentRemoval,
    Scope,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DenyReason::PropertyRead => "property read access denied",
            DenyReason::PropertyUpdate => "property update access denied",
            DenyReason::PropertyDelete => "property delete access denied",
            DenyReason::NotWritable => "property is not writable",
            DenyReason::NotDeletable => "property is not removable",
            DenyReason::NotPullable => "array values cannot be pulled",
            DenyReason::ReferencedContext => "access to the referenced context was denied",
            DenyReason::DocumentRemoval => "documents with properties cannot be removed",
            DenyReason::Scope => "outside of authorization scope",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorCode {
    Io,
    Encode,
    Decode,
    Validation,
    InvalidConfig,
    PropertyNotFound,
    DocumentNotFound,
    ArrayValueNotFound,
    ObjectNotFound,
    InstanceNotFound,
    ShapeNotFound,
    SlotNotFound,
    AccessDenied,
    InvalidArgument,
    Conflict,
    DuplicateKey,
    CapacityExceeded,
    Unsupported,
    NotImplemented,
    JobDispatch,
}

impl SchemaErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            SchemaErrorCode::Io => "io",
            SchemaErrorCode::Encode => "encode",
            SchemaErrorCode::Decode => "decode",
            SchemaErrorCode::Validation => "validation",
            SchemaErrorCode::InvalidConfig => "invalid_config",
            SchemaErrorCode::PropertyNotFound => "property_not_found",
            SchemaErrorCode::DocumentNotFound => "document_not_found",
            SchemaErrorCode::ArrayValueNotFound => "array_value_not_found",
            SchemaErrorCode::ObjectNotFound => "object_not_found",
            SchemaErrorCode::InstanceNotFound => "instance_not_found",
            SchemaErrorCode::ShapeNotFound => "shape_not_found",
            SchemaErrorCode::SlotNotFound => "slot_not_found",
            SchemaErrorCode::AccessDenied => "access_denied",
            SchemaErrorCode::InvalidArgument => "invalid_argument",
            SchemaErrorCode::Conflict => "conflict",
            SchemaErrorCode::DuplicateKey => "duplicate_key",
            SchemaErrorCode::CapacityExceeded => "capacity_exceeded",
            SchemaErrorCode::Unsupported => "unsupported",
            SchemaErrorCode::NotImplemented => "not_implemented",
            SchemaErrorCode::JobDispatch => "job_dispatch",
        }
    }
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("validation failed for '{path}' ({rule}): {message}")]
    Validation {
        path: String,
        rule: String,
        message: String,
    },
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },
    #[error("{resource_type} '{path}' not found: {reason}")]
    NotFound {
        resource_type: ResourceType,
        path: String,
        reason: String,
    },
    #[error("access denied at '{path}': {reason}")]
    AccessDenied { path: String, reason: DenyReason },
    #[error("invalid argument at '{path}': {message}")]
    InvalidArgument { path: String, message: String },
    #[error("conflict at '{path}': {message}")]
    Conflict { path: String, message: String },
    #[error("duplicate key in slot '{slot}': {key}")]
    DuplicateKey { slot: String, key: String },
    #[error("{message}")]
    CapacityExceeded { pool: String, message: String },
    #[error("unsupported operation at '{path}': {message}")]
    Unsupported { path: String, message: String },
    #[error("not implemented at '{path}': {message}")]
    NotImplemented { path: String, message: String },
    #[error("job dispatch failed: {0}")]
    JobDispatch(String),
}

impl SchemaError {
    pub fn code(&self) -> SchemaErrorCode {
        match self {
            SchemaError::Io(_) => SchemaErrorCode::Io,
            SchemaError::Encode(_) => SchemaErrorCode::Encode,
            SchemaError::Decode(_) => SchemaErrorCode::Decode,
            SchemaError::Validation { .. } => SchemaErrorCode::Validation,
            SchemaError::InvalidConfig { .. } => SchemaErrorCode::InvalidConfig,
            SchemaError::NotFound { resource_type, .. } => match resource_type {
                ResourceType::Property => SchemaErrorCode::PropertyNotFound,
                ResourceType::Document => SchemaErrorCode::DocumentNotFound,
                ResourceType::ArrayValue => SchemaErrorCode::ArrayValueNotFound,
                ResourceType::Object => SchemaErrorCode::ObjectNotFound,
                ResourceType::Instance => SchemaErrorCode::InstanceNotFound,
                ResourceType::Shape => SchemaErrorCode::ShapeNotFound,
                ResourceType::Slot => SchemaErrorCode::SlotNotFound,
            },
            SchemaError::AccessDenied { .. } => SchemaErrorCode::AccessDenied,
            SchemaError::InvalidArgument { .. } => SchemaErrorCode::InvalidArgument,
            SchemaError::Conflict { .. } => SchemaErrorCode::Conflict,
            SchemaError::DuplicateKey { .. } => SchemaErrorCode::DuplicateKey,
            SchemaError::CapacityExceeded { .. } => SchemaErrorCode::CapacityExceeded,
            SchemaError::Unsupported { .. } => SchemaErrorCode::Unsupported,
            SchemaError::NotImplemented { .. } => SchemaErrorCode::NotImplemented,
            SchemaError::JobDispatch(_) => SchemaErrorCode::JobDispatch,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }

    /// NotFound and AccessDenied are the two kinds passive mode swallows.
    pub fn is_passive_tolerable(&self) -> bool {
        matches!(
            self,
            SchemaError::NotFound { .. } | SchemaError::AccessDenied { .. }
        )
    }

    /// Cross-document unique violations and same-document collisions both
    /// surface to callers as conflicts.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            SchemaError::Conflict { .. } | SchemaError::DuplicateKey { .. }
        )
    }

    pub fn not_found(
        resource_type: ResourceType,
        path: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        SchemaError::NotFound {
            resource_type,
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn denied(path: impl Into<String>, reason: DenyReason) -> Self {
        SchemaError::AccessDenied {
            path: path.into(),
            reason,
        }
    }

    pub fn invalid(path: impl Into<String>, message: impl Into<String>) -> Self {
        SchemaError::InvalidArgument {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn unsupported(path: impl Into<String>, message: impl Into<String>) -> Self {
        SchemaError::Unsupported {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn conflict(path: impl Into<String>, message: impl Into<String>) -> Self {
        SchemaError::Conflict {
            path: path.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DenyReason, ResourceType, SchemaError, SchemaErrorCode};

    #[test]
    fn error_code_strings_are_stable() {
        assert_eq!(
            SchemaErrorCode::PropertyNotFound.as_str(),
            "property_not_found"
        );
        assert_eq!(
            SchemaErrorCode::CapacityExceeded.as_str(),
            "capacity_exceeded"
        );
        assert_eq!(SchemaErrorCode::DuplicateKey.as_str(), "duplicate_key");
        assert_eq!(SchemaErrorCode::AccessDenied.as_str(), "access_denied");
    }

    #[test]
    fn error_code_str_matches_variant_mapping() {
        let err = SchemaError::not_found(ResourceType::Document, "c_items", "missing element");
        assert_eq!(err.code(), SchemaErrorCode::DocumentNotFound);
        assert_eq!(err.code_str(), "document_not_found");

        let err = SchemaError::denied("c_name", DenyReason::PropertyUpdate);
        assert_eq!(err.code_str(), "access_denied");
        assert!(err.is_passive_tolerable());
        assert!(!err.is_conflict());
    }

    #[test]
    fn duplicate_keys_are_conflicts() {
        let err = SchemaError::DuplicateKey {
            slot: "u1".into(),
            key: "x".into(),
        };
        assert!(err.is_conflict());
        assert!(!err.is_passive_tolerable());
    }
}
