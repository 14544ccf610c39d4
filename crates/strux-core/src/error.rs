use thiserror::Error;

/// A record declaration that cannot be turned into a layout.
///
/// Resolution failures are cached next to successful layouts, so the same
/// error is handed out to every later caller for that record type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("{record}.{field}: explicit layout requires a byte offset")]
    MissingOffset {
        record: &'static str,
        field: &'static str,
    },
    #[error("{record}.{field}: sequential layout does not accept a byte offset")]
    UnexpectedOffset {
        record: &'static str,
        field: &'static str,
    },
    #[error("{record}.{field}: length-prefixed array declares no length field")]
    MissingLengthField {
        record: &'static str,
        field: &'static str,
    },
    #[error("{record}.{field}: length field `{length_field}` is not declared")]
    UnknownLengthField {
        record: &'static str,
        field: &'static str,
        length_field: &'static str,
    },
    #[error("{record}.{field}: length field `{length_field}` must be declared before the array")]
    LengthFieldAfterArray {
        record: &'static str,
        field: &'static str,
        length_field: &'static str,
    },
    #[error("{record}.{field}: length field `{length_field}` is not an integer scalar")]
    LengthFieldNotInteger {
        record: &'static str,
        field: &'static str,
        length_field: &'static str,
    },
    #[error("{record}.{field}: enum fields need an integer representation")]
    EnumNotInteger {
        record: &'static str,
        field: &'static str,
    },
    #[error("{record}: field `{field}` is declared twice")]
    DuplicateField {
        record: &'static str,
        field: &'static str,
    },
    #[error("{record}.{field}: fixed element count must be non-zero")]
    ZeroCount {
        record: &'static str,
        field: &'static str,
    },
    #[error("{record}: layout contains itself")]
    RecursiveLayout { record: &'static str },
}

#[derive(Error, Debug)]
pub enum MarshalError {
    #[error("Schema Error: {0}")]
    Schema(#[from] SchemaError),
    #[error("unexpected end of data at offset {offset}: needed {needed} bytes, {available} available")]
    UnexpectedEndOfData {
        offset: u64,
        needed: u64,
        available: u64,
    },
    #[error("invalid {encoding} text: {reason}")]
    Encoding {
        encoding: &'static str,
        reason: String,
    },
    #[error("destination cannot hold {needed} bytes at offset {offset}")]
    WriteCapacity { offset: u64, needed: u64 },
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("missing field `{0}`")]
    MissingField(String),
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("{field}: {source}")]
    InField {
        field: String,
        #[source]
        source: Box<MarshalError>,
    },
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = MarshalError> = std::result::Result<T, E>;

impl MarshalError {
    /// Prefixes the error with the field (or `[index]`) it happened in.
    pub fn in_field(self, name: &str) -> Self {
        match self {
            MarshalError::InField { field, source } => {
                let field = if field.starts_with('[') {
                    format!("{name}{field}")
                } else {
                    format!("{name}.{field}")
                };
                MarshalError::InField { field, source }
            }
            other => MarshalError::InField {
                field: name.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// The error with all field context stripped.
    pub fn root_cause(&self) -> &MarshalError {
        match self {
            MarshalError::InField { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Dotted path of the field the error happened in, if any.
    pub fn field_path(&self) -> Option<&str> {
        match self {
            MarshalError::InField { field, .. } => Some(field),
            _ => None,
        }
    }

    pub fn is_end_of_data(&self) -> bool {
        matches!(self.root_cause(), MarshalError::UnexpectedEndOfData { .. })
    }

    pub fn is_write_capacity(&self) -> bool {
        matches!(self.root_cause(), MarshalError::WriteCapacity { .. })
    }

    pub(crate) fn encoding(encoding: &'static str, reason: impl Into<String>) -> Self {
        MarshalError::Encoding {
            encoding,
            reason: reason.into(),
        }
    }
}
