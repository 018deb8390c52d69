//! AQL compiler error codes following a structured numbering system
//!
//! Error code ranges:
//! - ASL0001-ASL0099: Unsupported query shape
//! - ASL0100-ASL0199: Unresolvable references
//! - ASL0200-ASL0299: Invalid literal values and patterns
//! - ASL0300-ASL0399: Configuration and system errors

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

/// Error code identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorCode(u16);

impl ErrorCode {
    /// Create a new error code
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Get the numeric code
    pub const fn code(&self) -> u16 {
        self.0
    }

    /// Get error information for this code
    pub fn info(&self) -> &'static ErrorInfo {
        ERROR_INFO.get(&self.0).unwrap_or(&UNKNOWN_ERROR)
    }

    /// Check if this is an unsupported query shape error (0001-0099)
    pub const fn is_unsupported_shape(&self) -> bool {
        self.0 >= 1 && self.0 < 100
    }

    /// Check if this is an unresolved reference error (0100-0199)
    pub const fn is_unresolved_reference(&self) -> bool {
        self.0 >= 100 && self.0 < 200
    }

    /// Check if this is an invalid value error (0200-0299)
    pub const fn is_invalid_value(&self) -> bool {
        self.0 >= 200 && self.0 < 300
    }

    /// Check if this is a configuration error (0300-0399)
    pub const fn is_configuration_error(&self) -> bool {
        self.0 >= 300 && self.0 < 400
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ASL{:04}", self.0)
    }
}

/// Information about an error code
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    /// Short description of the error
    pub description: &'static str,
    /// Detailed help text
    pub help: Option<&'static str>,
}

impl ErrorInfo {
    const fn new(description: &'static str) -> Self {
        Self {
            description,
            help: None,
        }
    }

    const fn with_help(mut self, help: &'static str) -> Self {
        self.help = Some(help);
        self
    }
}

static UNKNOWN_ERROR: ErrorInfo = ErrorInfo::new("Unknown error");

static ERROR_INFO: LazyLock<HashMap<u16, ErrorInfo>> = LazyLock::new(|| {
    let mut map = HashMap::new();

    // Unsupported query shape (0001-0099)
    map.insert(
        1,
        ErrorInfo::new("Operator not supported on ordered value path")
            .with_help("EXISTS and LIKE cannot be applied to DV_ORDERED paths"),
    );
    map.insert(
        2,
        ErrorInfo::new("Path outside supported structure roots")
            .with_help("Only paths within EHR_STATUS, COMPOSITION, FOLDER and CLUSTER are supported"),
    );
    map.insert(3, ErrorInfo::new("Unexpected path node category"));
    map.insert(4, ErrorInfo::new("Unsupported relation for join condition"));
    map.insert(5, ErrorInfo::new("Unsupported predicate"));
    map.insert(6, ErrorInfo::new("Unsupported operator for template id"));
    map.insert(7, ErrorInfo::new("Unsupported select expression"));
    map.insert(8, ErrorInfo::new("Source relation cannot be determined"));
    map.insert(9, ErrorInfo::new("Inconsistent path cohesion tree"));

    // Unresolvable references (0100-0199)
    map.insert(
        100,
        ErrorInfo::new("Unknown path").with_help("The path is not part of the analyzed query"),
    );
    map.insert(101, ErrorInfo::new("Field does not exist for owner"));
    map.insert(102, ErrorInfo::new("Unknown containment"));
    map.insert(103, ErrorInfo::new("No extracted column for path"));

    // Invalid values (0200-0299)
    map.insert(
        200,
        ErrorInfo::new("Invalid LIKE pattern")
            .with_help("Only '*', '?' and '\\' may follow a backslash"),
    );
    map.insert(201, ErrorInfo::new("Invalid archetype node id"));
    map.insert(202, ErrorInfo::new("Invalid object path"));
    map.insert(203, ErrorInfo::new("Invalid temporal literal"));

    // Configuration (0300-0399)
    map.insert(300, ErrorInfo::new("Invalid engine configuration"));
    map.insert(301, ErrorInfo::new("Configuration source unavailable"));

    map
});

// Convenient error code constants

// Unsupported query shape
pub const ASL0001: ErrorCode = ErrorCode::new(1);
pub const ASL0002: ErrorCode = ErrorCode::new(2);
pub const ASL0003: ErrorCode = ErrorCode::new(3);
pub const ASL0004: ErrorCode = ErrorCode::new(4);
pub const ASL0005: ErrorCode = ErrorCode::new(5);
pub const ASL0006: ErrorCode = ErrorCode::new(6);
pub const ASL0007: ErrorCode = ErrorCode::new(7);
pub const ASL0008: ErrorCode = ErrorCode::new(8);
pub const ASL0009: ErrorCode = ErrorCode::new(9);

// Unresolvable references
pub const ASL0100: ErrorCode = ErrorCode::new(100);
pub const ASL0101: ErrorCode = ErrorCode::new(101);
pub const ASL0102: ErrorCode = ErrorCode::new(102);
pub const ASL0103: ErrorCode = ErrorCode::new(103);

// Invalid values
pub const ASL0200: ErrorCode = ErrorCode::new(200);
pub const ASL0201: ErrorCode = ErrorCode::new(201);
pub const ASL0202: ErrorCode = ErrorCode::new(202);
pub const ASL0203: ErrorCode = ErrorCode::new(203);

// Configuration
pub const ASL0300: ErrorCode = ErrorCode::new(300);
pub const ASL0301: ErrorCode = ErrorCode::new(301);
