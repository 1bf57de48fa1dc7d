//! Diagnostics infrastructure for tracking issues during loads and solves.
//!
//! A [`Diagnostics`] collects warnings and errors during topology loading,
//! network validation, and plan verification, with optional entity references
//! ("gate M(0,2)->Zone_2") so reports can point at the offending element.
//! Serializes to JSON for CLI output.

use serde::Serialize;

/// Severity level for diagnostic issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Unusual but operation continued (e.g., defaulted surface area)
    Warning,
    /// Could not complete element/operation (e.g., broken tree shape)
    Error,
}

/// A single diagnostic issue encountered during an operation
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticIssue {
    pub severity: Severity,
    /// Category for grouping (e.g., "structure", "calibration", "geometry")
    pub category: String,
    pub message: String,
    /// Entity reference (e.g., "M(0,2)", "Source->M(0,0)")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
}

impl std::fmt::Display for DiagnosticIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let severity = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "[{}:{}] {}", severity, self.category, self.message)?;
        if let Some(entity) = &self.entity {
            write!(f, " ({})", entity)?;
        }
        Ok(())
    }
}

/// Collection of diagnostic issues for an operation
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<DiagnosticIssue>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_warning(&mut self, category: &str, message: &str) {
        self.issues.push(DiagnosticIssue {
            severity: Severity::Warning,
            category: category.to_string(),
            message: message.to_string(),
            entity: None,
        });
    }

    pub fn add_error(&mut self, category: &str, message: &str) {
        self.issues.push(DiagnosticIssue {
            severity: Severity::Error,
            category: category.to_string(),
            message: message.to_string(),
            entity: None,
        });
    }

    pub fn add_warning_with_entity(&mut self, category: &str, message: &str, entity: &str) {
        self.issues.push(DiagnosticIssue {
            severity: Severity::Warning,
            category: category.to_string(),
            message: message.to_string(),
            entity: Some(entity.to_string()),
        });
    }

    pub fn add_error_with_entity(&mut self, category: &str, message: &str, entity: &str) {
        self.issues.push(DiagnosticIssue {
            severity: Severity::Error,
            category: category.to_string(),
            message: message.to_string(),
            entity: Some(entity.to_string()),
        });
    }

    pub fn warnings(&self) -> impl Iterator<Item = &DiagnosticIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
    }

    pub fn errors(&self) -> impl Iterator<Item = &DiagnosticIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warning_count(&self) -> usize {
        self.warnings().count()
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    /// Merge another collection into this one.
    pub fn extend(&mut self, other: Diagnostics) {
        self.issues.extend(other.issues);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_filters() {
        let mut diag = Diagnostics::new();
        diag.add_warning("geometry", "surface area defaulted to 1000 m2");
        diag.add_error_with_entity("structure", "node unreachable from source", "M(3,1)");

        assert_eq!(diag.warning_count(), 1);
        assert_eq!(diag.error_count(), 1);
        assert!(diag.has_errors());
        assert!(diag.errors().any(|i| i.entity.as_deref() == Some("M(3,1)")));
    }

    #[test]
    fn test_display() {
        let mut diag = Diagnostics::new();
        diag.add_error_with_entity("calibration", "K1 must be positive", "Source->M(0,0)");
        let rendered = diag.issues[0].to_string();
        assert!(rendered.contains("[error:calibration]"));
        assert!(rendered.contains("(Source->M(0,0))"));
    }

    #[test]
    fn test_extend() {
        let mut a = Diagnostics::new();
        a.add_warning("load", "one");
        let mut b = Diagnostics::new();
        b.add_error("load", "two");
        a.extend(b);
        assert_eq!(a.issues.len(), 2);
    }
}
