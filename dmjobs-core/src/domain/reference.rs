//! Document references
//!
//! Addresses into the document store have the shape
//! `[protocol://]data_source/{$id | path}[.attribute]`. An id is marked with a
//! leading `$`; anything else is a path. The attribute part is a dotted path
//! into the document and may contain list indices (`schedule.runs[0]`).

use std::fmt;

use thiserror::Error;

/// Protocol assumed when a reference omits one
pub const DEFAULT_PROTOCOL: &str = "dmss";

const ID_MARKER: char = '$';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferenceError {
    #[error("Reference '{0}' is not a valid absolute reference")]
    Malformed(String),
}

/// What the reference points at inside its data source
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    Id(String),
    Path(String),
}

/// A parsed document reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    pub protocol: String,
    pub data_source: String,
    pub target: Target,
    pub attribute: Option<String>,
}

impl Reference {
    pub fn parse(raw: &str) -> Result<Self, ReferenceError> {
        let malformed = || ReferenceError::Malformed(raw.to_string());

        let (protocol, rest) = match raw.split_once("://") {
            Some((protocol, rest)) if !protocol.is_empty() => (protocol, rest),
            Some(_) => return Err(malformed()),
            None => (DEFAULT_PROTOCOL, raw),
        };

        let (data_source, dotted_path) = rest.split_once('/').ok_or_else(malformed)?;
        if data_source.is_empty() || dotted_path.is_empty() {
            return Err(malformed());
        }

        let (target, attribute) = match dotted_path.split_once('.') {
            Some((target, attribute)) => (target, Some(attribute.to_string())),
            None => (dotted_path, None),
        };

        let target = match target.strip_prefix(ID_MARKER) {
            Some("") => return Err(malformed()),
            Some(id) => Target::Id(id.to_string()),
            None if target.is_empty() => return Err(malformed()),
            None => Target::Path(target.to_string()),
        };

        Ok(Self {
            protocol: protocol.to_string(),
            data_source: data_source.to_string(),
            target,
            attribute: attribute.filter(|a| !a.is_empty()),
        })
    }

    /// Reference to a document by id in the given data source
    pub fn by_id(protocol: &str, data_source: &str, id: &str) -> Self {
        Self {
            protocol: protocol.to_string(),
            data_source: data_source.to_string(),
            target: Target::Id(id.to_string()),
            attribute: None,
        }
    }

    /// The same document without the attribute part
    pub fn document(&self) -> Self {
        Self {
            attribute: None,
            ..self.clone()
        }
    }

    /// Appends a dotted attribute path to this reference
    pub fn join(&self, attribute: &str) -> Self {
        let attribute = match &self.attribute {
            Some(existing) => format!("{existing}.{attribute}"),
            None => attribute.to_string(),
        };
        Self {
            attribute: Some(attribute),
            ..self.clone()
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/", self.protocol, self.data_source)?;
        match &self.target {
            Target::Id(id) => write!(f, "{ID_MARKER}{id}")?,
            Target::Path(path) => write!(f, "{path}")?,
        }
        if let Some(attribute) = &self.attribute {
            write!(f, ".{attribute}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Reference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_path_with_attribute() {
        let reference =
            Reference::parse("dmss://AnalysisPlatformDS/4483c9b0-d505-46c9-a157-94c79f4d7a6a.jobs.0")
                .unwrap();
        assert_eq!(reference.protocol, "dmss");
        assert_eq!(reference.data_source, "AnalysisPlatformDS");
        assert_eq!(
            reference.target,
            Target::Path("4483c9b0-d505-46c9-a157-94c79f4d7a6a".to_string())
        );
        assert_eq!(reference.attribute.as_deref(), Some("jobs.0"));
    }

    #[test]
    fn test_parse_without_attribute() {
        let reference = Reference::parse("dmss://AnalysisPlatformDS/root/package/entity").unwrap();
        assert_eq!(
            reference.target,
            Target::Path("root/package/entity".to_string())
        );
        assert!(reference.attribute.is_none());
    }

    #[test]
    fn test_parse_id_defaults_protocol() {
        let reference = Reference::parse("WorkflowDS/$abc123.schedule.runs").unwrap();
        assert_eq!(reference.protocol, DEFAULT_PROTOCOL);
        assert_eq!(reference.target, Target::Id("abc123".to_string()));
        assert_eq!(reference.attribute.as_deref(), Some("schedule.runs"));
        assert_eq!(
            reference.to_string(),
            "dmss://WorkflowDS/$abc123.schedule.runs"
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Reference::parse("dmss://NoSlash").is_err());
        assert!(Reference::parse("dmss://DS/").is_err());
        assert!(Reference::parse("dmss://DS/$").is_err());
        assert!(Reference::parse("://DS/$id").is_err());
    }

    #[test]
    fn test_document_and_join() {
        let reference = Reference::parse("dmss://DS/$id.schedule").unwrap();
        assert_eq!(reference.document().to_string(), "dmss://DS/$id");
        assert_eq!(
            reference.join("runs").to_string(),
            "dmss://DS/$id.schedule.runs"
        );
        assert_eq!(
            Reference::by_id("dmss", "DS", "child").to_string(),
            "dmss://DS/$child"
        );
    }
}
