//! Display identities: which line, team or factory a board is watching.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("line code must not be empty")]
    EmptyLineCode,

    #[error("factory must not be empty")]
    EmptyFactory,

    #[error("invalid identity '{0}': expected line:CODE, team:FACTORY/LINE/TEAM, center:FACTORY/LINE or factory:FACTORY")]
    Unparseable(String),
}

/// The key a display subscribes to and filters messages by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Identity {
    /// A single production line, optionally pinned to a factory and a
    /// position index on a multi-line board.
    Line {
        code: String,
        factory: Option<String>,
        index: Option<u32>,
    },
    Team {
        factory: String,
        line: String,
        team: String,
    },
    /// Aggregate "center TV" for one line of a factory.
    Center { factory: String, line: String },
    Factory { factory: String },
}

impl Identity {
    pub fn line(code: impl Into<String>) -> Result<Self, IdentityError> {
        let code = code.into();
        if code.trim().is_empty() {
            return Err(IdentityError::EmptyLineCode);
        }
        Ok(Self::Line {
            code,
            factory: None,
            index: None,
        })
    }

    pub fn team(
        factory: impl Into<String>,
        line: impl Into<String>,
        team: impl Into<String>,
    ) -> Result<Self, IdentityError> {
        let factory = factory.into();
        if factory.trim().is_empty() {
            return Err(IdentityError::EmptyFactory);
        }
        Ok(Self::Team {
            factory,
            line: line.into(),
            team: team.into(),
        })
    }

    pub fn center(factory: impl Into<String>, line: impl Into<String>) -> Result<Self, IdentityError> {
        let factory = factory.into();
        if factory.trim().is_empty() {
            return Err(IdentityError::EmptyFactory);
        }
        Ok(Self::Center {
            factory,
            line: line.into(),
        })
    }

    pub fn with_factory(self, factory: impl Into<String>) -> Self {
        match self {
            Self::Line { code, index, .. } => Self::Line {
                code,
                factory: Some(factory.into()),
                index,
            },
            other => other,
        }
    }

    pub fn with_index(self, index: u32) -> Self {
        match self {
            Self::Line { code, factory, .. } => Self::Line {
                code,
                factory,
                index: Some(index),
            },
            other => other,
        }
    }

    /// Parse the textual form produced by [`fmt::Display`].
    pub fn parse(input: &str) -> Result<Self, IdentityError> {
        let unparseable = || IdentityError::Unparseable(input.to_string());
        let (kind, rest) = input.split_once(':').ok_or_else(unparseable)?;
        let parts: Vec<&str> = rest.split('/').collect();
        match (kind, parts.as_slice()) {
            ("line", [code]) => Self::line(*code),
            ("line", [factory, code]) => Ok(Self::line(*code)?.with_factory(*factory)),
            ("team", [factory, line, team]) => Self::team(*factory, *line, *team),
            ("center", [factory, line]) => Self::center(*factory, *line),
            ("factory", [factory]) if !factory.trim().is_empty() => Ok(Self::Factory {
                factory: factory.to_string(),
            }),
            ("factory", [_]) => Err(IdentityError::EmptyFactory),
            _ => Err(unparseable()),
        }
    }

    /// Whether an incoming message belongs to this display.
    ///
    /// Messages that carry no identifying fields at all are treated as
    /// belonging to whoever is subscribed on that channel.
    pub fn matches(&self, fields: &IdentityFields) -> bool {
        if fields.is_empty() {
            return true;
        }
        match self {
            Self::Line { code, factory, .. } => {
                let code_ok = fields.line_code.as_deref().is_none_or(|c| c == code);
                let factory_ok = match (factory, fields.factory.as_deref()) {
                    (Some(mine), Some(theirs)) => mine == theirs,
                    _ => true,
                };
                code_ok && factory_ok && fields.line_code.is_some()
            }
            Self::Team {
                factory,
                line,
                team,
            } => {
                fields.factory.as_deref() == Some(factory.as_str())
                    && fields.line.as_deref().is_none_or(|l| l == line)
                    && fields.team.as_deref().is_none_or(|t| t == team)
            }
            Self::Center { factory, line } => {
                fields.factory.as_deref() == Some(factory.as_str())
                    && fields.line.as_deref().is_none_or(|l| l == line)
            }
            Self::Factory { factory } => fields.factory.as_deref() == Some(factory.as_str()),
        }
    }

    pub fn line_type(&self) -> Option<LineType> {
        match self {
            Self::Line { code, .. } => Some(detect_line_type(code)),
            _ => None,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Line {
                code,
                factory: Some(factory),
                ..
            } => write!(f, "line:{factory}/{code}"),
            Self::Line { code, .. } => write!(f, "line:{code}"),
            Self::Team {
                factory,
                line,
                team,
            } => write!(f, "team:{factory}/{line}/{team}"),
            Self::Center { factory, line } => write!(f, "center:{factory}/{line}"),
            Self::Factory { factory } => write!(f, "factory:{factory}"),
        }
    }
}

/// Identifying fields carried by an update message, all optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityFields {
    pub line_code: Option<String>,
    pub factory: Option<String>,
    pub line: Option<String>,
    pub team: Option<String>,
}

impl IdentityFields {
    pub fn is_empty(&self) -> bool {
        self.line_code.is_none() && self.factory.is_none() && self.line.is_none() && self.team.is_none()
    }
}

/// Kind of production line, which decides the board layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LineType {
    /// Sewing line.
    Htm,
    /// Cutting line.
    Cd,
}

impl fmt::Display for LineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Htm => f.write_str("HTM"),
            Self::Cd => f.write_str("CD"),
        }
    }
}

pub fn detect_line_type(code: &str) -> LineType {
    if code.to_ascii_uppercase().contains("CD") {
        LineType::Cd
    } else {
        LineType::Htm
    }
}
