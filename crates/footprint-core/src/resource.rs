//! `footprint://<id>` resource addressing

use std::fmt;
use std::str::FromStr;

use url::Url;
use uuid::Uuid;

use crate::error::{FootprintError, Result};

/// URI scheme for footprint resources
pub const RESOURCE_SCHEME: &str = "footprint";

/// A parsed footprint resource address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceUri {
    id: Uuid,
}

impl ResourceUri {
    pub fn new(id: Uuid) -> Self {
        Self { id }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Parse `footprint://<uuid>`
    ///
    /// An unknown scheme has no handler and is reported as
    /// [`FootprintError::NotFound`]. A URI that does not parse, or a
    /// `footprint` URI with a malformed id, is an
    /// [`FootprintError::InvalidResource`]. Whether the id exists is checked
    /// later.
    pub fn parse(uri: &str) -> Result<Self> {
        let invalid = |reason: &str| FootprintError::InvalidResource(format!("{}: {}", uri, reason));

        let url = Url::parse(uri).map_err(|e| invalid(&e.to_string()))?;
        if url.scheme() != RESOURCE_SCHEME {
            return Err(FootprintError::NotFound(format!(
                "No resource handler for scheme {:?} in {} (expected {}://<id>)",
                url.scheme(),
                uri,
                RESOURCE_SCHEME
            )));
        }
        if !matches!(url.path(), "" | "/") || url.query().is_some() || url.fragment().is_some() {
            return Err(invalid("expected footprint://<id> with nothing after the id"));
        }

        let host = url.host_str().ok_or_else(|| invalid("missing footprint id"))?;
        let id = Uuid::parse_str(host).map_err(|e| invalid(&format!("malformed id ({})", e)))?;
        Ok(Self { id })
    }
}

impl FromStr for ResourceUri {
    type Err = FootprintError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ResourceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", RESOURCE_SCHEME, self.id)
    }
}
