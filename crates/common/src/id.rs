//! ID generation utilities.

use ulid::Ulid;
use url::Url;

/// ID generator for locally minted IRIs.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    _private: (),
}

impl IdGenerator {
    /// Create a new ID generator.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Generate a new ULID-based ID.
    ///
    /// ULIDs are lexicographically sortable and shorter than UUIDs.
    #[must_use]
    pub fn generate(&self) -> String {
        Ulid::new().to_string().to_lowercase()
    }

    /// Mint an IRI of the form `{base}/{segment}/{ulid}`.
    pub fn iri(&self, base: &Url, segment: &str) -> Result<Url, url::ParseError> {
        let base = base.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/{segment}/{}", self.generate()))
    }
}
