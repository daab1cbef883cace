use thiserror::Error;

/// A palette entry could not be turned into geometry. Always recovered locally.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResolveError {
    #[error("no model for block `{0}`")]
    UnknownBlock(String),
    #[error("model `{model}` references unknown material `{material}`")]
    UnknownMaterial { model: String, material: String },
    #[error("geometry for `{block}` is malformed: {reason}")]
    Malformed { block: String, reason: String },
    #[error("resolver failed for `{block}`: {reason}")]
    Other { block: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid block key `{0}`")]
    BadBlockKey(String),
}

/// Fatal precompute failures. Nothing downstream can render without a palette.
#[derive(Debug, Error)]
pub enum PrecomputeError {
    #[error("palette is empty")]
    EmptyPalette,
    #[error("every one of the {0} palette entries failed to resolve")]
    AllEntriesFailed(usize),
    #[error("could not build resolver pool: {0}")]
    Pool(String),
}
