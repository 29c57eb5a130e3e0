#[derive(Debug)]
pub enum StoreError {
    EnsureDir {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    ReadTable {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    ParseTable {
        path: std::path::PathBuf,
        source: serde_json::Error,
    },
    SerializeTable {
        source: serde_json::Error,
    },
    WriteTable {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    Rename {
        from: std::path::PathBuf,
        to: std::path::PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EnsureDir { path, source } => {
                write!(
                    f,
                    "failed to ensure store directory '{}': {source}",
                    path.display()
                )
            }
            Self::ReadTable { path, source } => {
                write!(f, "failed reading table '{}': {source}", path.display())
            }
            Self::ParseTable { path, source } => {
                write!(f, "invalid JSON in table '{}': {source}", path.display())
            }
            Self::SerializeTable { source } => {
                write!(f, "failed serializing table: {source}")
            }
            Self::WriteTable { path, source } => {
                write!(f, "failed writing table '{}': {source}", path.display())
            }
            Self::Rename { from, to, source } => {
                write!(
                    f,
                    "failed renaming '{}' to '{}': {source}",
                    from.display(),
                    to.display()
                )
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::EnsureDir { source, .. } => Some(source),
            Self::ReadTable { source, .. } => Some(source),
            Self::ParseTable { source, .. } => Some(source),
            Self::SerializeTable { source } => Some(source),
            Self::WriteTable { source, .. } => Some(source),
            Self::Rename { source, .. } => Some(source),
        }
    }
}

#[derive(Debug)]
pub enum DedupError {
    Store(StoreError),
    ChannelClosed,
    ServiceJoin(tokio::task::JoinError),
}

impl std::fmt::Display for DedupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(source) => write!(f, "{source}"),
            Self::ChannelClosed => write!(f, "dedup service channel closed"),
            Self::ServiceJoin(source) => write!(f, "dedup service task join error: {source}"),
        }
    }
}

impl std::error::Error for DedupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(source) => Some(source),
            Self::ServiceJoin(source) => Some(source),
            Self::ChannelClosed => None,
        }
    }
}

impl From<StoreError> for DedupError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<tokio::task::JoinError> for DedupError {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::ServiceJoin(value)
    }
}
