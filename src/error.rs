use thiserror::Error;

pub type Result<T> = std::result::Result<T, NexusError>;

#[derive(Error, Debug)]
pub enum NexusError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Config file error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Invalid date: {0}")]
    InvalidDate(String),
    #[error("Object find error: {0}")]
    ObjectFind(#[from] Box<gix::object::find::existing::Error>),
    #[error("Commit error: {0}")]
    Commit(#[from] Box<gix::object::commit::Error>),
    #[error("Reference find error: {0}")]
    RefFind(#[from] Box<gix::reference::find::existing::Error>),
    #[error("Head peel error: {0}")]
    HeadPeel(#[from] Box<gix::head::peel::to_commit::Error>),
    #[error("Object find with conversion error: {0}")]
    ObjectFindConv(#[from] Box<gix::object::find::existing::with_conversion::Error>),
    #[error("Object decode error: {0}")]
    ObjectDecode(#[from] Box<gix::objs::decode::Error>),
    #[error("Diff tree to tree error: {0}")]
    DiffTreeToTree(#[from] Box<gix::repository::diff_tree_to_tree::Error>),
    #[error("Git discover error: {0}")]
    GitDiscover(#[from] Box<gix::discover::Error>),
}

impl NexusError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        NexusError::NotFound {
            kind,
            id: id.into(),
        }
    }
}

// Manual From implementations for unboxed to boxed conversions
impl From<gix::object::find::existing::Error> for NexusError {
    fn from(err: gix::object::find::existing::Error) -> Self {
        NexusError::ObjectFind(Box::new(err))
    }
}

impl From<gix::object::commit::Error> for NexusError {
    fn from(err: gix::object::commit::Error) -> Self {
        NexusError::Commit(Box::new(err))
    }
}

impl From<gix::reference::find::existing::Error> for NexusError {
    fn from(err: gix::reference::find::existing::Error) -> Self {
        NexusError::RefFind(Box::new(err))
    }
}

impl From<gix::head::peel::to_commit::Error> for NexusError {
    fn from(err: gix::head::peel::to_commit::Error) -> Self {
        NexusError::HeadPeel(Box::new(err))
    }
}

impl From<gix::object::find::existing::with_conversion::Error> for NexusError {
    fn from(err: gix::object::find::existing::with_conversion::Error) -> Self {
        NexusError::ObjectFindConv(Box::new(err))
    }
}

impl From<gix::objs::decode::Error> for NexusError {
    fn from(err: gix::objs::decode::Error) -> Self {
        NexusError::ObjectDecode(Box::new(err))
    }
}

impl From<gix::repository::diff_tree_to_tree::Error> for NexusError {
    fn from(err: gix::repository::diff_tree_to_tree::Error) -> Self {
        NexusError::DiffTreeToTree(Box::new(err))
    }
}

impl From<gix::discover::Error> for NexusError {
    fn from(err: gix::discover::Error) -> Self {
        NexusError::GitDiscover(Box::new(err))
    }
}
