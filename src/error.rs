//! Error types for control-thread operations.
//!
//! The audio thread never returns errors. Everything here is produced by
//! [`SoundSystem`](crate::SoundSystem), [`NodeGraph`](crate::NodeGraph) or
//! the settings loader.

use std::path::PathBuf;

use thiserror::Error;

use crate::node::NodeId;
use crate::space::SpaceId;

/// Errors surfaced by the control-thread API.
#[derive(Debug, Error)]
pub enum Error {
    /// The requested edit would make the node graph cyclic. The graph is unchanged.
    #[error("connecting {from:?} into {to:?} would create a cycle")]
    CycleDetected {
        /// Node whose output would be consumed.
        from: NodeId,
        /// Node that would consume it.
        to: NodeId,
    },

    /// A node id was not found in the graph (never added, or already removed).
    #[error("unknown node: {0:?}")]
    UnknownNode(NodeId),

    /// A node with this id is already in the graph.
    #[error("node {0:?} is already in the graph")]
    DuplicateNode(NodeId),

    /// A sound space id was not found.
    #[error("unknown sound space: {0:?}")]
    UnknownSpace(SpaceId),

    /// `create_node_by_name` was given a name with no factory.
    #[error("unknown node kind: {0}")]
    UnknownNodeKind(String),

    /// The audio engine is owned by a device stream, so it cannot be driven inline.
    #[error("the audio engine is not attached to this sound system")]
    EngineDetached,

    /// An engine created by a different sound system was offered for attaching.
    #[error("the audio engine belongs to a different sound system")]
    ForeignEngine,

    /// The output device could not be opened or started.
    #[error("audio device error: {0}")]
    Device(String),

    /// Failed to read a settings file
    #[error("failed to read file '{path}': {source}")]
    ReadFile {
        /// Path of the file that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a settings file
    #[error("failed to write file '{path}': {source}")]
    WriteFile {
        /// Path of the file that could not be written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Failed to serialize TOML
    #[error("failed to serialize TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Shorthand for results carrying [`Error`].
pub type Result<T> = core::result::Result<T, Error>;

impl Error {
    pub(crate) fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::ReadFile {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn write_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::WriteFile {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn cycle_display_names_both_nodes() {
        let err = Error::CycleDetected {
            from: NodeId(3),
            to: NodeId(7),
        };
        let msg = err.to_string();
        assert!(msg.contains("NodeId(3)"), "got: {msg}");
        assert!(msg.contains("NodeId(7)"), "got: {msg}");
    }

    #[test]
    fn read_file_exposes_io_source() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "mock");
        let err = Error::read_file("/a/b.toml", io);
        assert!(err.to_string().contains("/a/b.toml"));
        assert!(err.source().is_some());
    }
}
