use crate::location::Location;

use std::{io, path::Path};

use thiserror::Error;

/// Error type for every operation in this crate.
///
/// No variant is fatal to the process; each failure is reported only to the
/// caller or stream that initiated the affected operation.
#[derive(Error, Debug)]
pub enum Error {
	// Lookup errors
	#[error("no item exists at {0}")]
	NotFound(Location),
	#[error("an item already exists at {0}")]
	AlreadyExists(Location),

	// User errors
	#[error("destination {0} is occupied and replacement was not requested")]
	Conflict(Location),
	#[error("handle is stale, the item at {0} was deleted")]
	Stale(Location),
	#[error("invalid enumeration options: {0}")]
	InvalidOptions(&'static str),

	// Terminal states, not failures
	#[error("operation was canceled before completion")]
	Canceled,
	#[error("the session executor has shut down")]
	ShutDown,

	// Collaborator errors
	#[error("file I/O error: {source}; path: '{}'", .path.display())]
	Underlying {
		path: Box<Path>,
		#[source]
		source: io::Error,
	},
	#[error("watch subsystem failure: {0}")]
	WatchSubsystem(String),
}

impl Error {
	pub(crate) fn underlying(path: impl AsRef<Path>, source: io::Error) -> Self {
		Self::Underlying {
			path: path.as_ref().into(),
			source,
		}
	}

	/// Whether this error means "the target doesn't exist on disk".
	#[must_use]
	pub fn is_not_found(&self) -> bool {
		matches!(self, Self::NotFound(_))
	}
}
