//! Boundary to the underlying OS file system.
//!
//! Everything the core needs from the OS goes through [`Vfs`], so the
//! serialized executor and the change observers stay testable against any
//! backing store. [`DiskVfs`] is the real implementation.

use crate::{error::Error, location::ItemKind};

use std::{any::Any, path::{Path, PathBuf}};

use async_channel as chan;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

mod disk;

pub use disk::DiskVfs;

/// A change notification for one watched directory.
///
/// The payload is deliberately coarse: every change triggers a fresh
/// enumeration, so the only distinction that matters is "something changed"
/// versus "the watch subsystem broke".
#[derive(Debug, Clone)]
pub enum WatchEvent {
	Changed,
	Error(String),
}

/// A live OS watch on one directory.
///
/// Dropping the guard tears the underlying watch down.
pub struct DirWatch {
	pub events: chan::Receiver<WatchEvent>,
	_guard: Box<dyn Any + Send>,
}

impl DirWatch {
	#[must_use]
	pub fn new(events: chan::Receiver<WatchEvent>, guard: impl Any + Send) -> Self {
		Self {
			events,
			_guard: Box::new(guard),
		}
	}
}

/// The OS file system collaborator.
///
/// Move and copy take a halt token: when it fires mid-operation the call
/// returns [`Error::Canceled`] and a possibly partial item is left at the
/// destination. No rollback is attempted.
#[async_trait]
pub trait Vfs: Send + Sync + 'static {
	/// The kind of the item at `path`, or `None` if nothing exists there.
	async fn kind_of(&self, path: &Path) -> Result<Option<ItemKind>, Error>;

	/// Deep enumeration of `directory`, parents before their contents,
	/// hidden entries included. Filtering happens at the subscriber.
	async fn enumerate(&self, directory: &Path) -> Result<Vec<(PathBuf, ItemKind)>, Error>;

	async fn create(&self, path: &Path, kind: ItemKind) -> Result<(), Error>;

	async fn move_item(
		&self,
		source: &Path,
		destination: &Path,
		halt: &CancellationToken,
	) -> Result<(), Error>;

	async fn copy_item(
		&self,
		source: &Path,
		destination: &Path,
		halt: &CancellationToken,
	) -> Result<(), Error>;

	async fn remove(&self, path: &Path) -> Result<(), Error>;

	// Content channel, attached to the same handle identity as everything
	// else but outside the identity/mutation core.
	async fn read(&self, path: &Path) -> Result<Vec<u8>, Error>;
	async fn write(&self, path: &Path, contents: &[u8]) -> Result<(), Error>;

	// Extended attribute channel. `None` value removes the attribute.
	async fn read_attribute(&self, path: &Path, key: &str) -> Result<Option<Vec<u8>>, Error>;
	async fn write_attribute(
		&self,
		path: &Path,
		key: &str,
		value: Option<&[u8]>,
	) -> Result<(), Error>;

	/// Starts watching `directory` for changes.
	fn watch(&self, directory: &Path) -> Result<DirWatch, Error>;
}
