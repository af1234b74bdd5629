//! Item handles.
//!
//! A handle represents the identity of one file system item. There is at most
//! one live handle per canonical location; cloning a handle clones the
//! reference, not the identity. The location of a handle changes in place on
//! move/rename, and a deleted handle turns stale instead of disappearing.

use crate::{
	error::Error,
	location::{ItemKind, Location},
	observer::{subscribe_listing, DirectoryListing, ListOptions},
	session::{AccessMode, Operation, Session},
};

use std::sync::Arc;

use async_stream::stream;
use futures::{Future, Stream, StreamExt};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Where a handle currently points, or where it pointed when it was deleted.
#[derive(Debug, Clone)]
pub(crate) enum ItemState {
	Alive(Location),
	Stale(Location),
}

/// Shared state behind every handle for one item.
///
/// The identity cache stores weak references to this; whoever holds a handle
/// keeps it alive.
#[derive(Debug)]
pub(crate) struct ItemInner {
	kind: ItemKind,
	state: watch::Sender<ItemState>,
}

impl ItemInner {
	pub fn new(state: ItemState, kind: ItemKind) -> Self {
		let (state, _) = watch::channel(state);

		Self { kind, state }
	}

	pub fn kind(&self) -> ItemKind {
		self.kind
	}

	pub fn current(&self) -> ItemState {
		self.state.borrow().clone()
	}

	pub fn subscribe(&self) -> watch::Receiver<ItemState> {
		self.state.subscribe()
	}

	/// In-place location update on move/rename; identity is preserved.
	pub fn relocate(&self, new: Location) {
		self.state.send_replace(ItemState::Alive(new));
	}

	/// Marks the handle terminal after a delete (or after being replaced).
	pub fn mark_stale(&self) {
		self.state.send_modify(|state| {
			if let ItemState::Alive(location) = state {
				*state = ItemState::Stale(location.clone());
			}
		});
	}
}

/// A handle to a regular file.
#[derive(Debug, Clone)]
pub struct File {
	pub(crate) inner: Arc<ItemInner>,
}

/// A handle to a directory.
#[derive(Debug, Clone)]
pub struct Directory {
	pub(crate) inner: Arc<ItemInner>,
}

/// Either kind of handle.
#[derive(Debug, Clone)]
pub enum ItemHandle {
	File(File),
	Directory(Directory),
}

impl ItemHandle {
	pub(crate) fn from_inner(inner: Arc<ItemInner>) -> Self {
		match inner.kind() {
			ItemKind::File => Self::File(File { inner }),
			ItemKind::Directory => Self::Directory(Directory { inner }),
		}
	}

	/// Whether two handles denote the very same live object.
	#[must_use]
	pub fn same_item(&self, other: &Self) -> bool {
		Arc::ptr_eq(self.inner(), other.inner())
	}

	#[must_use]
	pub fn into_directory(self) -> Option<Directory> {
		match self {
			Self::Directory(directory) => Some(directory),
			Self::File(_) => None,
		}
	}

	#[must_use]
	pub fn into_file(self) -> Option<File> {
		match self {
			Self::File(file) => Some(file),
			Self::Directory(_) => None,
		}
	}

	#[must_use]
	pub fn as_directory(&self) -> Option<&Directory> {
		match self {
			Self::Directory(directory) => Some(directory),
			Self::File(_) => None,
		}
	}
}

mod sealed {
	use super::{Directory, File, ItemHandle, ItemInner};

	use std::sync::Arc;

	pub trait HasInner {
		fn inner(&self) -> &Arc<ItemInner>;
		fn as_handle(&self) -> ItemHandle;
	}

	impl HasInner for File {
		fn inner(&self) -> &Arc<ItemInner> {
			&self.inner
		}

		fn as_handle(&self) -> ItemHandle {
			ItemHandle::File(self.clone())
		}
	}

	impl HasInner for Directory {
		fn inner(&self) -> &Arc<ItemInner> {
			&self.inner
		}

		fn as_handle(&self) -> ItemHandle {
			ItemHandle::Directory(self.clone())
		}
	}

	impl HasInner for ItemHandle {
		fn inner(&self) -> &Arc<ItemInner> {
			match self {
				ItemHandle::File(file) => &file.inner,
				ItemHandle::Directory(directory) => &directory.inner,
			}
		}

		fn as_handle(&self) -> ItemHandle {
			self.clone()
		}
	}
}

pub(crate) use sealed::HasInner;

/// Core capability of every handle: identity and observable state.
pub trait Item: sealed::HasInner + Send + Sync {
	fn kind(&self) -> ItemKind {
		self.inner().kind()
	}

	fn is_stale(&self) -> bool {
		matches!(self.inner().current(), ItemState::Stale(_))
	}

	/// The current canonical location, or [`Error::Stale`] after a delete.
	fn location(&self) -> Result<Location, Error> {
		match self.inner().current() {
			ItemState::Alive(location) => Ok(location),
			ItemState::Stale(location) => Err(Error::Stale(location)),
		}
	}

	/// The last path component of the current location.
	fn name(&self) -> Result<String, Error> {
		self.location().map(|location| location.name().to_owned())
	}

	/// Replays the current location to every new subscriber, then emits once
	/// per move/rename. Ends when the handle goes stale.
	fn location_stream(&self) -> impl Stream<Item = Location> + Send + 'static {
		let mut states = WatchStream::new(self.inner().subscribe());

		stream! {
			while let Some(state) = states.next().await {
				match state {
					ItemState::Alive(location) => yield location,
					ItemState::Stale(_) => break,
				}
			}
		}
	}

	/// The item's name over time; emits on every move/rename.
	fn name_stream(&self) -> impl Stream<Item = String> + Send + 'static {
		self.location_stream()
			.map(|location| location.name().to_owned())
	}

	/// The containing directory over time: emits the current parent, then
	/// again on every move/rename, and a final `None` when the item is
	/// deleted (or when it reaches the root).
	fn parent_stream(&self, session: &Session) -> impl Stream<Item = Option<Directory>> + Send + 'static {
		let session = session.clone();
		let mut states = WatchStream::new(self.inner().subscribe());

		stream! {
			while let Some(state) = states.next().await {
				match state {
					ItemState::Alive(location) => match location.parent() {
						Some(parent) => {
							yield session
								.lookup(parent, AccessMode::ReadWrite)
								.await
								.ok()
								.and_then(ItemHandle::into_directory);
						}
						None => yield None,
					},
					ItemState::Stale(_) => {
						yield None;
						break;
					}
				}
			}
		}
	}
}

impl Item for File {}
impl Item for Directory {}
impl Item for ItemHandle {}

/// Mutation capability. Every operation is serialized through the session's
/// executor; invocation enqueues immediately and the returned [`Operation`]
/// resolves on the caller's own context.
pub trait Mutable: Item {
	/// Moves or renames the item. Destination defaults to the current
	/// parent, the name defaults to the current name. The handle itself is
	/// the result: its location is updated in place.
	fn move_to(
		&self,
		session: &Session,
		destination: Option<&Directory>,
		new_name: Option<&str>,
		replace_existing: bool,
	) -> Operation<ItemHandle> {
		session.enqueue_move(self.as_handle(), destination, new_name, replace_existing)
	}

	/// Renames in place, replacing any previous item under the new name.
	fn rename_to(&self, session: &Session, new_name: &str) -> Operation<ItemHandle> {
		self.move_to(session, None, Some(new_name), true)
	}

	/// Copies the item; the source handle's identity is untouched and the
	/// operation resolves to a handle for the new copy.
	fn copy_to(
		&self,
		session: &Session,
		destination: Option<&Directory>,
		new_name: Option<&str>,
		replace_existing: bool,
	) -> Operation<ItemHandle> {
		session.enqueue_copy(self.as_handle(), destination, new_name, replace_existing)
	}

	/// Copies into the same parent under a generated non-colliding name.
	fn duplicate(&self, session: &Session) -> Operation<ItemHandle> {
		session.enqueue_duplicate(self.as_handle())
	}

	/// Deletes the item; the handle turns stale on success.
	fn delete(&self, session: &Session) -> Operation<()> {
		session.enqueue_delete(self.as_handle())
	}
}

impl Mutable for File {}
impl Mutable for Directory {}
impl Mutable for ItemHandle {}

/// Extended attribute capability, attached to the same handle identity as
/// everything else. The storage itself is the OS collaborator's concern.
pub trait AttributeBearing: Item {
	fn attribute(
		&self,
		session: &Session,
		key: &str,
	) -> impl Future<Output = Result<Option<Vec<u8>>, Error>> + Send {
		let session = session.clone();
		let key = key.to_owned();
		let location = self.location();

		async move {
			let location = location?;
			session
				.vfs()
				.read_attribute(location.as_path(), &key)
				.await
		}
	}

	fn set_attribute(
		&self,
		session: &Session,
		key: &str,
		value: Option<&[u8]>,
	) -> impl Future<Output = Result<(), Error>> + Send {
		let session = session.clone();
		let key = key.to_owned();
		let value = value.map(<[u8]>::to_vec);
		let location = self.location();

		async move {
			let location = location?;
			session
				.vfs()
				.write_attribute(location.as_path(), &key, value.as_deref())
				.await
		}
	}
}

impl AttributeBearing for File {}
impl AttributeBearing for Directory {}
impl AttributeBearing for ItemHandle {}

impl Directory {
	/// A continuously updating stream of this directory's contents.
	///
	/// The first value reflects the current contents (warm start); every
	/// subsequent value is a fresh snapshot caused by a mutation or an OS
	/// change event, with bursts coalesced. All subscribers to one directory
	/// share a single OS watch but receive independently paced streams,
	/// each filtered by its own options.
	///
	/// A watch subsystem failure ends the stream after one terminal
	/// [`Error::WatchSubsystem`] item; resubscribe to recover.
	pub fn children_stream(
		&self,
		session: &Session,
		options: ListOptions,
	) -> Result<impl Stream<Item = Result<DirectoryListing, Error>> + Send + 'static, Error> {
		options.validate()?;
		let root = self.location()?;

		Ok(subscribe_listing(session.clone(), root, options))
	}
}

impl File {
	/// Current contents of the file.
	pub async fn contents(&self, session: &Session) -> Result<Vec<u8>, Error> {
		let location = self.location()?;

		session.vfs().read(location.as_path()).await
	}

	/// Replaces the contents of the file.
	pub async fn write_contents(&self, session: &Session, contents: &[u8]) -> Result<(), Error> {
		let location = self.location()?;

		session.vfs().write(location.as_path(), contents).await
	}

	/// Current contents decoded as UTF-8.
	pub async fn text(&self, session: &Session) -> Result<String, Error> {
		let location = self.location()?;
		let bytes = session.vfs().read(location.as_path()).await?;

		String::from_utf8(bytes).map_err(|e| {
			Error::underlying(
				location.as_path(),
				std::io::Error::new(std::io::ErrorKind::InvalidData, e),
			)
		})
	}

	/// Replaces contents with UTF-8 text.
	pub async fn write_text(&self, session: &Session, text: &str) -> Result<(), Error> {
		self.write_contents(session, text.as_bytes()).await
	}
}
