//! The consumer-facing surface: an explicitly constructed session owning
//! one executor, one identity cache and one observer registry.

use crate::{
	error::Error,
	executor::{Message, MutationExecutor},
	item::{Directory, Item, ItemHandle},
	location::Location,
	observer::{ObserverRegistry, ObserverUpdate, SubscriberGuard},
	vfs::{DiskVfs, Vfs},
};

use std::{
	future::Future,
	pin::Pin,
	sync::Arc,
	task::{Context, Poll},
};

use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

/// How [`Session::lookup`] treats the named location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
	/// Load an existing item, or fail with [`Error::NotFound`].
	ReadWrite,
	/// Fail with [`Error::AlreadyExists`] if the location is occupied at
	/// call time, otherwise create it. The guarantee is weak: nothing keeps
	/// the location exclusive once the operation resolves.
	Exclusive,
}

/// An enqueued mutation.
///
/// The work is already queued when this is handed out; awaiting only
/// collects the outcome. Dropping an unfinished `Operation` cancels it:
/// move/copy halt cooperatively at the next entry or chunk boundary, with
/// no rollback of what was already transferred.
#[derive(Debug)]
pub struct Operation<T> {
	receiver: Option<oneshot::Receiver<Result<T, Error>>>,
	halt: Option<CancellationToken>,
	immediate: Option<Result<T, Error>>,
	finished: bool,
}

// No field is ever structurally pinned.
impl<T> Unpin for Operation<T> {}

impl<T> Operation<T> {
	pub(crate) fn new(
		receiver: oneshot::Receiver<Result<T, Error>>,
		halt: Option<CancellationToken>,
	) -> Self {
		Self {
			receiver: Some(receiver),
			halt,
			immediate: None,
			finished: false,
		}
	}

	/// An operation that failed before it could be enqueued.
	pub(crate) fn ready(result: Result<T, Error>) -> Self {
		Self {
			receiver: None,
			halt: None,
			immediate: Some(result),
			finished: false,
		}
	}

	/// Explicitly cancels the operation instead of awaiting it.
	pub fn cancel(self) {
		drop(self);
	}
}

impl<T> Future for Operation<T> {
	type Output = Result<T, Error>;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let this = self.get_mut();

		if let Some(result) = this.immediate.take() {
			this.finished = true;
			return Poll::Ready(result);
		}

		let Some(receiver) = this.receiver.as_mut() else {
			// Polled again after completion.
			return Poll::Pending;
		};

		let result = match Pin::new(receiver).poll(cx) {
			Poll::Ready(Ok(result)) => result,
			// The executor is gone; its reply will never arrive.
			Poll::Ready(Err(_)) => Err(Error::ShutDown),
			Poll::Pending => return Poll::Pending,
		};

		// Drop the receiver so a contract-violating re-poll stays inert
		// instead of reaching the consumed oneshot.
		this.receiver = None;
		this.finished = true;
		Poll::Ready(result)
	}
}

impl<T> Drop for Operation<T> {
	fn drop(&mut self) {
		if !self.finished {
			if let Some(halt) = &self.halt {
				halt.cancel();
			}
		}
	}
}

struct SessionShared {
	vfs: Arc<dyn Vfs>,
	executor: MutationExecutor,
	observers: Arc<ObserverRegistry>,
}

/// A handle to one identity-consistent view of the filesystem.
///
/// Cloning is cheap and shares the executor, cache and observers. There is
/// no global state: two sessions over the same directory tree are fully
/// independent (and do not share item identity). Must be constructed inside
/// a tokio runtime, which the executor task is spawned onto.
#[derive(Clone)]
pub struct Session {
	shared: Arc<SessionShared>,
}

impl Session {
	/// A session over the real filesystem.
	#[must_use]
	pub fn new() -> Self {
		Self::with_vfs(Arc::new(DiskVfs::new()))
	}

	pub fn with_vfs(vfs: Arc<dyn Vfs>) -> Self {
		let observers = Arc::new(ObserverRegistry::new());
		let executor = MutationExecutor::start(Arc::clone(&vfs), Arc::clone(&observers));

		Self {
			shared: Arc::new(SessionShared {
				vfs,
				executor,
				observers,
			}),
		}
	}

	pub(crate) fn vfs(&self) -> &Arc<dyn Vfs> {
		&self.shared.vfs
	}

	/// Resolves `location` to its one live handle, loading it if needed.
	///
	/// Two lookups of the same canonical location yield the same instance
	/// for as long as any handle to it is alive.
	pub fn lookup(&self, location: Location, mode: AccessMode) -> Operation<ItemHandle> {
		let (reply, receiver) = oneshot::channel();

		match self.shared.executor.enqueue(Message::Lookup {
			location,
			mode,
			reply,
		}) {
			Ok(()) => Operation::new(receiver, None),
			Err(e) => Operation::ready(Err(e)),
		}
	}

	/// Creates the item named by `location` (kind taken from its form);
	/// fails with [`Error::AlreadyExists`] if something is already there.
	pub fn create(&self, location: Location) -> Operation<ItemHandle> {
		let (reply, receiver) = oneshot::channel();

		match self.shared.executor.enqueue(Message::Create { location, reply }) {
			Ok(()) => Operation::new(receiver, None),
			Err(e) => Operation::ready(Err(e)),
		}
	}

	pub(crate) fn enqueue_move(
		&self,
		item: ItemHandle,
		destination: Option<&Directory>,
		new_name: Option<&str>,
		replace_existing: bool,
	) -> Operation<ItemHandle> {
		let destination = match destination.map(Item::location).transpose() {
			Ok(destination) => destination,
			Err(e) => return Operation::ready(Err(e)),
		};

		let halt = CancellationToken::new();
		let (reply, receiver) = oneshot::channel();

		match self.shared.executor.enqueue(Message::Move {
			item,
			destination,
			new_name: new_name.map(str::to_owned),
			replace_existing,
			halt: halt.clone(),
			reply,
		}) {
			Ok(()) => Operation::new(receiver, Some(halt)),
			Err(e) => Operation::ready(Err(e)),
		}
	}

	pub(crate) fn enqueue_copy(
		&self,
		item: ItemHandle,
		destination: Option<&Directory>,
		new_name: Option<&str>,
		replace_existing: bool,
	) -> Operation<ItemHandle> {
		let destination = match destination.map(Item::location).transpose() {
			Ok(destination) => destination,
			Err(e) => return Operation::ready(Err(e)),
		};

		let halt = CancellationToken::new();
		let (reply, receiver) = oneshot::channel();

		match self.shared.executor.enqueue(Message::Copy {
			item,
			destination,
			new_name: new_name.map(str::to_owned),
			replace_existing,
			halt: halt.clone(),
			reply,
		}) {
			Ok(()) => Operation::new(receiver, Some(halt)),
			Err(e) => Operation::ready(Err(e)),
		}
	}

	pub(crate) fn enqueue_duplicate(&self, item: ItemHandle) -> Operation<ItemHandle> {
		let halt = CancellationToken::new();
		let (reply, receiver) = oneshot::channel();

		match self.shared.executor.enqueue(Message::Duplicate {
			item,
			halt: halt.clone(),
			reply,
		}) {
			Ok(()) => Operation::new(receiver, Some(halt)),
			Err(e) => Operation::ready(Err(e)),
		}
	}

	pub(crate) fn enqueue_delete(&self, item: ItemHandle) -> Operation<()> {
		let (reply, receiver) = oneshot::channel();

		match self.shared.executor.enqueue(Message::Delete { item, reply }) {
			Ok(()) => Operation::new(receiver, None),
			Err(e) => Operation::ready(Err(e)),
		}
	}

	pub(crate) async fn subscribe_observer(
		&self,
		root: Location,
	) -> Result<(watch::Receiver<ObserverUpdate>, Arc<SubscriberGuard>), Error> {
		self.shared
			.observers
			.subscribe(Arc::clone(&self.shared.vfs), root)
			.await
	}
}

impl Default for Session {
	fn default() -> Self {
		Self::new()
	}
}
