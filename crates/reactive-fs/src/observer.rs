//! Change observation.
//!
//! One observer per watched directory location, shared by every subscriber.
//! The observer owns the OS watch, re-enumerates on each change event
//! (coalescing bursts into at most one follow-up pass) and publishes
//! unfiltered listing snapshots through a watch channel; each subscriber
//! filters by its own options and paces itself independently.

use crate::{
	error::Error,
	location::Location,
	session::Session,
	vfs::{Vfs, WatchEvent},
};

use std::{
	collections::{HashMap, HashSet},
	pin::pin,
	sync::{Arc, Weak},
};

use async_channel as chan;
use async_stream::stream;
use futures::{Stream, StreamExt};
use futures_concurrency::stream::Merge;
use serde::{Deserialize, Serialize};
use tokio::{
	spawn,
	sync::{watch, Mutex},
};
use tokio_stream::wrappers::WatchStream;
use tracing::{trace, warn};

/// Filtering options for directory enumeration.
///
/// Package descendant filtering is rejected as invalid input: package
/// semantics are OS specific and have no meaning at this layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOptions {
	pub skip_subdirectory_descendants: bool,
	pub skip_hidden: bool,
	pub skip_package_descendants: bool,
}

impl Default for ListOptions {
	fn default() -> Self {
		Self {
			skip_subdirectory_descendants: true,
			skip_hidden: true,
			skip_package_descendants: false,
		}
	}
}

impl ListOptions {
	pub(crate) fn validate(self) -> Result<(), Error> {
		if self.skip_package_descendants {
			return Err(Error::InvalidOptions(
				"package descendant filtering is OS specific and not supported",
			));
		}

		Ok(())
	}
}

/// An immutable snapshot of a directory's contents: deduplicated by location,
/// ordered by arrival.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryListing {
	entries: Arc<[Location]>,
}

impl DirectoryListing {
	pub(crate) fn new(entries: Vec<Location>) -> Self {
		let mut seen = HashSet::with_capacity(entries.len());
		let deduplicated = entries
			.into_iter()
			.filter(|location| seen.insert(location.clone()))
			.collect::<Vec<_>>();

		Self {
			entries: deduplicated.into(),
		}
	}

	#[must_use]
	pub fn entries(&self) -> &[Location] {
		&self.entries
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	#[must_use]
	pub fn contains(&self, location: &Location) -> bool {
		self.entries.contains(location)
	}

	/// Applies a subscriber's options to this unfiltered snapshot.
	#[must_use]
	pub fn filtered(&self, root: &Location, options: ListOptions) -> Self {
		let entries = self
			.entries
			.iter()
			.filter(|location| {
				let Some(components) = location.components_below(root) else {
					return false;
				};
				let components = components.collect::<Vec<_>>();

				!components.is_empty()
					&& !(options.skip_subdirectory_descendants && components.len() > 1)
					&& !(options.skip_hidden
						&& components.iter().any(|component| component.starts_with('.')))
			})
			.cloned()
			.collect();

		Self { entries }
	}

	fn with_added(&self, location: Location) -> Self {
		if self.contains(&location) {
			return self.clone();
		}

		let mut entries = self.entries.to_vec();
		entries.push(location);

		Self {
			entries: entries.into(),
		}
	}

	fn with_removed(&self, location: &Location) -> Self {
		// A removed directory takes its recorded descendants with it; they
		// are gone from disk and must not linger until the next refresh.
		let subtree = location
			.kind()
			.is_directory()
			.then(|| location.to_directory_form());

		Self {
			entries: self
				.entries
				.iter()
				.filter(|entry| {
					*entry != location
						&& subtree
							.as_ref()
							.is_none_or(|directory| entry.components_below(directory).is_none())
				})
				.cloned()
				.collect(),
		}
	}
}

/// A single child set change caused by a mutation, applied to the published
/// listing without a full re-enumeration.
#[derive(Debug)]
pub(crate) enum ListingDelta {
	Added(Location),
	Removed(Location),
}

#[derive(Debug, Clone)]
pub(crate) enum ObserverUpdate {
	Listing(DirectoryListing),
	Failed(String),
}

/// Observer life cycle. `Idle` only exists before the warm start listing is
/// published; a `Failed` observer is terminal and must be replaced by a
/// fresh subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObserverState {
	Idle,
	Watching,
	Refreshing,
	Stopped,
	Failed,
}

/// Keeps the observer running; when the last subscriber drops this, the
/// observer is told to stop and the OS watch is torn down.
#[derive(Debug)]
pub(crate) struct SubscriberGuard {
	stop: chan::Sender<()>,
}

impl Drop for SubscriberGuard {
	fn drop(&mut self) {
		let _ = self.stop.try_send(());
	}
}

struct ObserverSlot {
	updates: watch::Receiver<ObserverUpdate>,
	deltas: chan::Sender<ListingDelta>,
	guard: Weak<SubscriberGuard>,
}

type SlotMap = Arc<Mutex<HashMap<Location, ObserverSlot>>>;

/// Session-wide registry of running observers, keyed by directory location.
#[derive(Default)]
pub(crate) struct ObserverRegistry {
	slots: SlotMap,
}

impl ObserverRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Subscribes to `root`, starting an observer if none is running.
	///
	/// The returned receiver already carries the warm start listing, so the
	/// first value a subscriber sees reflects current contents.
	pub async fn subscribe(
		&self,
		vfs: Arc<dyn Vfs>,
		root: Location,
	) -> Result<(watch::Receiver<ObserverUpdate>, Arc<SubscriberGuard>), Error> {
		let mut slots = self.slots.lock().await;

		if let Some(slot) = slots.get(&root) {
			if let Some(guard) = slot.guard.upgrade() {
				return Ok((slot.updates.clone(), guard));
			}
			// The previous observer is tearing down; replace it.
			slots.remove(&root);
		}

		trace!(%root, "Starting directory observer");

		let dir_watch = vfs.watch(root.as_path())?;
		let warm_listing = enumerate_listing(vfs.as_ref(), &root).await?;

		let (updates_tx, updates_rx) = watch::channel(ObserverUpdate::Listing(warm_listing));
		let (deltas_tx, deltas_rx) = chan::unbounded();
		let (stop_tx, stop_rx) = chan::bounded(1);

		let guard = Arc::new(SubscriberGuard { stop: stop_tx });
		let guard_handle = Arc::downgrade(&guard);

		slots.insert(
			root.clone(),
			ObserverSlot {
				updates: updates_rx.clone(),
				deltas: deltas_tx,
				guard: guard_handle.clone(),
			},
		);

		spawn(run_observer(
			vfs,
			root,
			dir_watch.events.clone(),
			deltas_rx,
			stop_rx,
			updates_tx,
			Arc::clone(&self.slots),
			guard_handle,
			dir_watch,
		));

		Ok((updates_rx, guard))
	}

	/// Forwards a mutation-caused child set change to the observer for
	/// `parent`, if one is running. Called only from the executor, after the
	/// mutation that produced the change has completed.
	pub async fn apply_delta(&self, parent: &Location, delta: ListingDelta) {
		let slots = self.slots.lock().await;

		if let Some(slot) = slots.get(parent) {
			if slot.guard.strong_count() > 0 && slot.deltas.try_send(delta).is_err() {
				warn!(%parent, "Observer delta channel closed before teardown;");
			}
		}
	}
}

async fn enumerate_listing(vfs: &dyn Vfs, root: &Location) -> Result<DirectoryListing, Error> {
	let entries = vfs.enumerate(root.as_path()).await?;

	Ok(DirectoryListing::new(
		entries
			.into_iter()
			.map(|(path, kind)| Location::new(path, kind))
			.collect(),
	))
}

#[allow(clippy::too_many_arguments)]
async fn run_observer(
	vfs: Arc<dyn Vfs>,
	root: Location,
	events_rx: chan::Receiver<WatchEvent>,
	deltas_rx: chan::Receiver<ListingDelta>,
	stop_rx: chan::Receiver<()>,
	updates_tx: watch::Sender<ObserverUpdate>,
	slots: SlotMap,
	identity: Weak<SubscriberGuard>,
	dir_watch: crate::vfs::DirWatch,
) {
	enum StreamMessage {
		Event(WatchEvent),
		Delta(ListingDelta),
		Stop,
	}

	// Keeps the OS watch alive for as long as the observer runs.
	let _dir_watch = dir_watch;

	// The warm start listing was published before this task was spawned.
	let mut state = ObserverState::Idle;
	transition(&root, &mut state, ObserverState::Watching);

	let drain_rx = events_rx.clone();

	let mut msg_stream = pin!((
		events_rx.map(StreamMessage::Event),
		deltas_rx.map(StreamMessage::Delta),
		stop_rx.map(|()| StreamMessage::Stop),
	)
		.merge());

	'observing: while let Some(msg) = msg_stream.next().await {
		match msg {
			StreamMessage::Event(WatchEvent::Changed) => {
				// Each pass drains the burst that arrived while it was
				// enumerating, queueing at most one follow-up pass.
				loop {
					transition(&root, &mut state, ObserverState::Refreshing);

					match enumerate_listing(vfs.as_ref(), &root).await {
						Ok(listing) => publish(&updates_tx, listing),
						// The next change event retries; a deleted root is
						// handled by the delete that caused it.
						Err(e) => warn!(%root, ?e, "Failed to refresh directory listing;"),
					}

					transition(&root, &mut state, ObserverState::Watching);

					let mut coalesced = false;
					while let Ok(event) = drain_rx.try_recv() {
						match event {
							WatchEvent::Changed => coalesced = true,
							WatchEvent::Error(message) => {
								fail(&root, &mut state, &updates_tx, message);
								break 'observing;
							}
						}
					}

					if !coalesced {
						break;
					}
				}
			}

			StreamMessage::Event(WatchEvent::Error(message)) => {
				fail(&root, &mut state, &updates_tx, message);
				break;
			}

			StreamMessage::Delta(delta) => {
				let current = match &*updates_tx.borrow() {
					ObserverUpdate::Listing(listing) => listing.clone(),
					ObserverUpdate::Failed(_) => break,
				};

				let updated = match delta {
					ListingDelta::Added(location) => current.with_added(location),
					ListingDelta::Removed(location) => current.with_removed(&location),
				};

				publish(&updates_tx, updated);
			}

			StreamMessage::Stop => {
				transition(&root, &mut state, ObserverState::Stopped);
				break;
			}
		}
	}

	if !matches!(state, ObserverState::Stopped | ObserverState::Failed) {
		transition(&root, &mut state, ObserverState::Stopped);
	}

	// Remove our own slot, unless a replacement observer already took it.
	let mut slots = slots.lock().await;
	if let Some(slot) = slots.get(&root) {
		if Weak::ptr_eq(&slot.guard, &identity) {
			slots.remove(&root);
		}
	}
}

fn publish(updates_tx: &watch::Sender<ObserverUpdate>, listing: DirectoryListing) {
	updates_tx.send_if_modified(|current| match current {
		ObserverUpdate::Listing(previous) if *previous == listing => false,
		_ => {
			*current = ObserverUpdate::Listing(listing);
			true
		}
	});
}

fn fail(
	root: &Location,
	state: &mut ObserverState,
	updates_tx: &watch::Sender<ObserverUpdate>,
	message: String,
) {
	warn!(%root, %message, "Watch subsystem failed, terminating observer;");
	transition(root, state, ObserverState::Failed);
	updates_tx.send_replace(ObserverUpdate::Failed(message));
}

fn transition(root: &Location, state: &mut ObserverState, next: ObserverState) {
	trace!(%root, from = ?state, to = ?next, "Observer state transition");
	*state = next;
}

/// One subscriber's view: warm start value, then a fresh filtered snapshot
/// per coalesced change, ending after a terminal watch subsystem error.
pub(crate) fn subscribe_listing(
	session: Session,
	root: Location,
	options: ListOptions,
) -> impl Stream<Item = Result<DirectoryListing, Error>> + Send + 'static {
	stream! {
		let (updates_rx, guard) = match session.subscribe_observer(root.clone()).await {
			Ok(subscription) => subscription,
			Err(e) => {
				yield Err(e);
				return;
			}
		};

		let _guard = guard;
		let mut updates = pin!(WatchStream::new(updates_rx));
		let mut last_delivered: Option<DirectoryListing> = None;

		while let Some(update) = updates.next().await {
			match update {
				ObserverUpdate::Listing(listing) => {
					let filtered = listing.filtered(&root, options);

					// Changes invisible under these options are dropped.
					if last_delivered.as_ref() != Some(&filtered) {
						last_delivered = Some(filtered.clone());
						yield Ok(filtered);
					}
				}
				ObserverUpdate::Failed(message) => {
					yield Err(Error::WatchSubsystem(message));
					break;
				}
			}
		}
	}
}
