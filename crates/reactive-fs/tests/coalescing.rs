//! Listing coalescing, pinned down with a scripted collaborator instead of
//! OS watcher timing: events delivered while a refresh is in flight must
//! fold into at most one follow-up enumeration.

mod common;

use common::next_listing;

use reactive_fs::{
	AccessMode, DirWatch, Error, ItemKind, ListOptions, Location, Session, Vfs, WatchEvent,
};

use std::{
	path::{Path, PathBuf},
	pin::pin,
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc, Mutex,
	},
	time::Duration,
};

use async_channel as chan;
use async_trait::async_trait;
use futures::StreamExt;
use tokio::{sync::watch, time::timeout};
use tokio_util::sync::CancellationToken;

/// A collaborator with scriptable contents, an injectable event channel and
/// a gate that parks enumeration until the test releases it.
struct ScriptedVfs {
	root: PathBuf,
	entries: Mutex<Vec<(PathBuf, ItemKind)>>,
	gate: watch::Receiver<bool>,
	enumerations: AtomicUsize,
	events: chan::Receiver<WatchEvent>,
}

#[async_trait]
impl Vfs for ScriptedVfs {
	async fn kind_of(&self, path: &Path) -> Result<Option<ItemKind>, Error> {
		if path == self.root {
			return Ok(Some(ItemKind::Directory));
		}

		Ok(self
			.entries
			.lock()
			.unwrap()
			.iter()
			.find(|(entry, _)| entry == path)
			.map(|(_, kind)| *kind))
	}

	async fn enumerate(&self, _directory: &Path) -> Result<Vec<(PathBuf, ItemKind)>, Error> {
		self.enumerations.fetch_add(1, Ordering::SeqCst);

		let mut gate = self.gate.clone();
		gate.wait_for(|open| *open)
			.await
			.map_err(|_| Error::WatchSubsystem("enumeration gate dropped".into()))?;

		Ok(self.entries.lock().unwrap().clone())
	}

	async fn create(&self, _path: &Path, _kind: ItemKind) -> Result<(), Error> {
		Ok(())
	}

	async fn move_item(
		&self,
		_source: &Path,
		_destination: &Path,
		_halt: &CancellationToken,
	) -> Result<(), Error> {
		Ok(())
	}

	async fn copy_item(
		&self,
		_source: &Path,
		_destination: &Path,
		_halt: &CancellationToken,
	) -> Result<(), Error> {
		Ok(())
	}

	async fn remove(&self, _path: &Path) -> Result<(), Error> {
		Ok(())
	}

	async fn read(&self, _path: &Path) -> Result<Vec<u8>, Error> {
		Ok(Vec::new())
	}

	async fn write(&self, _path: &Path, _contents: &[u8]) -> Result<(), Error> {
		Ok(())
	}

	async fn read_attribute(&self, _path: &Path, _key: &str) -> Result<Option<Vec<u8>>, Error> {
		Ok(None)
	}

	async fn write_attribute(
		&self,
		_path: &Path,
		_key: &str,
		_value: Option<&[u8]>,
	) -> Result<(), Error> {
		Ok(())
	}

	fn watch(&self, _directory: &Path) -> Result<DirWatch, Error> {
		Ok(DirWatch::new(self.events.clone(), ()))
	}
}

#[tokio::test]
async fn a_burst_folds_into_at_most_one_follow_up_pass() {
	let root = Location::directory("/watched");
	let (gate_tx, gate_rx) = watch::channel(true);
	let (events_tx, events_rx) = chan::unbounded();

	let vfs = Arc::new(ScriptedVfs {
		root: root.as_path().to_owned(),
		entries: Mutex::new(Vec::new()),
		gate: gate_rx,
		enumerations: AtomicUsize::new(0),
		events: events_rx,
	});
	let session = Session::with_vfs(vfs.clone());

	let dir = session
		.lookup(root, AccessMode::ReadWrite)
		.await
		.unwrap()
		.into_directory()
		.unwrap();

	let listings = dir
		.children_stream(&session, ListOptions::default())
		.unwrap();
	let mut listings = pin!(listings);

	let warm = next_listing(&mut listings).await;
	assert!(warm.is_empty());
	assert_eq!(vfs.enumerations.load(Ordering::SeqCst), 1);

	// Park the next refresh, then deliver one event to start it and five
	// more while it is stuck, mutating the contents under the burst.
	gate_tx.send_replace(false);
	events_tx.send(WatchEvent::Changed).await.unwrap();

	*vfs.entries.lock().unwrap() = vec![
		(PathBuf::from("/watched/a.txt"), ItemKind::File),
		(PathBuf::from("/watched/b.txt"), ItemKind::File),
		(PathBuf::from("/watched/c.txt"), ItemKind::File),
	];
	for _ in 0..5 {
		events_tx.send(WatchEvent::Changed).await.unwrap();
	}
	gate_tx.send_replace(true);

	// One delivery, already reflecting the post-burst state.
	let updated = next_listing(&mut listings).await;
	assert_eq!(updated.len(), 3);
	assert!(updated.contains(&Location::file("/watched/a.txt")));

	// The follow-up pass re-enumerates but finds nothing new, so nothing
	// further reaches the subscriber.
	assert!(
		timeout(Duration::from_millis(500), listings.next())
			.await
			.is_err(),
		"burst produced more than one delivery"
	);

	// Six events, two refresh passes: the in-flight one plus exactly one
	// coalesced follow-up.
	assert_eq!(vfs.enumerations.load(Ordering::SeqCst), 3);
}
