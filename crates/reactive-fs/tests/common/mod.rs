#![allow(dead_code)]

use reactive_fs::{
	AccessMode, Directory, DirectoryListing, Error, ItemHandle, Location, Session,
};

use std::time::Duration;

use futures::{Stream, StreamExt};
use tempfile::TempDir;
use tokio::time::timeout;

/// Generous upper bound for OS watcher delivery on loaded CI machines.
pub const DEADLINE: Duration = Duration::from_secs(10);

pub fn temp_session() -> (TempDir, Session) {
	let root = TempDir::new().expect("failed to create test root");

	(root, Session::new())
}

pub async fn lookup_directory(session: &Session, location: Location) -> Directory {
	session
		.lookup(location, AccessMode::ReadWrite)
		.await
		.expect("directory lookup failed")
		.into_directory()
		.expect("expected a directory")
}

pub async fn create_file(session: &Session, location: Location) -> ItemHandle {
	session
		.create(location)
		.await
		.expect("file creation failed")
}

pub async fn next_listing<S>(stream: &mut S) -> DirectoryListing
where
	S: Stream<Item = Result<DirectoryListing, Error>> + Unpin,
{
	timeout(DEADLINE, stream.next())
		.await
		.expect("timed out waiting for a listing")
		.expect("listing stream ended unexpectedly")
		.expect("listing stream failed")
}

/// Consumes listings until one satisfies `predicate`; panics on the deadline.
pub async fn listing_until<S>(
	stream: &mut S,
	mut predicate: impl FnMut(&DirectoryListing) -> bool,
) -> DirectoryListing
where
	S: Stream<Item = Result<DirectoryListing, Error>> + Unpin,
{
	loop {
		let listing = next_listing(stream).await;
		if predicate(&listing) {
			return listing;
		}
	}
}
