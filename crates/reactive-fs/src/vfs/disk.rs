use crate::{error::Error, location::ItemKind};

use std::{
	collections::VecDeque,
	io,
	path::{Path, PathBuf},
};

use async_channel as chan;
use async_trait::async_trait;
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::{
	fs,
	io::{AsyncReadExt, AsyncWriteExt},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

use super::{DirWatch, Vfs, WatchEvent};

/// Buffer size for cancellable file copies.
const COPY_CHUNK_SIZE: usize = 256 * 1024;

/// The real file system, backed by `tokio::fs` and `notify`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskVfs;

impl DiskVfs {
	#[must_use]
	pub const fn new() -> Self {
		Self
	}

	/// Copies a single file in chunks, checking the halt token between
	/// chunks so large files can be abandoned mid-transfer.
	async fn copy_file(
		source: &Path,
		destination: &Path,
		halt: &CancellationToken,
	) -> Result<(), Error> {
		let mut reader = fs::File::open(source)
			.await
			.map_err(|e| Error::underlying(source, e))?;
		let mut writer = fs::File::create(destination)
			.await
			.map_err(|e| Error::underlying(destination, e))?;

		let mut buffer = vec![0u8; COPY_CHUNK_SIZE];

		loop {
			if halt.is_cancelled() {
				trace!(source = %source.display(), "Halting file copy mid-transfer");
				return Err(Error::Canceled);
			}

			let read = reader
				.read(&mut buffer)
				.await
				.map_err(|e| Error::underlying(source, e))?;
			if read == 0 {
				break;
			}

			writer
				.write_all(&buffer[..read])
				.await
				.map_err(|e| Error::underlying(destination, e))?;
		}

		writer
			.flush()
			.await
			.map_err(|e| Error::underlying(destination, e))?;

		Ok(())
	}

	/// Copies a directory tree entry by entry, checking the halt token
	/// before each entry. A halted copy leaves whatever was already written.
	async fn copy_tree(
		source: &Path,
		destination: &Path,
		halt: &CancellationToken,
	) -> Result<(), Error> {
		fs::create_dir_all(destination)
			.await
			.map_err(|e| Error::underlying(destination, e))?;

		let mut pending = VecDeque::from([(source.to_owned(), destination.to_owned())]);

		while let Some((source_dir, destination_dir)) = pending.pop_front() {
			let mut read_dir = fs::read_dir(&source_dir)
				.await
				.map_err(|e| Error::underlying(&source_dir, e))?;

			while let Some(entry) = read_dir
				.next_entry()
				.await
				.map_err(|e| Error::underlying(&source_dir, e))?
			{
				if halt.is_cancelled() {
					trace!(source = %source.display(), "Halting tree copy mid-operation");
					return Err(Error::Canceled);
				}

				let entry_source = entry.path();
				let entry_destination = destination_dir.join(entry.file_name());
				let metadata = entry
					.metadata()
					.await
					.map_err(|e| Error::underlying(&entry_source, e))?;

				if metadata.is_dir() {
					fs::create_dir_all(&entry_destination)
						.await
						.map_err(|e| Error::underlying(&entry_destination, e))?;
					pending.push_back((entry_source, entry_destination));
				} else {
					Self::copy_file(&entry_source, &entry_destination, halt).await?;
				}
			}
		}

		Ok(())
	}
}

#[async_trait]
impl Vfs for DiskVfs {
	async fn kind_of(&self, path: &Path) -> Result<Option<ItemKind>, Error> {
		match fs::symlink_metadata(path).await {
			Ok(metadata) => Ok(Some(if metadata.is_dir() {
				ItemKind::Directory
			} else {
				ItemKind::File
			})),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(Error::underlying(path, e)),
		}
	}

	async fn enumerate(&self, directory: &Path) -> Result<Vec<(PathBuf, ItemKind)>, Error> {
		let mut entries = Vec::new();
		let mut pending = VecDeque::from([directory.to_owned()]);

		while let Some(current) = pending.pop_front() {
			let mut read_dir = fs::read_dir(&current)
				.await
				.map_err(|e| Error::underlying(&current, e))?;

			while let Some(entry) = read_dir
				.next_entry()
				.await
				.map_err(|e| Error::underlying(&current, e))?
			{
				let path = entry.path();
				let metadata = match entry.metadata().await {
					Ok(metadata) => metadata,
					// The entry vanished between readdir and stat; a change
					// event for it is already on its way.
					Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
					Err(e) => return Err(Error::underlying(&path, e)),
				};

				if metadata.is_dir() {
					pending.push_back(path.clone());
					entries.push((path, ItemKind::Directory));
				} else {
					entries.push((path, ItemKind::File));
				}
			}
		}

		Ok(entries)
	}

	async fn create(&self, path: &Path, kind: ItemKind) -> Result<(), Error> {
		if kind.is_directory() {
			fs::create_dir_all(path)
				.await
				.map_err(|e| Error::underlying(path, e))
		} else {
			fs::OpenOptions::new()
				.write(true)
				.create_new(true)
				.open(path)
				.await
				.map_err(|e| Error::underlying(path, e))?;

			Ok(())
		}
	}

	async fn move_item(
		&self,
		source: &Path,
		destination: &Path,
		halt: &CancellationToken,
	) -> Result<(), Error> {
		match fs::rename(source, destination).await {
			Ok(()) => Ok(()),
			// Renaming across mount points degrades to copy + remove, which
			// is the only case where a move can be halted mid-operation.
			Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
				self.copy_item(source, destination, halt).await?;
				self.remove(source).await
			}
			Err(e) => Err(Error::underlying(source, e)),
		}
	}

	async fn copy_item(
		&self,
		source: &Path,
		destination: &Path,
		halt: &CancellationToken,
	) -> Result<(), Error> {
		let metadata = fs::symlink_metadata(source)
			.await
			.map_err(|e| Error::underlying(source, e))?;

		if metadata.is_dir() {
			Self::copy_tree(source, destination, halt).await
		} else {
			Self::copy_file(source, destination, halt).await
		}
	}

	async fn remove(&self, path: &Path) -> Result<(), Error> {
		let metadata = fs::symlink_metadata(path)
			.await
			.map_err(|e| Error::underlying(path, e))?;

		if metadata.is_dir() {
			fs::remove_dir_all(path)
				.await
				.map_err(|e| Error::underlying(path, e))
		} else {
			fs::remove_file(path)
				.await
				.map_err(|e| Error::underlying(path, e))
		}
	}

	async fn read(&self, path: &Path) -> Result<Vec<u8>, Error> {
		fs::read(path).await.map_err(|e| Error::underlying(path, e))
	}

	async fn write(&self, path: &Path, contents: &[u8]) -> Result<(), Error> {
		fs::write(path, contents)
			.await
			.map_err(|e| Error::underlying(path, e))
	}

	#[cfg(unix)]
	async fn read_attribute(&self, path: &Path, key: &str) -> Result<Option<Vec<u8>>, Error> {
		let path = path.to_owned();
		let key = key.to_owned();

		tokio::task::spawn_blocking(move || {
			xattr::get(&path, &key).map_err(|e| Error::underlying(&path, e))
		})
		.await
		.map_err(|_| Error::ShutDown)?
	}

	#[cfg(not(unix))]
	async fn read_attribute(&self, path: &Path, _key: &str) -> Result<Option<Vec<u8>>, Error> {
		Err(Error::underlying(
			path,
			io::Error::new(
				io::ErrorKind::Unsupported,
				"extended attributes are unsupported on this platform",
			),
		))
	}

	#[cfg(unix)]
	async fn write_attribute(
		&self,
		path: &Path,
		key: &str,
		value: Option<&[u8]>,
	) -> Result<(), Error> {
		let path = path.to_owned();
		let key = key.to_owned();
		let value = value.map(<[u8]>::to_vec);

		tokio::task::spawn_blocking(move || {
			match value {
				Some(value) => xattr::set(&path, &key, &value),
				None => xattr::remove(&path, &key),
			}
			.map_err(|e| Error::underlying(&path, e))
		})
		.await
		.map_err(|_| Error::ShutDown)?
	}

	#[cfg(not(unix))]
	async fn write_attribute(
		&self,
		path: &Path,
		_key: &str,
		_value: Option<&[u8]>,
	) -> Result<(), Error> {
		Err(Error::underlying(
			path,
			io::Error::new(
				io::ErrorKind::Unsupported,
				"extended attributes are unsupported on this platform",
			),
		))
	}

	fn watch(&self, directory: &Path) -> Result<DirWatch, Error> {
		let (events_tx, events_rx) = chan::unbounded();

		let mut watcher = RecommendedWatcher::new(
			move |result: notify::Result<notify::Event>| {
				let event = match result {
					Ok(_) => WatchEvent::Changed,
					Err(e) => WatchEvent::Error(e.to_string()),
				};

				if !events_tx.is_closed() {
					// SAFETY: we are not blocking the thread as this is an unbounded channel
					if events_tx.send_blocking(event).is_err() {
						error!("Tried to send a watch event to a closed channel;");
					}
				}
			},
			Config::default(),
		)
		.map_err(|e| Error::WatchSubsystem(e.to_string()))?;

		watcher
			.watch(directory, RecursiveMode::Recursive)
			.map_err(|e| Error::WatchSubsystem(e.to_string()))?;

		trace!(directory = %directory.display(), "Now watching directory");

		Ok(DirWatch::new(events_rx, watcher))
	}
}
