//! The mutation executor: a single spawned task owning the identity cache
//! and the OS collaborator.
//!
//! Every protocol operation is a message in a closed enum; no two messages
//! execute concurrently, so OS mutations, cache updates and the change
//! notifications they cause are totally ordered. Enqueueing is synchronous,
//! which makes two operations issued in order by one caller apply in that
//! order even when the caller never awaits the first.

use crate::{
	cache::IdentityCache,
	error::Error,
	item::{HasInner, Item, ItemHandle, ItemInner, ItemState},
	location::{ItemKind, Location},
	observer::{ListingDelta, ObserverRegistry},
	session::AccessMode,
	vfs::Vfs,
};

use std::sync::Arc;

use async_channel as chan;
use tokio::{spawn, sync::oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

type Reply<T> = oneshot::Sender<Result<T, Error>>;

pub(crate) enum Message {
	Lookup {
		location: Location,
		mode: AccessMode,
		reply: Reply<ItemHandle>,
	},
	Create {
		location: Location,
		reply: Reply<ItemHandle>,
	},
	Move {
		item: ItemHandle,
		destination: Option<Location>,
		new_name: Option<String>,
		replace_existing: bool,
		halt: CancellationToken,
		reply: Reply<ItemHandle>,
	},
	Copy {
		item: ItemHandle,
		destination: Option<Location>,
		new_name: Option<String>,
		replace_existing: bool,
		halt: CancellationToken,
		reply: Reply<ItemHandle>,
	},
	Duplicate {
		item: ItemHandle,
		halt: CancellationToken,
		reply: Reply<ItemHandle>,
	},
	Delete {
		item: ItemHandle,
		reply: Reply<()>,
	},
}

#[derive(Debug, Clone)]
pub(crate) struct MutationExecutor {
	mailbox: chan::Sender<Message>,
}

impl MutationExecutor {
	pub fn start(vfs: Arc<dyn Vfs>, observers: Arc<ObserverRegistry>) -> Self {
		let (mailbox, messages) = chan::unbounded();

		spawn(run(
			messages,
			ExecCtx {
				vfs,
				cache: IdentityCache::new(),
				observers,
			},
		));

		Self { mailbox }
	}

	/// Synchronous on an unbounded mailbox, so enqueue order is apply order.
	pub fn enqueue(&self, message: Message) -> Result<(), Error> {
		self.mailbox.try_send(message).map_err(|_| Error::ShutDown)
	}
}

struct ExecCtx {
	vfs: Arc<dyn Vfs>,
	cache: IdentityCache,
	observers: Arc<ObserverRegistry>,
}

#[instrument(skip_all, name = "mutation_executor")]
async fn run(messages: chan::Receiver<Message>, mut ctx: ExecCtx) {
	debug!("Mutation executor started");

	// Replies may go unheard when the caller dropped its operation; that is
	// the normal end of a canceled mutation, not an error.
	while let Ok(message) = messages.recv().await {
		match message {
			Message::Lookup {
				location,
				mode,
				reply,
			} => {
				let _ = reply.send(lookup(&mut ctx, location, mode).await);
			}
			Message::Create { location, reply } => {
				let _ = reply.send(create(&mut ctx, location).await);
			}
			Message::Move {
				item,
				destination,
				new_name,
				replace_existing,
				halt,
				reply,
			} => {
				let _ = reply.send(
					move_item(&mut ctx, item, destination, new_name, replace_existing, &halt)
						.await,
				);
			}
			Message::Copy {
				item,
				destination,
				new_name,
				replace_existing,
				halt,
				reply,
			} => {
				let _ = reply.send(
					copy_item(&mut ctx, &item, destination, new_name, replace_existing, &halt)
						.await,
				);
			}
			Message::Duplicate { item, halt, reply } => {
				let _ = reply.send(duplicate_item(&mut ctx, &item, &halt).await);
			}
			Message::Delete { item, reply } => {
				let _ = reply.send(delete_item(&mut ctx, &item).await);
			}
		}
	}

	debug!("Mutation executor shut down");
}

async fn lookup(ctx: &mut ExecCtx, location: Location, mode: AccessMode) -> Result<ItemHandle, Error> {
	match mode {
		AccessMode::ReadWrite => {
			if let Some(inner) = ctx.cache.lookup(&location) {
				return Ok(ItemHandle::from_inner(inner));
			}

			match ctx.vfs.kind_of(location.as_path()).await? {
				None => Err(Error::NotFound(location)),
				// A directory form naming a file (or the reverse) is the
				// caller asking for an item that isn't there.
				Some(kind) if kind != location.kind() => Err(Error::NotFound(location)),
				Some(kind) => {
					let inner = Arc::new(ItemInner::new(ItemState::Alive(location.clone()), kind));
					ctx.cache.insert(location, &inner);

					Ok(ItemHandle::from_inner(inner))
				}
			}
		}
		// Weak guarantee only: nothing keeps the location exclusive after
		// this returns.
		AccessMode::Exclusive => {
			if ctx.cache.lookup(&location).is_some()
				|| ctx.vfs.kind_of(location.as_path()).await?.is_some()
			{
				return Err(Error::AlreadyExists(location));
			}

			create(ctx, location).await
		}
	}
}

async fn create(ctx: &mut ExecCtx, location: Location) -> Result<ItemHandle, Error> {
	if ctx.cache.lookup(&location).is_some()
		|| ctx.vfs.kind_of(location.as_path()).await?.is_some()
	{
		return Err(Error::AlreadyExists(location));
	}

	ctx.vfs.create(location.as_path(), location.kind()).await?;
	trace!(%location, "Created item");

	let inner = Arc::new(ItemInner::new(
		ItemState::Alive(location.clone()),
		location.kind(),
	));
	ctx.cache.insert(location.clone(), &inner);

	if let Some(parent) = location.parent() {
		ctx.observers
			.apply_delta(&parent, ListingDelta::Added(location))
			.await;
	}

	Ok(ItemHandle::from_inner(inner))
}

async fn move_item(
	ctx: &mut ExecCtx,
	item: ItemHandle,
	destination: Option<Location>,
	new_name: Option<String>,
	replace_existing: bool,
	halt: &CancellationToken,
) -> Result<ItemHandle, Error> {
	let source = item.location()?;
	let target = resolve_target(&source, destination, new_name)?;

	if target == source {
		return Ok(item);
	}

	if let Some(occupant) = occupant_at(ctx, &target).await? {
		if !replace_existing {
			return Err(Error::Conflict(target));
		}
		clear_destination(ctx, occupant).await?;
	}

	ctx.vfs
		.move_item(source.as_path(), target.as_path(), halt)
		.await?;
	trace!(%source, %target, "Moved item");

	// Identity preserved: same handle, new location.
	ctx.cache.rekey(&source, target.clone(), item.inner());
	item.inner().relocate(target.clone());

	if let Some(old_parent) = source.parent() {
		ctx.observers
			.apply_delta(&old_parent, ListingDelta::Removed(source))
			.await;
	}
	if let Some(new_parent) = target.parent() {
		ctx.observers
			.apply_delta(&new_parent, ListingDelta::Added(target))
			.await;
	}

	Ok(item)
}

async fn copy_item(
	ctx: &mut ExecCtx,
	item: &ItemHandle,
	destination: Option<Location>,
	new_name: Option<String>,
	replace_existing: bool,
	halt: &CancellationToken,
) -> Result<ItemHandle, Error> {
	let source = item.location()?;
	let target = resolve_target(&source, destination, new_name)?;

	if target == source {
		return Err(Error::Conflict(target));
	}

	if let Some(occupant) = occupant_at(ctx, &target).await? {
		if !replace_existing {
			return Err(Error::Conflict(target));
		}
		clear_destination(ctx, occupant).await?;
	}

	ctx.vfs
		.copy_item(source.as_path(), target.as_path(), halt)
		.await?;
	trace!(%source, %target, "Copied item");

	adopt(ctx, target).await
}

async fn duplicate_item(
	ctx: &mut ExecCtx,
	item: &ItemHandle,
	halt: &CancellationToken,
) -> Result<ItemHandle, Error> {
	let source = item.location()?;
	let parent = source.parent().ok_or_else(|| Error::Conflict(source.clone()))?;

	let mut ordinal = 1u32;
	let target = loop {
		let candidate = parent.join(
			&nth_duplicate_name(source.name(), source.kind(), ordinal),
			source.kind(),
		);

		if ctx.cache.lookup(&candidate).is_none()
			&& ctx.vfs.kind_of(candidate.as_path()).await?.is_none()
		{
			break candidate;
		}

		ordinal += 1;
	};

	ctx.vfs
		.copy_item(source.as_path(), target.as_path(), halt)
		.await?;
	trace!(%source, %target, "Duplicated item");

	adopt(ctx, target).await
}

async fn delete_item(ctx: &mut ExecCtx, item: &ItemHandle) -> Result<(), Error> {
	let location = item.location()?;

	ctx.vfs.remove(location.as_path()).await?;
	trace!(%location, "Deleted item");

	ctx.cache.evict(&location);
	item.inner().mark_stale();

	if let Some(parent) = location.parent() {
		ctx.observers
			.apply_delta(&parent, ListingDelta::Removed(location))
			.await;
	}

	Ok(())
}

/// The full target location of a move/copy: destination defaults to the
/// source's parent, the name defaults to the source's name.
fn resolve_target(
	source: &Location,
	destination: Option<Location>,
	new_name: Option<String>,
) -> Result<Location, Error> {
	let parent = match destination {
		Some(directory) => directory,
		None => source
			.parent()
			.ok_or_else(|| Error::Conflict(source.clone()))?,
	};
	let name = new_name.unwrap_or_else(|| source.name().to_owned());

	Ok(parent.join(&name, source.kind()))
}

/// Whatever currently occupies `target` on disk, under its actual kind
/// (which may differ from the kind the mover is bringing in).
async fn occupant_at(ctx: &mut ExecCtx, target: &Location) -> Result<Option<Location>, Error> {
	Ok(ctx
		.vfs
		.kind_of(target.as_path())
		.await?
		.map(|kind| Location::new(target.as_path(), kind)))
}

/// Removes a destination occupant ahead of a replacing move/copy. Its live
/// handle, if any, goes stale; the arriving item re-adds the child entry.
async fn clear_destination(ctx: &mut ExecCtx, occupant: Location) -> Result<(), Error> {
	ctx.vfs.remove(occupant.as_path()).await?;

	if let Some(existing) = ctx.cache.lookup(&occupant) {
		existing.mark_stale();
	}
	ctx.cache.evict(&occupant);

	if let Some(parent) = occupant.parent() {
		ctx.observers
			.apply_delta(&parent, ListingDelta::Removed(occupant))
			.await;
	}

	Ok(())
}

/// Load-or-reuse a handle for a location that just gained an item.
async fn adopt(ctx: &mut ExecCtx, location: Location) -> Result<ItemHandle, Error> {
	if let Some(inner) = ctx.cache.lookup(&location) {
		return Ok(ItemHandle::from_inner(inner));
	}

	let inner = Arc::new(ItemInner::new(
		ItemState::Alive(location.clone()),
		location.kind(),
	));
	ctx.cache.insert(location.clone(), &inner);

	if let Some(parent) = location.parent() {
		ctx.observers
			.apply_delta(&parent, ListingDelta::Added(location))
			.await;
	}

	Ok(ItemHandle::from_inner(inner))
}

/// `name (n)` for directories and extensionless files, `stem (n).ext`
/// otherwise.
fn nth_duplicate_name(name: &str, kind: ItemKind, ordinal: u32) -> String {
	match kind {
		ItemKind::File => match name.rsplit_once('.') {
			Some((stem, extension)) if !stem.is_empty() => {
				format!("{stem} ({ordinal}).{extension}")
			}
			_ => format!("{name} ({ordinal})"),
		},
		ItemKind::Directory => format!("{name} ({ordinal})"),
	}
}
