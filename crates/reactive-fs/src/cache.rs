//! The identity cache: one live handle per canonical location.
//!
//! Entries hold weak references so an item nobody cares about anymore can be
//! dropped; the map itself is owned by the mutation executor and must never
//! be touched from outside its serialized loop.

use crate::{item::ItemInner, location::Location};

use std::{
	collections::HashMap,
	sync::{Arc, Weak},
};

use tracing::trace;

/// Expired entries are swept once the map grows past this many slots.
const SWEEP_WATERMARK: usize = 1024;

#[derive(Debug, Default)]
pub(crate) struct IdentityCache {
	entries: HashMap<Location, Weak<ItemInner>>,
	next_sweep: usize,
}

impl IdentityCache {
	pub fn new() -> Self {
		Self {
			entries: HashMap::new(),
			next_sweep: SWEEP_WATERMARK,
		}
	}

	/// The live handle for `location`, if one exists.
	///
	/// An expired entry is removed on the way, so a subsequent insert can't
	/// collide with a dead weak reference.
	pub fn lookup(&mut self, location: &Location) -> Option<Arc<ItemInner>> {
		match self.entries.get(location) {
			Some(weak) => match weak.upgrade() {
				Some(inner) => Some(inner),
				None => {
					self.entries.remove(location);
					None
				}
			},
			None => None,
		}
	}

	/// Stores a weak reference to `inner` under `location`.
	///
	/// The caller must have checked [`Self::lookup`] first; overwriting a
	/// live entry would break the one-handle-per-location invariant.
	pub fn insert(&mut self, location: Location, inner: &Arc<ItemInner>) {
		debug_assert!(
			self.entries
				.get(&location)
				.is_none_or(|weak| weak.upgrade().is_none()),
			"insert would shadow a live cache entry for {location}"
		);

		self.entries.insert(location, Arc::downgrade(inner));
		self.maybe_sweep();
	}

	/// Atomically re-keys `handle` from `old` to `new` as part of a move or
	/// rename, preserving the at-most-one-entry-per-location invariant even
	/// during the transition.
	pub fn rekey(&mut self, old: &Location, new: Location, inner: &Arc<ItemInner>) {
		self.entries.remove(old);
		self.entries.insert(new, Arc::downgrade(inner));
	}

	pub fn evict(&mut self, location: &Location) {
		self.entries.remove(location);
	}

	fn maybe_sweep(&mut self) {
		if self.entries.len() < self.next_sweep {
			return;
		}

		let before = self.entries.len();
		self.entries.retain(|_, weak| weak.strong_count() > 0);
		self.next_sweep = (self.entries.len() * 2).max(SWEEP_WATERMARK);

		trace!(
			swept = before - self.entries.len(),
			remaining = self.entries.len(),
			"Swept expired identity cache entries"
		);
	}

	#[cfg(test)]
	pub fn len(&self) -> usize {
		self.entries.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{item::ItemState, location::ItemKind};

	fn inner_for(location: &Location, kind: ItemKind) -> Arc<ItemInner> {
		Arc::new(ItemInner::new(ItemState::Alive(location.clone()), kind))
	}

	#[test]
	fn lookup_returns_live_entry() {
		let mut cache = IdentityCache::new();
		let location = Location::file("/a/f");
		let inner = inner_for(&location, ItemKind::File);

		cache.insert(location.clone(), &inner);

		assert!(Arc::ptr_eq(&cache.lookup(&location).unwrap(), &inner));
	}

	#[test]
	fn expired_entry_is_pruned_on_lookup() {
		let mut cache = IdentityCache::new();
		let location = Location::file("/a/f");

		let inner = inner_for(&location, ItemKind::File);
		cache.insert(location.clone(), &inner);
		drop(inner);

		assert!(cache.lookup(&location).is_none());
		assert_eq!(cache.len(), 0);
	}

	#[test]
	fn rekey_moves_the_entry() {
		let mut cache = IdentityCache::new();
		let old = Location::file("/a/f");
		let new = Location::file("/a/g");
		let inner = inner_for(&old, ItemKind::File);

		cache.insert(old.clone(), &inner);
		cache.rekey(&old, new.clone(), &inner);

		assert!(cache.lookup(&old).is_none());
		assert!(Arc::ptr_eq(&cache.lookup(&new).unwrap(), &inner));
	}

	#[test]
	fn evict_removes_the_entry() {
		let mut cache = IdentityCache::new();
		let location = Location::directory("/a");
		let inner = inner_for(&location, ItemKind::Directory);

		cache.insert(location.clone(), &inner);
		cache.evict(&location);

		assert!(cache.lookup(&location).is_none());
	}
}
