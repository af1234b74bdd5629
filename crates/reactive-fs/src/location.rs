//! Canonical locations.
//!
//! A [`Location`] is the canonical identifier for one file system item. The
//! directory form always ends with the platform separator, the file form never
//! does, so the two can share a cache without colliding. Two locations are
//! equal iff their canonical strings are byte-equal.

use std::{
	fmt,
	path::{Path, MAIN_SEPARATOR},
};

use serde::{Deserialize, Serialize};

/// The kind of a file system item. Immutable once a handle is established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemKind {
	File,
	Directory,
}

impl ItemKind {
	#[must_use]
	pub const fn is_directory(self) -> bool {
		matches!(self, Self::Directory)
	}
}

/// Canonical identifier for a file system path.
///
/// Construct through [`Location::file`] or [`Location::directory`]; both
/// transforms are pure, total and idempotent.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location(String);

impl Location {
	/// Canonical file form: any trailing separator is stripped.
	pub fn file(path: impl AsRef<Path>) -> Self {
		Self(trim_trailing_separators(&path.as_ref().to_string_lossy()).to_owned())
	}

	/// Canonical directory form: exactly one trailing separator.
	pub fn directory(path: impl AsRef<Path>) -> Self {
		let path = path.as_ref().to_string_lossy();
		let trimmed = trim_trailing_separators(&path);
		Self(format!("{trimmed}{MAIN_SEPARATOR}"))
	}

	pub fn new(path: impl AsRef<Path>, kind: ItemKind) -> Self {
		match kind {
			ItemKind::File => Self::file(path),
			ItemKind::Directory => Self::directory(path),
		}
	}

	#[must_use]
	pub fn has_trailing_separator(&self) -> bool {
		self.0.ends_with(MAIN_SEPARATOR)
	}

	/// The kind this location denotes, derived from its canonical form.
	#[must_use]
	pub fn kind(&self) -> ItemKind {
		if self.has_trailing_separator() {
			ItemKind::Directory
		} else {
			ItemKind::File
		}
	}

	/// This location in directory form. Idempotent.
	#[must_use]
	pub fn to_directory_form(&self) -> Self {
		Self::directory(Path::new(&self.0))
	}

	/// This location in file form. Inverse of [`Self::to_directory_form`].
	#[must_use]
	pub fn to_file_form(&self) -> Self {
		Self::file(Path::new(&self.0))
	}

	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}

	#[must_use]
	pub fn as_path(&self) -> &Path {
		Path::new(trim_trailing_separators(&self.0))
	}

	/// The last path component, without any trailing separator.
	#[must_use]
	pub fn name(&self) -> &str {
		let trimmed = trim_trailing_separators(&self.0);
		trimmed
			.rsplit(MAIN_SEPARATOR)
			.next()
			.unwrap_or_default()
	}

	/// The containing directory, in directory form. `None` at the root.
	#[must_use]
	pub fn parent(&self) -> Option<Self> {
		let trimmed = trim_trailing_separators(&self.0);
		if trimmed.is_empty() {
			return None;
		}

		trimmed
			.rfind(MAIN_SEPARATOR)
			.map(|idx| Self(format!("{}{MAIN_SEPARATOR}", &trimmed[..idx])))
	}

	/// Appends `name` to this directory-form location.
	#[must_use]
	pub fn join(&self, name: &str, kind: ItemKind) -> Self {
		debug_assert!(
			self.has_trailing_separator(),
			"join must be called on a directory-form location"
		);

		match kind {
			ItemKind::File => Self(format!("{}{name}", self.0)),
			ItemKind::Directory => Self(format!("{}{name}{MAIN_SEPARATOR}", self.0)),
		}
	}

	/// Whether this location is a direct child of `directory`.
	#[must_use]
	pub fn is_child_of(&self, directory: &Self) -> bool {
		self.parent().as_ref() == Some(directory)
	}

	/// Path components below `ancestor`, or `None` if this location isn't
	/// under it.
	#[must_use]
	pub fn components_below<'a>(
		&'a self,
		ancestor: &Self,
	) -> Option<impl Iterator<Item = &'a str>> {
		self.0.strip_prefix(ancestor.0.as_str()).map(|relative| {
			trim_trailing_separators(relative)
				.split(MAIN_SEPARATOR)
				.filter(|component| !component.is_empty())
		})
	}
}

impl fmt::Display for Location {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl fmt::Debug for Location {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Location({:?})", self.0)
	}
}

fn trim_trailing_separators(s: &str) -> &str {
	s.trim_end_matches(MAIN_SEPARATOR)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn directory_form_is_idempotent() {
		let once = Location::directory("/some/dir");
		let twice = once.to_directory_form();

		assert_eq!(once, twice);
		assert!(once.has_trailing_separator());
	}

	#[test]
	fn file_form_inverts_directory_form() {
		let file = Location::file("/some/file");
		let round_tripped = file.to_directory_form().to_file_form();

		assert_eq!(file, round_tripped);
		assert!(!file.has_trailing_separator());
	}

	#[test]
	fn file_and_directory_forms_are_distinct() {
		assert_ne!(Location::file("/a/x"), Location::directory("/a/x"));
		assert!(Location::directory("/a/x").kind().is_directory());
		assert!(!Location::file("/a/x").kind().is_directory());
	}

	#[test]
	fn name_ignores_trailing_separator() {
		assert_eq!(Location::directory("/a/b").name(), "b");
		assert_eq!(Location::file("/a/b").name(), "b");
	}

	#[test]
	fn parent_is_directory_form() {
		let parent = Location::file("/a/b/c").parent().unwrap();

		assert_eq!(parent, Location::directory("/a/b"));
		assert_eq!(
			Location::directory("/a").parent().unwrap(),
			Location::directory("/")
		);
		assert_eq!(Location::directory("/").parent(), None);
	}

	#[test]
	fn join_round_trips_with_parent_and_name() {
		let dir = Location::directory("/a/b");
		let child = dir.join("c.txt", ItemKind::File);

		assert_eq!(child.parent().unwrap(), dir);
		assert_eq!(child.name(), "c.txt");
		assert!(child.is_child_of(&dir));
	}

	#[test]
	fn components_below_ancestor() {
		let root = Location::directory("/a");
		let deep = Location::file("/a/b/c");

		let components: Vec<_> = deep.components_below(&root).unwrap().collect();
		assert_eq!(components, ["b", "c"]);

		assert!(Location::file("/elsewhere/c")
			.components_below(&root)
			.is_none());
	}
}
