//! A reactive, identity-consistent view over a directory tree.
//!
//! Every canonical location has at most one live handle: two lookups of the
//! same path yield the same instance, a rename updates that instance in
//! place (observers of its location stream see the new name), and a delete
//! turns it stale everywhere at once. All mutations are serialized through
//! one executor task per [`Session`], so their effects and the change
//! notifications they cause are totally ordered. Directory contents are
//! consumed as live streams of listing snapshots, driven by OS change
//! events with bursts coalesced.
//!
//! ```
//! use reactive_fs::{AccessMode, Item, Location, Mutable, Session};
//!
//! # async fn demo() -> Result<(), reactive_fs::Error> {
//! let session = Session::new();
//!
//! let report = session
//! 	.lookup(Location::file("/projects/report.txt"), AccessMode::ReadWrite)
//! 	.await?;
//!
//! // Same canonical location, same instance.
//! let again = session
//! 	.lookup(Location::file("/projects/report.txt"), AccessMode::ReadWrite)
//! 	.await?;
//! assert!(report.same_item(&again));
//!
//! // The rename is visible through both handles; `again` is the same item.
//! report.rename_to(&session, "report-v2.txt").await?;
//! assert_eq!(again.name()?, "report-v2.txt");
//! # Ok(())
//! # }
//! ```

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	unused
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod cache;
mod error;
mod executor;
mod item;
mod location;
mod observer;
mod session;
mod vfs;

pub use error::Error;
pub use item::{AttributeBearing, Directory, File, Item, ItemHandle, Mutable};
pub use location::{ItemKind, Location};
pub use observer::{DirectoryListing, ListOptions};
pub use session::{AccessMode, Operation, Session};
pub use vfs::{DirWatch, DiskVfs, Vfs, WatchEvent};
