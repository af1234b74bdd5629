mod common;

use common::{create_file, listing_until, lookup_directory, next_listing, temp_session};

use reactive_fs::{
	AccessMode, Error, Item, ItemKind, ListOptions, Location, Mutable,
};

use std::pin::pin;

use pretty_assertions::assert_eq;
use tokio::fs;

#[tokio::test]
async fn creating_over_an_existing_item_is_refused() {
	let (root, session) = temp_session();
	let location = Location::file(root.path().join("taken.txt"));

	create_file(&session, location.clone()).await;

	let result = session.create(location).await;
	assert!(matches!(result, Err(Error::AlreadyExists(_))), "{result:?}");
}

#[tokio::test]
async fn a_rename_is_visible_through_every_surface() {
	let (root, session) = temp_session();
	let dir_location = Location::directory(root.path().join("docs"));

	session.create(dir_location.clone()).await.unwrap();
	let docs = lookup_directory(&session, dir_location.clone()).await;

	let old_location = dir_location.join("draft.txt", ItemKind::File);
	let file = create_file(&session, old_location.clone()).await;

	let listings = docs
		.children_stream(&session, ListOptions::default())
		.unwrap();
	let mut listings = pin!(listings);

	let warm = next_listing(&mut listings).await;
	assert!(warm.contains(&old_location));

	let renamed = file.rename_to(&session, "final.txt").await.unwrap();
	let new_location = dir_location.join("final.txt", ItemKind::File);

	// Same identity, new location, visible through the original handle too.
	assert!(renamed.same_item(&file));
	assert_eq!(file.location().unwrap(), new_location);
	assert_eq!(file.name().unwrap(), "final.txt");

	// The old location no longer resolves; the new one is the same instance.
	let stale_lookup = session
		.lookup(old_location.clone(), AccessMode::ReadWrite)
		.await;
	assert!(
		stale_lookup.as_ref().is_err_and(Error::is_not_found),
		"{stale_lookup:?}"
	);

	let fresh = session
		.lookup(new_location.clone(), AccessMode::ReadWrite)
		.await
		.unwrap();
	assert!(fresh.same_item(&file));

	let updated = listing_until(&mut listings, |listing| listing.contains(&new_location)).await;
	assert!(!updated.contains(&old_location));
}

#[tokio::test]
async fn moving_onto_an_occupied_name_needs_replace() {
	let (root, session) = temp_session();

	let source = create_file(&session, Location::file(root.path().join("a.txt"))).await;
	let occupant = create_file(&session, Location::file(root.path().join("b.txt"))).await;

	let refused = source.move_to(&session, None, Some("b.txt"), false).await;
	assert!(matches!(refused, Err(Error::Conflict(_))), "{refused:?}");
	assert!(!source.is_stale());
	assert!(!occupant.is_stale());

	let moved = source
		.move_to(&session, None, Some("b.txt"), true)
		.await
		.unwrap();

	assert!(moved.same_item(&source));
	assert_eq!(source.name().unwrap(), "b.txt");
	// The replaced item's handle goes stale; its location is gone for it.
	assert!(occupant.is_stale());
	assert!(!root.path().join("a.txt").exists());
}

#[tokio::test]
async fn moving_into_another_directory_rekeys_the_handle() {
	let (root, session) = temp_session();
	let inbox = Location::directory(root.path().join("inbox"));
	let archive = Location::directory(root.path().join("archive"));

	session.create(inbox.clone()).await.unwrap();
	session.create(archive.clone()).await.unwrap();
	let archive_dir = lookup_directory(&session, archive.clone()).await;

	let file = create_file(&session, inbox.join("mail.txt", ItemKind::File)).await;

	file.move_to(&session, Some(&archive_dir), None, false)
		.await
		.unwrap();

	assert_eq!(
		file.location().unwrap(),
		archive.join("mail.txt", ItemKind::File)
	);
	assert!(root.path().join("archive/mail.txt").is_file());
	assert!(!root.path().join("inbox/mail.txt").exists());
}

#[tokio::test]
async fn copying_leaves_the_source_identity_untouched() {
	let (root, session) = temp_session();
	let source_location = Location::file(root.path().join("original.txt"));

	let source = create_file(&session, source_location.clone()).await;
	fs::write(root.path().join("original.txt"), b"contents")
		.await
		.unwrap();

	let copy = source
		.copy_to(&session, None, Some("copy.txt"), false)
		.await
		.unwrap();

	assert!(!copy.same_item(&source));
	assert_eq!(source.location().unwrap(), source_location);
	assert_eq!(copy.name().unwrap(), "copy.txt");
	assert_eq!(
		fs::read(root.path().join("copy.txt")).await.unwrap(),
		b"contents"
	);
}

#[tokio::test]
async fn duplicates_get_generated_names() {
	let (root, session) = temp_session();

	let report = create_file(&session, Location::file(root.path().join("report.txt"))).await;

	let first = report.duplicate(&session).await.unwrap();
	let second = report.duplicate(&session).await.unwrap();

	assert_eq!(first.name().unwrap(), "report (1).txt");
	assert_eq!(second.name().unwrap(), "report (2).txt");
	assert!(root.path().join("report (1).txt").is_file());
	assert!(root.path().join("report (2).txt").is_file());
}

#[tokio::test]
async fn a_canceled_copy_leaves_a_consistent_subset() {
	let (root, session) = temp_session();
	let tree = Location::directory(root.path().join("tree"));

	session.create(tree.clone()).await.unwrap();
	for index in 0..64 {
		let path = root.path().join(format!("tree/entry-{index}.dat"));
		fs::write(path, vec![0u8; 16 * 1024]).await.unwrap();
	}

	let source = lookup_directory(&session, tree.clone()).await;
	source
		.copy_to(&session, None, Some("tree-copy"), false)
		.cancel();

	// Enqueued after the canceled copy, so awaiting it means the executor
	// has moved past the copy. Ordering survives cancellation.
	let later = create_file(&session, Location::file(root.path().join("after.txt"))).await;
	assert_eq!(later.name().unwrap(), "after.txt");

	// The executor stays consistent: the source is intact and whatever did
	// land at the destination is a subset of it.
	let mut entries = fs::read_dir(root.path().join("tree")).await.unwrap();
	let mut count = 0;
	while entries.next_entry().await.unwrap().is_some() {
		count += 1;
	}
	assert_eq!(count, 64);

	let destination = root.path().join("tree-copy");
	if destination.exists() {
		let mut copied = fs::read_dir(&destination).await.unwrap();
		while let Some(entry) = copied.next_entry().await.unwrap() {
			assert!(
				root.path().join("tree").join(entry.file_name()).exists(),
				"unexpected entry {:?}",
				entry.file_name()
			);
		}
	}
}

#[tokio::test]
async fn deleting_removes_the_item_and_stales_the_handle() {
	let (root, session) = temp_session();
	let location = Location::file(root.path().join("doomed.txt"));

	let handle = create_file(&session, location.clone()).await;
	handle.delete(&session).await.unwrap();

	assert!(handle.is_stale());
	assert!(!root.path().join("doomed.txt").exists());

	let lookup = session.lookup(location, AccessMode::ReadWrite).await;
	assert!(lookup.as_ref().is_err_and(Error::is_not_found), "{lookup:?}");
}

#[tokio::test]
async fn file_contents_round_trip_through_the_handle() {
	let (root, session) = temp_session();

	let file = create_file(&session, Location::file(root.path().join("notes.txt")))
		.await
		.into_file()
		.unwrap();

	file.write_text(&session, "first line").await.unwrap();
	assert_eq!(file.text(&session).await.unwrap(), "first line");

	file.write_contents(&session, b"\xff\xfe").await.unwrap();
	let decode = file.text(&session).await;
	assert!(matches!(decode, Err(Error::Underlying { .. })), "{decode:?}");
}
