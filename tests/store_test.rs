//! GitStore behavior: auto-init, staged writes, commit/read/log/diff, and
//! the NotFound semantics the index relies on.

mod helpers;

use configvault::store::{ChangeKind, GitStore};

#[test]
fn empty_store_reads_none() {
	let dir = tempfile::tempdir().unwrap();
	let settings = helpers::test_settings(dir.path());
	let store = GitStore::open(&settings).unwrap();

	assert_eq!(store.read("missing.running", None).unwrap(), None);
	assert!(store.log(&[], None, None).unwrap().is_empty());
}

#[test]
fn reopen_preserves_history() {
	let dir = tempfile::tempdir().unwrap();
	let settings = helpers::test_settings(dir.path());

	let sha = {
		let store = GitStore::open(&settings).unwrap();
		store.write("a.running", "one\n").unwrap();
		store.commit("first").unwrap()
	};

	let store = GitStore::open(&settings).unwrap();
	assert_eq!(
		store.read("a.running", Some(&sha)).unwrap().as_deref(),
		Some("one\n")
	);
}

#[test]
fn write_commit_read_roundtrip() {
	let dir = tempfile::tempdir().unwrap();
	let settings = helpers::test_settings(dir.path());
	let store = GitStore::open(&settings).unwrap();

	store.write("a.running", "one\n").unwrap();
	let first = store.commit("first").unwrap();
	assert_eq!(
		store.read("a.running", None).unwrap().as_deref(),
		Some("one\n")
	);

	store.write("a.running", "two\n").unwrap();
	let second = store.commit("second").unwrap();
	assert_ne!(first, second);

	assert_eq!(
		store.read("a.running", Some(&first)).unwrap().as_deref(),
		Some("one\n")
	);
	assert_eq!(
		store.read("a.running", None).unwrap().as_deref(),
		Some("two\n")
	);
}

#[test]
fn staged_write_is_replaced_before_commit() {
	let dir = tempfile::tempdir().unwrap();
	let settings = helpers::test_settings(dir.path());
	let store = GitStore::open(&settings).unwrap();

	store.write("a.running", "draft\n").unwrap();
	store.write("a.running", "final\n").unwrap();
	store.commit("only one").unwrap();

	assert_eq!(
		store.read("a.running", None).unwrap().as_deref(),
		Some("final\n")
	);
	assert_eq!(store.log(&[], None, None).unwrap().len(), 1);
}

#[test]
fn log_reports_changes_newest_first() {
	let dir = tempfile::tempdir().unwrap();
	let settings = helpers::test_settings(dir.path());
	let store = GitStore::open(&settings).unwrap();

	store.write("a.running", "one\n").unwrap();
	let first = store.commit("first").unwrap();
	store.write("a.running", "two\n").unwrap();
	store.write("b.startup", "x\n").unwrap();
	let second = store.commit("second").unwrap();

	let log = store.log(&[], None, None).unwrap();
	assert_eq!(log.len(), 2);
	assert_eq!(log[0].sha, second);
	assert_eq!(log[1].sha, first);
	assert_eq!(log[0].parents, vec![first.clone()]);
	assert!(log[1].parents.is_empty());
	assert_eq!(log[1].message, "first");
	assert!(log[0].committer.contains("committer@example.net"));
	assert!(log[0].author.contains("author@example.net"));

	let initial = &log[1].changes;
	assert_eq!(initial.len(), 1);
	assert_eq!(initial[0].kind, ChangeKind::Add);
	assert!(initial[0].old.is_none());
	assert_eq!(initial[0].new.as_ref().unwrap().path, "a.running");

	let latest = &log[0].changes;
	assert_eq!(latest.len(), 2);
	let modified = latest
		.iter()
		.find(|c| c.new.as_ref().is_some_and(|n| n.path == "a.running"))
		.unwrap();
	assert_eq!(modified.kind, ChangeKind::Modify);
	assert!(modified.old.is_some());
	let added = latest
		.iter()
		.find(|c| c.new.as_ref().is_some_and(|n| n.path == "b.startup"))
		.unwrap();
	assert_eq!(added.kind, ChangeKind::Add);
}

#[test]
fn log_filters_by_path_and_depth() {
	let dir = tempfile::tempdir().unwrap();
	let settings = helpers::test_settings(dir.path());
	let store = GitStore::open(&settings).unwrap();

	store.write("a.running", "one\n").unwrap();
	store.commit("first").unwrap();
	store.write("b.startup", "x\n").unwrap();
	let second = store.commit("second").unwrap();

	let filtered = store.log(&["b.startup"], None, None).unwrap();
	assert_eq!(filtered.len(), 1);
	assert_eq!(filtered[0].sha, second);
	assert_eq!(filtered[0].changes.len(), 1);

	let limited = store.log(&[], None, Some(1)).unwrap();
	assert_eq!(limited.len(), 1);
	assert_eq!(limited[0].sha, second);
}

#[test]
fn path_missing_at_old_revision_reads_none() {
	let dir = tempfile::tempdir().unwrap();
	let settings = helpers::test_settings(dir.path());
	let store = GitStore::open(&settings).unwrap();

	store.write("a.running", "one\n").unwrap();
	let first = store.commit("first").unwrap();
	store.write("b.startup", "x\n").unwrap();
	store.commit("second").unwrap();

	assert_eq!(store.read("b.startup", Some(&first)).unwrap(), None);
}

#[test]
fn diff_between_revisions() {
	let dir = tempfile::tempdir().unwrap();
	let settings = helpers::test_settings(dir.path());
	let store = GitStore::open(&settings).unwrap();

	store.write("a.running", "one\n").unwrap();
	let first = store.commit("first").unwrap();
	store.write("a.running", "two\n").unwrap();
	let second = store.commit("second").unwrap();

	let diff = store
		.diff("a.running", Some(&first), Some(&second))
		.unwrap();
	assert!(diff.contains("-one"));
	assert!(diff.contains("+two"));

	assert_eq!(
		store.diff("a.running", Some(&first), Some(&first)).unwrap(),
		""
	);
}
