//! Protocol session tests against in-memory collaborators.

mod common;

use common::{commit, remote_path, tree_of, FakeGit, FakeIpfs};
use ipgit_core::object::{self, Object, ObjectId};
use ipgit_core::protocol::Session;
use std::io::Cursor;
use std::sync::Arc;

fn session(api: Arc<FakeIpfs>, git: Arc<FakeGit>, git_dir: std::path::PathBuf) -> Session {
    Session::new(
        api,
        git,
        git_dir,
        "origin".to_string(),
        remote_path(),
        "master".to_string(),
    )
}

async fn run_session(
    api: Arc<FakeIpfs>,
    git: Arc<FakeGit>,
    git_dir: std::path::PathBuf,
    input: &str,
) -> anyhow::Result<String> {
    let mut s = session(api, git, git_dir);
    let mut out = Vec::new();
    s.speak_git(Cursor::new(input.to_string()), &mut out).await?;
    Ok(String::from_utf8(out).unwrap())
}

fn tmp_git_dir() -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let git_dir = dir.path().join(".git");
    (dir, git_dir)
}

#[tokio::test]
async fn test_capabilities() {
    let api = Arc::new(FakeIpfs::new());
    let git = Arc::new(FakeGit::new());
    let (_tmp, git_dir) = tmp_git_dir();
    let out = run_session(api, git, git_dir, "capabilities\n")
        .await
        .unwrap();
    assert_eq!(out, "fetch\npush\n\n");
}

#[tokio::test]
async fn test_list_from_info_refs() {
    let api = Arc::new(FakeIpfs::new());
    let git = Arc::new(FakeGit::new());
    let (_tmp, git_dir) = tmp_git_dir();

    let a = "1".repeat(40);
    let b = "2".repeat(40);
    let remote = remote_path();
    api.put_file(
        remote.join("info/refs").as_str(),
        format!("{}\trefs/heads/master\n{}\trefs/heads/dev\n", a, b),
    );
    api.put_file(remote.join("HEAD").as_str(), "ref: refs/heads/master\n");

    let out = run_session(api, git, git_dir, "list\n").await.unwrap();
    assert_eq!(
        out,
        format!(
            "{} refs/heads/dev\n{} refs/heads/master\n{} HEAD\n\n",
            b, a, a
        )
    );
}

#[tokio::test]
async fn test_list_falls_back_to_refs_walk() {
    let api = Arc::new(FakeIpfs::new());
    let git = Arc::new(FakeGit::new());
    let (_tmp, git_dir) = tmp_git_dir();

    let a = "a".repeat(40);
    let remote = remote_path();
    // no info/refs at all, only the refs namespace itself
    api.put_file(
        remote.join("refs/heads/master").as_str(),
        format!("{}\n", a),
    );
    api.put_file(remote.join("HEAD").as_str(), "ref: refs/heads/master\n");

    let out = run_session(api, git, git_dir, "list\n").await.unwrap();
    assert_eq!(out, format!("{} refs/heads/master\n{} HEAD\n\n", a, a));
}

#[tokio::test]
async fn test_list_head_guessed_from_default_branch() {
    let api = Arc::new(FakeIpfs::new());
    let git = Arc::new(FakeGit::new());
    let (_tmp, git_dir) = tmp_git_dir();

    let a = "b".repeat(40);
    let remote = remote_path();
    api.put_file(
        remote.join("refs/heads/master").as_str(),
        format!("{}\n", a),
    );
    // no HEAD file anywhere

    let out = run_session(api, git, git_dir, "list\n").await.unwrap();
    assert!(out.contains(&format!("{} HEAD\n", a)));
}

#[tokio::test]
async fn test_list_for_push_on_empty_remote_is_not_fatal() {
    let api = Arc::new(FakeIpfs::new());
    let git = Arc::new(FakeGit::new());
    let (_tmp, git_dir) = tmp_git_dir();

    let out = run_session(api, git, git_dir, "list for-push\n")
        .await
        .unwrap();
    assert_eq!(out, "\n");
}

#[tokio::test]
async fn test_list_on_empty_remote_fails() {
    let api = Arc::new(FakeIpfs::new());
    let git = Arc::new(FakeGit::new());
    let (_tmp, git_dir) = tmp_git_dir();

    assert!(run_session(api, git, git_dir, "list\n").await.is_err());
}

#[tokio::test]
async fn test_fetch_materializes_commit_tree_and_blobs() {
    let api = Arc::new(FakeIpfs::new());
    let git = Arc::new(FakeGit::new());
    let (_tmp, git_dir) = tmp_git_dir();
    let remote = remote_path();

    let blob = Object::Blob(b"file content\n".to_vec());
    let blob_id = api.put_object(&remote, &blob);
    let tree = tree_of(&[("hello.txt", blob_id)]);
    let tree_id = api.put_object(&remote, &tree);
    let tip = commit(tree_id, None, "initial");
    let tip_id = api.put_object(&remote, &tip);

    let input = format!("fetch {} refs/heads/master\n\n", tip_id);
    let out = run_session(Arc::clone(&api), git, git_dir.clone(), &input)
        .await
        .unwrap();
    assert_eq!(out, "\n\n");

    for id in [&tip_id, &tree_id, &blob_id] {
        let hex = id.to_hex();
        let local = git_dir.join("objects").join(&hex[..2]).join(&hex[2..]);
        assert!(local.exists(), "object {} not materialized", hex);
        let file = std::fs::File::open(&local).unwrap();
        object::decode(file).unwrap();
    }
}

#[tokio::test]
async fn test_fetch_walks_parent_chain() {
    let api = Arc::new(FakeIpfs::new());
    let git = Arc::new(FakeGit::new());
    let (_tmp, git_dir) = tmp_git_dir();
    let remote = remote_path();

    let blob_id = api.put_object(&remote, &Object::Blob(b"v1".to_vec()));
    let tree_a_id = api.put_object(&remote, &tree_of(&[("f", blob_id)]));
    let commit_a_id = api.put_object(&remote, &commit(tree_a_id, None, "first"));

    let blob2_id = api.put_object(&remote, &Object::Blob(b"v2".to_vec()));
    let tree_b_id = api.put_object(&remote, &tree_of(&[("f", blob2_id)]));
    let commit_b_id = api.put_object(&remote, &commit(tree_b_id, Some(commit_a_id), "second"));

    let input = format!("fetch {} refs/heads/master\n\n", commit_b_id);
    run_session(Arc::clone(&api), git, git_dir.clone(), &input)
        .await
        .unwrap();

    for id in [commit_a_id, commit_b_id, tree_a_id, tree_b_id, blob_id, blob2_id] {
        let hex = id.to_hex();
        assert!(
            git_dir.join("objects").join(&hex[..2]).join(&hex[2..]).exists(),
            "object {} not materialized",
            hex
        );
    }
}

#[tokio::test]
async fn test_fetch_rejects_nested_subtree() {
    let api = Arc::new(FakeIpfs::new());
    let git = Arc::new(FakeGit::new());
    let (_tmp, git_dir) = tmp_git_dir();
    let remote = remote_path();

    let blob_id = api.put_object(&remote, &Object::Blob(b"x".to_vec()));
    let inner_id = api.put_object(&remote, &tree_of(&[("inner.txt", blob_id)]));
    let outer_id = api.put_object(&remote, &tree_of(&[("subdir", inner_id)]));
    let tip_id = api.put_object(&remote, &commit(outer_id, None, "nested"));

    let input = format!("fetch {} refs/heads/master\n\n", tip_id);
    let err = run_session(api, git, git_dir, &input).await.unwrap_err();
    assert!(format!("{err:#}").contains("expected a blob"), "{err:#}");
}

#[tokio::test]
async fn test_fetch_rolls_back_corrupt_object() {
    let api = Arc::new(FakeIpfs::new());
    let git = Arc::new(FakeGit::new());
    let (_tmp, git_dir) = tmp_git_dir();
    let remote = remote_path();

    // a syntactically valid id whose stored bytes are not a loose object
    let bogus = ObjectId::from_data(b"bogus");
    let hex = bogus.to_hex();
    api.put_file(
        format!("{}/objects/{}/{}", remote.as_str(), &hex[..2], &hex[2..]),
        b"definitely not zlib".to_vec(),
    );

    let input = format!("fetch {} refs/heads/master\n\n", hex);
    let err = run_session(api, git, git_dir.clone(), &input).await.unwrap_err();
    assert!(format!("{err:#}").contains("bad framing"), "{err:#}");
    assert!(
        !git_dir.join("objects").join(&hex[..2]).join(&hex[2..]).exists(),
        "corrupt object left behind"
    );
}

#[tokio::test]
async fn test_push_session_reports_ok() {
    let api = Arc::new(FakeIpfs::new());
    let mut git = FakeGit::new();
    let (_tmp, git_dir) = tmp_git_dir();
    let remote = remote_path();

    let old = "3".repeat(40);
    let new = "4".repeat(40);
    let obj = "5".repeat(40);
    api.put_file(
        remote.join("info/refs").as_str(),
        format!("{}\trefs/heads/master\n", old),
    );
    git.reachable
        .insert("refs/heads/master".to_string(), vec![obj.clone()]);
    git.flattened.insert(obj.clone(), b"flattened".to_vec());
    git.refs
        .insert("refs/heads/master".to_string(), new.clone());
    git.ancestors.insert((old.clone(), new.clone()));
    let git = Arc::new(git);

    let input = "list for-push\npush refs/heads/master:refs/heads/master\n\n";
    let out = run_session(Arc::clone(&api), Arc::clone(&git), git_dir, input)
        .await
        .unwrap();
    assert!(out.contains("ok refs/heads/master\n"), "{out}");
    assert_eq!(git.remote_urls.lock().unwrap().len(), 1);
    // one object link plus the ref link
    assert_eq!(api.links.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_push_session_reports_non_fast_forward() {
    let api = Arc::new(FakeIpfs::new());
    let mut git = FakeGit::new();
    let (_tmp, git_dir) = tmp_git_dir();
    let remote = remote_path();

    let old = "6".repeat(40);
    let new = "7".repeat(40);
    api.put_file(
        remote.join("info/refs").as_str(),
        format!("{}\trefs/heads/master\n", old),
    );
    git.refs
        .insert("refs/heads/master".to_string(), new.clone());
    // no ancestors entry: the update is not a fast-forward
    let git = Arc::new(git);

    let input = "list for-push\npush refs/heads/master:refs/heads/master\n\n";
    let out = run_session(Arc::clone(&api), Arc::clone(&git), git_dir, input)
        .await
        .unwrap();
    assert!(
        out.contains("error refs/heads/master non-fast-forward\n"),
        "{out}"
    );
    assert!(git.remote_urls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_push_deletion_is_rejected_per_ref() {
    let api = Arc::new(FakeIpfs::new());
    let git = Arc::new(FakeGit::new());
    let (_tmp, git_dir) = tmp_git_dir();

    let out = run_session(api, git, git_dir, "push :refs/heads/master\n\n")
        .await
        .unwrap();
    assert!(
        out.contains("error refs/heads/master deleting remote refs is not supported\n"),
        "{out}"
    );
}

#[tokio::test]
async fn test_unknown_command_is_a_protocol_violation() {
    let api = Arc::new(FakeIpfs::new());
    let git = Arc::new(FakeGit::new());
    let (_tmp, git_dir) = tmp_git_dir();

    assert!(run_session(api, git, git_dir, "frobnicate\n").await.is_err());
}
