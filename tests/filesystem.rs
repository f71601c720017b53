use lazy_vfs::{ErrorKind, FsBackend, LazyFS, Listing, Result, SnapshotEntry};

fn paths(listing: &Listing, prefix: &str, out: &mut Vec<String>) {
    if let Listing::Directory(children) = listing {
        for (name, child) in children {
            let path = format!("{}/{name}", prefix.trim_end_matches('/'));
            out.push(path.clone());
            paths(child, &path, out);
        }
    }
}

fn all_paths(fs: &LazyFS) -> Result<Vec<String>> {
    let mut out = Vec::new();
    paths(&fs.read_dir_recursive("/")?, "/", &mut out);
    Ok(out)
}

#[test]
fn test_write_creates_parents() -> Result<()> {
    let fs = LazyFS::new();
    fs.write("/a/b/c", b"hi")?;
    assert_eq!(fs.read_dir("/a")?, vec!["b"]);
    assert_eq!(fs.read("a/b/../b/c")?, b"hi");
    Ok(())
}

#[test]
fn test_mkdir_over_file_fails() -> Result<()> {
    let fs = LazyFS::new();
    fs.write("/x", b"1")?;
    assert_eq!(fs.mkdir("/x").unwrap_err().kind(), ErrorKind::AlreadyExists);
    Ok(())
}

#[test]
fn test_reserved_roots_are_protected() {
    let fs = LazyFS::new();
    for path in ["/", "/node_modules", "node_modules/."] {
        assert_eq!(fs.rmdir(path).unwrap_err().kind(), ErrorKind::PermissionDenied);
    }
    assert_eq!(
        fs.rename("/node_modules", "/lib").unwrap_err().kind(),
        ErrorKind::PermissionDenied
    );
    assert!(fs.stat("/node_modules").is_ok());
}

#[test]
fn test_renamed_node_keeps_its_identity() -> Result<()> {
    let fs = LazyFS::new();
    fs.write("/src/app.js", b"run()")?;
    let node = fs.lookup("/src/app.js").unwrap();
    fs.mkdir("/dist")?;
    fs.rename("/src/app.js", "/dist/app.js")?;
    fs.rename("/dist", "/out")?;
    assert_eq!(fs.path_of(node).as_deref(), Some("/out/app.js"));
    assert_eq!(fs.read("/out/app.js")?, b"run()");
    Ok(())
}

#[test]
fn test_directory_mtime_follows_membership() -> Result<()> {
    let fs = LazyFS::new();
    fs.mkdir("/d")?;
    let created = fs.stat("/d")?.mtime();
    fs.write("/d/f", b"1")?;
    let added = fs.stat("/d")?.mtime();
    assert!(added > created);
    fs.write("/d/f", b"2")?;
    assert_eq!(fs.stat("/d")?.mtime(), added);
    fs.unlink("/d/f")?;
    assert!(fs.stat("/d")?.mtime() > added);
    Ok(())
}

#[test]
fn test_snapshot_round_trip_on_fresh_instance() -> Result<()> {
    let fs = LazyFS::new();
    fs.write("/src/index.js", "console.log('héllo')".as_bytes())?;
    fs.mkdir_all("/src/empty")?;
    fs.write("/node_modules/react/index.js", b"module.exports = 1;")?;
    fs.write_placeholder("/node_modules/react/package.json")?;
    let snapshot = fs.snapshot();
    assert_eq!(
        snapshot.get("/node_modules/react/package.json"),
        Some(&SnapshotEntry::File(None))
    );
    assert!(snapshot.get("/node_modules").is_none());

    let copy = LazyFS::new();
    copy.write("/stale", b"gone after restore")?;
    copy.from_json(&fs.to_json()?)?;

    assert_eq!(all_paths(&copy)?, all_paths(&fs)?);
    for path in all_paths(&fs)? {
        let original = fs.stat(&path)?;
        if original.is_dir() {
            assert_eq!(copy.read_dir(&path)?, fs.read_dir(&path)?);
            assert_eq!(copy.stat(&path)?.is_remote(), original.is_remote());
        } else {
            assert_eq!(
                copy.read(&path).map_err(|e| e.kind()),
                fs.read(&path).map_err(|e| e.kind())
            );
        }
    }
    assert!(!copy.exists("/stale"));
    Ok(())
}

#[test]
fn test_malformed_snapshot_is_rejected() -> Result<()> {
    let fs = LazyFS::new();
    fs.write("/keep", b"1")?;
    let err = fs.from_json("not json").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedInput);
    assert_eq!(fs.read("/keep")?, b"1");
    Ok(())
}
