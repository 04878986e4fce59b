mod common;

use common::{CALLER, Mount, Origin, pattern};
use gridfs::EntryKind;
use std::fs;
use std::sync::Arc;
use std::thread;

#[test]
fn listing_fills_the_metadata_cache() {
    let origin = Origin::start(&[]);
    let mount = Mount::new();
    origin.put("/dir/a.txt", "0123456789");
    fs::create_dir(origin.file("/dir/sub")).unwrap();

    let listing = mount.core.readdir(&CALLER, &origin.path("/dir")).unwrap();
    let names: Vec<_> = listing.iter().map(|e| (e.name.as_str(), e.attrs.kind)).collect();
    assert_eq!(names, [("a.txt", EntryKind::File), ("sub", EntryKind::Directory)]);
    assert_eq!(listing[0].attrs.size, 10);

    // gone at the origin, still known locally within the expiry window
    fs::remove_file(origin.file("/dir/a.txt")).unwrap();
    let cached = mount.core.getattr(&CALLER, &origin.path("/dir/a.txt")).unwrap();
    assert_eq!(cached.size, 10);

    let sub = mount.core.getattr(&CALLER, &origin.path("/dir/sub")).unwrap();
    assert_eq!(sub.kind, EntryKind::Directory);
}

#[test]
fn mailto_links_are_not_listed() {
    let origin = Origin::start(&[]);
    let mount = Mount::new();
    origin.put("/contact/mailto:admin@example.org", "");
    origin.put("/contact/readme", "hi");

    let listing = mount.core.readdir(&CALLER, &origin.path("/contact")).unwrap();
    let names: Vec<_> = listing.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["readme"]);
}

#[test]
fn forbidden_is_eacces_and_missing_is_enoent() {
    let origin = Origin::start(&["/private"]);
    let mount = Mount::new();
    origin.put("/private/file", "secret");

    let err = mount.core.getattr(&CALLER, &origin.path("/private/file")).unwrap_err();
    assert_eq!(err.errno(), libc::EACCES);

    let err = mount.core.getattr(&CALLER, &origin.path("/missing")).unwrap_err();
    assert_eq!(err.errno(), libc::ENOENT);

    let err = mount.core.readdir(&CALLER, &origin.path("/private")).unwrap_err();
    assert_eq!(err.errno(), libc::EACCES);
}

#[test]
fn getattr_follows_the_directory_redirect() {
    let origin = Origin::start(&[]);
    let mount = Mount::new();
    fs::create_dir(origin.file("/d")).unwrap();
    origin.put("/f", "12345");

    let dir = mount.core.getattr(&CALLER, &origin.path("/d")).unwrap();
    assert_eq!(dir.kind, EntryKind::Directory);

    let file = mount.core.getattr(&CALLER, &origin.path("/f")).unwrap();
    assert_eq!((file.kind, file.size), (EntryKind::File, 5));
    assert!(file.modified > 0);

    let host = mount.core.getattr(&CALLER, &origin.path("")).unwrap();
    assert_eq!(host.kind, EntryKind::Directory);
}

#[test]
fn read_touches_every_overlapping_block() {
    let origin = Origin::start(&[]);
    let mount = Mount::new();
    let content = pattern(20_000);
    origin.put("/big.bin", &content);
    let path = origin.path("/big.bin");

    let data = mount.core.read(&CALLER, &path, 4000, 8000).unwrap();
    assert_eq!(data, &content[4000..12_000]);

    let mut blocks: Vec<_> = fs::read_dir(mount.block_dir(&path))
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    blocks.sort();
    assert_eq!(blocks, ["0-4095", "4096-8191", "8192-12287"]);

    // served from the block cache once the origin copy is gone
    fs::remove_file(origin.file("/big.bin")).unwrap();
    assert_eq!(mount.core.read(&CALLER, &path, 4096, 100).unwrap(), &content[4096..4196]);
}

#[test]
fn read_stops_at_end_of_file() {
    let origin = Origin::start(&[]);
    let mount = Mount::new();
    let content = pattern(5000);
    origin.put("/short", &content);

    let data = mount.core.read(&CALLER, &origin.path("/short"), 0, 16_384).unwrap();
    assert_eq!(data, content);
}

#[test]
fn read_of_a_missing_file_fails() {
    let origin = Origin::start(&[]);
    let mount = Mount::new();
    let err = mount.core.read(&CALLER, &origin.path("/nothing"), 0, 10).unwrap_err();
    assert_eq!(err.errno(), libc::ENOENT);
    assert!(!mount.block_dir(&origin.path("/nothing")).exists());
}

#[test]
fn reads_at_or_past_the_end_are_empty() {
    let origin = Origin::start(&[]);
    let mount = Mount::new();
    origin.put("/empty", "");
    origin.put("/small", pattern(100));

    assert!(mount.core.read(&CALLER, &origin.path("/empty"), 0, 4096).unwrap().is_empty());
    assert!(mount.core.read(&CALLER, &origin.path("/small"), 100, 10).unwrap().is_empty());
    assert!(mount.core.read(&CALLER, &origin.path("/small"), 8192, 10).unwrap().is_empty());
}

#[test]
fn unreachable_origin_is_enoent() {
    let mount = Mount::new();
    let err = mount.core.getattr(&CALLER, "/http/127.0.0.1:1/x").unwrap_err();
    assert_eq!(err.errno(), libc::ENOENT);
}

#[test]
fn missing_scratch_space_is_eio() {
    let origin = Origin::start(&[]);
    let mount = Mount::new();
    origin.put("/data", pattern(100));
    fs::remove_dir_all(mount.root.path().join("tmp")).unwrap();

    let path = origin.path("/data");
    let err = mount.core.read(&CALLER, &path, 0, 100).unwrap_err();
    assert_eq!(err.errno(), libc::EIO);
    assert!(!mount.block_dir(&path).exists());
}

#[test]
fn write_then_read_never_sees_old_bytes() {
    let origin = Origin::start(&[]);
    let mount = Mount::new();
    origin.put("/w.txt", vec![b'a'; 5000]);
    let path = origin.path("/w.txt");

    assert_eq!(mount.core.read(&CALLER, &path, 100, 5).unwrap(), b"aaaaa");
    assert!(mount.block_dir(&path).exists());

    assert_eq!(mount.core.write(&CALLER, &path, 100, b"hello").unwrap(), 5);
    assert!(!mount.block_dir(&path).exists());

    assert_eq!(mount.core.read(&CALLER, &path, 98, 9).unwrap(), b"aahelloaa");
    assert_eq!(fs::read(origin.file("/w.txt")).unwrap().len(), 5000);
}

#[test]
fn truncate_changes_the_reported_size() {
    let origin = Origin::start(&[]);
    let mount = Mount::new();
    origin.put("/t.txt", vec![b'x'; 100]);
    let path = origin.path("/t.txt");

    assert_eq!(mount.core.getattr(&CALLER, &path).unwrap().size, 100);
    mount.core.truncate(&CALLER, &path, 10).unwrap();
    assert_eq!(mount.core.getattr(&CALLER, &path).unwrap().size, 10);
    assert_eq!(fs::read(origin.file("/t.txt")).unwrap(), vec![b'x'; 10]);
}

#[test]
fn rename_moves_within_a_namespace_only() {
    let origin = Origin::start(&[]);
    let mount = Mount::new();
    origin.put("/a.txt", "payload");

    mount
        .core
        .rename(&CALLER, &origin.path("/a.txt"), &origin.path("/b.txt"))
        .unwrap();
    assert!(!origin.file("/a.txt").exists());
    assert_eq!(fs::read_to_string(origin.file("/b.txt")).unwrap(), "payload");

    let across = format!("/https/{}/b.txt", origin.addr);
    let err = mount.core.rename(&CALLER, &origin.path("/b.txt"), &across).unwrap_err();
    assert_eq!(err.errno(), libc::EXDEV);
    assert!(origin.file("/b.txt").exists());
}

#[test]
fn create_and_remove_files_and_directories() {
    let origin = Origin::start(&[]);
    let mount = Mount::new();
    let dir = origin.path("/newdir");
    let file = origin.path("/newdir/empty");

    mount.core.mkdir(&CALLER, &dir).unwrap();
    assert!(origin.file("/newdir").is_dir());

    mount.core.mknod(&CALLER, &file).unwrap();
    assert_eq!(fs::metadata(origin.file("/newdir/empty")).unwrap().len(), 0);
    assert_eq!(mount.core.getattr(&CALLER, &file).unwrap().size, 0);

    mount.core.unlink(&CALLER, &file).unwrap();
    assert!(!origin.file("/newdir/empty").exists());
    assert_eq!(mount.core.unlink(&CALLER, &file).unwrap_err().errno(), libc::ENOENT);

    mount.core.rmdir(&CALLER, &dir).unwrap();
    assert!(!origin.file("/newdir").exists());
}

#[test]
fn concurrent_callers_share_a_bounded_pool() {
    let origin = Arc::new(Origin::start(&[]));
    let mount = Arc::new(Mount::new());
    origin.put("/shared", "same bytes");

    let workers: Vec<_> = (0..40u32)
        .map(|i| {
            let (origin, mount) = (Arc::clone(&origin), Arc::clone(&mount));
            thread::spawn(move || {
                let caller = gridfs::Caller {
                    uid: 2000 + i % 20,
                    gid: 0,
                    pid: 1,
                };
                let attrs = mount.core.getattr(&caller, &origin.path("/shared")).unwrap();
                assert_eq!(attrs.size, 10);
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let owners = mount.core.executor().pool().owners();
    assert_eq!(owners.len(), gridfs::pool::POOL_SIZE);
    assert!(owners.iter().all(Option::is_some));
}
