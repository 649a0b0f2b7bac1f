//! End-to-end scenarios against a small in-process cluster

mod common;

use burstfs::arithmetic::block_index;
use burstfs::client::openfile::OpenFlags;
use burstfs::config::CHUNK_SIZE;
use burstfs::distributor::{Distributor, SimpleHashDistributor};
use burstfs::error::FsError;
use common::TestCluster;

#[tokio::test]
async fn test_create_write_read_remove() {
	let cluster = TestCluster::start(2).await;
	let client = cluster.client().await;

	client.create("/hello", 0o644).await.unwrap();
	let written = client.pwrite("/hello", b"abc", 0).await.unwrap();
	assert_eq!(written, 3);

	let md = client.stat("/hello").await.unwrap();
	assert_eq!(md.size, 3);
	assert!(md.is_regular());

	let mut buf = [0u8; 3];
	let read = client.pread("/hello", &mut buf, 0).await.unwrap();
	assert_eq!(read, 3);
	assert_eq!(&buf, b"abc");

	client.remove("/hello").await.unwrap();
	assert!(matches!(client.stat("/hello").await, Err(FsError::NotFound)));

	// chunk files are gone on every node
	for idx in 0..2 {
		assert!(cluster.chunks_on(idx).await.is_empty());
	}
	cluster.shutdown().await;
}

#[tokio::test]
async fn test_cross_chunk_write_spans_nodes() {
	let cluster = TestCluster::start(2).await;
	let client = cluster.client().await;

	// half a chunk in, two full chunks long: touches chunks 0, 1, 2
	let offset = CHUNK_SIZE / 2;
	let len = (2 * CHUNK_SIZE) as usize;
	let payload: Vec<u8> = (0..len).map(|i| (i % 241) as u8).collect();

	client.create("/x", 0o644).await.unwrap();
	let written = client.pwrite("/x", &payload, offset).await.unwrap();
	assert_eq!(written, len as u64);

	let md = client.stat("/x").await.unwrap();
	assert_eq!(md.size as u64, offset + len as u64);

	let mut buf = vec![0u8; len];
	let read = client.pread("/x", &mut buf, offset).await.unwrap();
	assert_eq!(read, len as u64);
	assert_eq!(buf, payload);

	// every chunk file lives on the node the distributor names, with
	// the physical length implied by the range
	let dist = SimpleHashDistributor::new(0, 2);
	let mut found = Vec::new();
	for idx in 0..2 {
		let host_id = cluster.host_id_of(idx);
		for (path, chunk_id, size) in cluster.chunks_on(idx).await {
			assert_eq!(path, "/x");
			assert_eq!(dist.locate_data("/x", chunk_id), host_id);
			found.push((chunk_id, size));
		}
	}
	found.sort();
	assert_eq!(
		found,
		vec![(0, CHUNK_SIZE), (1, CHUNK_SIZE), (2, CHUNK_SIZE / 2)]
	);
	cluster.shutdown().await;
}

#[tokio::test]
async fn test_readdir_returns_immediate_children() {
	let cluster = TestCluster::start(2).await;
	let client = cluster.client().await;

	client.mkdir("/d", 0o755).await.unwrap();
	client.create("/d/a", 0o644).await.unwrap();
	client.create("/d/b", 0o644).await.unwrap();
	client.create("/d/c", 0o644).await.unwrap();
	// decoys: a sibling and a grandchild must not appear
	client.create("/da", 0o644).await.unwrap();
	client.mkdir("/d/b2", 0o755).await.unwrap();
	client.create("/d/b2/deep", 0o644).await.unwrap();

	client.pwrite("/d/a", b"12345", 0).await.unwrap();

	let entries = client.readdir("/d").await.unwrap();
	let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
	assert_eq!(names, vec!["a", "b", "b2", "c"]);
	assert!(names.iter().all(|n| !n.contains('/')));

	let a = entries.iter().find(|e| e.name == "a").unwrap();
	assert_eq!(a.size, 5);
	assert!(!a.is_dir);
	let b2 = entries.iter().find(|e| e.name == "b2").unwrap();
	assert!(b2.is_dir);

	// the plain name/type listing agrees with the extended one
	let names = client.readdir_names("/d").await.unwrap();
	assert_eq!(
		names,
		vec![
			("a".to_string(), true),
			("b".to_string(), true),
			("b2".to_string(), false),
			("c".to_string(), true),
		]
	);
	cluster.shutdown().await;
}

#[tokio::test]
async fn test_chmod_keeps_file_type() {
	let cluster = TestCluster::start(2).await;
	let client = cluster.client().await;

	client.create("/perm", 0o644).await.unwrap();
	client.chmod("/perm", 0o600).await.unwrap();
	let md = client.stat("/perm").await.unwrap();
	assert!(md.is_regular());
	assert_eq!(md.mode & 0o7777, 0o600);
	cluster.shutdown().await;
}

#[tokio::test]
async fn test_truncate_up_then_down() {
	let cluster = TestCluster::start(2).await;
	let client = cluster.client().await;

	client.create("/t", 0o644).await.unwrap();
	client.pwrite("/t", b"abc", 0).await.unwrap();

	client.truncate("/t", 3_000_000).await.unwrap();
	assert_eq!(client.stat("/t").await.unwrap().size, 3_000_000);

	client.truncate("/t", 100).await.unwrap();
	assert_eq!(client.stat("/t").await.unwrap().size, 100);

	// no chunk beyond the boundary remains anywhere; the boundary chunk
	// carries exactly the remainder
	let boundary = block_index(100, CHUNK_SIZE);
	for idx in 0..2 {
		for (_, chunk_id, size) in cluster.chunks_on(idx).await {
			assert!(chunk_id <= boundary);
			if chunk_id == boundary {
				assert_eq!(size, 100);
			}
		}
	}

	// the hole past the written bytes reads as zeros
	let mut buf = vec![0xffu8; 100];
	let read = client.pread("/t", &mut buf, 0).await.unwrap();
	assert_eq!(read, 100);
	assert_eq!(&buf[..3], b"abc");
	assert!(buf[3..].iter().all(|&b| b == 0));
	cluster.shutdown().await;
}

#[tokio::test]
async fn test_descriptor_io_and_seek() {
	let cluster = TestCluster::start(2).await;
	let client = cluster.client().await;

	let flags = OpenFlags { creat: true, ..Default::default() };
	let fd = client.open("/f", flags, 0o644).await.unwrap();
	assert_eq!(client.write(fd, b"hello world").await.unwrap(), 11);

	client.lseek(fd, 0, libc::SEEK_SET).await.unwrap();
	let mut buf = [0u8; 5];
	assert_eq!(client.read(fd, &mut buf).await.unwrap(), 5);
	assert_eq!(&buf, b"hello");
	// cursor advanced
	assert_eq!(client.read(fd, &mut buf).await.unwrap(), 5);
	assert_eq!(&buf, b" worl");

	let end = client.lseek(fd, 0, libc::SEEK_END).await.unwrap();
	assert_eq!(end, 11);
	client.close(fd).await.unwrap();
	// double close is invalid
	assert!(client.close(fd).await.is_err());
	cluster.shutdown().await;
}

#[tokio::test]
async fn test_open_semantics() {
	let cluster = TestCluster::start(2).await;
	let client = cluster.client().await;

	// O_CREAT on a fresh path creates
	let flags = OpenFlags { creat: true, ..Default::default() };
	let fd = client.open("/o", flags, 0o644).await.unwrap();
	client.write(fd, b"data").await.unwrap();
	client.close(fd).await.unwrap();

	// O_CREAT without O_EXCL tolerates an existing file
	let fd = client.open("/o", flags, 0o644).await.unwrap();
	client.close(fd).await.unwrap();

	// O_CREAT|O_EXCL does not
	let excl = OpenFlags { creat: true, excl: true, ..Default::default() };
	assert!(matches!(client.open("/o", excl, 0o644).await, Err(FsError::Exists)));

	// O_TRUNC empties the file
	let trunc = OpenFlags { trunc: true, ..Default::default() };
	let fd = client.open("/o", trunc, 0o644).await.unwrap();
	client.close(fd).await.unwrap();
	assert_eq!(client.stat("/o").await.unwrap().size, 0);

	// plain open of a missing path fails
	assert!(matches!(
		client.open("/missing", OpenFlags::default(), 0).await,
		Err(FsError::NotFound)
	));
	cluster.shutdown().await;
}

#[tokio::test]
async fn test_remove_constraints() {
	let cluster = TestCluster::start(2).await;
	let client = cluster.client().await;

	client.mkdir("/dir", 0o755).await.unwrap();
	client.create("/dir/f", 0o644).await.unwrap();
	assert!(matches!(client.remove("/dir").await, Err(FsError::NotEmpty)));
	client.remove("/dir/f").await.unwrap();
	client.remove("/dir").await.unwrap();

	// create collision
	client.create("/c", 0o644).await.unwrap();
	assert!(matches!(client.create("/c", 0o644).await, Err(FsError::Exists)));
	// mkdir is idempotent
	client.mkdir("/m", 0o755).await.unwrap();
	client.mkdir("/m", 0o755).await.unwrap();
	cluster.shutdown().await;
}

#[tokio::test]
async fn test_sparse_read_returns_zeros() {
	let cluster = TestCluster::start(2).await;
	let client = cluster.client().await;

	client.create("/sparse", 0o644).await.unwrap();
	// write only past the second chunk boundary, leaving a hole
	let offset = 2 * CHUNK_SIZE + 17;
	client.pwrite("/sparse", b"tail", offset).await.unwrap();
	assert_eq!(client.stat("/sparse").await.unwrap().size as u64, offset + 4);

	let mut buf = vec![0xaau8; 64];
	let read = client.pread("/sparse", &mut buf, CHUNK_SIZE).await.unwrap();
	assert_eq!(read, 64);
	assert!(buf.iter().all(|&b| b == 0));
	cluster.shutdown().await;
}

#[tokio::test]
async fn test_fs_config_publishes_field_toggles() {
	let cluster = TestCluster::start(2).await;
	let client = cluster.client().await;

	// the client bootstrapped the instance-wide toggles from host 0
	let flags = client.md_settings();
	assert!(!flags.atime);
	assert!(flags.mtime);
	assert!(flags.ctime);
	assert!(flags.link_count);
	assert!(flags.blocks);

	// and the daemons maintain exactly the enabled fields
	client.create("/cfg", 0o644).await.unwrap();
	client.pwrite("/cfg", &[7u8; 1025], 0).await.unwrap();
	let md = client.stat("/cfg").await.unwrap();
	assert_eq!(md.atime, 0);
	assert!(md.mtime > 0);
	assert!(md.ctime > 0);
	assert_eq!(md.link_count, 1);
	assert_eq!(md.blocks, 3);
	cluster.shutdown().await;
}

#[tokio::test]
async fn test_statfs_aggregates_nodes() {
	let cluster = TestCluster::start(2).await;
	let client = cluster.client().await;
	let stat = client.statfs().await.unwrap();
	assert_eq!(stat.chunk_size, CHUNK_SIZE);
	assert!(stat.chunk_total > 0);
	assert!(stat.chunk_free <= stat.chunk_total);
	cluster.shutdown().await;
}

#[tokio::test]
async fn test_replicated_write_lands_on_successor() {
	let cluster = TestCluster::start(2).await;
	let mut settings = cluster.client_settings();
	settings.num_repl = 1;
	let client = burstfs::client::Client::with_settings(settings).await.unwrap();

	client.create("/r", 0o644).await.unwrap();
	client.pwrite("/r", b"replicated", 0).await.unwrap();

	// with one extra copy on a two-node cluster, chunk 0 exists on both
	for idx in 0..2 {
		let chunks = cluster.chunks_on(idx).await;
		assert_eq!(chunks.len(), 1);
		assert_eq!(chunks[0].1, 0);
		assert_eq!(chunks[0].2, 10);
	}

	let mut buf = [0u8; 10];
	assert_eq!(client.pread("/r", &mut buf, 0).await.unwrap(), 10);
	assert_eq!(&buf, b"replicated");
	cluster.shutdown().await;
}

#[tokio::test]
async fn test_write_size_cache_flushes_on_stat() {
	let cluster = TestCluster::start(2).await;
	let mut settings = cluster.client_settings();
	settings.write_size_cache = true;
	settings.write_size_cache_threshold = 100;
	let client = burstfs::client::Client::with_settings(settings).await.unwrap();

	client.create("/wsc", 0o644).await.unwrap();
	client.pwrite("/wsc", b"0123", 0).await.unwrap();
	client.pwrite("/wsc", b"4567", 4).await.unwrap();
	// both size updates were coalesced, stat forces the flush
	assert_eq!(client.stat("/wsc").await.unwrap().size, 8);

	let mut buf = [0u8; 8];
	assert_eq!(client.pread("/wsc", &mut buf, 0).await.unwrap(), 8);
	assert_eq!(&buf, b"01234567");
	cluster.shutdown().await;
}

// vim: ts=4
