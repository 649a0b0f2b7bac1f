//! Concurrent append semantics: offsets are assigned atomically by the
//! metadata owner, so parallel appenders never interleave

mod common;

use burstfs::client::openfile::OpenFlags;
use common::TestCluster;

#[tokio::test]
async fn test_concurrent_appends_do_not_interleave() {
	let cluster = TestCluster::start(2).await;
	let client_a = cluster.client().await;
	let client_b = cluster.client().await;

	client_a.create("/log", 0o644).await.unwrap();

	let flags = OpenFlags { append: true, ..Default::default() };
	let fd_a = client_a.open("/log", flags, 0o644).await.unwrap();
	let fd_b = client_b.open("/log", flags, 0o644).await.unwrap();

	let (ra, rb) = tokio::join!(client_a.write(fd_a, b"aaaa\n"), client_b.write(fd_b, b"bbbb\n"));
	assert_eq!(ra.unwrap(), 5);
	assert_eq!(rb.unwrap(), 5);

	let md = client_a.stat("/log").await.unwrap();
	assert_eq!(md.size, 10);

	let mut buf = [0u8; 10];
	assert_eq!(client_a.pread("/log", &mut buf, 0).await.unwrap(), 10);
	let contents = std::str::from_utf8(&buf).unwrap();
	assert!(
		contents == "aaaa\nbbbb\n" || contents == "bbbb\naaaa\n",
		"lines interleaved: {:?}",
		contents
	);

	client_a.close(fd_a).await.unwrap();
	client_b.close(fd_b).await.unwrap();
	cluster.shutdown().await;
}

#[tokio::test]
async fn test_append_after_pwrite_continues_at_eof() {
	let cluster = TestCluster::start(2).await;
	let client = cluster.client().await;

	client.create("/log2", 0o644).await.unwrap();
	client.pwrite("/log2", b"head:", 0).await.unwrap();

	let flags = OpenFlags { append: true, ..Default::default() };
	let fd = client.open("/log2", flags, 0o644).await.unwrap();
	client.write(fd, b"tail").await.unwrap();
	client.close(fd).await.unwrap();

	let mut buf = [0u8; 9];
	assert_eq!(client.pread("/log2", &mut buf, 0).await.unwrap(), 9);
	assert_eq!(&buf, b"head:tail");
	cluster.shutdown().await;
}

#[tokio::test]
async fn test_many_appenders_byte_count() {
	let cluster = TestCluster::start(2).await;
	let client = cluster.client().await;
	client.create("/counter", 0o644).await.unwrap();

	let flags = OpenFlags { append: true, ..Default::default() };
	let mut handles = Vec::new();
	for _ in 0..8 {
		let c = cluster.client().await;
		handles.push(tokio::spawn(async move {
			let fd = c.open("/counter", flags, 0o644).await.unwrap();
			for _ in 0..4 {
				c.write(fd, b"01234567").await.unwrap();
			}
			c.close(fd).await.unwrap();
		}));
	}
	for handle in handles {
		handle.await.unwrap();
	}
	// 8 writers x 4 appends x 8 bytes, no offset handed out twice
	assert_eq!(client.stat("/counter").await.unwrap().size, 8 * 4 * 8);
	cluster.shutdown().await;
}

// vim: ts=4
