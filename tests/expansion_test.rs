//! Online expansion: grow the cluster, redistribute, verify placement

mod common;

use std::collections::BTreeMap;
use std::time::Duration;

use burstfs::config::CHUNK_SIZE;
use burstfs::distributor::{Distributor, SimpleHashDistributor};
use burstfs::error::FsError;
use common::TestCluster;

const FILES: usize = 20;
const FILE_SIZE: u64 = 2 * CHUNK_SIZE;

fn file_path(i: usize) -> String {
	format!("/data/f{:03}", i)
}

fn pattern(i: usize, len: usize) -> Vec<u8> {
	(0..len).map(|off| ((off + i * 31) % 251) as u8).collect()
}

#[tokio::test]
async fn test_expand_two_to_three() {
	let mut cluster = TestCluster::start(2).await;

	// populate
	{
		let client = cluster.client().await;
		client.mkdir("/data", 0o755).await.unwrap();
		for i in 0..FILES {
			let path = file_path(i);
			client.create(&path, 0o644).await.unwrap();
			client.pwrite(&path, &pattern(i, FILE_SIZE as usize), 0).await.unwrap();
		}
	}
	let bytes_before = total_bytes(&cluster, 2).await;
	assert_eq!(bytes_before, FILES as u64 * FILE_SIZE);

	// the operator adds node C; its registration rewrites the hosts file
	cluster.add_daemon().await;
	let admin = cluster.client().await;
	admin.expand_start(2, 3).await.unwrap();

	// while in maintenance, client traffic answers Busy, never bad data
	{
		let old_client = cluster.client().await;
		let mut buf = vec![0u8; 64];
		match old_client.pread(&file_path(0), &mut buf, 0).await {
			Ok(_) => assert_eq!(buf[..], pattern(0, 64)[..]),
			Err(FsError::Busy) => {}
			Err(e) => panic!("unexpected error during maintenance: {}", e),
		}
	}

	// poll until every daemon finished redistributing
	let mut spins = 0;
	while admin.expand_status().await.unwrap() > 0 {
		spins += 1;
		assert!(spins < 600, "redistribution did not finish");
		tokio::time::sleep(Duration::from_millis(50)).await;
	}
	admin.expand_finalize().await.unwrap();

	// placement now follows the three-node distributor for every key
	// and every chunk, and no byte was lost
	let dist = SimpleHashDistributor::new(0, 3);
	let bytes_after = total_bytes(&cluster, 3).await;
	assert_eq!(bytes_after, bytes_before);

	let mut chunk_census: BTreeMap<(String, u64), usize> = BTreeMap::new();
	for idx in 0..3 {
		let host_id = cluster.host_id_of(idx);
		for (path, chunk_id, size) in cluster.chunks_on(idx).await {
			assert_eq!(
				dist.locate_data(&path, chunk_id),
				host_id,
				"chunk {} of '{}' on the wrong node",
				chunk_id,
				path
			);
			assert_eq!(size, CHUNK_SIZE);
			*chunk_census.entry((path, chunk_id)).or_insert(0) += 1;
		}
	}
	assert_eq!(chunk_census.len(), FILES * 2);
	assert!(chunk_census.values().all(|&n| n == 1), "duplicated chunk after expansion");

	for idx in 0..3 {
		let host_id = cluster.host_id_of(idx);
		let ctx = cluster.daemons[idx].context();
		for i in 0..FILES {
			let path = file_path(i);
			let here = ctx.mdb.get(&path).is_ok();
			let owned = dist.locate_file_metadata(&path) == host_id;
			assert_eq!(here, owned, "metadata of '{}' misplaced", path);
		}
	}

	// and the data still reads back intact through a fresh client
	let client = cluster.client().await;
	for i in 0..FILES {
		let mut buf = vec![0u8; FILE_SIZE as usize];
		let n = client.pread(&file_path(i), &mut buf, 0).await.unwrap();
		assert_eq!(n, FILE_SIZE);
		assert_eq!(buf, pattern(i, FILE_SIZE as usize));
	}
	cluster.shutdown().await;
}

async fn total_bytes(cluster: &TestCluster, nodes: usize) -> u64 {
	let mut total = 0;
	for idx in 0..nodes {
		for (_, _, size) in cluster.chunks_on(idx).await {
			total += size;
		}
	}
	total
}

// vim: ts=4
