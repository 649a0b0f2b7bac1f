//! Frame codec: length-prefixed bincode frames over a byte stream
//!
//! Every RPC request and response travels as one [`Frame`]. The `tag`
//! selects the handler on the receiving side; `body` carries the bincode
//! encoded in/out struct; `bulk` carries the one-sided data payload
//! (chunk bytes, packed dirents) and is empty for purely structural RPCs.

use serde::{Deserialize, Serialize};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::MAX_FRAME_SIZE;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
	/// Matches a response to its in-flight request on one connection
	pub id: u64,

	/// RPC tag, e.g. `rpc_srv_write_data`
	pub tag: String,

	/// bincode-encoded in/out struct
	pub body: Vec<u8>,

	/// One-sided payload pulled from or pushed into a bulk region
	pub bulk: Vec<u8>,
}

impl Frame {
	pub fn new(id: u64, tag: &str, body: Vec<u8>, bulk: Vec<u8>) -> Self {
		Frame { id, tag: tag.to_string(), body, bulk }
	}
}

/// Serialize and send one frame
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> io::Result<()>
where
	W: AsyncWrite + Unpin,
{
	let encoded = bincode::serialize(frame)
		.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
	if encoded.len() > MAX_FRAME_SIZE {
		return Err(io::Error::new(io::ErrorKind::InvalidData, "frame exceeds maximum size"));
	}
	writer.write_all(&(encoded.len() as u32).to_le_bytes()).await?;
	writer.write_all(&encoded).await?;
	writer.flush().await?;
	Ok(())
}

/// Receive one frame. Returns None on a clean EOF between frames;
/// a connection cut mid-frame is an error.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<Frame>>
where
	R: AsyncRead + Unpin,
{
	let mut len_buf = [0u8; 4];
	match reader.read_exact(&mut len_buf).await {
		Ok(_) => {}
		Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
		Err(e) => return Err(e),
	}
	let len = u32::from_le_bytes(len_buf) as usize;
	if len > MAX_FRAME_SIZE {
		return Err(io::Error::new(io::ErrorKind::InvalidData, "oversized frame announced"));
	}
	let mut buf = vec![0u8; len];
	reader.read_exact(&mut buf).await?;
	let frame = bincode::deserialize(&buf)
		.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
	Ok(Some(frame))
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn test_frame_round_trip() {
		let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
		rt.block_on(async {
			let frame = Frame::new(7, "rpc_srv_stat", vec![1, 2, 3], vec![9; 100]);
			let mut writer = std::io::Cursor::new(Vec::new());
			write_frame(&mut writer, &frame).await.unwrap();

			let mut cursor = std::io::Cursor::new(writer.into_inner());
			let back = read_frame(&mut cursor).await.unwrap().unwrap();
			assert_eq!(back.id, 7);
			assert_eq!(back.tag, "rpc_srv_stat");
			assert_eq!(back.body, vec![1, 2, 3]);
			assert_eq!(back.bulk.len(), 100);

			// clean EOF yields None
			assert!(read_frame(&mut cursor).await.unwrap().is_none());
		});
	}
}

// vim: ts=4
