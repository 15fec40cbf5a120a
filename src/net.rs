use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time::timeout,
};

use crate::error::ZkError;

const ZERO_TIME: Duration = Duration::from_secs(0);
const READ_BUF_SIZE: usize = 64 * 1024;
const WRITE_BUF_SIZE: usize = 64 * 1024;

/// One framed TCP connection to a server.
///
/// The wire is a stream of frames: a 4-byte big-endian signed length followed
/// by exactly that many payload bytes. The handshake driver uses the stream
/// whole; afterwards `split` hands the read half to the receiver loop and the
/// write half to the sender loop, which keeps the single-reader/single-writer
/// discipline in the type system.
pub struct ZkStream {
    reader: FrameReader,
    writer: FrameWriter,
    local: SocketAddr,
    peer: SocketAddr,
}

impl ZkStream {
    pub async fn connect(addr: &SocketAddr, connect_timeout: Duration) -> io::Result<Self> {
        let stream = if connect_timeout == ZERO_TIME {
            TcpStream::connect(addr).await?
        } else {
            match timeout(connect_timeout, TcpStream::connect(addr)).await {
                Ok(r) => r?,
                Err(e) => return Err(e.into()),
            }
        };
        stream.set_nodelay(true)?;
        let local = stream.local_addr()?;
        let peer = stream.peer_addr()?;
        let (rd, wr) = stream.into_split();
        Ok(Self {
            reader: FrameReader { io: BufReader::with_capacity(READ_BUF_SIZE, rd) },
            writer: FrameWriter { io: BufWriter::with_capacity(WRITE_BUF_SIZE, wr) },
            local,
            peer,
        })
    }

    #[inline(always)]
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    #[inline(always)]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    #[inline(always)]
    pub async fn read_frame(&mut self, max_len: usize) -> Result<BytesMut, ZkError> {
        self.reader.read_frame(max_len).await
    }

    #[inline(always)]
    pub async fn read_frame_timeout(
        &mut self, max_len: usize, read_timeout: Duration,
    ) -> Result<BytesMut, ZkError> {
        self.reader.read_frame_timeout(max_len, read_timeout).await
    }

    #[inline(always)]
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<(), ZkError> {
        self.writer.write_frame(payload).await
    }

    pub fn split(self) -> (FrameReader, FrameWriter) {
        (self.reader, self.writer)
    }
}

pub struct FrameReader {
    io: BufReader<OwnedReadHalf>,
}

impl FrameReader {
    /// Read one length-prefixed frame. A declared length below zero or at or
    /// above `max_len` aborts the connection as a framing error.
    pub async fn read_frame(&mut self, max_len: usize) -> Result<BytesMut, ZkError> {
        let mut len_buf = [0u8; 4];
        self.io.read_exact(&mut len_buf).await?;
        let len = i32::from_be_bytes(len_buf);
        if len < 0 || len as usize >= max_len {
            warn!("frame length {} out of bounds (max {})", len, max_len);
            return Err(ZkError::MalformedFrame);
        }
        let mut payload = BytesMut::zeroed(len as usize);
        self.io.read_exact(&mut payload).await?;
        Ok(payload)
    }

    #[inline(always)]
    pub async fn read_frame_timeout(
        &mut self, max_len: usize, read_timeout: Duration,
    ) -> Result<BytesMut, ZkError> {
        if read_timeout == ZERO_TIME {
            return self.read_frame(max_len).await;
        }
        match timeout(read_timeout, self.read_frame(max_len)).await {
            Ok(r) => r,
            Err(e) => Err(e.into()),
        }
    }
}

pub struct FrameWriter {
    io: BufWriter<OwnedWriteHalf>,
}

impl FrameWriter {
    /// Prefix `payload` with its length and write it out; flushed before
    /// returning so the frame hits the wire as one unit.
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<(), ZkError> {
        self.io.write_all(&(payload.len() as i32).to_be_bytes()).await?;
        self.io.write_all(payload).await?;
        self.io.flush().await?;
        Ok(())
    }

    /// Write an already length-prefixed frame image (a packet's serialized
    /// bytes) verbatim.
    pub async fn write_raw(&mut self, frame: &[u8]) -> Result<(), ZkError> {
        self.io.write_all(frame).await?;
        self.io.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) {
        let _ = self.io.shutdown().await;
    }
}
