use crate::consts::READ_TIMEOUT;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{ClearBuffer, DataBits, Parity, SerialPort, SerialStream, StopBits};
use tracing::debug;

/// Pause between polls of a transport that had nothing to read.
const EMPTY_READ_BACKOFF: Duration = Duration::from_millis(5);

/// Which way a raw frame travelled. Passed to packet observers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Received,
    Sent,
}

/// Byte oriented link to a device bus.
///
/// Engines never block inside `tick()`: they only read what
/// `bytes_available` reports, or bound the read with a timeout.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Number of bytes that can be read right now without waiting.
    fn bytes_available(&mut self) -> io::Result<usize>;

    /// Read up to `buf.len()` bytes. May return 0 when nothing is pending.
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write the whole buffer.
    async fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Drop everything pending in the input buffer.
    fn clear_input(&mut self) -> io::Result<()>;
}

/// Fill `buf` completely or give up after `limit`. Returns false on timeout.
pub async fn read_exact_timeout<T: Transport>(
    transport: &mut T,
    buf: &mut [u8],
    limit: Duration,
) -> io::Result<bool> {
    let fill = async {
        let mut filled = 0;
        while filled < buf.len() {
            let count = transport.read(&mut buf[filled..]).await?;
            if count == 0 {
                tokio::time::sleep(EMPTY_READ_BACKOFF).await;
            }
            filled += count;
        }
        Ok::<(), io::Error>(())
    };

    match tokio::time::timeout(limit, fill).await {
        Ok(result) => result.map(|_| true),
        Err(_) => Ok(false),
    }
}

/// Read whatever is pending right now, appending it to `out`.
pub async fn read_available<T: Transport>(transport: &mut T, out: &mut Vec<u8>) -> io::Result<usize> {
    let pending = transport.bytes_available()?;
    if pending == 0 {
        return Ok(0);
    }

    let mut buf = vec![0u8; pending];
    let count = match tokio::time::timeout(READ_TIMEOUT, transport.read(&mut buf)).await {
        Ok(result) => result?,
        Err(_) => 0,
    };
    out.extend_from_slice(&buf[..count]);
    Ok(count)
}

/// Serial port transport, 8N1.
pub struct SerialTransport {
    stream: SerialStream,
}

impl SerialTransport {
    #[tracing::instrument]
    pub fn open(port_name: &str, baud_rate: u32) -> anyhow::Result<Self> {
        let builder = tokio_serial::new(port_name, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One);
        let stream = SerialStream::open(&builder)?;
        stream.clear(ClearBuffer::All)?;
        debug!("Serial port {} opened at {} baud", port_name, baud_rate);
        Ok(Self { stream })
    }
}

impl Transport for SerialTransport {
    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.stream.bytes_to_read()? as usize)
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.stream.read(buf).await?;
        if count == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "Serial port disconnected"));
        }
        Ok(count)
    }

    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.stream.write_all(data).await?;
        self.stream.flush().await
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.stream.clear(ClearBuffer::Input)?;
        Ok(())
    }
}

type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

#[derive(Default)]
struct MemoryState {
    inbound: VecDeque<u8>,
    written: Vec<Vec<u8>>,
    responder: Option<Responder>,
    fail_writes: bool,
}

/// In-memory transport. Clones share the same buffers, so a test keeps one
/// handle while the engine owns the other.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emulate a device: every write is answered with whatever `responder`
    /// returns for it.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Vec<u8> + Send + 'static,
    {
        let transport = Self::default();
        transport.lock().responder = Some(Box::new(responder));
        transport
    }

    /// Queue bytes as if they arrived from the bus.
    pub fn inject(&self, bytes: &[u8]) {
        self.lock().inbound.extend(bytes.iter().copied());
    }

    /// Every `write` call so far, in order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.lock().written.clone()
    }

    pub fn take_written(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.lock().written)
    }

    /// Make subsequent writes fail with `BrokenPipe`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Transport for MemoryTransport {
    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.lock().inbound.len())
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.lock();
        let count = buf.len().min(state.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }

    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let mut state = self.lock();
        if state.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write refused"));
        }
        state.written.push(data.to_vec());
        let reply = state.responder.as_mut().map(|respond| respond(data));
        if let Some(reply) = reply {
            state.inbound.extend(reply);
        }
        Ok(())
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.lock().inbound.clear();
        Ok(())
    }
}
