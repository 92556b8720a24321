//! File-backed, single-partition log
//!
//! Lets one node run the store without a log cluster. Every record is an
//! append-only frame:
//!
//! `[MAGIC][OFFSET][FLAGS][KEY_LEN][VALUE_LEN][KEY][VALUE][CRC32]`
//!
//! All integers are little-endian. `FLAGS` marks an absent key or value so
//! that both survive a round trip distinct from empty byte strings. The
//! CRC covers everything between the magic and the checksum.
//!
//! On start the valid prefix is replayed and a torn tail is cut off, so the
//! next append lands on a frame boundary. A failed append is cut off the
//! same way before the next one is written.

use crate::common::{crc32, SyncPolicy};
use crate::log::{
    BarrierCallback, ConsumeCallback, LogError, LogFactory, LogRecord, LogResult, ReplicatedLog,
    SendCallback,
};
use crate::store::LogSettings;
use bytes::Bytes;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;

const FRAME_MAGIC: [u8; 4] = [0x4F, 0x4B, 0x56, 0x31]; // "OKV1"
const HEADER_LEN: usize = 4 + 8 + 1 + 4 + 4;
const CRC_LEN: usize = 4;
const MAX_PAYLOAD_LEN: usize = 64 * 1024 * 1024;

const FLAG_NO_KEY: u8 = 0b01;
const FLAG_NO_VALUE: u8 = 0b10;

/// Encode one frame
fn encode_frame(offset: u64, key: Option<&[u8]>, value: Option<&[u8]>) -> Vec<u8> {
    let mut flags = 0u8;
    if key.is_none() {
        flags |= FLAG_NO_KEY;
    }
    if value.is_none() {
        flags |= FLAG_NO_VALUE;
    }
    let key = key.unwrap_or(&[]);
    let value = value.unwrap_or(&[]);

    let mut frame = Vec::with_capacity(HEADER_LEN + key.len() + value.len() + CRC_LEN);
    frame.extend_from_slice(&FRAME_MAGIC);
    frame.extend_from_slice(&offset.to_le_bytes());
    frame.push(flags);
    frame.extend_from_slice(&(key.len() as u32).to_le_bytes());
    frame.extend_from_slice(&(value.len() as u32).to_le_bytes());
    frame.extend_from_slice(key);
    frame.extend_from_slice(value);

    let checksum = crc32(&frame[FRAME_MAGIC.len()..]);
    frame.extend_from_slice(&checksum.to_le_bytes());
    frame
}

/// Outcome of reading at one position
#[derive(Debug)]
enum Frame {
    /// A complete, verified record and its encoded length
    Record(LogRecord, u64),
    /// End of file, or a frame that is not fully written yet
    Incomplete,
}

/// Read exactly `buf.len()` bytes, or report `false` on a short read
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> LogResult<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(LogError::Read(e.to_string())),
    }
}

fn read_frame<R: Read>(reader: &mut R) -> LogResult<Frame> {
    let mut header = [0u8; HEADER_LEN];
    if !read_full(reader, &mut header)? {
        return Ok(Frame::Incomplete);
    }

    if header[..4] != FRAME_MAGIC {
        return Err(LogError::Corrupted("invalid frame magic".into()));
    }

    let offset = u64::from_le_bytes(header[4..12].try_into().unwrap_or_default());
    let flags = header[12];
    let key_len = u32::from_le_bytes(header[13..17].try_into().unwrap_or_default()) as usize;
    let value_len = u32::from_le_bytes(header[17..21].try_into().unwrap_or_default()) as usize;

    if key_len + value_len > MAX_PAYLOAD_LEN {
        return Err(LogError::Corrupted(format!(
            "frame at offset {} claims {} payload bytes",
            offset,
            key_len + value_len
        )));
    }

    let mut body = vec![0u8; key_len + value_len + CRC_LEN];
    if !read_full(reader, &mut body)? {
        return Ok(Frame::Incomplete);
    }

    let (payload, checksum) = body.split_at(key_len + value_len);
    let stored = u32::from_le_bytes(checksum.try_into().unwrap_or_default());
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&header[FRAME_MAGIC.len()..]);
    hasher.update(payload);
    if hasher.finalize() != stored {
        return Err(LogError::Corrupted(format!(
            "checksum mismatch at offset {}",
            offset
        )));
    }

    let key = (flags & FLAG_NO_KEY == 0).then(|| Bytes::copy_from_slice(&payload[..key_len]));
    let value = (flags & FLAG_NO_VALUE == 0).then(|| Bytes::copy_from_slice(&payload[key_len..]));
    let len = (HEADER_LEN + body.len()) as u64;

    Ok(Frame::Record(
        LogRecord {
            partition: 0,
            offset,
            key,
            value,
        },
        len,
    ))
}

/// Name of the thread that performs a started log's file I/O
const IO_THREAD_NAME: &str = "offsetkv-file-log";

/// Append side of an open log
struct Appender {
    writer: BufWriter<File>,
    next_offset: u64,
    /// Byte length of every acknowledged frame
    committed_len: u64,
}

impl Appender {
    /// Position `file` right after the last acknowledged frame, cutting off
    /// anything written past it
    fn at(mut file: File, next_offset: u64, committed_len: u64) -> LogResult<Self> {
        let len = file.metadata()?.len();
        if len < committed_len {
            return Err(LogError::Write(format!(
                "{} acknowledged bytes never reached the file",
                committed_len - len
            )));
        }
        if len > committed_len {
            file.set_len(committed_len)?;
        }
        file.seek(SeekFrom::Start(committed_len))?;
        Ok(Self {
            writer: BufWriter::new(file),
            next_offset,
            committed_len,
        })
    }

    fn write_frame(
        &mut self,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
        sync_policy: SyncPolicy,
    ) -> LogResult<u64> {
        let offset = self.next_offset;
        let frame = encode_frame(offset, key, value);
        self.writer.write_all(&frame)?;
        match sync_policy {
            SyncPolicy::Always => {
                self.writer.flush()?;
                self.writer.get_ref().sync_data()?;
            }
            SyncPolicy::Flush => self.writer.flush()?,
            SyncPolicy::Never => {}
        }
        self.next_offset += 1;
        self.committed_len += frame.len() as u64;
        Ok(offset)
    }
}

enum Sink {
    Open(Appender),
    /// A failed append could not be rolled back; appends stay rejected
    /// until the log is restarted
    Failed(LogError),
}

/// Consumer position: byte position of the next unread frame
#[derive(Debug, Default)]
struct Tail {
    position: u64,
}

enum Command {
    Send {
        key: Option<Bytes>,
        value: Option<Bytes>,
        on_complete: SendCallback,
    },
    ReadToEnd(BarrierCallback),
}

impl Command {
    fn reject(self, error: LogError) {
        match self {
            Command::Send { on_complete, .. } => on_complete(Err(error)),
            Command::ReadToEnd(on_complete) => on_complete(Err(error)),
        }
    }
}

struct Worker {
    commands: mpsc::UnboundedSender<Command>,
    handle: JoinHandle<()>,
}

/// File state shared between the log handle and its I/O thread
struct Shared {
    path: PathBuf,
    on_record: ConsumeCallback,
    sync_policy: SyncPolicy,
    max_message_bytes: Option<usize>,
    sink: Mutex<Option<Sink>>,
    tail: Mutex<Tail>,
}

impl Shared {
    /// Scan the valid prefix of the file.
    /// Returns (valid length in bytes, next offset).
    fn scan(path: &Path) -> LogResult<(u64, u64)> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((0, 0)),
            Err(e) => return Err(LogError::Read(e.to_string())),
        };

        let mut reader = BufReader::new(file);
        let mut valid = 0u64;
        let mut next_offset = 0u64;
        loop {
            match read_frame(&mut reader) {
                Ok(Frame::Record(record, len)) => {
                    valid += len;
                    next_offset = record.offset + 1;
                }
                Ok(Frame::Incomplete) => break,
                Err(e) => {
                    tracing::warn!("Log scan stopped at corrupted frame: {}", e);
                    break;
                }
            }
        }
        Ok((valid, next_offset))
    }

    /// Truncate a torn tail, open the appender and replay the file
    fn open(&self) -> LogResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let (valid, next_offset) = Self::scan(&self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.path)?;
        let len = file.metadata()?.len();
        if len > valid {
            tracing::warn!(
                "Truncating {} bytes of torn log tail in {:?}",
                len - valid,
                self.path
            );
        }
        *self.sink.lock() = Some(Sink::Open(Appender::at(file, next_offset, valid)?));

        let replayed = self.catch_up()?;
        tracing::info!("File log {:?} started, replayed {} records", self.path, replayed);
        Ok(())
    }

    fn close(&self) -> LogResult<()> {
        if let Some(Sink::Open(mut appender)) = self.sink.lock().take() {
            appender.writer.flush()?;
            appender.writer.get_ref().sync_all()?;
        }
        Ok(())
    }

    /// Deliver every complete frame past the consumer position
    fn catch_up(&self) -> LogResult<usize> {
        let mut tail = self.tail.lock();

        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(LogError::Read(e.to_string())),
        };
        let mut reader = BufReader::new(file);
        reader
            .seek(SeekFrom::Start(tail.position))
            .map_err(|e| LogError::Read(e.to_string()))?;

        let mut delivered = 0;
        loop {
            match read_frame(&mut reader)? {
                Frame::Record(record, len) => {
                    (self.on_record)(Ok(record));
                    tail.position += len;
                    delivered += 1;
                }
                Frame::Incomplete => break,
            }
        }
        Ok(delivered)
    }

    fn append(&self, key: Option<&[u8]>, value: Option<&[u8]>) -> LogResult<u64> {
        let size = key.map_or(0, <[u8]>::len) + value.map_or(0, <[u8]>::len);
        if let Some(max) = self.max_message_bytes {
            if size > max {
                return Err(LogError::RecordTooLarge { size, max });
            }
        }

        let mut sink = self.sink.lock();
        let written = match sink.as_mut() {
            Some(Sink::Open(appender)) => appender.write_frame(key, value, self.sync_policy),
            Some(Sink::Failed(cause)) => {
                return Err(LogError::Write(format!(
                    "log closed after failed append: {}",
                    cause
                )))
            }
            None => return Err(LogError::NotRunning),
        };
        if let Err(cause) = &written {
            self.roll_back(&mut sink, cause);
        }
        written
    }

    /// Flush pending appends, then deliver everything in the file. The sink
    /// stays locked so a rejected frame is never seen by the consumer.
    fn read_to_end(&self) -> LogResult<()> {
        let mut sink = self.sink.lock();
        let flushed = match sink.as_mut() {
            Some(Sink::Open(appender)) => appender.writer.flush().map_err(LogError::from),
            Some(Sink::Failed(_)) => Ok(()),
            None => return Err(LogError::NotRunning),
        };
        if let Err(cause) = flushed {
            self.roll_back(&mut sink, &cause);
            return Err(cause);
        }
        self.catch_up().map(|_| ())
    }

    /// Drop unflushed bytes and cut the file back to the last acknowledged
    /// frame. If that is impossible the sink is marked failed.
    fn roll_back(&self, sink: &mut Option<Sink>, cause: &LogError) {
        let appender = match sink.take() {
            Some(Sink::Open(appender)) => appender,
            other => {
                *sink = other;
                return;
            }
        };
        let Appender {
            writer,
            next_offset,
            committed_len,
        } = appender;
        let (file, _unflushed) = writer.into_parts();
        drop(file);

        let reopened = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(LogError::from)
            .and_then(|file| Appender::at(file, next_offset, committed_len));
        *sink = Some(match reopened {
            Ok(appender) => {
                tracing::warn!(
                    "Rolled back failed append to {:?} at offset {}: {}",
                    self.path,
                    next_offset,
                    cause
                );
                Sink::Open(appender)
            }
            Err(e) => {
                tracing::error!(
                    "Cannot recover {:?} after failed append ({}): {}",
                    self.path,
                    cause,
                    e
                );
                Sink::Failed(cause.clone())
            }
        });
    }

    fn execute(&self, command: Command) {
        match command {
            Command::Send {
                key,
                value,
                on_complete,
            } => {
                let result = self.append(key.as_deref(), value.as_deref()).map(|offset| {
                    tracing::trace!("Appended record at offset {}", offset);
                });
                on_complete(result);
            }
            Command::ReadToEnd(on_complete) => on_complete(self.read_to_end()),
        }
    }
}

/// Single-partition log persisted in one file.
///
/// Once started, appends and barriers are queued to a dedicated I/O thread;
/// their callbacks run there, in submission order.
pub struct FileLog {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl FileLog {
    pub fn new(
        path: impl AsRef<Path>,
        sync_policy: SyncPolicy,
        max_message_bytes: Option<usize>,
        on_record: ConsumeCallback,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                path: path.as_ref().to_path_buf(),
                on_record,
                sync_policy,
                max_message_bytes,
                sink: Mutex::new(None),
                tail: Mutex::new(Tail::default()),
            }),
            worker: Mutex::new(None),
        }
    }

    fn submit(&self, command: Command) {
        let rejected = match self.worker.lock().as_ref() {
            Some(worker) => worker.commands.send(command).err().map(|e| e.0),
            None => Some(command),
        };
        if let Some(command) = rejected {
            command.reject(LogError::NotRunning);
        }
    }
}

impl ReplicatedLog for FileLog {
    fn start(&self) -> LogResult<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        self.shared.open()?;

        let (commands, mut queue) = mpsc::unbounded_channel::<Command>();
        let shared = self.shared.clone();
        let handle = std::thread::Builder::new()
            .name(IO_THREAD_NAME.into())
            .spawn(move || {
                while let Some(command) = queue.blocking_recv() {
                    shared.execute(command);
                }
            })
            .map_err(|e| LogError::Other(format!("cannot spawn I/O thread: {}", e)))?;
        *worker = Some(Worker { commands, handle });
        Ok(())
    }

    /// Drains queued commands, then flushes and syncs the file
    fn stop(&self) -> LogResult<()> {
        let worker = self.worker.lock().take();
        if let Some(Worker { commands, handle }) = worker {
            drop(commands);
            if handle.thread().id() != std::thread::current().id() {
                handle
                    .join()
                    .map_err(|_| LogError::Other("file log I/O thread panicked".into()))?;
            }
        }
        self.shared.close()
    }

    fn send(&self, key: Option<Bytes>, value: Option<Bytes>, on_complete: SendCallback) {
        self.submit(Command::Send {
            key,
            value,
            on_complete,
        });
    }

    fn read_to_end(&self, on_complete: BarrierCallback) {
        self.submit(Command::ReadToEnd(on_complete));
    }
}

/// [`LogFactory`] opening a [`FileLog`] at a fixed path
#[derive(Debug, Clone)]
pub struct FileLogFactory {
    path: PathBuf,
    sync_policy: SyncPolicy,
}

impl FileLogFactory {
    pub fn new(path: impl AsRef<Path>, sync_policy: SyncPolicy) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            sync_policy,
        }
    }
}

impl LogFactory for FileLogFactory {
    fn create(
        &self,
        settings: &LogSettings,
        on_record: ConsumeCallback,
    ) -> crate::Result<Arc<dyn ReplicatedLog>> {
        if settings.topic.partitions > 1 {
            tracing::debug!(
                "File log keeps a single partition; ignoring partition count {}",
                settings.topic.partitions
            );
        }
        Ok(Arc::new(FileLog::new(
            &self.path,
            self.sync_policy,
            settings.topic.max_message_bytes(),
            on_record,
        )))
    }
}
