use std::collections::VecDeque;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use redolink_common::{Endian, FileOffset, RedoError, Result, Scn, Seq, Shutdown};
use tracing::{debug, warn};

use crate::block::{self, BlockHeader, FileHeader, RedoHeader};

/// First data block: block 0 is the file header, block 1 the redo header.
pub const FIRST_DATA_BLOCK: u32 = 2;

#[cfg(target_os = "linux")]
const O_DIRECT: i32 = 0x4000;

#[derive(Clone, Debug)]
pub struct ReaderConfig {
    /// Ring capacity in blocks (`read-buffer-max`).
    pub ring_blocks: usize,
    /// Poll interval while tailing an online log.
    pub redo_read_sleep: Duration,
    /// Backoff between archive read retries.
    pub arch_read_sleep: Duration,
    /// Retry budget for a not-yet-complete archive file.
    pub arch_read_tries: u32,
    /// Verify the per-block checksum (`disable-checks: BLOCK_SUM` clears it).
    pub verify_checksums: bool,
    /// Attempt O_DIRECT opens (cleared by the `DIRECT_DISABLE` flag).
    pub direct_io: bool,
    /// Online member (growing tail) vs finished archive.
    pub online: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            ring_blocks: 64,
            redo_read_sleep: Duration::from_millis(50),
            arch_read_sleep: Duration::from_millis(100),
            arch_read_tries: 3,
            verify_checksums: true,
            direct_io: false,
            online: false,
        }
    }
}

/// Outcome of one `read_block` call.
#[derive(Debug)]
pub enum BlockRead {
    Data(Vec<u8>),
    EndOfFile,
    /// The online log was resequenced under us; restart from archive.
    Overwritten,
}

#[derive(Debug, Clone)]
enum EndState {
    EndOfFile,
    Overwritten,
    Failed { corrupt: bool, offset: u64, reason: String },
}

struct RingState {
    blocks: VecDeque<(u32, Vec<u8>)>,
    end: Option<EndState>,
    stop: bool,
}

struct Shared {
    state: Mutex<RingState>,
    /// Consumer waits here for data or an end state.
    data_ready: Condvar,
    /// Producer waits here for ring space.
    space_ready: Condvar,
}

/// Lazy, restartable, ordered stream of validated redo blocks from a single
/// file. One background thread performs the blocking I/O and keeps a ring of
/// read-ahead blocks; the parser pulls them in order.
pub struct RedoReader {
    path: PathBuf,
    header: RedoHeader,
    block_size: usize,
    block_count: u32,
    file_size: u64,
    endian: Endian,
    shared: Arc<Shared>,
    io_thread: Option<JoinHandle<()>>,
    next_block: u32,
}

impl RedoReader {
    /// Open a redo file, validate its headers and start the read-ahead
    /// thread. Fails `NotReady` when the file is missing or too short to
    /// carry its headers, `Corrupt` when validation fails.
    pub fn open(path: &Path, config: ReaderConfig, shutdown: Shutdown) -> Result<RedoReader> {
        let mut file = open_redo_file(path, &config)?;
        let file_size = file.metadata()?.len();
        if file_size < 2 * 512 {
            return Err(RedoError::NotReady(format!(
                "{}: only {} bytes",
                path.display(),
                file_size
            )));
        }

        // Block 0: probe endianness and the block size.
        let mut probe = vec![0u8; 512];
        file.read_exact(&mut probe)?;
        let file_header = FileHeader::parse(&probe)?;
        let block_size = file_header.block_size;
        let endian = file_header.endian;

        // Block 1: redo header.
        let mut header_block = vec![0u8; block_size];
        file.seek(SeekFrom::Start(block_size as u64))?;
        file.read_exact(&mut header_block)?;
        let header_offset = FileOffset::from_block(1, block_size);
        if config.verify_checksums {
            block::verify_block_checksum(&header_block, endian, header_offset)?;
        }
        let block_header = BlockHeader::parse(endian, &header_block, header_offset)?;
        let header = RedoHeader::parse(endian, &header_block, header_offset)?;
        if block_header.sequence != header.sequence {
            return Err(RedoError::corrupt(
                header_offset,
                format!(
                    "header block sequence {} != redo sequence {}",
                    block_header.sequence, header.sequence
                ),
            ));
        }

        let shared = Arc::new(Shared {
            state: Mutex::new(RingState {
                blocks: VecDeque::new(),
                end: None,
                stop: false,
            }),
            data_ready: Condvar::new(),
            space_ready: Condvar::new(),
        });

        let io = IoThread {
            file,
            path: path.to_path_buf(),
            config: config.clone(),
            shared: Arc::clone(&shared),
            shutdown,
            endian,
            block_size,
            block_count: file_header.block_count,
            file_size,
            sequence: header.sequence,
        };
        let io_thread = std::thread::Builder::new()
            .name(format!("redo-io-{}", header.sequence))
            .spawn(move || io.run())
            .map_err(RedoError::Io)?;

        Ok(RedoReader {
            path: path.to_path_buf(),
            header,
            block_size,
            block_count: file_header.block_count,
            file_size,
            endian,
            shared,
            io_thread: Some(io_thread),
            next_block: FIRST_DATA_BLOCK,
        })
    }

    pub fn header(&self) -> &RedoHeader {
        &self.header
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sequence(&self) -> Seq {
        self.header.sequence
    }

    pub fn first_scn(&self) -> Scn {
        self.header.first_scn
    }

    pub fn next_scn(&self) -> Scn {
        self.header.next_scn
    }

    /// Pull the next validated block. Blocks are delivered strictly in
    /// order; `block_no` must be the next unread block.
    pub fn read_block(&mut self, block_no: u32) -> Result<BlockRead> {
        assert_eq!(block_no, self.next_block, "blocks must be read in order");

        let mut state = self.shared.state.lock().unwrap();
        loop {
            if let Some((no, data)) = state.blocks.pop_front() {
                debug_assert_eq!(no, block_no);
                self.next_block += 1;
                self.shared.space_ready.notify_one();
                return Ok(BlockRead::Data(data));
            }
            match &state.end {
                Some(EndState::EndOfFile) => return Ok(BlockRead::EndOfFile),
                Some(EndState::Overwritten) => return Ok(BlockRead::Overwritten),
                Some(EndState::Failed { corrupt, offset, reason }) => {
                    let offset = FileOffset(*offset);
                    return Err(if *corrupt {
                        RedoError::corrupt(offset, reason.clone())
                    } else {
                        RedoError::NotReady(reason.clone())
                    });
                }
                None => {}
            }
            if state.stop {
                return Err(RedoError::NotReady("reader stopped".into()));
            }
            state = self.shared.data_ready.wait(state).unwrap();
        }
    }
}

impl Drop for RedoReader {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.stop = true;
            self.shared.space_ready.notify_all();
            self.shared.data_ready.notify_all();
        }
        if let Some(handle) = self.io_thread.take() {
            let _ = handle.join();
        }
    }
}

fn open_redo_file(path: &Path, config: &ReaderConfig) -> Result<File> {
    #[cfg(target_os = "linux")]
    if config.direct_io {
        use std::os::unix::fs::OpenOptionsExt;
        match std::fs::OpenOptions::new()
            .read(true)
            .custom_flags(O_DIRECT)
            .open(path)
        {
            Ok(file) => return Ok(file),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "direct I/O open failed, falling back to buffered");
            }
        }
    }
    let _ = config;
    match File::open(path) {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(RedoError::NotReady(format!(
            "{}: not found",
            path.display()
        ))),
        Err(e) => Err(e.into()),
    }
}

// ---------------------------------------------------------------------------
// Background I/O
// ---------------------------------------------------------------------------

struct IoThread {
    file: File,
    path: PathBuf,
    config: ReaderConfig,
    shared: Arc<Shared>,
    shutdown: Shutdown,
    endian: Endian,
    block_size: usize,
    block_count: u32,
    file_size: u64,
    sequence: Seq,
}

impl IoThread {
    fn run(mut self) {
        let mut block_no = FIRST_DATA_BLOCK;
        let mut retries = 0u32;

        loop {
            if self.shutdown.is_requested() || self.stopped() {
                return;
            }
            if block_no >= self.block_count {
                if self.config.online {
                    // The tail may still grow; re-stat and re-check the header.
                    match self.poll_online(block_no) {
                        PollOutcome::Grew => continue,
                        PollOutcome::Switched => {
                            self.finish(EndState::Overwritten);
                            return;
                        }
                        PollOutcome::Stop => return,
                    }
                }
                self.finish(EndState::EndOfFile);
                return;
            }

            match self.read_one(block_no) {
                Ok(Some(data)) => {
                    retries = 0;
                    if !self.push(block_no, data) {
                        return;
                    }
                    block_no += 1;
                }
                Ok(None) => {
                    // Short read: the block is not on disk yet.
                    if self.config.online {
                        match self.poll_online(block_no) {
                            PollOutcome::Grew => continue,
                            PollOutcome::Switched => {
                                self.finish(EndState::Overwritten);
                                return;
                            }
                            PollOutcome::Stop => return,
                        }
                    }
                    retries += 1;
                    if retries > self.config.arch_read_tries {
                        self.finish(EndState::Failed {
                            corrupt: false,
                            offset: block_no as u64 * self.block_size as u64,
                            reason: format!(
                                "{}: block {} missing after {} tries",
                                self.path.display(),
                                block_no,
                                retries - 1
                            ),
                        });
                        return;
                    }
                    std::thread::sleep(self.config.arch_read_sleep);
                }
                Err(BlockFault::Stale) => {
                    // Sequence below ours: not yet overwritten by this log.
                    if self.config.online {
                        match self.poll_online(block_no) {
                            PollOutcome::Grew => continue,
                            PollOutcome::Switched => {
                                self.finish(EndState::Overwritten);
                                return;
                            }
                            PollOutcome::Stop => return,
                        }
                    }
                    self.finish(EndState::EndOfFile);
                    return;
                }
                Err(BlockFault::Resequenced) => {
                    self.finish(EndState::Overwritten);
                    return;
                }
                Err(BlockFault::Corrupt { offset, reason }) => {
                    self.finish(EndState::Failed {
                        corrupt: true,
                        offset,
                        reason,
                    });
                    return;
                }
                Err(BlockFault::Io(e)) => {
                    self.finish(EndState::Failed {
                        corrupt: false,
                        offset: block_no as u64 * self.block_size as u64,
                        reason: format!("{}: {}", self.path.display(), e),
                    });
                    return;
                }
            }
        }
    }

    fn read_one(&mut self, block_no: u32) -> std::result::Result<Option<Vec<u8>>, BlockFault> {
        let offset = block_no as u64 * self.block_size as u64;
        if offset + self.block_size as u64 > self.file_size {
            // refresh in case the file grew since open
            self.file_size = self.file.metadata().map_err(BlockFault::Io)?.len();
            if offset + self.block_size as u64 > self.file_size {
                return Ok(None);
            }
        }

        let mut data = vec![0u8; self.block_size];
        self.file.seek(SeekFrom::Start(offset)).map_err(BlockFault::Io)?;
        if let Err(e) = self.file.read_exact(&mut data) {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                return Ok(None);
            }
            return Err(BlockFault::Io(e));
        }

        let header = BlockHeader::parse(self.endian, &data, FileOffset(offset)).map_err(|e| {
            BlockFault::Corrupt {
                offset,
                reason: e.to_string(),
            }
        })?;
        if header.sequence < self.sequence {
            return Err(BlockFault::Stale);
        }
        if header.sequence > self.sequence {
            debug!(
                block = block_no,
                found = %header.sequence,
                expected = %self.sequence,
                "online log resequenced"
            );
            return Err(BlockFault::Resequenced);
        }
        if header.block != block_no {
            return Err(BlockFault::Corrupt {
                offset,
                reason: format!("block number {} at block {}", header.block, block_no),
            });
        }
        if self.config.verify_checksums {
            block::verify_block_checksum(&data, self.endian, FileOffset(offset)).map_err(|e| {
                BlockFault::Corrupt {
                    offset,
                    reason: e.to_string(),
                }
            })?;
        }
        Ok(Some(data))
    }

    /// Wait for an online tail to grow. Detects a log switch by re-reading
    /// the redo header block.
    fn poll_online(&mut self, want_block: u32) -> PollOutcome {
        std::thread::sleep(self.config.redo_read_sleep);
        if self.shutdown.is_requested() || self.stopped() {
            return PollOutcome::Stop;
        }

        let new_size = match self.file.metadata() {
            Ok(m) => m.len(),
            Err(_) => return PollOutcome::Stop,
        };

        let mut header_block = vec![0u8; self.block_size];
        if self
            .file
            .seek(SeekFrom::Start(self.block_size as u64))
            .and_then(|_| self.file.read_exact(&mut header_block))
            .is_err()
        {
            return PollOutcome::Stop;
        }
        match RedoHeader::parse(self.endian, &header_block, FileOffset::from_block(1, self.block_size)) {
            Ok(header) if header.sequence != self.sequence => PollOutcome::Switched,
            Ok(_) => {
                self.file_size = new_size;
                if new_size >= (want_block as u64 + 1) * self.block_size as u64 {
                    PollOutcome::Grew
                } else {
                    // nothing new yet; caller loops back into the poll
                    PollOutcome::Grew
                }
            }
            Err(_) => PollOutcome::Stop,
        }
    }

    /// Enqueue a block, waiting for ring space. Returns false on stop.
    fn push(&self, block_no: u32, data: Vec<u8>) -> bool {
        let mut state = self.shared.state.lock().unwrap();
        while state.blocks.len() >= self.config.ring_blocks {
            if state.stop || self.shutdown.is_requested() {
                return false;
            }
            let (next, timeout) = self
                .shared
                .space_ready
                .wait_timeout(state, Duration::from_millis(100))
                .unwrap();
            state = next;
            if timeout.timed_out() && self.shutdown.is_requested() {
                return false;
            }
        }
        state.blocks.push_back((block_no, data));
        self.shared.data_ready.notify_one();
        true
    }

    fn finish(&self, end: EndState) {
        let mut state = self.shared.state.lock().unwrap();
        state.end = Some(end);
        self.shared.data_ready.notify_all();
    }

    fn stopped(&self) -> bool {
        self.shared.state.lock().unwrap().stop
    }
}

enum BlockFault {
    Stale,
    Resequenced,
    Corrupt { offset: u64, reason: String },
    Io(std::io::Error),
}

enum PollOutcome {
    Grew,
    Switched,
    Stop,
}
