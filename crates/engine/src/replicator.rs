use std::path::PathBuf;

use redolink_common::{
    CheckpointEvent, FileOffset, RedoError, Result, Scn, Seq, Shutdown, Time,
};
use redolink_redo::archive::{scan_archive_dir, PathMapping};
use redolink_redo::block::read_headers;
use redolink_redo::reader::{ReaderConfig, RedoReader};
use redolink_redo::record::{RecordAssembler, RecordNext, VLD_LWN_START};
use redolink_schema::SchemaSnapshot;
use redolink_txn::MinOpenTxn;
use tracing::{debug, info, warn};

use crate::checkpoint::{min_tran_from, Checkpoint, CheckpointGate};
use crate::config::{disable_checks, flags, Config, StartPosition};
use crate::dispatcher::{dispatch_record, register_skip, ParseContext};
use crate::emitter::Emitter;
use crate::incarnation::IncarnationSet;

/// How a processed sequence ended.
enum FileOutcome {
    /// Clean end of log: continue with the next sequence.
    Advance,
    /// The online log was resequenced; re-read this sequence from archive
    /// starting at the confirmed offset.
    RetryFromArchive { confirmed: FileOffset },
    Shutdown,
}

enum Source {
    Archive(PathBuf),
    Online(PathBuf),
}

/// The parser task: owns the reader, assembler, dispatcher and all
/// transaction state, and drives sequences forward forever.
pub struct Replicator {
    config: Config,
    pub ctx: ParseContext,
    emitter: Emitter,
    gate: CheckpointGate,
    shutdown: Shutdown,
    pub incarnations: IncarnationSet,
    sequence: Seq,
    /// Offset to skip to in the first file (checkpoint resume).
    resume_offset: Option<FileOffset>,
    path_mapping: PathMapping,
    resetlogs: u32,
    activation: u32,
    last_scn: Scn,
    last_time: Time,
    last_offset: FileOffset,
    /// Force a schema-bearing checkpoint on the next gate pass.
    force_schema_checkpoint: bool,
    archive_only_retry: bool,
}

impl Replicator {
    pub fn new(
        config: Config,
        ctx: ParseContext,
        emitter: Emitter,
        shutdown: Shutdown,
        sequence: Seq,
        resume_offset: Option<FileOffset>,
    ) -> Replicator {
        let gate = CheckpointGate::new(config.checkpoint_interval, config.checkpoint_interval_bytes);
        let path_mapping = PathMapping::new(config.path_mapping.clone());
        Replicator {
            config,
            ctx,
            emitter,
            gate,
            shutdown,
            incarnations: IncarnationSet::default(),
            sequence,
            resume_offset,
            path_mapping,
            resetlogs: 0,
            activation: 0,
            last_scn: Scn::ZERO,
            last_time: Time(0),
            last_offset: FileOffset::ZERO,
            force_schema_checkpoint: true,
            archive_only_retry: false,
        }
    }

    pub fn sequence(&self) -> Seq {
        self.sequence
    }

    /// Resolve the initial sequence for a configuration without a recovered
    /// checkpoint.
    pub fn resolve_start(config: &Config) -> Result<Seq> {
        match config.start {
            StartPosition::Sequence(seq) => Ok(seq),
            StartPosition::Scn(scn) => {
                find_archive_position(config, |header| {
                    header.first_scn <= scn && (header.next_scn.is_none() || scn < header.next_scn)
                })?
                .ok_or_else(|| {
                    RedoError::NotReady(format!("no redo covering scn {} found", scn))
                })
            }
            StartPosition::Time(time) => {
                find_archive_position(config, |header| header.first_time.0 <= time)?
                    .ok_or_else(|| {
                        RedoError::NotReady(format!("no redo covering time {} found", time))
                    })
            }
            StartPosition::TimeRelative(_) | StartPosition::Now => {
                // the current online log, or the newest archive
                for path in &config.online_logs {
                    if let Ok((_, header)) = read_headers(path) {
                        if header.next_scn.is_none() {
                            return Ok(header.sequence);
                        }
                    }
                }
                if let Some(dir) = &config.archive_dir {
                    let found = scan_archive_dir(dir, &config.log_archive_format)?;
                    if let Some((seq, _)) = found.last() {
                        return Ok(seq.next());
                    }
                }
                Err(RedoError::NotReady(
                    "no current online log and no archives to start from".into(),
                ))
            }
        }
    }

    /// Main loop: locate each sequence, process it, checkpoint, repeat
    /// until shutdown.
    pub fn run(&mut self) -> Result<()> {
        info!(sequence = %self.sequence, "replication starting");
        loop {
            if self.shutdown.is_requested() {
                return self.finish();
            }

            let source = match self.locate_sequence()? {
                Some(source) => source,
                None => {
                    // not produced yet; poll
                    std::thread::sleep(self.config.refresh_interval);
                    continue;
                }
            };

            match self.process_file(source) {
                Ok(FileOutcome::Advance) => {
                    self.sequence = self.sequence.next();
                    self.archive_only_retry = false;
                    self.resume_offset = None;
                    self.gate.note_switch();
                    self.checkpoint(true)?;
                }
                Ok(FileOutcome::RetryFromArchive { confirmed }) => {
                    info!(
                        sequence = %self.sequence,
                        confirmed = %confirmed,
                        "online log overwritten, restarting from archive"
                    );
                    self.archive_only_retry = true;
                    self.resume_offset = Some(confirmed);
                }
                Ok(FileOutcome::Shutdown) => return self.finish(),
                Err(e @ RedoError::MemoryExhausted { .. }) => {
                    // the error text carries the remediation hint
                    warn!(error = %e, "stopping after memory exhaustion");
                    self.shutdown.request();
                    return Err(e);
                }
                Err(RedoError::NotReady(reason)) => {
                    debug!(reason, "source not ready, retrying");
                    std::thread::sleep(self.config.arch_read_sleep);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Find the redo file carrying the current sequence: archive first,
    /// then online members (unless retrying after an overwrite).
    fn locate_sequence(&mut self) -> Result<Option<Source>> {
        if let Some(dir) = &self.config.archive_dir {
            match scan_archive_dir(dir, &self.config.log_archive_format) {
                Ok(found) => {
                    for (seq, path) in found {
                        if seq == self.sequence {
                            return Ok(Some(Source::Archive(path)));
                        }
                    }
                }
                Err(e) => warn!(error = %e, "archive directory scan failed"),
            }
        }
        if self.archive_only_retry || self.config.has_flag(flags::ARCH_ONLY) {
            return Ok(None);
        }
        for path in &self.config.online_logs {
            let mapped = PathBuf::from(self.path_mapping.apply(&path.to_string_lossy()));
            match read_headers(&mapped) {
                Ok((_, header)) if header.sequence == self.sequence => {
                    return Ok(Some(Source::Online(mapped)));
                }
                Ok(_) => {}
                Err(RedoError::NotReady(_)) => {}
                Err(e) => warn!(path = %mapped.display(), error = %e, "cannot probe online log"),
            }
        }
        Ok(None)
    }

    fn reader_config(&self, online: bool) -> ReaderConfig {
        ReaderConfig {
            ring_blocks: self.config.read_buffer_max,
            redo_read_sleep: self.config.redo_read_sleep,
            arch_read_sleep: self.config.arch_read_sleep,
            arch_read_tries: self.config.arch_read_tries,
            verify_checksums: !self.config.check_disabled(disable_checks::BLOCK_SUM),
            direct_io: !self.config.has_flag(flags::DIRECT_DISABLE),
            online,
        }
    }

    fn process_file(&mut self, source: Source) -> Result<FileOutcome> {
        let (path, online) = match source {
            Source::Archive(path) => (path, false),
            Source::Online(path) => (path, true),
        };
        let reader = RedoReader::open(&path, self.reader_config(online), self.shutdown.clone())?;
        let header = *reader.header();
        info!(
            path = %path.display(),
            sequence = %header.sequence,
            first_scn = %header.first_scn,
            online,
            "processing redo log"
        );

        if header.sequence != self.sequence {
            return Err(RedoError::corrupt(
                FileOffset::ZERO,
                format!("{} carries sequence {}, expected {}", path.display(), header.sequence, self.sequence),
            ));
        }

        if self.incarnations.is_empty() {
            self.incarnations.add(crate::incarnation::Incarnation {
                id: 1,
                resetlogs_scn: header.resetlogs_scn,
                prior_resetlogs_scn: Scn::ZERO,
                status: "CURRENT".to_string(),
                resetlogs_id: header.resetlogs_id,
                prior_incarnation: 0,
            });
            self.incarnations.set_current(1);
        }
        // Incarnation fork: resequence to 1, clear activation, force a
        // schema checkpoint so consumers observe the fork.
        if self.incarnations.detect_switch(&header, self.last_scn) {
            self.sequence = Seq(1);
            self.activation = 0;
            self.force_schema_checkpoint = true;
            return Ok(FileOutcome::Advance);
        }
        self.resetlogs = header.resetlogs_id;
        self.activation = header.activation;
        self.ctx.thread = header.thread;
        self.ctx.options.endian = reader.endian();

        let mut assembler = RecordAssembler::new(reader);
        if let Some(resume) = self.resume_offset.take() {
            assembler.skip_to(resume)?;
        }

        loop {
            if self.shutdown.is_requested() {
                return Ok(FileOutcome::Shutdown);
            }
            match assembler.next()? {
                RecordNext::Record(record) => {
                    let confirmed = assembler.position();
                    if record.vld & VLD_LWN_START != 0 {
                        self.checkpoint(false)?;
                    }
                    let endian = assembler.reader().endian();
                    let seq = self.sequence;
                    let result = match dispatch_record(&mut self.ctx, endian, seq, &record) {
                        Ok(result) => result,
                        Err(RedoError::MemoryExhausted { xid }) => {
                            register_skip(&mut self.ctx, xid);
                            return Err(RedoError::MemoryExhausted { xid });
                        }
                        Err(e) => return Err(e),
                    };
                    self.last_scn = record.scn;
                    self.last_time = record.lwn_timestamp;
                    self.last_offset = confirmed;
                    if result.schema_changed {
                        self.force_schema_checkpoint = true;
                    }
                    for committed in result.committed {
                        self.emitter.post_txn(committed)?;
                    }
                }
                RecordNext::EndOfLog => {
                    debug!(sequence = %self.sequence, "end of log");
                    return Ok(FileOutcome::Advance);
                }
                RecordNext::Overwritten => {
                    return Ok(FileOutcome::RetryFromArchive {
                        confirmed: self.last_offset,
                    });
                }
            }
        }
    }

    /// Publish a checkpoint when the gate allows (or the caller forces).
    fn checkpoint(&mut self, switch: bool) -> Result<()> {
        if self.last_scn == Scn::ZERO {
            // nothing processed yet; there is no position worth recording
            return Ok(());
        }
        let schema_changed = self.force_schema_checkpoint;
        if !self.gate.should_checkpoint(self.last_offset, switch, schema_changed) {
            return Ok(());
        }
        self.force_schema_checkpoint = false;

        let min = self.ctx.store.min_open_txn();
        let record = self.build_checkpoint(switch, min);
        let event = CheckpointEvent {
            seq: self.sequence,
            scn: self.last_scn,
            time: self.last_time,
            offset: self.last_offset,
            is_redo_switch: switch,
        };
        let schema = if schema_changed {
            Some(Box::new(SchemaSnapshot::capture(&self.ctx.schema, self.last_scn)))
        } else {
            None
        };
        self.emitter.post_checkpoint(record, event, schema)
    }

    fn build_checkpoint(&self, switch: bool, min: Option<MinOpenTxn>) -> Checkpoint {
        Checkpoint {
            database: self.config.database.clone(),
            scn: self.last_scn.0,
            resetlogs: self.resetlogs,
            activation: self.activation,
            time: self.last_time.0,
            seq: self.sequence.0,
            offset: self.last_offset.0,
            switch,
            min_tran: min.map(|m| min_tran_from(m.seq, m.offset, m.xid)),
            schema_ref_scn: None,
        }
    }

    /// Cooperative shutdown: flush a final checkpoint unless hard.
    fn finish(&mut self) -> Result<()> {
        if !self.shutdown.is_hard() && self.last_scn > Scn::ZERO {
            self.force_schema_checkpoint = true;
            let min = self.ctx.store.min_open_txn();
            let record = self.build_checkpoint(false, min);
            let event = CheckpointEvent {
                seq: self.sequence,
                scn: self.last_scn,
                time: self.last_time,
                offset: self.last_offset,
                is_redo_switch: false,
            };
            let schema = Some(Box::new(SchemaSnapshot::capture(&self.ctx.schema, self.last_scn)));
            // queue may already be closed on shutdown; best effort
            let _ = self.emitter.post_checkpoint(record, event, schema);
        }
        info!("replication stopped");
        Ok(())
    }
}

fn find_archive_position<F>(config: &Config, mut matches: F) -> Result<Option<Seq>>
where
    F: FnMut(&redolink_redo::RedoHeader) -> bool,
{
    let Some(dir) = &config.archive_dir else {
        return Ok(None);
    };
    let mut best: Option<Seq> = None;
    for (seq, path) in scan_archive_dir(dir, &config.log_archive_format)? {
        match read_headers(&path) {
            Ok((_, header)) if matches(&header) => {
                best = Some(match best {
                    // the latest matching file is the tightest start
                    Some(prev) if prev > seq => prev,
                    _ => seq,
                });
            }
            Ok(_) => {}
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable archive"),
        }
    }
    Ok(best)
}
