pub mod checkpoint;
pub mod config;
pub mod dispatcher;
pub mod emitter;
pub mod incarnation;
pub mod replicator;

use std::sync::Arc;

use redolink_common::{FsStateStore, RedoError, Result, Scn, Shutdown, Sink, StateStore};
use redolink_schema::{bootstrap, ColumnVisibility, Schema, SchemaElement};
use redolink_txn::{Arena, ArenaConfig, FlushOptions, TransactionStore};
use tracing::{info, warn};

pub use checkpoint::{Checkpoint, CheckpointGate, Checkpointer};
pub use config::{Config, StartPosition};
pub use dispatcher::{DispatchResult, ParseContext};
pub use emitter::{Emitter, WriterMessage};
pub use incarnation::{Incarnation, IncarnationSet};
pub use replicator::Replicator;

/// Wire the whole core together and run until shutdown: recovery, schema
/// restore, the writer task and the blocking parser loop.
pub async fn run(config: Config, sink: Box<dyn Sink>, shutdown: Shutdown) -> Result<()> {
    let state = Arc::new(FsStateStore::open(&config.state_dir)?);
    let mut checkpointer = Checkpointer::new(
        Arc::clone(&state) as Arc<dyn redolink_common::StateStore>,
        &config.database,
        config.checkpoint_keep,
        config.has_flag(config::flags::CHECKPOINT_KEEP),
    );

    let start_scn = match config.start {
        StartPosition::Scn(scn) => Some(scn),
        _ => None,
    };
    let recovered = checkpointer.recover(start_scn)?;

    // Schema shadow: restore the checkpointed snapshot when there is one,
    // seed the self-describing dictionary otherwise.
    let mut schema = Schema::new();
    schema.visibility = visibility_from(&config);
    schema.set_elements(elements_from(&config)?);
    let recovered = match recovered {
        Some(mut state) => {
            // recovery only hands back checkpoints with a usable snapshot
            let snapshot = state.schema.take().expect("recovered checkpoint has schema");
            info!(scn = snapshot.scn, "restoring schema snapshot");
            snapshot.restore(&mut schema);
            Some(state.checkpoint)
        }
        None => {
            let adaptive = config
                .has_flag(config::flags::ADAPTIVE_SCHEMA)
                .then(|| load_base_snapshot(state.as_ref()))
                .flatten();
            match adaptive {
                Some(snapshot) => {
                    info!(scn = snapshot.scn, "restoring adaptive-schema base snapshot");
                    snapshot.restore(&mut schema);
                }
                None => bootstrap::seed_system_dictionary(&mut schema),
            }
            None
        }
    };

    let arena = Arc::new(Arena::new(
        ArenaConfig {
            min_mb: config.memory_min_mb,
            max_mb: config.memory_max_mb,
        },
        shutdown.clone(),
    )?);
    let store = TransactionStore::new(Arc::clone(&arena));
    let options = FlushOptions {
        schemaless: config.has_flag(config::flags::SCHEMALESS),
        not_null_missing: config.has_flag(config::flags::EXPERIMENTAL_NOT_NULL_MISSING),
        experimental_xmltype: config.has_flag(config::flags::EXPERIMENTAL_XMLTYPE),
        visibility: schema.visibility,
        ..FlushOptions::default()
    };
    let show_ddl = config.has_flag(config::flags::SHOW_DDL);
    let mut ctx = ParseContext::new(schema, store, options, show_ddl);
    if let Some(checkpoint) = &recovered {
        ctx.resume_scn = Some(Scn(checkpoint.scn));
    }

    let (emitter, rx) = Emitter::channel(shutdown.clone());
    let writer = tokio::spawn(emitter::run_writer(rx, sink, checkpointer, Arc::clone(&arena)));

    let (sequence, resume_offset) = match &recovered {
        Some(checkpoint) => {
            let (seq, offset) = checkpoint.resume_point();
            info!(sequence = %seq, offset = %offset, "resuming from checkpoint");
            (seq, Some(offset))
        }
        None => (Replicator::resolve_start(&config)?, None),
    };

    let mut replicator =
        Replicator::new(config, ctx, emitter, shutdown.clone(), sequence, resume_offset);
    let parser = tokio::task::spawn_blocking(move || replicator.run());

    let parse_result = parser
        .await
        .map_err(|e| RedoError::NotReady(format!("parser task panicked: {}", e)))?;
    let writer_result = writer
        .await
        .map_err(|e| RedoError::NotReady(format!("writer task panicked: {}", e)))?;

    if let Err(e) = &parse_result {
        warn!(error = %e, "parser finished with error");
    }
    parse_result?;
    writer_result
}

/// Adaptive-schema bootstrap: a `base-<version>` snapshot placed in the
/// state store by an external dictionary export.
fn load_base_snapshot(state: &FsStateStore) -> Option<redolink_schema::SchemaSnapshot> {
    let names = state.list().ok()?;
    let mut versions: Vec<(u32, String)> = names
        .into_iter()
        .filter_map(|name| {
            name.strip_prefix("base-")
                .and_then(|v| v.parse::<u32>().ok())
                .map(|v| (v, name))
        })
        .collect();
    versions.sort();
    let (_, name) = versions.pop()?;
    let data = state.read(&name, 64 * 1024 * 1024).ok()??;
    match redolink_schema::SchemaSnapshot::from_json(&data) {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            warn!(name, error = %e, "base snapshot unreadable, falling back to the seeded dictionary");
            None
        }
    }
}

fn visibility_from(config: &Config) -> ColumnVisibility {
    ColumnVisibility {
        hidden: config.has_flag(config::flags::SHOW_HIDDEN_COLUMNS),
        guard: config.has_flag(config::flags::SHOW_GUARD_COLUMNS),
        nested: config.has_flag(config::flags::SHOW_NESTED_COLUMNS),
        unused: config.has_flag(config::flags::SHOW_UNUSED_COLUMNS),
    }
}

fn elements_from(config: &Config) -> Result<Vec<SchemaElement>> {
    let mut elements = Vec::with_capacity(config.tables.len());
    for entry in &config.tables {
        let mut element = SchemaElement::new(&entry.owner, &entry.table)?
            .with_options(redolink_schema::TableOptions {
                full_update: entry.full_update,
            })
            .with_key(entry.key.clone());
        if let Some(condition) = &entry.condition {
            element = element.with_condition(condition)?;
        }
        if let Some(tag) = &entry.tag {
            element = element.with_tag(tag);
        }
        elements.push(element);
    }
    Ok(elements)
}
