//! CrrEngine: one replica's database plus its engine context.
//!
//! Owns the serialized write connection and the `CrrContext` bound to it.
//! Every operation runs through the writer, so local writes, merges, and
//! conversions on one database never interleave.

use std::path::Path;

use rusqlite::Connection;

use crr_core::errors::CrrResult;
use crr_core::{ChangeRecord, Changeset, CrrConfig, MergeOutcome, PeerEvent, SiteId};

use crate::connection::WriteConnection;
use crate::context::CrrContext;
use crate::merge::MergeReport;
use crate::table_info::ensure_table_infos_are_up_to_date;
use crate::{catalog, conversion, merge, migrations, peers, site_id};

pub struct CrrEngine {
    writer: WriteConnection,
    ctx: CrrContext,
}

impl CrrEngine {
    /// Open (or create) a replica backed by a file on disk.
    pub fn open(path: &Path) -> CrrResult<Self> {
        Self::open_with_config(path, CrrConfig::default())
    }

    pub fn open_with_config(path: &Path, config: CrrConfig) -> CrrResult<Self> {
        let writer = WriteConnection::open(path, &config)?;
        Self::initialize(writer, config)
    }

    /// Open an in-memory replica (for testing).
    pub fn open_in_memory() -> CrrResult<Self> {
        Self::open_in_memory_with_config(CrrConfig::default())
    }

    pub fn open_in_memory_with_config(config: CrrConfig) -> CrrResult<Self> {
        let writer = WriteConnection::open_in_memory(&config)?;
        Self::initialize(writer, config)
    }

    /// Migrate bookkeeping, load identity, and bind the context.
    fn initialize(writer: WriteConnection, config: CrrConfig) -> CrrResult<Self> {
        let ctx = writer.with_conn(|conn| {
            migrations::maybe_update_db(conn)?;
            peers::init_peer_tracking_table(conn)?;
            let site = site_id::init_site_id(conn)?;
            let ctx = CrrContext::attach(conn, site, config)?;
            ensure_table_infos_are_up_to_date(conn, &ctx)?;
            Ok(ctx)
        })?;
        tracing::info!(site_id = %ctx.site_id(), db_version = ctx.db_version(), "replica opened");
        Ok(Self { writer, ctx })
    }

    /// Run `f` with exclusive access to the connection and the engine context.
    pub fn with_conn<F, T>(&self, f: F) -> CrrResult<T>
    where
        F: FnOnce(&Connection, &CrrContext) -> CrrResult<T>,
    {
        self.writer.with_conn(|conn| f(conn, &self.ctx))
    }

    /// Execute application SQL. Writes to CRRs are tracked by their triggers.
    pub fn execute_batch(&self, sql: &str) -> CrrResult<()> {
        self.writer.with_conn(|conn| {
            conn.execute_batch(sql)
                .map_err(|e| crate::to_storage_err(e.to_string()))
        })
    }

    pub fn site_id(&self) -> SiteId {
        self.ctx.site_id()
    }

    /// Last committed DbVersion.
    pub fn db_version(&self) -> i64 {
        self.ctx.db_version()
    }

    pub fn config(&self) -> &CrrConfig {
        self.ctx.config()
    }

    pub fn is_table_compatible(&self, table: &str) -> CrrResult<()> {
        self.writer.with_conn(|conn| conversion::is_table_compatible(conn, table))
    }

    /// Convert `table` into a CRR, backfilling existing rows in one transaction.
    pub fn create_crr(&self, table: &str) -> CrrResult<()> {
        self.with_conn(|conn, ctx| conversion::create_crr(conn, ctx, None, table, false, false))
    }

    /// Convert `table` into a CRR, backfilling in independently committed batches.
    pub fn create_crr_batched(&self, table: &str) -> CrrResult<()> {
        self.with_conn(|conn, ctx| conversion::create_crr(conn, ctx, None, table, false, true))
    }

    pub fn is_crr(&self, table: &str) -> CrrResult<bool> {
        self.writer.with_conn(|conn| catalog::is_crr(conn, table))
    }

    pub fn list_crrs(&self) -> CrrResult<Vec<String>> {
        self.writer.with_conn(|conn| {
            Ok(catalog::list_crrs(conn)?.into_iter().map(|e| e.table).collect())
        })
    }

    pub fn drop_crr(&self, table: &str) -> CrrResult<()> {
        self.with_conn(|conn, ctx| conversion::drop_crr(conn, ctx, table))
    }

    pub fn begin_alter(&self, table: &str) -> CrrResult<()> {
        self.writer.with_conn(|conn| conversion::begin_alter(conn, table))
    }

    pub fn commit_alter(&self, table: &str, no_tx: bool) -> CrrResult<()> {
        self.with_conn(|conn, ctx| conversion::commit_alter(conn, ctx, table, no_tx))
    }

    /// Local records above `since`, authored by anyone.
    pub fn changes_since(&self, since: i64) -> CrrResult<Changeset> {
        self.with_conn(|conn, ctx| {
            ensure_table_infos_are_up_to_date(conn, ctx)?;
            merge::changes_since(conn, ctx, since, None)
        })
    }

    /// Records `peer` has not acknowledged yet, per the Sent watermark. The
    /// peer's own records are left out when `exclude_peer_own_changes` is set.
    ///
    /// Read-only: a lost changeset is offered again until the peer confirms
    /// it through [`CrrEngine::acknowledge_sent`].
    pub fn changes_for_peer(&self, peer: &SiteId) -> CrrResult<Changeset> {
        self.with_conn(|conn, ctx| {
            ensure_table_infos_are_up_to_date(conn, ctx)?;
            let since = peers::peer_version(conn, peer, PeerEvent::Sent)?;
            let exclude = ctx.config().exclude_peer_own_changes.then_some(peer);
            merge::changes_since(conn, ctx, since, exclude)
        })
    }

    /// Advance the Sent watermark of `peer` once it has applied a changeset
    /// covering `until_version`.
    pub fn acknowledge_sent(&self, peer: &SiteId, until_version: i64) -> CrrResult<()> {
        self.writer.with_conn(|conn| {
            peers::record_peer_version(conn, peer, PeerEvent::Sent, until_version)
        })
    }

    pub fn apply_changeset(&self, changeset: &Changeset) -> CrrResult<MergeReport> {
        self.with_conn(|conn, ctx| merge::apply_changeset(conn, ctx, changeset))
    }

    /// Decode a JSON changeset and apply it.
    pub fn apply_changeset_json(&self, json: &str) -> CrrResult<MergeReport> {
        let changeset = Changeset::from_json(json)?;
        self.apply_changeset(&changeset)
    }

    pub fn merge_change(&self, change: &ChangeRecord) -> CrrResult<MergeOutcome> {
        self.with_conn(|conn, ctx| merge::merge_change(conn, ctx, change))
    }

    pub fn peer_version(&self, peer: &SiteId, event: PeerEvent) -> CrrResult<i64> {
        self.writer.with_conn(|conn| peers::peer_version(conn, peer, event))
    }

    pub fn record_peer_version(
        &self,
        peer: &SiteId,
        event: PeerEvent,
        version: i64,
    ) -> CrrResult<()> {
        self.writer
            .with_conn(|conn| peers::record_peer_version(conn, peer, event, version))
    }

    pub fn list_peers(&self) -> CrrResult<Vec<(SiteId, PeerEvent, i64)>> {
        self.writer.with_conn(peers::list_peers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_assigns_site_and_starts_at_zero() {
        let engine = CrrEngine::open_in_memory().unwrap();
        assert_eq!(engine.db_version(), 0);
        assert_ne!(engine.site_id(), SiteId::from_bytes([0; 16]));
    }

    #[test]
    fn local_writes_advance_db_version_once_per_transaction() {
        let engine = CrrEngine::open_in_memory().unwrap();
        engine
            .execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, a TEXT, b TEXT)")
            .unwrap();
        engine.create_crr("t").unwrap();
        engine
            .execute_batch(
                "BEGIN; INSERT INTO t VALUES (1, 'x', 'y'); INSERT INTO t VALUES (2, 'p', 'q'); COMMIT;",
            )
            .unwrap();
        assert_eq!(engine.db_version(), 1);
        let cs = engine.changes_since(0).unwrap();
        assert_eq!(cs.len(), 4);
        assert!(cs.changes.iter().all(|c| c.db_version == 1));
        let seqs: Vec<i64> = cs.changes.iter().map(|c| c.seq).collect();
        let mut sorted = seqs.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 4);
    }

    #[test]
    fn sent_watermark_moves_only_on_acknowledgement() {
        let engine = CrrEngine::open_in_memory().unwrap();
        engine.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, a TEXT)").unwrap();
        engine.create_crr("t").unwrap();
        engine.execute_batch("INSERT INTO t VALUES (1, 'x')").unwrap();
        let peer = SiteId::from_bytes([9; 16]);

        let first = engine.changes_for_peer(&peer).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(engine.peer_version(&peer, PeerEvent::Sent).unwrap(), 0);
        assert_eq!(engine.changes_for_peer(&peer).unwrap().len(), 1);

        engine.acknowledge_sent(&peer, first.until_version).unwrap();
        assert_eq!(engine.peer_version(&peer, PeerEvent::Sent).unwrap(), first.until_version);
        assert!(engine.changes_for_peer(&peer).unwrap().is_empty());
    }
}
