// ⚖️ Reconciliation Engine - merge imports into the store
//
// Two passes, each one SQLite transaction (all-or-nothing):
//
//   upsert_locations     boundary records -> postcode_location rows
//   reconcile_hierarchy  hierarchy table  -> county/state links
//
// Hierarchy rule: after a pass every location references exactly the
// county/state rows named by the latest table, with one row per distinct
// name. Entities shared with other postcodes are never renamed; a postcode
// whose county changed is re-linked instead.

use crate::deduplication::{EntityNameCache, Resolution};
use crate::entities::{HierarchyEntity, HierarchyLevel, PostcodeBoundaryRecord};
use crate::error::Result;
use crate::hierarchy::HierarchyTable;
use crate::store::{self, Store};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

// ============================================================================
// REPORTS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpsertReport {
    pub inserted: usize,
    pub updated: usize,
    /// Records whose polygon had no area
    pub without_centroid: usize,
}

impl UpsertReport {
    pub fn total(&self) -> usize {
        self.inserted + self.updated
    }

    pub fn summary(&self) -> String {
        format!(
            "PostCodeLocations saved: {} ({} new, {} updated, {} without centroid)",
            self.total(),
            self.inserted,
            self.updated,
            self.without_centroid
        )
    }
}

/// How the names of one level were resolved during a pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolutionCounts {
    pub cached: usize,
    pub current: usize,
    pub existing: usize,
    pub claimed: usize,
    pub created: usize,
    /// Locations without a name for this level
    pub unmapped: usize,
}

impl ResolutionCounts {
    fn count(&mut self, resolution: Option<Resolution>) {
        match resolution {
            Some(Resolution::Cached) => self.cached += 1,
            Some(Resolution::Current) => self.current += 1,
            Some(Resolution::Existing) => self.existing += 1,
            Some(Resolution::Claimed) => self.claimed += 1,
            Some(Resolution::Created) => self.created += 1,
            None => self.unmapped += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub locations: usize,
    /// Location references changed by this pass
    pub relinked: usize,
    pub counties: ResolutionCounts,
    pub states: ResolutionCounts,
    pub county_orphans_removed: usize,
    pub state_orphans_removed: usize,
    pub reconciled_at: DateTime<Utc>,
}

impl ReconciliationReport {
    fn new(locations: usize) -> Self {
        ReconciliationReport {
            locations,
            relinked: 0,
            counties: ResolutionCounts::default(),
            states: ResolutionCounts::default(),
            county_orphans_removed: 0,
            state_orphans_removed: 0,
            reconciled_at: Utc::now(),
        }
    }

    fn counts_mut(&mut self, level: HierarchyLevel) -> &mut ResolutionCounts {
        match level {
            HierarchyLevel::County => &mut self.counties,
            HierarchyLevel::State => &mut self.states,
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "UpdateStatesCounties updated: {} locations, {} links changed, \
             {} counties / {} states created, {} / {} orphans removed",
            self.locations,
            self.relinked,
            self.counties.created + self.counties.claimed,
            self.states.created + self.states.claimed,
            self.county_orphans_removed,
            self.state_orphans_removed
        )
    }
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

#[derive(Debug, Default)]
pub struct ReconciliationEngine;

impl ReconciliationEngine {
    pub fn new() -> Self {
        ReconciliationEngine
    }

    /// Upsert a batch of decoded boundary records in one transaction
    pub fn upsert_locations(
        &self,
        store: &mut Store,
        records: &[PostcodeBoundaryRecord],
    ) -> Result<UpsertReport> {
        self.upsert_stream(store, records.iter().cloned().map(Ok))
    }

    /// Upsert records straight from a decoder.
    ///
    /// The first `Err` from the stream aborts the transaction, so a
    /// malformed feature leaves the store untouched.
    #[instrument(skip_all)]
    pub fn upsert_stream<I>(&self, store: &mut Store, records: I) -> Result<UpsertReport>
    where
        I: IntoIterator<Item = Result<PostcodeBoundaryRecord>>,
    {
        let tx = store.transaction()?;
        let mut report = UpsertReport::default();

        for record in records {
            let record = record?;
            self.upsert_one(&tx, &record, &mut report)?;
        }

        tx.commit()?;
        info!("{}", report.summary());

        Ok(report)
    }

    fn upsert_one(
        &self,
        conn: &Connection,
        record: &PostcodeBoundaryRecord,
        report: &mut UpsertReport,
    ) -> Result<()> {
        if !record.centroid().is_defined() {
            debug!(postcode = %record.postcode, "Polygon without area, centroid undefined");
            report.without_centroid += 1;
        }

        match store::find_location(conn, record.postcode)? {
            Some(mut location) => {
                location.apply_boundary(record);
                store::update_location_values(conn, &location)?;
                report.updated += 1;
            }
            None => {
                // Unnamed placeholders, named by the next hierarchy pass
                let county = store::insert_entity(conn, HierarchyLevel::County, None)?;
                let state = store::insert_entity(conn, HierarchyLevel::State, None)?;
                store::insert_location(conn, record, Some(county), Some(state))?;
                report.inserted += 1;
            }
        }

        Ok(())
    }

    /// Bring every location's county/state links in line with `table`
    #[instrument(skip_all, fields(mappings = table.len()))]
    pub fn reconcile_hierarchy(
        &self,
        store: &mut Store,
        table: &HierarchyTable,
    ) -> Result<ReconciliationReport> {
        let tx = store.transaction()?;

        let locations = store::all_locations_with_hierarchy(&tx)?;
        let mut cache = EntityNameCache::new();
        let mut report = ReconciliationReport::new(locations.len());

        for entry in &locations {
            let postcode = entry.location.postcode;

            for level in HierarchyLevel::all() {
                let target = match level {
                    HierarchyLevel::County => table.county_for(postcode),
                    HierarchyLevel::State => table.state_for(postcode),
                }
                .unwrap_or("");

                let resolved =
                    self.resolve_entity(&tx, &mut cache, level, target, entry.entity(level))?;
                report.counts_mut(level).count(resolved.map(|(_, r)| r));

                let new_id = resolved.map(|(id, _)| id);
                let old_id = match level {
                    HierarchyLevel::County => entry.location.county_data_id,
                    HierarchyLevel::State => entry.location.state_data_id,
                };

                if new_id != old_id {
                    store::set_location_entity(&tx, entry.location.id, level, new_id)?;
                    report.relinked += 1;
                }
            }
        }

        report.county_orphans_removed =
            store::delete_unnamed_entities(&tx, HierarchyLevel::County)?;
        report.state_orphans_removed = store::delete_unnamed_entities(&tx, HierarchyLevel::State)?;

        tx.commit()?;
        info!("{}", report.summary());

        Ok(report)
    }

    /// Row id for `name` on `level`, reusing rows wherever possible.
    /// `None` when the name is empty (location stays unassigned).
    fn resolve_entity(
        &self,
        conn: &Connection,
        cache: &mut EntityNameCache,
        level: HierarchyLevel,
        name: &str,
        current: Option<&HierarchyEntity>,
    ) -> Result<Option<(i64, Resolution)>> {
        if name.is_empty() {
            return Ok(None);
        }

        if let Some(id) = cache.get(level, name) {
            return Ok(Some((id, Resolution::Cached)));
        }

        if let Some(entity) = current.filter(|e| e.has_name(name)) {
            let id = cache.remember(level, name, entity.id);
            return Ok(Some((id, Resolution::Current)));
        }

        if let Some(entity) = store::find_entity_by_name(conn, level, name)? {
            let id = cache.remember(level, name, entity.id);
            return Ok(Some((id, Resolution::Existing)));
        }

        if let Some(entity) = current.filter(|e| e.is_unnamed()) {
            if cache.claim(level, entity.id) {
                store::rename_entity(conn, level, entity.id, name)?;
                let id = cache.remember(level, name, entity.id);
                return Ok(Some((id, Resolution::Claimed)));
            }
        }

        let id = store::insert_entity(conn, level, Some(name))?;
        let id = cache.remember(level, name, id);

        Ok(Some((id, Resolution::Created)))
    }
}
