//! Derive sidebar categories from host channel membership.
//!
//! For every board channel that is a team channel (open or private), each
//! channel member gets a category named after the channel, holding the
//! channel's non-template boards. Needs the host directory, so it only does
//! work in plugin mode; standalone stores just mark it complete.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{error, info, warn};

use blockbase_types::{IdType, new_id};

use super::{CATEGORY_MIGRATION_KEY, MigrationOutcome, insert_batched, locked};
use crate::categories::{CATEGORY_BOARD_COLUMNS, CATEGORY_COLUMNS};
use crate::dialect::{Dialect, SqlValue};
use crate::directory::ChannelKind;
use crate::error::StoreResult;
use crate::settings::{read_flag, write_setting};
use crate::store::{SqlStore, query_rows};

pub(crate) fn run<D: Dialect>(store: &SqlStore<D>) -> StoreResult<MigrationOutcome> {
    let (d, t) = (store.dialect(), store.tables());
    if store.with_conn(|conn| read_flag(conn, d, t, CATEGORY_MIGRATION_KEY))? {
        return Ok(MigrationOutcome::AlreadyCompleted);
    }

    locked(store, CATEGORY_MIGRATION_KEY, |lock| {
        if store.with_conn(|conn| read_flag(conn, d, t, CATEGORY_MIGRATION_KEY))? {
            return Ok(MigrationOutcome::AlreadyCompleted);
        }
        let directory = match (store.is_plugin(), store.directory()) {
            (true, Some(directory)) => directory,
            (true, None) => {
                warn!("category migration needs the team directory, deferring");
                return Ok(MigrationOutcome::Deferred);
            }
            (false, _) => {
                store.with_tx(|tx| write_setting(tx, d, t, CATEGORY_MIGRATION_KEY, "true"))?;
                return Ok(MigrationOutcome::NotApplicable);
            }
        };
        info!("running category migration");

        // channel -> non-template boards
        let mut q = store.query();
        q.push(&format!(
            "SELECT channel_id, id, is_template FROM {} WHERE channel_id <> '' AND delete_at = 0 ORDER BY channel_id, id",
            t.boards()
        ));
        let mut q_existing = store.query();
        q_existing.push(&format!(
            "SELECT user_id, channel_id FROM {} WHERE channel_id <> '' AND delete_at = 0",
            t.categories()
        ));
        let (board_rows, existing) = store.with_conn(|conn| {
            let boards = query_rows(conn, &q, |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, bool>(2)?))
            })?;
            let existing = query_rows(conn, &q_existing, |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            Ok((boards, existing.into_iter().collect::<BTreeSet<_>>()))
        })?;
        let mut channels: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (channel_id, board_id, is_template) in board_rows {
            let boards = channels.entry(channel_id).or_default();
            if !is_template {
                boards.push(board_id);
            }
        }

        let now = store.now_millis();
        let mut category_rows: Vec<Vec<SqlValue>> = Vec::new();
        let mut category_board_rows: Vec<Vec<SqlValue>> = Vec::new();
        let (mut candidates, mut repaired, mut skipped) = (0, 0, 0);

        for (channel_id, board_ids) in &channels {
            lock.refresh()?;
            let channel = match directory.channel(channel_id) {
                Ok(Some(channel)) => channel,
                Ok(None) => {
                    warn!("channel {} not found, skipping its categories", channel_id);
                    candidates += 1;
                    skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!("could not load channel {}: {}", channel_id, e);
                    candidates += 1;
                    skipped += 1;
                    continue;
                }
            };
            if !matches!(channel.kind, ChannelKind::Open | ChannelKind::Private) {
                continue;
            }
            candidates += 1;
            let members = match directory.channel_members(channel_id) {
                Ok(members) => members,
                Err(e) => {
                    warn!("could not load members of channel {}: {}", channel_id, e);
                    skipped += 1;
                    continue;
                }
            };

            for user_id in members {
                if existing.contains(&(user_id.clone(), channel_id.clone())) {
                    continue;
                }
                let category_id = new_id(IdType::None);
                category_rows.push(vec![
                    category_id.clone().into(),
                    channel.display_name.clone().into(),
                    user_id.clone().into(),
                    channel.team_id.clone().into(),
                    channel_id.clone().into(),
                    now.into(),
                    now.into(),
                    0i64.into(),
                ]);
                for board_id in board_ids {
                    category_board_rows.push(vec![
                        new_id(IdType::None).into(),
                        user_id.clone().into(),
                        category_id.clone().into(),
                        board_id.clone().into(),
                        now.into(),
                        now.into(),
                        0i64.into(),
                    ]);
                }
            }
            repaired += 1;
        }

        let outcome = MigrationOutcome::from_counts(candidates, repaired, skipped);
        store
            .with_tx(|tx| {
                if read_flag(tx, d, t, CATEGORY_MIGRATION_KEY)? {
                    return Ok(MigrationOutcome::AlreadyCompleted);
                }
                let categories = insert_batched(tx, d, &t.categories(), CATEGORY_COLUMNS, category_rows)?;
                let links =
                    insert_batched(tx, d, &t.category_boards(), CATEGORY_BOARD_COLUMNS, category_board_rows)?;
                if outcome.is_done() {
                    write_setting(tx, d, t, CATEGORY_MIGRATION_KEY, "true")?;
                    info!(
                        "category migration complete ({} categories, {} board links, {} channels skipped)",
                        categories, links, skipped
                    );
                } else {
                    warn!("category migration incomplete: all {} channels failed, will retry", skipped);
                }
                Ok(outcome)
            })
            .inspect_err(|e| error!("category migration rolled back: {}", e))
    })
}
