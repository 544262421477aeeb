//! Board ownership repairs.
//!
//! * Teamless boards: live boards with an empty `team_id` whose channel is a
//!   direct or group message. They move to the best-fit team and become
//!   private.
//! * Deleted-membership boards: live boards whose creator's membership in the
//!   board's team was deleted. They move to the best-fit team.
//!
//! Directory lookups happen outside the database transaction. A lookup
//! failure skips that board; a database failure rolls the whole pass back.

use std::collections::BTreeMap;

use tracing::{debug, error, info, warn};

use blockbase_types::{Board, BoardType};

use super::{
    DELETED_MEMBERSHIP_BOARDS_MIGRATION_KEY, MigrationLock, MigrationOutcome,
    TEAMLESS_BOARDS_MIGRATION_KEY, locked,
};
use crate::boards::{BOARD_COLUMNS, board_from_row, set_board_owner};
use crate::dialect::Dialect;
use crate::directory::{Channel, ChannelKind, DirectoryError, Membership, TeamDirectory};
use crate::error::StoreResult;
use crate::settings::{read_flag, write_setting};
use crate::store::{SqlStore, query_rows};

/// Pick the team a channel's boards should belong to.
///
/// Members without an active team are ignored. The first team every
/// remaining member belongs to wins (first member in id order, their team
/// order). Failing that, a direct message goes to its creator's first team,
/// which requires the creator to be one of those members, and any other
/// channel to the team with the most members, the first team to reach that
/// count winning ties.
pub fn best_team_for_channel(
    directory: &dyn TeamDirectory,
    channel: &Channel,
    creator_id: &str,
) -> Result<String, DirectoryError> {
    let mut member_teams = directory.channel_member_teams(&channel.id)?;
    member_teams.retain(|_, teams| !teams.is_empty());

    if let Some(first_teams) = member_teams.values().next() {
        if let Some(common) = first_teams
            .iter()
            .find(|team| member_teams.values().all(|teams| teams.contains(*team)))
        {
            return Ok(common.clone());
        }
    }

    if channel.kind == ChannelKind::Direct {
        let creator = if channel.creator_id.is_empty() {
            creator_id
        } else {
            channel.creator_id.as_str()
        };
        return member_teams
            .get(creator)
            .and_then(|teams| teams.first())
            .cloned()
            .ok_or_else(|| DirectoryError::CreatorNotInTeam {
                channel: channel.id.clone(),
                creator: creator.to_string(),
            });
    }

    let mut frequency: BTreeMap<&str, usize> = BTreeMap::new();
    let mut best: Option<(&str, usize)> = None;
    for team in member_teams.values().flatten() {
        let count = frequency.entry(team.as_str()).or_default();
        *count += 1;
        if best.is_none_or(|(_, max)| *count > max) {
            best = Some((team.as_str(), *count));
        }
    }
    best.map(|(team, _)| team.to_string())
        .ok_or_else(|| DirectoryError::NoActiveTeam(channel.id.clone()))
}

/// Best-fit team for one board, from its channel when it has one, else from
/// its creator's teams.
fn best_team_for_board(directory: &dyn TeamDirectory, board: &Board) -> Result<String, DirectoryError> {
    if board.channel_id.is_empty() {
        return directory
            .user_teams(&board.created_by)?
            .into_iter()
            .next()
            .ok_or_else(|| DirectoryError::NoActiveTeam(board.created_by.clone()));
    }
    let channel = directory
        .channel(&board.channel_id)?
        .ok_or_else(|| DirectoryError::ChannelNotFound(board.channel_id.clone()))?;
    best_team_for_channel(directory, &channel, &board.created_by)
}

/// A planned reassignment.
struct Reassignment {
    board_id: String,
    team_id: String,
    board_type: Option<BoardType>,
}

fn live_boards<D: Dialect>(store: &SqlStore<D>, teamless: bool) -> StoreResult<Vec<Board>> {
    let mut q = store.query();
    q.push(&format!(
        "SELECT {BOARD_COLUMNS} FROM {} WHERE delete_at = 0 AND team_id {} '' ORDER BY id",
        store.tables().boards(),
        if teamless { "=" } else { "<>" }
    ));
    store.with_conn(|conn| query_rows(conn, &q, board_from_row))
}

/// Shared driver: flag check, lock, plan outside the transaction, apply.
fn run_repair<D: Dialect>(
    store: &SqlStore<D>,
    key: &str,
    plan: impl FnOnce(&dyn TeamDirectory, &MigrationLock<'_>) -> StoreResult<(Vec<Reassignment>, usize, usize)>,
) -> StoreResult<MigrationOutcome> {
    let (d, t) = (store.dialect(), store.tables());
    if store.with_conn(|conn| read_flag(conn, d, t, key))? {
        return Ok(MigrationOutcome::AlreadyCompleted);
    }

    locked(store, key, |lock| {
        if store.with_conn(|conn| read_flag(conn, d, t, key))? {
            return Ok(MigrationOutcome::AlreadyCompleted);
        }
        let directory = match (store.is_plugin(), store.directory()) {
            (true, Some(directory)) => directory,
            (true, None) => {
                warn!("{} needs the team directory, deferring", key);
                return Ok(MigrationOutcome::Deferred);
            }
            (false, _) => {
                store.with_tx(|tx| write_setting(tx, d, t, key, "true"))?;
                return Ok(MigrationOutcome::NotApplicable);
            }
        };

        info!("running {}", key);
        let (reassignments, candidates, skipped) = plan(directory, lock)?;
        let outcome = MigrationOutcome::from_counts(candidates, reassignments.len(), skipped);

        store
            .with_tx(|tx| {
                if read_flag(tx, d, t, key)? {
                    return Ok(MigrationOutcome::AlreadyCompleted);
                }
                for r in &reassignments {
                    set_board_owner(tx, d, t, &r.board_id, &r.team_id, r.board_type)?;
                    debug!("moved board {} to team {}", r.board_id, r.team_id);
                }
                if outcome.is_done() {
                    write_setting(tx, d, t, key, "true")?;
                    info!(
                        "{} complete ({} boards moved, {} skipped)",
                        key,
                        reassignments.len(),
                        skipped
                    );
                } else {
                    warn!("{} incomplete: all {} boards failed, will retry", key, skipped);
                }
                Ok(outcome)
            })
            .inspect_err(|e| error!("{} rolled back: {}", key, e))
    })
}

pub(crate) fn run_teamless<D: Dialect>(store: &SqlStore<D>) -> StoreResult<MigrationOutcome> {
    run_repair(store, TEAMLESS_BOARDS_MIGRATION_KEY, |directory, lock| {
        let mut cache: BTreeMap<String, String> = BTreeMap::new();
        let mut plan = Vec::new();
        let (mut candidates, mut skipped) = (0, 0);

        for board in live_boards(store, true)? {
            if board.channel_id.is_empty() {
                continue;
            }
            lock.refresh()?;
            let team_id = match cache.get(&board.channel_id) {
                Some(team_id) => team_id.clone(),
                None => {
                    let channel = match directory.channel(&board.channel_id) {
                        Ok(Some(channel)) => channel,
                        Ok(None) => {
                            candidates += 1;
                            skipped += 1;
                            warn!("channel {} of board {} not found, skipping", board.channel_id, board.id);
                            continue;
                        }
                        Err(e) => {
                            candidates += 1;
                            skipped += 1;
                            warn!("could not load channel of board {}: {}", board.id, e);
                            continue;
                        }
                    };
                    if !channel.kind.is_direct_or_group() {
                        continue;
                    }
                    candidates += 1;
                    match best_team_for_channel(directory, &channel, &board.created_by) {
                        Ok(team_id) => {
                            cache.insert(board.channel_id.clone(), team_id.clone());
                            team_id
                        }
                        Err(e) => {
                            skipped += 1;
                            warn!("no team found for teamless board {}: {}", board.id, e);
                            continue;
                        }
                    }
                }
            };
            plan.push(Reassignment {
                board_id: board.id,
                team_id,
                board_type: Some(BoardType::Private),
            });
        }
        Ok((plan, candidates, skipped))
    })
}

pub(crate) fn run_deleted_membership<D: Dialect>(store: &SqlStore<D>) -> StoreResult<MigrationOutcome> {
    run_repair(store, DELETED_MEMBERSHIP_BOARDS_MIGRATION_KEY, |directory, lock| {
        let mut plan = Vec::new();
        let (mut candidates, mut skipped) = (0, 0);

        for board in live_boards(store, false)? {
            lock.refresh()?;
            match directory.team_membership(&board.team_id, &board.created_by) {
                Ok(Membership::Deleted) => {}
                Ok(_) => continue,
                Err(e) => {
                    candidates += 1;
                    skipped += 1;
                    warn!("could not check membership for board {}: {}", board.id, e);
                    continue;
                }
            }
            candidates += 1;
            match best_team_for_board(directory, &board) {
                Ok(team_id) if team_id == board.team_id => {
                    debug!("board {} already in its best team {}", board.id, team_id);
                }
                Ok(team_id) => plan.push(Reassignment {
                    board_id: board.id,
                    team_id,
                    board_type: None,
                }),
                Err(e) => {
                    skipped += 1;
                    warn!("no team found for board {}: {}", board.id, e);
                }
            }
        }
        Ok((plan, candidates, skipped))
    })
}
