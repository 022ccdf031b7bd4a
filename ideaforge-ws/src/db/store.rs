//! Session persistence
//!
//! Targeted writes, one transaction per state transition: the
//! coordinator opens a transaction, writes the transition plus its
//! event row, commits, and only then applies the change in memory and
//! publishes. `load_all` rebuilds every session aggregate at startup.

use chrono::{DateTime, Utc};
use ideaforge_common::events::EventEnvelope;
use ideaforge_common::model::{
    Cluster, IdeaBatch, IdeaLabel, LevelLabel, Participant, ParticipantKind, SessionPhase,
    VoteAllocation, VotePhase, IDEAS_PER_BATCH,
};
use ideaforge_common::{Error, Result};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::session::sheets;
use crate::session::state::SessionState;

pub type Tx<'a> = Transaction<'a, Sqlite>;

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| Error::Internal(format!("corrupt uuid {:?}: {}", value, e)))
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("corrupt timestamp {:?}: {}", value, e)))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::Internal(format!("serialize: {}", e)))
}

fn from_json<T: serde::de::DeserializeOwned>(value: &str) -> Result<T> {
    serde_json::from_str(value).map_err(|e| Error::Internal(format!("deserialize: {}", e)))
}

// ----------------------------------------------------------------------
// Writes
// ----------------------------------------------------------------------

pub async fn insert_session(tx: &mut Tx<'_>, state: &SessionState) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO sessions (id, owner_token, created_at, step, phase)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(state.id.to_string())
    .bind(state.owner_token.to_string())
    .bind(state.created_at.to_rfc3339())
    .bind(state.step as i64)
    .bind(to_json(&state.phase)?)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn insert_participant(
    tx: &mut Tx<'_>,
    session_id: Uuid,
    participant: &Participant,
    join_order: usize,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO participants
            (session_id, participant_id, display_name, kind, is_owner, joined_at, connected, join_order)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(session_id.to_string())
    .bind(participant.id.to_string())
    .bind(&participant.display_name)
    .bind(to_json(&participant.kind)?)
    .bind(participant.is_owner)
    .bind(participant.joined_at.to_rfc3339())
    .bind(participant.connected)
    .bind(join_order as i64)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn set_participant_connected(
    tx: &mut Tx<'_>,
    session_id: Uuid,
    participant_id: Uuid,
    connected: bool,
) -> Result<()> {
    sqlx::query(
        "UPDATE participants SET connected = ? WHERE session_id = ? AND participant_id = ?",
    )
    .bind(connected)
    .bind(session_id.to_string())
    .bind(participant_id.to_string())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn update_phase(tx: &mut Tx<'_>, session_id: Uuid, phase: &SessionPhase) -> Result<()> {
    sqlx::query("UPDATE sessions SET phase = ? WHERE id = ?")
        .bind(to_json(phase)?)
        .bind(session_id.to_string())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

pub async fn update_step(tx: &mut Tx<'_>, session_id: Uuid, step: u8) -> Result<()> {
    sqlx::query("UPDATE sessions SET step = ? WHERE id = ?")
        .bind(step as i64)
        .bind(session_id.to_string())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

pub async fn update_context(tx: &mut Tx<'_>, session_id: Uuid, context: &str) -> Result<()> {
    sqlx::query("UPDATE sessions SET company_context = ? WHERE id = ?")
        .bind(context)
        .bind(session_id.to_string())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

pub async fn update_selection(
    tx: &mut Tx<'_>,
    session_id: Uuid,
    selected: Option<&str>,
    assessed: Option<&str>,
) -> Result<()> {
    sqlx::query("UPDATE sessions SET selected_cluster = ?, assessed_cluster = ? WHERE id = ?")
        .bind(selected)
        .bind(assessed)
        .bind(session_id.to_string())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

pub async fn insert_idea_batch(
    tx: &mut Tx<'_>,
    session_id: Uuid,
    sheet: usize,
    round: u8,
    batch: &IdeaBatch,
) -> Result<()> {
    for (offset, text) in batch.ideas.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO ideas
                (session_id, sheet_index, round, position, author, idea_text, submitted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(session_id.to_string())
        .bind(sheet as i64)
        .bind(round as i64)
        .bind(offset as i64 + 1)
        .bind(batch.author.to_string())
        .bind(text)
        .bind(batch.submitted_at.to_rfc3339())
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

/// Replace the full cluster set. Also clears votes of both phases, idea
/// labels, and the selection columns, matching the in-memory
/// invalidation on regeneration.
pub async fn replace_clusters(
    tx: &mut Tx<'_>,
    session_id: Uuid,
    clusters: &[Cluster],
) -> Result<()> {
    let sid = session_id.to_string();
    for table in ["clusters", "cluster_members", "idea_labels", "votes"] {
        sqlx::query(&format!("DELETE FROM {} WHERE session_id = ?", table))
            .bind(&sid)
            .execute(&mut **tx)
            .await?;
    }
    sqlx::query("UPDATE sessions SET selected_cluster = NULL, assessed_cluster = NULL WHERE id = ?")
        .bind(&sid)
        .execute(&mut **tx)
        .await?;

    for (position, cluster) in clusters.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO clusters
                (session_id, cluster_id, position, name, description,
                 business_impact, implementation_effort, maturity_appropriateness,
                 impact_rationale, maturity_rationale, fallback)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&sid)
        .bind(&cluster.id)
        .bind(position as i64)
        .bind(&cluster.name)
        .bind(&cluster.description)
        .bind(to_json(&cluster.business_impact)?)
        .bind(to_json(&cluster.implementation_effort)?)
        .bind(to_json(&cluster.maturity_appropriateness)?)
        .bind(&cluster.impact_rationale)
        .bind(&cluster.maturity_rationale)
        .bind(cluster.fallback)
        .execute(&mut **tx)
        .await?;

        for (member_position, idea_id) in cluster.member_idea_ids.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO cluster_members (session_id, cluster_id, idea_id, position)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&sid)
            .bind(&cluster.id)
            .bind(idea_id)
            .bind(member_position as i64)
            .execute(&mut **tx)
            .await?;
        }
    }
    Ok(())
}

pub async fn insert_vote(
    tx: &mut Tx<'_>,
    session_id: Uuid,
    phase: VotePhase,
    allocation: &VoteAllocation,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO votes (session_id, phase, participant_id, allocation)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(session_id.to_string())
    .bind(phase.as_str())
    .bind(allocation.participant.to_string())
    .bind(to_json(&allocation.points)?)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn clear_idea_labels(tx: &mut Tx<'_>, session_id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM idea_labels WHERE session_id = ?")
        .bind(session_id.to_string())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

pub async fn store_idea_labels(
    tx: &mut Tx<'_>,
    session_id: Uuid,
    assessed_cluster: &str,
    labels: &[IdeaLabel],
) -> Result<()> {
    let sid = session_id.to_string();
    sqlx::query("DELETE FROM idea_labels WHERE session_id = ?")
        .bind(&sid)
        .execute(&mut **tx)
        .await?;
    for label in labels {
        sqlx::query(
            r#"
            INSERT INTO idea_labels
                (session_id, idea_id, business_impact, implementation_effort, impact_rationale)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&sid)
        .bind(&label.idea_id)
        .bind(to_json(&label.business_impact)?)
        .bind(to_json(&label.implementation_effort)?)
        .bind(&label.impact_rationale)
        .execute(&mut **tx)
        .await?;
    }
    sqlx::query("UPDATE sessions SET assessed_cluster = ? WHERE id = ?")
        .bind(assessed_cluster)
        .bind(&sid)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

pub async fn append_event(tx: &mut Tx<'_>, envelope: &EventEnvelope) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO events (session_id, seq, ts, payload)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(envelope.session_id.to_string())
    .bind(envelope.seq as i64)
    .bind(envelope.ts.to_rfc3339())
    .bind(to_json(envelope)?)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

// ----------------------------------------------------------------------
// Load
// ----------------------------------------------------------------------

/// Rebuild every persisted session aggregate. Called once at startup.
pub async fn load_all(pool: &SqlitePool) -> Result<Vec<SessionState>> {
    let session_rows = sqlx::query(
        r#"
        SELECT id, owner_token, created_at, step, phase,
               company_context, selected_cluster, assessed_cluster
        FROM sessions
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut sessions = Vec::with_capacity(session_rows.len());
    for row in session_rows {
        let id = parse_uuid(&row.get::<String, _>("id"))?;
        let phase: SessionPhase = from_json(&row.get::<String, _>("phase"))?;

        let mut state = SessionState::new(parse_time(&row.get::<String, _>("created_at"))?);
        state.id = id;
        state.owner_token = parse_uuid(&row.get::<String, _>("owner_token"))?;
        state.step = row.get::<i64, _>("step") as u8;
        state.phase = phase;
        state.company_context = row.get("company_context");
        state.selected_cluster = row.get("selected_cluster");
        state.assessed_cluster = row.get("assessed_cluster");

        load_participants(pool, &mut state).await?;
        load_ideas(pool, &mut state).await?;
        load_clusters(pool, &mut state).await?;
        load_labels(pool, &mut state).await?;
        load_votes(pool, &mut state).await?;
        load_events(pool, &mut state).await?;
        rebuild_submitted(&mut state);

        sessions.push(state);
    }
    Ok(sessions)
}

async fn load_participants(pool: &SqlitePool, state: &mut SessionState) -> Result<()> {
    let rows = sqlx::query(
        r#"
        SELECT participant_id, display_name, kind, is_owner, joined_at, connected
        FROM participants
        WHERE session_id = ?
        ORDER BY join_order
        "#,
    )
    .bind(state.id.to_string())
    .fetch_all(pool)
    .await?;

    for row in rows {
        let kind: ParticipantKind = from_json(&row.get::<String, _>("kind"))?;
        state.participants.push(Participant {
            id: parse_uuid(&row.get::<String, _>("participant_id"))?,
            display_name: row.get("display_name"),
            kind,
            is_owner: row.get("is_owner"),
            joined_at: parse_time(&row.get::<String, _>("joined_at"))?,
            connected: row.get("connected"),
        });
    }
    Ok(())
}

async fn load_ideas(pool: &SqlitePool, state: &mut SessionState) -> Result<()> {
    let rows = sqlx::query(
        r#"
        SELECT sheet_index, round, position, author, idea_text, submitted_at
        FROM ideas
        WHERE session_id = ?
        ORDER BY sheet_index, round, position
        "#,
    )
    .bind(state.id.to_string())
    .fetch_all(pool)
    .await?;

    let mut slots: BTreeMap<(usize, u8), Vec<(Uuid, DateTime<Utc>, String)>> = BTreeMap::new();
    for row in rows {
        let sheet = row.get::<i64, _>("sheet_index") as usize;
        let round = row.get::<i64, _>("round") as u8;
        slots.entry((sheet, round)).or_default().push((
            parse_uuid(&row.get::<String, _>("author"))?,
            parse_time(&row.get::<String, _>("submitted_at"))?,
            row.get("idea_text"),
        ));
    }

    for ((sheet, round), entries) in slots {
        if entries.len() != IDEAS_PER_BATCH {
            return Err(Error::Internal(format!(
                "slot (sheet {}, round {}) holds {} ideas",
                sheet,
                round,
                entries.len()
            )));
        }
        let (author, submitted_at, _) = entries[0].clone();
        let texts: Vec<String> = entries.into_iter().map(|(_, _, text)| text).collect();
        let ideas = <[String; IDEAS_PER_BATCH]>::try_from(texts)
            .map_err(|_| Error::Internal("idea batch shape".into()))?;
        state
            .ideas
            .insert((sheet, round), IdeaBatch { author, submitted_at, ideas });
    }
    Ok(())
}

async fn load_clusters(pool: &SqlitePool, state: &mut SessionState) -> Result<()> {
    let rows = sqlx::query(
        r#"
        SELECT cluster_id, name, description, business_impact, implementation_effort,
               maturity_appropriateness, impact_rationale, maturity_rationale, fallback
        FROM clusters
        WHERE session_id = ?
        ORDER BY position
        "#,
    )
    .bind(state.id.to_string())
    .fetch_all(pool)
    .await?;

    for row in rows {
        let cluster_id: String = row.get("cluster_id");
        let member_rows = sqlx::query(
            r#"
            SELECT idea_id FROM cluster_members
            WHERE session_id = ? AND cluster_id = ?
            ORDER BY position
            "#,
        )
        .bind(state.id.to_string())
        .bind(&cluster_id)
        .fetch_all(pool)
        .await?;

        let business_impact: LevelLabel = from_json(&row.get::<String, _>("business_impact"))?;
        let implementation_effort: LevelLabel =
            from_json(&row.get::<String, _>("implementation_effort"))?;
        let maturity_appropriateness: LevelLabel =
            from_json(&row.get::<String, _>("maturity_appropriateness"))?;

        state.clusters.push(Cluster {
            id: cluster_id,
            name: row.get("name"),
            description: row.get("description"),
            member_idea_ids: member_rows.iter().map(|r| r.get("idea_id")).collect(),
            business_impact,
            implementation_effort,
            maturity_appropriateness,
            impact_rationale: row.get("impact_rationale"),
            maturity_rationale: row.get("maturity_rationale"),
            fallback: row.get("fallback"),
        });
    }
    Ok(())
}

async fn load_labels(pool: &SqlitePool, state: &mut SessionState) -> Result<()> {
    let rows = sqlx::query(
        r#"
        SELECT idea_id, business_impact, implementation_effort, impact_rationale
        FROM idea_labels
        WHERE session_id = ?
        "#,
    )
    .bind(state.id.to_string())
    .fetch_all(pool)
    .await?;

    for row in rows {
        let idea_id: String = row.get("idea_id");
        let business_impact: LevelLabel = from_json(&row.get::<String, _>("business_impact"))?;
        let implementation_effort: LevelLabel =
            from_json(&row.get::<String, _>("implementation_effort"))?;
        state.idea_labels.insert(
            idea_id.clone(),
            IdeaLabel {
                idea_id,
                business_impact,
                implementation_effort,
                impact_rationale: row.get("impact_rationale"),
            },
        );
    }
    Ok(())
}

async fn load_votes(pool: &SqlitePool, state: &mut SessionState) -> Result<()> {
    let rows = sqlx::query(
        r#"
        SELECT phase, participant_id, allocation
        FROM votes
        WHERE session_id = ?
        "#,
    )
    .bind(state.id.to_string())
    .fetch_all(pool)
    .await?;

    for row in rows {
        let participant = parse_uuid(&row.get::<String, _>("participant_id"))?;
        let points: BTreeMap<String, u32> = from_json(&row.get::<String, _>("allocation"))?;
        let allocation = VoteAllocation { participant, points };
        match row.get::<String, _>("phase").as_str() {
            "cluster" => state.cluster_votes.insert(participant, allocation),
            "idea" => state.idea_votes.insert(participant, allocation),
            other => return Err(Error::Internal(format!("corrupt vote phase {:?}", other))),
        };
    }
    Ok(())
}

async fn load_events(pool: &SqlitePool, state: &mut SessionState) -> Result<()> {
    let rows = sqlx::query(
        "SELECT payload FROM events WHERE session_id = ? ORDER BY seq",
    )
    .bind(state.id.to_string())
    .fetch_all(pool)
    .await?;

    for row in rows {
        let envelope: EventEnvelope = from_json(&row.get::<String, _>("payload"))?;
        state.next_seq = envelope.seq + 1;
        state.events.push(envelope);
    }
    Ok(())
}

/// Derive the submitted-for-current-round set from the idea store:
/// participant p has submitted iff the sheet p holds this round already
/// carries p's batch.
fn rebuild_submitted(state: &mut SessionState) {
    let round = match state.phase {
        SessionPhase::InRound { round } => round,
        _ => return,
    };
    let n = state.participants.len();
    let submitted: Vec<Uuid> = state
        .participants
        .iter()
        .enumerate()
        .filter_map(|(index, participant)| {
            let sheet = sheets::sheet_held_by(index, round, n);
            state
                .ideas
                .get(&(sheet, round))
                .filter(|batch| batch.author == participant.id)
                .map(|_| participant.id)
        })
        .collect();
    state.submitted.extend(submitted);
}
