//! The approval workflow: the operation contract tying player queries,
//! AI drafting, and GM disposition together. These are the only
//! operations that return errors to a caller; everything beneath them
//! degrades silently.

use crate::active_view::CharonMode;
use crate::session::{ChannelMessage, Role};
use crate::AppState;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

const ENCOUNTER_PREFIX: &str = "encounter-";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("CHARON is not accepting queries on this display")]
    QueriesDisabled,
    #[error("query text is required")]
    EmptyQuery,
    #[error("unknown pending response: {0}")]
    UnknownPending(String),
}

/// Returned to the submitting client so it can correlate its query with
/// the eventually approved reply.
#[derive(Clone, Debug, Serialize)]
pub struct SubmitOutcome {
    pub message_id: String,
    pub pending_id: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct ChannelSummary {
    pub channel: String,
    pub message_count: usize,
    pub pending_count: usize,
    pub unread_count: usize,
    pub last_activity: Option<String>,
}

/// A player query on a channel: gate on the display mode, append the
/// user message, draft an AI reply against the channel's location, and
/// queue it for GM approval. The reply is not player-visible until
/// approved.
pub async fn submit_query(
    state: &AppState,
    channel: &str,
    query: &str,
) -> Result<SubmitOutcome, ApiError> {
    let view = state.active_view.snapshot();
    if view.charon_mode != CharonMode::Query {
        return Err(ApiError::QueriesDisabled);
    }
    let query = query.trim();
    if query.is_empty() {
        return Err(ApiError::EmptyQuery);
    }

    let message = ChannelMessage::new(Role::User, query);
    let message_id = message.id.clone();
    state.sessions.add_message(channel, message);

    let location = resolve_channel_location(state, channel, &view.charon_location_path);
    let responder =
        state
            .responders
            .get_or_build(&state.config, &state.locations, location.as_deref());
    let history = state.sessions.conversation(channel);
    let response = responder.generate_response(query, &history).await;
    let pending_id = state.sessions.add_pending(channel, query, &response, &message_id);

    info!(
        "query on {} queued as pending {} (location: {:?})",
        channel, pending_id, location
    );
    Ok(SubmitOutcome {
        message_id,
        pending_id,
    })
}

/// GM-initiated draft: same drafting path as a player query, but the
/// query text is synthesized from the GM's prompt and nothing is
/// appended to the conversation until approval.
pub async fn generate_draft(
    state: &AppState,
    channel: &str,
    prompt: &str,
    context_override: Option<&str>,
) -> Result<String, ApiError> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Err(ApiError::EmptyQuery);
    }
    let query = match context_override {
        Some(extra) if !extra.trim().is_empty() => {
            format!("{}\n\nADDITIONAL CONTEXT: {}", prompt, extra.trim())
        }
        _ => prompt.to_string(),
    };

    let view = state.active_view.snapshot();
    let location = resolve_channel_location(state, channel, &view.charon_location_path);
    let responder =
        state
            .responders
            .get_or_build(&state.config, &state.locations, location.as_deref());
    let history = state.sessions.conversation(channel);
    let response = responder.generate_response(&query, &history).await;
    let pending_id = state.sessions.add_pending(channel, &query, &response, "");

    info!("gm draft on {} queued as pending {}", channel, pending_id);
    Ok(pending_id)
}

/// Approves a pending draft, optionally with GM edits.
pub fn approve(
    state: &AppState,
    channel: &str,
    pending_id: &str,
    modified_content: Option<&str>,
) -> Result<(), ApiError> {
    if state.sessions.approve(channel, pending_id, modified_content) {
        Ok(())
    } else {
        Err(ApiError::UnknownPending(pending_id.to_string()))
    }
}

/// Rejects a pending draft; nothing reaches the conversation.
pub fn reject(state: &AppState, channel: &str, pending_id: &str) -> Result<(), ApiError> {
    if state.sessions.reject(channel, pending_id) {
        Ok(())
    } else {
        Err(ApiError::UnknownPending(pending_id.to_string()))
    }
}

/// Per-channel counts for the GM console sidebar.
pub fn channel_overview(state: &AppState) -> Vec<ChannelSummary> {
    state
        .sessions
        .channels()
        .into_iter()
        .map(|channel| {
            let conversation = state.sessions.conversation(&channel);
            let marker = state.sessions.last_read(&channel);
            let unread = state
                .sessions
                .unread_count(&channel, marker.as_ref().map(|m| m.message_id.as_str()));
            ChannelSummary {
                message_count: conversation.len(),
                pending_count: state.sessions.pending(&channel).len(),
                unread_count: unread,
                last_activity: conversation.last().map(|m| m.timestamp.clone()),
                channel,
            }
        })
        .collect()
}

pub fn mark_channel_read(state: &AppState, channel: &str, gm_user: Option<&str>) {
    state.sessions.mark_read(channel, gm_user);
}

pub fn clear_channel(state: &AppState, channel: &str) {
    state.sessions.clear(channel);
    info!("cleared channel {}", channel);
}

/// Drops every cached responder so edited persona/location/lore files
/// are re-read on the next query.
pub fn clear_responders(state: &AppState) {
    state.responders.clear();
    info!("responder cache cleared");
}

/// Resolves which location a channel's CHARON speaks from. Encounter
/// channels (`encounter-<slug>`) resolve the slug through the location
/// tree and take priority; otherwise the explicitly configured path
/// applies. No location is a valid answer.
fn resolve_channel_location(
    state: &AppState,
    channel: &str,
    configured_path: &str,
) -> Option<String> {
    if let Some(slug) = channel.strip_prefix(ENCOUNTER_PREFIX) {
        if let Some(path) = state.locations.location_path(slug) {
            return Some(path.join("/"));
        }
    }
    if configured_path.is_empty() {
        None
    } else {
        Some(configured_path.to_string())
    }
}
