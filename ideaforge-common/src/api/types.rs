//! Request/response types for the workshop coordinator API
//!
//! Kept in the common crate so integration tests and future service
//! binaries share one wire vocabulary.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// POST /api/session response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub session_id: Uuid,
    /// Credential for owner-only operations; returned exactly once
    pub owner_token: Uuid,
}

/// POST /api/session/:id/join request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    pub display_name: String,
}

/// POST /api/session/:id/join and /participants/ai response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinResponse {
    pub participant_id: Uuid,
}

/// POST /api/session/:id/participants/ai request (owner only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddAiParticipantRequest {
    pub display_name: String,
}

/// PUT /api/session/:id/context request (owner only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetContextRequest {
    pub company_context: String,
}

/// POST /api/session/:id/step request (owner only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetStepRequest {
    pub step: u8,
}

/// POST /api/session/:id/ideas request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitIdeasRequest {
    pub ideas: Vec<String>,
}

/// POST /api/session/:id/ideas/ai request (owner acting for the AI participant)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiIdeasRequest {
    pub participant_id: Uuid,
}

/// POST /api/session/:id/ideas/ai response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiIdeasResponse {
    pub ideas: Vec<String>,
    /// True when the batch was served from an earlier call for the same round
    pub cached: bool,
}

/// POST /api/session/:id/advance request (owner only)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdvanceRequest {
    /// Bypass the all-submitted gate
    #[serde(default)]
    pub force: bool,
}

/// POST /api/session/:id/clusters request (owner only)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateClustersRequest {
    /// Replace existing clusters; invalidates votes and selection
    #[serde(default)]
    pub regenerate: bool,
}

/// POST /api/session/:id/clusters/select request (owner only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectClusterRequest {
    pub cluster_id: String,
}

/// POST /api/session/:id/votes/{cluster,idea} request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRequest {
    /// target id → points; points sum to exactly 3, each ≥ 1
    pub allocation: BTreeMap<String, u32>,
}

/// Generic acknowledgment body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
}

impl Ack {
    pub fn ok() -> Self {
        Self { ok: true }
    }
}
