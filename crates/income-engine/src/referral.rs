//! Referral graph
//!
//! A strict forest: every member stores only its parent pointer. Registration can
//! only attach a new member under an existing one, so no cycle can form. Traversals
//! are bounded walks of at most [`MAX_DEPTH`] levels.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tierfolio_core::{EngineError, EngineResult, UserId};
use tracing::info;

/// Depth of the network that earns boost income and counts toward salary turnover
pub const MAX_DEPTH: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub user_id: UserId,
    pub referrer: Option<UserId>,
    pub joined_at: DateTime<Utc>,
    /// First time one of the member's investments became ACTIVE
    pub paid_at: Option<DateTime<Utc>>,
}

impl Member {
    pub fn is_paid(&self) -> bool {
        self.paid_at.is_some()
    }
}

/// Directed edge from a root user to a member of their downline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralEdge {
    pub user_id: UserId,
    pub referred_user_id: UserId,
    /// Distance from `user_id`, 1 for a direct referral
    pub level: u8,
    pub is_paid: bool,
    pub joined_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct GraphState {
    members: HashMap<UserId, Member>,
    children: HashMap<UserId, Vec<UserId>>,
}

#[derive(Debug, Default)]
pub struct ReferralGraph {
    state: RwLock<GraphState>,
}

impl ReferralGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a member, optionally under an existing referrer
    pub fn register(
        &self,
        user_id: &str,
        referrer: Option<&str>,
        joined_at: DateTime<Utc>,
    ) -> EngineResult<Member> {
        if user_id.trim().is_empty() {
            return Err(EngineError::invalid_field("user_id", "user id is required"));
        }

        let mut state = self.state.write();
        if state.members.contains_key(user_id) {
            return Err(EngineError::DuplicateRequest(format!(
                "user {} is already registered",
                user_id
            )));
        }
        if let Some(parent) = referrer {
            if parent == user_id {
                return Err(EngineError::invalid_field("referrer", "a user cannot refer themselves"));
            }
            if !state.members.contains_key(parent) {
                return Err(EngineError::not_found(format!("referrer {}", parent)));
            }
        }

        let member = Member {
            user_id: user_id.to_string(),
            referrer: referrer.map(str::to_string),
            joined_at,
            paid_at: None,
        };
        if let Some(parent) = referrer {
            state
                .children
                .entry(parent.to_string())
                .or_default()
                .push(user_id.to_string());
        }
        state.members.insert(member.user_id.clone(), member.clone());

        info!(user = %user_id, referrer = ?referrer, "Member registered");
        Ok(member)
    }

    /// Marks a member as paid the first time; later calls keep the original instant
    pub fn mark_paid(&self, user_id: &str, at: DateTime<Utc>) -> bool {
        let mut state = self.state.write();
        match state.members.get_mut(user_id) {
            Some(member) if member.paid_at.is_none() => {
                member.paid_at = Some(at);
                info!(user = %user_id, "Member marked paid");
                true
            }
            _ => false,
        }
    }

    pub fn user_ids(&self) -> Vec<UserId> {
        self.state.read().members.keys().cloned().collect()
    }

    pub fn member(&self, user_id: &str) -> Option<Member> {
        self.state.read().members.get(user_id).cloned()
    }

    pub fn direct_referrals(&self, user_id: &str) -> Vec<Member> {
        let state = self.state.read();
        state
            .children
            .get(user_id)
            .map(|children| {
                children
                    .iter()
                    .filter_map(|child| state.members.get(child).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Current number of direct referrals
    pub fn referral_count(&self, user_id: &str) -> u32 {
        self.state
            .read()
            .children
            .get(user_id)
            .map_or(0, |children| children.len() as u32)
    }

    /// Ancestors of a member, nearest first, with their distance
    pub fn upline(&self, user_id: &str, depth: u8) -> Vec<(UserId, u8)> {
        let state = self.state.read();
        let mut out = Vec::new();
        let mut current = state.members.get(user_id).and_then(|m| m.referrer.clone());
        let mut level = 1;

        while let Some(ancestor) = current {
            if level > depth.min(MAX_DEPTH) {
                break;
            }
            current = state.members.get(&ancestor).and_then(|m| m.referrer.clone());
            out.push((ancestor, level));
            level += 1;
        }
        out
    }

    /// Members below `user_id` down to `depth` levels, breadth first
    pub fn downline(&self, user_id: &str, depth: u8) -> Vec<ReferralEdge> {
        let state = self.state.read();
        let mut out = Vec::new();
        let mut frontier = vec![user_id.to_string()];

        for level in 1..=depth.min(MAX_DEPTH) {
            let mut next = Vec::new();
            for parent in &frontier {
                let Some(children) = state.children.get(parent) else {
                    continue;
                };
                for child in children {
                    if let Some(member) = state.members.get(child) {
                        out.push(ReferralEdge {
                            user_id: user_id.to_string(),
                            referred_user_id: member.user_id.clone(),
                            level,
                            is_paid: member.is_paid(),
                            joined_at: member.joined_at,
                            paid_at: member.paid_at,
                        });
                        next.push(child.clone());
                    }
                }
            }
            frontier = next;
        }
        out
    }
}
