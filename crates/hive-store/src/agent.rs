// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{db::Store, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Busy,
    Error,
    Disabled,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Error => "error",
            Self::Disabled => "disabled",
        }
    }
}

/// A persistent agent identity with routing metadata.
///
/// Runtime status and pheromone score are owned by the agent pool; rows here
/// are its durable backing.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AgentRecord {
    pub id: String,
    pub display_name: String,
    /// Default model alias for sessions that do not override it.
    pub model: String,
    /// Agent-specific system-prompt fragment.
    pub system_prompt: String,
    pub focus: String,
    pub status: AgentStatus,
    /// Routing preference in [0,1]; decays toward the 0.5 neutral point.
    pub pheromone: f64,
    pub consecutive_failures: i64,
    pub last_active: Option<DateTime<Utc>>,
    pub current_session: Option<String>,
    pub current_task: Option<String>,
}

/// Editable fields for the agents REST surface.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentPatch {
    pub display_name: Option<String>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub focus: Option<String>,
}

impl Store {
    /// Insert or refresh an agent row, preserving runtime columns on update.
    pub async fn upsert_agent(
        &self,
        id: &str,
        display_name: &str,
        model: &str,
        system_prompt: &str,
        focus: &str,
    ) -> Result<AgentRecord, StoreError> {
        sqlx::query(
            "INSERT INTO agents (id, display_name, model, system_prompt, focus) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT (id) DO UPDATE SET \
             display_name = excluded.display_name, \
             model = excluded.model, \
             system_prompt = excluded.system_prompt, \
             focus = excluded.focus",
        )
        .bind(id)
        .bind(display_name)
        .bind(model)
        .bind(system_prompt)
        .bind(focus)
        .execute(&self.pool)
        .await?;
        self.get_agent(id).await
    }

    pub async fn get_agent(&self, id: &str) -> Result<AgentRecord, StoreError> {
        sqlx::query_as::<_, AgentRecord>("SELECT * FROM agents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("agent {id}")))
    }

    pub async fn list_agents(&self) -> Result<Vec<AgentRecord>, StoreError> {
        let rows = sqlx::query_as::<_, AgentRecord>("SELECT * FROM agents ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn patch_agent(&self, id: &str, patch: AgentPatch) -> Result<AgentRecord, StoreError> {
        let _ = self.get_agent(id).await?;
        let mut qb = sqlx::QueryBuilder::new("UPDATE agents SET id = id");
        if let Some(v) = patch.display_name {
            qb.push(", display_name = ").push_bind(v);
        }
        if let Some(v) = patch.model {
            qb.push(", model = ").push_bind(v);
        }
        if let Some(v) = patch.system_prompt {
            qb.push(", system_prompt = ").push_bind(v);
        }
        if let Some(v) = patch.focus {
            qb.push(", focus = ").push_bind(v);
        }
        qb.push(" WHERE id = ").push_bind(id);
        qb.build().execute(&self.pool).await?;
        self.get_agent(id).await
    }

    /// Runtime-state write, reserved to the agent pool.
    pub async fn update_agent_runtime(
        &self,
        id: &str,
        status: AgentStatus,
        current_session: Option<&str>,
        current_task: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE agents SET status = ?, current_session = ?, current_task = ?, \
             last_active = ? WHERE id = ?",
        )
        .bind(status)
        .bind(current_session)
        .bind(current_task)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Score write, reserved to the agent pool.
    pub async fn update_agent_score(
        &self,
        id: &str,
        pheromone: f64,
        consecutive_failures: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE agents SET pheromone = ?, consecutive_failures = ? WHERE id = ?",
        )
        .bind(pheromone.clamp(0.0, 1.0))
        .bind(consecutive_failures)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
